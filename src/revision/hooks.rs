//! Work done around establishing a revision's objects.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::render::{self, CrdInfo, RenderContext};
use crate::api::{DeploymentType, ObjectKey, PackageMeta, PackageRevision, Reference, Resource};
use crate::pkg::lint::CRD_KIND;
use crate::store::Client;

const ERR_GET_CRD: &str = "cannot get crd";
const ERR_DELETE_WORKLOAD: &str = "cannot delete package controller workload";
const ERR_DELETE_SA: &str = "cannot delete package service account";
const ERR_APPLY_CERTIFICATE: &str = "cannot apply package certificate";
const ERR_APPLY_SERVICE: &str = "cannot apply package service";
const ERR_APPLY_MUTATE_WEBHOOK: &str = "cannot apply package mutate webhook";
const ERR_APPLY_VALIDATE_WEBHOOK: &str = "cannot apply package validate webhook";
const ERR_APPLY_SA: &str = "cannot apply package service account";
const ERR_APPLY_WORKLOAD: &str = "cannot apply package controller workload";
const ERR_UNAVAILABLE_DEPLOYMENT: &str = "package deployment is unavailable";

/// Extra named `grpc` whose service is handed to the controller.
const GRPC_EXTRA: &str = "grpc";

/// Work around the establish step of a revision pass.
///
/// Both methods may update the revision status in place. The reconciler
/// persists it afterwards, whatever the outcome.
#[async_trait]
pub trait Hooks: Send + Sync {
    /// Runs before objects are established. An error marks the revision
    /// unhealthy and skips establishing.
    async fn pre(&self, meta: &PackageMeta, revision: &mut PackageRevision, crds: &[String]) -> Result<()>;

    /// Runs after objects are established. `crds` names the established CRDs.
    async fn post(&self, meta: &PackageMeta, revision: &mut PackageRevision, crds: &[String]) -> Result<()>;
}

/// Stands up and tears down the controller a package ships.
pub struct ProviderHooks {
    client: Client,
    namespace: String,
}

impl ProviderHooks {
    /// Runtime objects are created in `namespace`.
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    async fn crds(&self, names: &[String]) -> Result<Vec<CrdInfo>> {
        let mut crds = Vec::with_capacity(names.len());
        for name in names {
            let crd = self
                .client
                .get_dynamic(&ObjectKey::new(CRD_KIND, name))
                .await
                .with_context(|| format!("{ERR_GET_CRD} {name}"))?;
            match CrdInfo::from_object(&crd) {
                Some(info) => crds.push(info),
                None => debug!(crd = %name, "CRD has no served versions, no webhook rules"),
            }
        }
        Ok(crds)
    }
}

#[async_trait]
impl Hooks for ProviderHooks {
    /// Record the permissions the controller asks for, and remove the
    /// controller of a revision that is no longer active.
    async fn pre(&self, meta: &PackageMeta, revision: &mut PackageRevision, _: &[String]) -> Result<()> {
        let Some(pod) = meta.spec.pods.as_ref() else {
            revision.status.permission_requests.clear();
            return Ok(());
        };
        revision.status.permission_requests = pod.permission_requests.clone();

        if revision.is_active() {
            return Ok(());
        }

        let ctx = RenderContext {
            pod,
            revision,
            namespace: &self.namespace,
        };
        let workload = render::workload(&ctx, None);
        let service_account = render::service_account(&ctx);

        debug!(revision = %revision.name(), "Removing controller of inactive revision");
        self.client
            .delete_ignore_not_found(&workload.key())
            .await
            .context(ERR_DELETE_WORKLOAD)?;
        self.client
            .delete_ignore_not_found(&service_account.key())
            .await
            .context(ERR_DELETE_SA)?;
        Ok(())
    }

    /// Apply the controller and its side resources of an active revision.
    async fn post(&self, meta: &PackageMeta, revision: &mut PackageRevision, crds: &[String]) -> Result<()> {
        if !revision.is_active() {
            return Ok(());
        }
        let Some(pod) = meta.spec.pods.as_ref() else {
            return Ok(());
        };
        let crds = self.crds(crds).await?;

        let ctx = RenderContext {
            pod,
            revision,
            namespace: &self.namespace,
        };

        let mut grpc_service = None;
        for (container, extra) in render::extras(pod) {
            if extra.certificate {
                let mut certificate = render::certificate(&ctx, container, extra);
                self.client.apply(&mut certificate).await.context(ERR_APPLY_CERTIFICATE)?;
            }
            if extra.service {
                let mut service = render::service(&ctx, container, extra);
                self.client.apply(&mut service).await.context(ERR_APPLY_SERVICE)?;
                if extra.name == GRPC_EXTRA {
                    grpc_service = Some(service.metadata.name);
                }
            }
            if extra.webhook {
                let mut mutate = render::mutating_webhook(&ctx, container, extra, &crds);
                self.client.apply(&mut mutate).await.context(ERR_APPLY_MUTATE_WEBHOOK)?;
                let mut validate = render::validating_webhook(&ctx, container, extra, &crds);
                self.client.apply(&mut validate).await.context(ERR_APPLY_VALIDATE_WEBHOOK)?;
            }
        }

        let mut service_account = render::service_account(&ctx);
        self.client.apply(&mut service_account).await.context(ERR_APPLY_SA)?;

        let mut workload = render::workload(&ctx, grpc_service.as_deref());
        self.client.apply(&mut workload).await.context(ERR_APPLY_WORKLOAD)?;

        revision.status.controller_ref = Some(Reference {
            name: workload.metadata.name.clone(),
        });

        if pod.deployment_type == DeploymentType::Deployment
            && let Some(available) = workload
                .status()
                .and_then(|s| s.get("conditions"))
                .and_then(Value::as_array)
                .and_then(|conditions| conditions.iter().find(|c| c["type"] == "Available"))
            && available["status"] != "True"
        {
            let message = available["message"].as_str().unwrap_or_default();
            bail!("{ERR_UNAVAILABLE_DEPLOYMENT}: {message}");
        }
        Ok(())
    }
}

/// Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopHooks;

#[async_trait]
impl Hooks for NopHooks {
    async fn pre(&self, _: &PackageMeta, _: &mut PackageRevision, _: &[String]) -> Result<()> {
        Ok(())
    }

    async fn post(&self, _: &PackageMeta, _: &mut PackageRevision, _: &[String]) -> Result<()> {
        Ok(())
    }
}

//! Wiring of the package, revision and resolver controllers over one store.

use anyhow::{Context, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::api::{LOCK_KIND, PackageType};
use crate::config::ManagerConfig;
use crate::controller::{Controller, ControllerOptions, Recorder};
use crate::manager::{ManagerOptions, PackageReconciler, PackageRevisioner};
use crate::pkg::{Fetcher, PackageCache};
use crate::resolver::{Resolver, ResolverOptions};
use crate::revision::render::{DEPLOYMENT_KIND, STATEFUL_SET_KIND};
use crate::revision::{ImageBackend, ProviderHooks, RevisionOptions, RevisionReconciler};
use crate::store::Client;

/// Everything the controllers share.
pub struct Engine {
    client: Client,
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<dyn PackageCache>,
    recorder: Arc<dyn Recorder>,
    config: ManagerConfig,
}

impl Engine {
    pub fn new(
        client: Client,
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<dyn PackageCache>,
        recorder: Arc<dyn Recorder>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            client,
            fetcher,
            cache,
            recorder,
            config,
        }
    }

    /// Package types whose package and revision controllers run.
    pub fn package_types(&self) -> Vec<PackageType> {
        let mut types = vec![PackageType::Provider];
        if self.config.packages.enable_intents {
            types.push(PackageType::Intent);
        }
        types
    }

    fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            max_concurrent_reconciles: self.config.max_concurrent_reconciles,
            reconcile_timeout: self.config.timers.reconcile_timeout(),
        }
    }

    fn package_controller(&self, package_type: PackageType) -> Controller {
        let reconciler = PackageReconciler::new(
            self.client.clone(),
            Arc::new(PackageRevisioner::new(self.fetcher.clone())),
            self.recorder.clone(),
            ManagerOptions {
                package_type,
                timers: self.config.timers,
            },
        );
        Controller::new(
            format!("packages/{}", package_type.as_str().to_lowercase()),
            package_type.as_str(),
            self.client.clone(),
            Arc::new(reconciler),
        )
        .owns(package_type.revision_kind().as_str())
        .with_options(self.controller_options())
    }

    fn revision_controller(&self, package_type: PackageType) -> Controller {
        let revision_kind = package_type.revision_kind();
        let reconciler = RevisionReconciler::new(
            self.client.clone(),
            Arc::new(ImageBackend::new(self.cache.clone(), self.fetcher.clone())),
            self.recorder.clone(),
            RevisionOptions {
                package_type,
                namespace: self.config.namespace.clone(),
                timers: self.config.timers,
            },
        )
        .with_cache(self.cache.clone())
        .with_hooks(Arc::new(ProviderHooks::new(self.client.clone(), self.config.namespace.clone())));
        Controller::new(
            format!("revisions/{}", revision_kind.as_str().to_lowercase()),
            revision_kind.as_str(),
            self.client.clone(),
            Arc::new(reconciler),
        )
        .owns(DEPLOYMENT_KIND)
        .owns(STATEFUL_SET_KIND)
        .with_options(self.controller_options())
    }

    fn resolver_controller(&self) -> Controller {
        let resolver = Resolver::new(
            self.client.clone(),
            self.fetcher.clone(),
            self.recorder.clone(),
            ResolverOptions {
                package_types: self.config.packages.resolvable_types.iter().copied().collect(),
                timers: self.config.timers,
            },
        );
        Controller::new("resolver", LOCK_KIND, self.client.clone(), Arc::new(resolver))
            .with_options(self.controller_options())
    }

    /// All controllers of this installation.
    pub fn controllers(&self) -> Vec<Controller> {
        let mut controllers = Vec::new();
        for package_type in self.package_types() {
            controllers.push(self.package_controller(package_type));
            controllers.push(self.revision_controller(package_type));
        }
        controllers.push(self.resolver_controller());
        controllers
    }

    /// Run every controller until `shutdown` flips to `true`.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let controllers = self.controllers();
        info!(
            controllers = controllers.len(),
            namespace = %self.config.namespace,
            "Starting package engine"
        );
        try_join_all(controllers.into_iter().map(|c| {
            let name = c.name().to_string();
            let shutdown = shutdown.clone();
            async move { c.run(shutdown).await.with_context(|| format!("controller {name} failed")) }
        }))
        .await?;
        info!("Package engine stopped");
        Ok(())
    }
}

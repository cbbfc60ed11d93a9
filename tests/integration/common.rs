//! Harness driving the reconcilers pass by pass over one store.

use std::collections::BTreeMap;
use std::sync::Arc;

use ctlpkg::api::{
    ConditionKind, ConditionStatus, LOCK_KIND, Lock, ObjectKey, Package, PackageRevision,
    PackageType, RevisionKind,
};
use ctlpkg::constants::{LOCK_NAME, PARENT_LABEL_KEY};
use ctlpkg::controller::{Action, Reconciler};
use ctlpkg::manager::{ManagerOptions, PackageReconciler, PackageRevisioner};
use ctlpkg::pkg::NopCache;
use ctlpkg::resolver::{Resolver, ResolverOptions};
use ctlpkg::revision::{ImageBackend, RevisionOptions, RevisionReconciler};
use ctlpkg::store::{Client, MemoryStore};
use ctlpkg::test_utils::{RecordingRecorder, StaticFetcher, init_test_logging};

/// A 64 character hex digest made of `n`.
pub fn digest(n: u8) -> String {
    format!("{n:02x}").repeat(32)
}

pub struct Harness {
    pub client: Client,
    pub fetcher: Arc<StaticFetcher>,
    pub recorder: Arc<RecordingRecorder>,
    packages: PackageReconciler,
    revisions: RevisionReconciler,
    resolver: Resolver,
}

impl Harness {
    pub fn new() -> Self {
        init_test_logging(None);

        let client = Client::new(Arc::new(MemoryStore::new()));
        let fetcher = Arc::new(StaticFetcher::new());
        let recorder = Arc::new(RecordingRecorder::default());

        let packages = PackageReconciler::new(
            client.clone(),
            Arc::new(PackageRevisioner::new(fetcher.clone())),
            recorder.clone(),
            ManagerOptions::default(),
        );
        let revisions = RevisionReconciler::new(
            client.clone(),
            Arc::new(ImageBackend::new(Arc::new(NopCache), fetcher.clone())),
            recorder.clone(),
            RevisionOptions::default(),
        );
        let resolver =
            Resolver::new(client.clone(), fetcher.clone(), recorder.clone(), ResolverOptions::default());

        Self {
            client,
            fetcher,
            recorder,
            packages,
            revisions,
            resolver,
        }
    }

    /// Make `reference` resolvable to `digest` and serve `stream` for it.
    pub fn publish(&self, reference: &str, digest: &str, stream: String) {
        self.fetcher.set_digest(reference, digest);
        self.fetcher.set_stream(reference, stream);
    }

    pub async fn create_provider(&self, name: &str, source: &str) -> Package {
        let mut package = Package::new(PackageType::Provider, name, source);
        self.client.create(&mut package).await.unwrap();
        package
    }

    pub async fn package(&self, name: &str) -> Option<Package> {
        self.client.get_opt(&ObjectKey::new(PackageType::Provider.as_str(), name)).await.unwrap()
    }

    /// Revisions of the package `parent`, oldest first.
    pub async fn revisions(&self, parent: &str) -> Vec<PackageRevision> {
        let selector = BTreeMap::from([(PARENT_LABEL_KEY.to_string(), parent.to_string())]);
        let mut revisions: Vec<PackageRevision> =
            self.client.list(RevisionKind::ProviderRevision.as_str(), &selector).await.unwrap();
        revisions.sort_by_key(|r| r.spec.revision);
        revisions
    }

    pub async fn lock(&self) -> Option<Lock> {
        self.client.get_opt(&ObjectKey::new(LOCK_KIND, LOCK_NAME)).await.unwrap()
    }

    pub async fn reconcile_package(&self, name: &str) -> Action {
        let key = ObjectKey::new(PackageType::Provider.as_str(), name);
        self.packages.reconcile(&key).await.unwrap()
    }

    pub async fn reconcile_revision(&self, name: &str) -> Action {
        let key = ObjectKey::new(RevisionKind::ProviderRevision.as_str(), name);
        self.revisions.reconcile(&key).await.unwrap()
    }

    /// Reconcile every revision of `parent`, oldest first.
    pub async fn reconcile_revisions(&self, parent: &str) {
        for revision in self.revisions(parent).await {
            self.reconcile_revision(&revision.metadata.name).await;
        }
    }

    pub async fn reconcile_lock(&self) -> Action {
        self.resolver.reconcile(&ObjectKey::new(LOCK_KIND, LOCK_NAME)).await.unwrap()
    }
}

pub fn package_health(package: &Package) -> ConditionStatus {
    package.status.conditioned.get_condition(ConditionKind::PackageHealthy).status
}

pub fn package_installed(package: &Package) -> ConditionStatus {
    package.status.conditioned.get_condition(ConditionKind::PackageInstalled).status
}

pub fn revision_health(revision: &PackageRevision) -> ConditionStatus {
    revision.get_condition(ConditionKind::PackageHealthy).status
}

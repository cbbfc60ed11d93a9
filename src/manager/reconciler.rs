//! The package reconcile pass.
//!
//! One pass moves a Package one step towards a single current revision:
//!
//! 1. List the revisions labelled with the package as their parent.
//! 2. Ask the [`Revisioner`] for the revision name of the current source. An
//!    error marks the package unpacking and retries after the short wait. An
//!    empty name means the digest is not known yet and retries after the very
//!    short wait.
//! 3. Walk the existing revisions. Every revision other than the current one
//!    is forced inactive, whatever the activation policy, so at most one
//!    revision is ever active.
//! 4. Give the current revision the highest number. A returning revision is
//!    renumbered above the ones it replaces.
//! 5. Delete the oldest revision when the history exceeds the limit plus the
//!    current one. Only one revision is collected per pass.
//! 6. Mirror the health of the current revision onto the package.
//! 7. Apply the current revision, controlled by the package. It is activated
//!    only under the `Automatic` policy.
//!
//! Wait tiers:
//! - failures to list, transition, collect or apply retry after the short wait
//! - a revision controlled by another owner waits for a change
//! - success waits for a change, or polls after the pull wait under `Always`

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::Revisioner;
use crate::api::{
    ActivationPolicy, Condition, ConditionKind, ConditionStatus, DesiredState, ObjectKey,
    OwnerReference, Package, PackageRevision, PackageType, PullPolicy, Resource,
};
use crate::config::Timers;
use crate::constants::{
    COMPOSITE_PROVIDER_NAME_LABEL_KEY, COMPOSITE_PROVIDER_NAMESPACE_LABEL_KEY, PARENT_LABEL_KEY,
};
use crate::controller::{Action, Event, Reconciler, Recorder};
use crate::store::Client;

const ERR_GET_PACKAGE: &str = "cannot get package";
const ERR_LIST_REVISIONS: &str = "cannot list revisions for package";
const ERR_UNPACK: &str = "cannot unpack package";
const ERR_UPDATE_STATUS: &str = "cannot update package status";
const ERR_UPDATE_INACTIVE_REVISION: &str = "cannot update inactive package revision";
const ERR_APPLY_REVISION: &str = "cannot apply package revision";
const ERR_GC_REVISION: &str = "cannot garbage collect old package revision";
const ERR_UNHEALTHY_REVISION: &str = "current package revision is unhealthy";
const ERR_UNKNOWN_REVISION_HEALTH: &str = "current package revision health is unknown";

const REASON_LIST: &str = "ListRevision";
const REASON_UNPACK: &str = "UnpackPackage";
const REASON_TRANSITION: &str = "TransitionRevision";
const REASON_GC: &str = "GarbageCollect";
const REASON_INSTALL: &str = "InstallPackageRevision";

/// Configuration for a [`PackageReconciler`].
///
/// The default manages Providers with the stock wait tiers.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Kind of package this reconciler manages. Its revisions are of the
    /// matching [`RevisionKind`](crate::api::RevisionKind).
    pub package_type: PackageType,
    /// Requeue delays for the short, very short and pull waits.
    pub timers: Timers,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            package_type: PackageType::Provider,
            timers: Timers::default(),
        }
    }
}

/// Reconciles a Package into a numbered series of revisions.
///
/// Each pass ends with the Package status written back, even on failure, so
/// its `Installed` and `Healthy` conditions always describe the last pass.
///
/// # Examples
///
/// ```rust,ignore
/// let reconciler = PackageReconciler::new(
///     client.clone(),
///     Arc::new(PackageRevisioner::new(fetcher)),
///     recorder,
///     ManagerOptions::default(),
/// );
/// let action = reconciler.reconcile(&ObjectKey::new("Provider", "prov")).await?;
/// ```
pub struct PackageReconciler {
    client: Client,
    revisioner: Arc<dyn Revisioner>,
    recorder: Arc<dyn Recorder>,
    options: ManagerOptions,
}

impl PackageReconciler {
    /// Creates a reconciler that names revisions with `revisioner` and
    /// reports progress through `recorder`.
    pub fn new(
        client: Client,
        revisioner: Arc<dyn Revisioner>,
        recorder: Arc<dyn Recorder>,
        options: ManagerOptions,
    ) -> Self {
        Self {
            client,
            revisioner,
            recorder,
            options,
        }
    }

    /// Persist the package status and hand back `action`.
    async fn finish(&self, package: &mut Package, action: Action) -> Result<Action> {
        self.client.update_status(package).await.context(ERR_UPDATE_STATUS)?;
        Ok(action)
    }

    fn short(&self) -> Action {
        Action::requeue(self.options.timers.short_wait())
    }
}

fn pull_based_requeue(policy: Option<PullPolicy>, timers: &Timers) -> Action {
    match policy {
        Some(PullPolicy::Always) => Action::requeue(timers.pull_wait()),
        _ => Action::await_change(),
    }
}

#[async_trait]
impl Reconciler for PackageReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        debug!(package = %key.name, "Reconciling package");

        let Some(mut package) = self.client.get_opt::<Package>(key).await.context(ERR_GET_PACKAGE)? else {
            return Ok(Action::await_change());
        };
        let pkg_key = package.key();
        let revision_kind = self.options.package_type.revision_kind();

        let selector = BTreeMap::from([(PARENT_LABEL_KEY.to_string(), package.name().to_string())]);
        let mut revisions = match self
            .client
            .list::<PackageRevision>(revision_kind.as_str(), &selector)
            .await
        {
            Ok(revisions) => revisions,
            Err(e) => {
                let e = anyhow::Error::new(e).context(ERR_LIST_REVISIONS);
                debug!(package = %key.name, error = %format!("{e:#}"), "{ERR_LIST_REVISIONS}");
                self.recorder.event(&pkg_key, Event::warning(REASON_LIST, &e));
                return Ok(self.short());
            }
        };

        let revision_name = match self.revisioner.revision(&package).await {
            Ok(name) => name,
            Err(e) => {
                let e = e.context(ERR_UNPACK);
                debug!(package = %key.name, error = %format!("{e:#}"), "{ERR_UNPACK}");
                package.set_conditions([Condition::unpacking()]);
                self.recorder.event(&pkg_key, Event::warning(REASON_UNPACK, &e));
                return self.finish(&mut package, self.short()).await;
            }
        };

        if revision_name.is_empty() {
            package.set_conditions([Condition::unpacking()]);
            self.recorder.event(&pkg_key, Event::normal(REASON_UNPACK, "Waiting for unpack to complete"));
            let wait = Action::requeue(self.options.timers.very_short_wait());
            return self.finish(&mut package, wait).await;
        }

        package.status.current_revision = revision_name.clone();
        package.status.current_identifier = package.source().to_string();

        let mut current: Option<PackageRevision> = None;
        let mut max_revision = 0_i64;
        let mut oldest: Option<(i64, usize)> = None;

        for (index, revision) in revisions.iter_mut().enumerate() {
            let number = revision.spec.revision;
            max_revision = max_revision.max(number);
            if oldest.is_none_or(|(n, _)| number < n) {
                oldest = Some((number, index));
            }

            if revision.name() == revision_name {
                current = Some(revision.clone());
                continue;
            }

            // Only the current revision may be active, whatever the policy.
            if revision.is_active() {
                revision.spec.desired_state = DesiredState::Inactive;
                match self.client.apply_controlled(revision, &package.metadata.uid).await {
                    Ok(()) => {
                        info!(package = %key.name, revision = %revision.name(), "Deactivated stale revision");
                    }
                    Err(e) if e.is_not_controllable() => {
                        debug!(package = %key.name, revision = %revision.name(), error = %e, "Skipping revision controlled elsewhere");
                    }
                    Err(e) => {
                        let e = anyhow::Error::new(e).context(ERR_UPDATE_INACTIVE_REVISION);
                        self.recorder.event(&pkg_key, Event::warning(REASON_TRANSITION, &e));
                        return self.finish(&mut package, self.short()).await;
                    }
                }
            }
        }

        let mut revision =
            current.unwrap_or_else(|| PackageRevision::new(revision_kind, revision_name.clone()));

        // The current revision always holds the highest number.
        if revision.spec.revision < max_revision || max_revision == 0 {
            revision.spec.revision = max_revision + 1;
        }

        let history_limit = package.spec.revision_history_limit.unwrap_or(0);
        let count = i64::try_from(revisions.len()).unwrap_or(i64::MAX);
        if history_limit != 0
            && count > history_limit.saturating_add(1)
            && let Some((_, index)) = oldest
        {
            let gc_key = revisions[index].key();
            if let Err(e) = self.client.delete_ignore_not_found(&gc_key).await {
                let e = anyhow::Error::new(e).context(ERR_GC_REVISION);
                self.recorder.event(&pkg_key, Event::warning(REASON_GC, &e));
                return self.finish(&mut package, self.short()).await;
            }
            info!(package = %key.name, revision = %gc_key.name, "Garbage collected revision");
        }

        match revision.get_condition(ConditionKind::PackageHealthy).status {
            ConditionStatus::True => {
                package.set_conditions([Condition::healthy()]);
                self.recorder.event(
                    &pkg_key,
                    Event::normal(REASON_INSTALL, "Successfully installed package revision"),
                );
            }
            ConditionStatus::False => {
                package.set_conditions([Condition::unhealthy()]);
                self.recorder
                    .event(&pkg_key, Event::warning(REASON_INSTALL, &anyhow!(ERR_UNHEALTHY_REVISION)));
            }
            ConditionStatus::Unknown => {
                package.set_conditions([Condition::unknown_health()]);
                self.recorder.event(
                    &pkg_key,
                    Event::warning(REASON_INSTALL, &anyhow!(ERR_UNKNOWN_REVISION_HEALTH)),
                );
            }
        }

        let mut labels = BTreeMap::from([(PARENT_LABEL_KEY.to_string(), package.name().to_string())]);
        for label in [COMPOSITE_PROVIDER_NAME_LABEL_KEY, COMPOSITE_PROVIDER_NAMESPACE_LABEL_KEY] {
            if let Some(value) = package.metadata.labels.get(label) {
                labels.insert(label.to_string(), value.clone());
            }
        }
        revision.metadata.labels = labels;
        revision.kind = revision_kind;
        revision.spec.package_image = package.source().to_string();
        revision.spec.package_pull_policy = package.spec.package_pull_policy;
        revision.spec.package_pull_secrets = package.spec.package_pull_secrets.clone();
        revision.spec.skip_dependency_resolution = package.spec.skip_dependency_resolution;
        revision.spec.auto_pilot = package.spec.auto_pilot;
        revision.spec.controller_config_ref = package.spec.controller_ref.clone();

        let automatic = matches!(
            package.spec.revision_activation_policy,
            None | Some(ActivationPolicy::Automatic)
        );
        if !revision.is_active() && automatic {
            revision.spec.desired_state = DesiredState::Active;
        }

        revision
            .metadata
            .add_owner_reference(OwnerReference::to(&package).as_controller().block_owner_deletion());
        if let Err(e) = self.client.apply_controlled(&mut revision, &package.metadata.uid).await {
            let not_controllable = e.is_not_controllable();
            let e = anyhow::Error::new(e).context(ERR_APPLY_REVISION);
            debug!(package = %key.name, error = %format!("{e:#}"), "{ERR_APPLY_REVISION}");
            self.recorder.event(&pkg_key, Event::warning(REASON_INSTALL, &e));
            // Another controller owns the revision; retrying will not change that.
            let action = if not_controllable { Action::await_change() } else { self.short() };
            return self.finish(&mut package, action).await;
        }

        package.set_conditions([Condition::active()]);
        if !revision.is_active() {
            package.set_conditions([Condition::inactive()]);
        }

        let action = pull_based_requeue(package.spec.package_pull_policy, &self.options.timers);
        self.finish(&mut package, action).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RevisionKind;
    use crate::manager::PackageRevisioner;
    use crate::store::MemoryStore;
    use crate::test_utils::{RecordingRecorder, StaticFetcher};

    const SOURCE: &str = "reg.io/org/prov:v1.0.0";

    struct Fixture {
        client: Client,
        fetcher: Arc<StaticFetcher>,
        reconciler: PackageReconciler,
    }

    fn fixture(fetcher: StaticFetcher) -> Fixture {
        let client = Client::new(Arc::new(MemoryStore::new()));
        let fetcher = Arc::new(fetcher);
        let reconciler = PackageReconciler::new(
            client.clone(),
            Arc::new(PackageRevisioner::new(fetcher.clone())),
            Arc::new(RecordingRecorder::default()),
            ManagerOptions::default(),
        );
        Fixture {
            client,
            fetcher,
            reconciler,
        }
    }

    fn digest(n: u8) -> String {
        format!("{n:02x}").repeat(32)
    }

    async fn create_package(client: &Client, configure: impl FnOnce(&mut Package)) -> Package {
        let mut pkg = Package::new(PackageType::Provider, "prov", SOURCE);
        configure(&mut pkg);
        client.create(&mut pkg).await.unwrap();
        pkg
    }

    async fn revisions(client: &Client) -> Vec<PackageRevision> {
        let selector = BTreeMap::from([(PARENT_LABEL_KEY.to_string(), "prov".to_string())]);
        let mut revs: Vec<PackageRevision> =
            client.list(RevisionKind::ProviderRevision.as_str(), &selector).await.unwrap();
        revs.sort_by_key(|r| r.spec.revision);
        revs
    }

    async fn set_source(client: &Client, source: &str) {
        let mut pkg: Package = client.get(&ObjectKey::new("Provider", "prov")).await.unwrap();
        pkg.spec.package = source.to_string();
        client.update(&mut pkg).await.unwrap();
    }

    #[tokio::test]
    async fn test_creates_active_owned_revision() {
        let f = fixture(StaticFetcher::new().with_digest(SOURCE, &digest(1)));
        let pkg = create_package(&f.client, |p| {
            p.metadata
                .labels
                .insert(COMPOSITE_PROVIDER_NAME_LABEL_KEY.to_string(), "cp".to_string());
        })
        .await;

        let action = f.reconciler.reconcile(&pkg.key()).await.unwrap();
        assert_eq!(action, Action::await_change());

        let revs = revisions(&f.client).await;
        assert_eq!(revs.len(), 1);
        let rev = &revs[0];
        assert_eq!(rev.name(), "prov-010101010101");
        assert_eq!(rev.spec.revision, 1);
        assert!(rev.is_active());
        assert_eq!(rev.spec.package_image, SOURCE);
        assert_eq!(rev.metadata.labels.get(COMPOSITE_PROVIDER_NAME_LABEL_KEY).map(String::as_str), Some("cp"));
        let owner = rev.metadata.controller_ref().unwrap();
        assert_eq!(owner.uid, pkg.metadata.uid);
        assert_eq!(owner.block_owner_deletion, Some(true));

        let pkg: Package = f.client.get(&pkg.key()).await.unwrap();
        assert_eq!(pkg.status.current_revision, "prov-010101010101");
        assert_eq!(pkg.status.current_identifier, SOURCE);
        let installed = pkg.status.conditioned.get_condition(ConditionKind::PackageInstalled);
        assert_eq!(installed.status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_new_source_supersedes_and_deactivates() {
        let f = fixture(
            StaticFetcher::new()
                .with_digest(SOURCE, &digest(1))
                .with_digest("reg.io/org/prov:v1.1.0", &digest(2))
                .with_digest("reg.io/org/prov:v1.2.0", &digest(3)),
        );
        let pkg = create_package(&f.client, |p| p.spec.revision_history_limit = Some(0)).await;

        f.reconciler.reconcile(&pkg.key()).await.unwrap();
        set_source(&f.client, "reg.io/org/prov:v1.1.0").await;
        f.reconciler.reconcile(&pkg.key()).await.unwrap();
        set_source(&f.client, "reg.io/org/prov:v1.2.0").await;
        f.reconciler.reconcile(&pkg.key()).await.unwrap();

        let revs = revisions(&f.client).await;
        let numbers: Vec<i64> = revs.iter().map(|r| r.spec.revision).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        let active: Vec<&str> = revs.iter().filter(|r| r.is_active()).map(|r| r.name()).collect();
        assert_eq!(active, vec!["prov-030303030303"]);
    }

    #[tokio::test]
    async fn test_history_limit_collects_one_per_pass() {
        let f = fixture(
            StaticFetcher::new()
                .with_digest(SOURCE, &digest(1))
                .with_digest("reg.io/org/prov:v1.1.0", &digest(2))
                .with_digest("reg.io/org/prov:v1.2.0", &digest(3))
                .with_digest("reg.io/org/prov:v1.3.0", &digest(4)),
        );
        let pkg = create_package(&f.client, |p| p.spec.revision_history_limit = Some(1)).await;

        f.reconciler.reconcile(&pkg.key()).await.unwrap();
        set_source(&f.client, "reg.io/org/prov:v1.1.0").await;
        f.reconciler.reconcile(&pkg.key()).await.unwrap();
        set_source(&f.client, "reg.io/org/prov:v1.2.0").await;
        f.reconciler.reconcile(&pkg.key()).await.unwrap();
        assert_eq!(revisions(&f.client).await.len(), 3);

        // Three revisions exceed limit + 1: the oldest goes.
        set_source(&f.client, "reg.io/org/prov:v1.3.0").await;
        f.reconciler.reconcile(&pkg.key()).await.unwrap();
        let names: Vec<String> = revisions(&f.client).await.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["prov-020202020202", "prov-030303030303", "prov-040404040404"]);

        f.reconciler.reconcile(&pkg.key()).await.unwrap();
        assert_eq!(revisions(&f.client).await.len(), 2);
    }

    #[tokio::test]
    async fn test_manual_policy_leaves_revision_inactive() {
        let f = fixture(StaticFetcher::new().with_digest(SOURCE, &digest(1)));
        let pkg = create_package(&f.client, |p| {
            p.spec.revision_activation_policy = Some(ActivationPolicy::Manual);
        })
        .await;

        f.reconciler.reconcile(&pkg.key()).await.unwrap();

        let revs = revisions(&f.client).await;
        assert!(!revs[0].is_active());
        let pkg: Package = f.client.get(&pkg.key()).await.unwrap();
        let installed = pkg.status.conditioned.get_condition(ConditionKind::PackageInstalled);
        assert_eq!(installed.status, ConditionStatus::False);
    }

    #[tokio::test]
    async fn test_manual_policy_deactivates_stale_revision() {
        let f = fixture(
            StaticFetcher::new()
                .with_digest(SOURCE, &digest(1))
                .with_digest("reg.io/org/prov:v1.1.0", &digest(2)),
        );
        let pkg = create_package(&f.client, |_| {}).await;
        f.reconciler.reconcile(&pkg.key()).await.unwrap();
        assert!(revisions(&f.client).await[0].is_active());

        let mut manual: Package = f.client.get(&pkg.key()).await.unwrap();
        manual.spec.revision_activation_policy = Some(ActivationPolicy::Manual);
        manual.spec.package = "reg.io/org/prov:v1.1.0".to_string();
        f.client.update(&mut manual).await.unwrap();
        f.reconciler.reconcile(&pkg.key()).await.unwrap();

        let revs = revisions(&f.client).await;
        let states: Vec<(&str, i64, DesiredState)> =
            revs.iter().map(|r| (r.name(), r.spec.revision, r.spec.desired_state)).collect();
        assert_eq!(
            states,
            vec![
                ("prov-010101010101", 1, DesiredState::Inactive),
                ("prov-020202020202", 2, DesiredState::Inactive),
            ]
        );
    }

    #[tokio::test]
    async fn test_manual_policy_deactivates_reactivated_old_revision() {
        let f = fixture(
            StaticFetcher::new()
                .with_digest(SOURCE, &digest(1))
                .with_digest("reg.io/org/prov:v1.1.0", &digest(2)),
        );
        let pkg = create_package(&f.client, |p| {
            p.spec.revision_activation_policy = Some(ActivationPolicy::Manual);
        })
        .await;
        f.reconciler.reconcile(&pkg.key()).await.unwrap();
        set_source(&f.client, "reg.io/org/prov:v1.1.0").await;
        f.reconciler.reconcile(&pkg.key()).await.unwrap();

        // The old revision is switched on by hand.
        let mut old = revisions(&f.client).await.remove(0);
        assert_eq!(old.name(), "prov-010101010101");
        old.spec.desired_state = DesiredState::Active;
        f.client.update(&mut old).await.unwrap();

        f.reconciler.reconcile(&pkg.key()).await.unwrap();

        let revs = revisions(&f.client).await;
        assert_eq!(revs.len(), 2);
        assert!(revs.iter().all(|r| !r.is_active()));
    }

    #[tokio::test]
    async fn test_if_not_present_skips_head_on_second_pass() {
        let f = fixture(StaticFetcher::new().with_digest(SOURCE, &digest(1)));
        let pkg = create_package(&f.client, |_| {}).await;

        f.reconciler.reconcile(&pkg.key()).await.unwrap();
        f.reconciler.reconcile(&pkg.key()).await.unwrap();

        assert_eq!(f.fetcher.head_calls(), 1);
        let pkg: Package = f.client.get(&pkg.key()).await.unwrap();
        assert_eq!(pkg.status.current_revision, "prov-010101010101");
        assert_eq!(revisions(&f.client).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_source_is_unpacking() {
        let fetcher = StaticFetcher::new();
        fetcher.set_failing(true);
        let f = fixture(fetcher);
        let pkg = create_package(&f.client, |_| {}).await;

        let action = f.reconciler.reconcile(&pkg.key()).await.unwrap();
        assert_eq!(action, Action::requeue(Timers::default().short_wait()));

        let pkg: Package = f.client.get(&pkg.key()).await.unwrap();
        let installed = pkg.status.conditioned.get_condition(ConditionKind::PackageInstalled);
        assert_eq!(installed.reason, Some(crate::api::ConditionReason::Unpacking));
        assert!(revisions(&f.client).await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_digest_waits_very_short() {
        let f = fixture(StaticFetcher::new());
        let pkg = create_package(&f.client, |_| {}).await;

        let action = f.reconciler.reconcile(&pkg.key()).await.unwrap();
        assert_eq!(action, Action::requeue(Timers::default().very_short_wait()));
    }

    #[tokio::test]
    async fn test_always_policy_polls() {
        let f = fixture(StaticFetcher::new().with_digest(SOURCE, &digest(1)));
        let pkg = create_package(&f.client, |p| p.spec.package_pull_policy = Some(PullPolicy::Always)).await;

        let action = f.reconciler.reconcile(&pkg.key()).await.unwrap();
        assert_eq!(action, Action::requeue(Timers::default().pull_wait()));
    }

    #[tokio::test]
    async fn test_health_follows_current_revision() {
        let f = fixture(StaticFetcher::new().with_digest(SOURCE, &digest(1)));
        let pkg = create_package(&f.client, |_| {}).await;
        f.reconciler.reconcile(&pkg.key()).await.unwrap();

        let mut rev = revisions(&f.client).await.remove(0);
        rev.set_conditions([Condition::unhealthy()]);
        f.client.update_status(&mut rev).await.unwrap();
        f.reconciler.reconcile(&pkg.key()).await.unwrap();

        let pkg: Package = f.client.get(&pkg.key()).await.unwrap();
        let healthy = pkg.status.conditioned.get_condition(ConditionKind::PackageHealthy);
        assert_eq!(healthy.status, ConditionStatus::False);
    }

    #[tokio::test]
    async fn test_missing_package_is_not_an_error() {
        let f = fixture(StaticFetcher::new());
        let action = f.reconciler.reconcile(&ObjectKey::new("Provider", "gone")).await.unwrap();
        assert_eq!(action, Action::await_change());
    }
}

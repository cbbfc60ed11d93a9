//! The revision reconcile pass.
//!
//! A revision being deleted is torn down: its cache entry is removed, its
//! Lock entry dropped and its finalizer released. Otherwise a pass:
//!
//! 1. adds the revision finalizer
//! 2. reads the package stream from the [`Backend`] and parses it
//! 3. lints the bundle and checks it carries exactly one meta object
//! 4. records the revision and its dependencies in the Lock, unless
//!    dependency resolution is skipped
//! 5. runs the pre hook, establishes the packaged objects and runs the post
//!    hook
//!
//! Only an active revision takes control of its objects. An inactive one
//! references them without controlling them.
//!
//! Lint failures wait the long interval since only a new image fixes them.
//! Missing dependencies leave health unknown and retry after the short wait.
//! A healthy revision is checked again after the long wait.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    ApiEstablisher, Backend, DependencyManager, Establisher, Hooks, NopHooks, PackageDependencyManager,
};
use crate::api::{Condition, ObjectKey, PackageRevision, PackageType, Resource};
use crate::config::Timers;
use crate::constants::{DEFAULT_NAMESPACE, REVISION_FINALIZER};
use crate::controller::{Action, Event, Reconciler, Recorder};
use crate::pkg::lint::CRD_KIND;
use crate::pkg::{Linter, NopCache, PackageCache, PackageLinter, PackageParser, Parser};
use crate::store::{ApiFinalizer, Client};

const ERR_GET_REVISION: &str = "cannot get package revision";
const ERR_DELETE_CACHE: &str = "cannot remove package image from cache";
const ERR_REMOVE_SELF: &str = "cannot remove package revision from lock";
const ERR_ADD_FINALIZER: &str = "cannot add package revision finalizer";
const ERR_REMOVE_FINALIZER: &str = "cannot remove package revision finalizer";
const ERR_INIT_BACKEND: &str = "cannot initialize parser backend";
const ERR_PARSE_PACKAGE: &str = "cannot parse package contents";
const ERR_LINT_PACKAGE: &str = "linter processing error";
const ERR_NOT_ONE_META: &str = "cannot install package with multiple meta types";
const ERR_RESOLVE_DEPENDENCIES: &str = "cannot resolve package dependencies";
const ERR_PRE_HOOK: &str = "pre establish hook failed for package";
const ERR_ESTABLISH_CONTROL: &str = "cannot establish control of object";
const ERR_POST_HOOK: &str = "post establish hook failed for package";
const ERR_UPDATE_STATUS: &str = "cannot update package revision status";

const REASON_PARSE: &str = "ParsePackage";
const REASON_LINT: &str = "LintPackage";
const REASON_DEPENDENCIES: &str = "ResolveDependencies";
const REASON_SYNC: &str = "SyncPackage";

/// Configuration for a [`RevisionReconciler`].
#[derive(Debug, Clone)]
pub struct RevisionOptions {
    /// Kind of package whose revisions this reconciler installs.
    pub package_type: PackageType,
    /// Namespace for controller runtime resources.
    pub namespace: String,
    /// Requeue delays for the short and long waits.
    pub timers: Timers,
}

impl Default for RevisionOptions {
    fn default() -> Self {
        Self {
            package_type: PackageType::Provider,
            namespace: DEFAULT_NAMESPACE.to_string(),
            timers: Timers::default(),
        }
    }
}

/// Installs the contents of a package revision.
///
/// Every collaborator is a trait object and can be swapped with the `with_*`
/// builders. Status is written back at the end of every pass.
pub struct RevisionReconciler {
    client: Client,
    revision: ApiFinalizer,
    backend: Arc<dyn Backend>,
    cache: Arc<dyn PackageCache>,
    parser: Arc<dyn Parser>,
    linter: Arc<dyn Linter>,
    lock: Arc<dyn DependencyManager>,
    objects: Arc<dyn Establisher>,
    hooks: Arc<dyn Hooks>,
    recorder: Arc<dyn Recorder>,
    options: RevisionOptions,
}

impl RevisionReconciler {
    /// A reconciler with the stock parser, linter, dependency manager and
    /// establisher for `options.package_type`, no hooks and no cache.
    pub fn new(
        client: Client,
        backend: Arc<dyn Backend>,
        recorder: Arc<dyn Recorder>,
        options: RevisionOptions,
    ) -> Self {
        Self {
            revision: ApiFinalizer::new(client.clone(), REVISION_FINALIZER),
            backend,
            cache: Arc::new(NopCache),
            parser: Arc::new(PackageParser::new()),
            linter: Arc::new(PackageLinter::for_type(options.package_type)),
            lock: Arc::new(PackageDependencyManager::new(client.clone(), options.package_type)),
            objects: Arc::new(ApiEstablisher::new(client.clone())),
            hooks: Arc::new(NopHooks),
            recorder,
            options,
            client,
        }
    }

    /// Cache whose entries are removed when a revision is deleted.
    pub fn with_cache(mut self, cache: Arc<dyn PackageCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Work to run around establishing objects, such as deploying the
    /// package's controller.
    pub fn with_hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_linter(mut self, linter: Arc<dyn Linter>) -> Self {
        self.linter = linter;
        self
    }

    /// Replaces the component that records revisions in the Lock.
    pub fn with_dependency_manager(mut self, lock: Arc<dyn DependencyManager>) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_establisher(mut self, objects: Arc<dyn Establisher>) -> Self {
        self.objects = objects;
        self
    }

    fn short(&self) -> Action {
        Action::requeue(self.options.timers.short_wait())
    }

    fn long(&self) -> Action {
        Action::requeue(self.options.timers.long_wait())
    }

    /// Persist the revision status and hand back `action`.
    async fn finish(&self, revision: &mut PackageRevision, action: Action) -> Result<Action> {
        self.client.update_status(revision).await.context(ERR_UPDATE_STATUS)?;
        Ok(action)
    }

    /// Record `err`, mark the revision unhealthy and persist it.
    async fn unhealthy(
        &self,
        revision: &mut PackageRevision,
        reason: &str,
        err: anyhow::Error,
        action: Action,
    ) -> Result<Action> {
        debug!(revision = %revision.name(), error = %format!("{err:#}"), "Package revision is unhealthy");
        self.recorder.event(&revision.key(), Event::warning(reason, &err));
        revision.set_conditions([Condition::unhealthy()]);
        self.finish(revision, action).await
    }

    async fn teardown(&self, mut revision: PackageRevision) -> Result<Action> {
        let key = revision.key();
        debug!(revision = %key.name, "Tearing down package revision");

        if let Err(e) = self.cache.delete(revision.name()).await {
            let e = e.context(ERR_DELETE_CACHE);
            debug!(revision = %key.name, error = %format!("{e:#}"), "{ERR_DELETE_CACHE}");
            self.recorder.event(&key, Event::warning(REASON_SYNC, &e));
            return Ok(self.short());
        }

        // Absent when dependency resolution was skipped or the revision was
        // already inactive.
        if let Err(e) = self.lock.remove_self(&revision).await {
            let short = self.short();
            return self.unhealthy(&mut revision, REASON_LINT, e.context(ERR_REMOVE_SELF), short).await;
        }

        if let Err(e) = self.revision.remove_finalizer(&mut revision).await {
            let e = anyhow::Error::new(e).context(ERR_REMOVE_FINALIZER);
            debug!(revision = %key.name, error = %format!("{e:#}"), "{ERR_REMOVE_FINALIZER}");
            self.recorder.event(&key, Event::warning(REASON_SYNC, &e));
            return Ok(self.short());
        }
        Ok(Action::await_change())
    }
}

#[async_trait]
impl Reconciler for RevisionReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        debug!(revision = %key.name, "Reconciling package revision");

        let Some(mut revision) = self
            .client
            .get_opt::<PackageRevision>(key)
            .await
            .context(ERR_GET_REVISION)?
        else {
            return Ok(Action::await_change());
        };

        if revision.metadata.is_deleting() {
            return self.teardown(revision).await;
        }

        if let Err(e) = self.revision.add_finalizer(&mut revision).await {
            let e = anyhow::Error::new(e).context(ERR_ADD_FINALIZER);
            debug!(revision = %key.name, error = %format!("{e:#}"), "{ERR_ADD_FINALIZER}");
            self.recorder.event(key, Event::warning(REASON_SYNC, &e));
            return Ok(self.short());
        }

        // The parent package may still be resolving the image.
        let stream = match self.backend.init(&revision).await {
            Ok(stream) => stream,
            Err(e) => {
                let short = self.short();
                return self.unhealthy(&mut revision, REASON_PARSE, e.context(ERR_INIT_BACKEND), short).await;
            }
        };

        let bundle = match self.parser.parse(&stream) {
            Ok(bundle) => bundle,
            Err(e) => {
                let e = anyhow::Error::new(e).context(ERR_PARSE_PACKAGE);
                let short = self.short();
                return self.unhealthy(&mut revision, REASON_PARSE, e, short).await;
            }
        };

        // Lint failures need a new image, not a quick retry.
        if let Err(e) = self.linter.lint(&bundle) {
            let e = anyhow::Error::new(e).context(ERR_LINT_PACKAGE);
            let long = self.long();
            return self.unhealthy(&mut revision, REASON_LINT, e, long).await;
        }

        let Some(meta) = bundle.single_meta() else {
            let long = self.long();
            return self.unhealthy(&mut revision, REASON_LINT, anyhow!(ERR_NOT_ONE_META), long).await;
        };

        if !revision.skips_dependency_resolution() {
            let (counts, result) = self.lock.resolve(meta, &revision).await;
            revision.set_dependency_status(counts.found, counts.installed, counts.invalid);
            if let Err(e) = result {
                let e = e.context(ERR_RESOLVE_DEPENDENCIES);
                debug!(revision = %key.name, error = %format!("{e:#}"), "{ERR_RESOLVE_DEPENDENCIES}");
                self.recorder.event(key, Event::warning(REASON_DEPENDENCIES, &e));
                revision.set_conditions([Condition::unknown_health()]);
                let short = self.short();
                return self.finish(&mut revision, short).await;
            }
        }

        let crds: Vec<String> = bundle
            .objects
            .iter()
            .filter(|o| o.kind == CRD_KIND)
            .map(|o| o.metadata.name.clone())
            .collect();

        if let Err(e) = self.hooks.pre(meta, &mut revision, &crds).await {
            let short = self.short();
            return self.unhealthy(&mut revision, REASON_SYNC, e.context(ERR_PRE_HOOK), short).await;
        }

        let control = revision.is_active();
        let references = match self.objects.establish(&bundle.objects, &revision, control).await {
            Ok(references) => references,
            Err(e) => {
                let short = self.short();
                return self
                    .unhealthy(&mut revision, REASON_SYNC, e.context(ERR_ESTABLISH_CONTROL), short)
                    .await;
            }
        };
        revision.status.object_refs = references;

        if let Err(e) = self.hooks.post(meta, &mut revision, &crds).await {
            let short = self.short();
            return self.unhealthy(&mut revision, REASON_SYNC, e.context(ERR_POST_HOOK), short).await;
        }

        info!(revision = %key.name, active = control, objects = revision.status.object_refs.len(), "Package revision configured");
        self.recorder.event(
            key,
            Event::normal(REASON_SYNC, "package revision successfully configured and healthy"),
        );
        revision.set_conditions([Condition::healthy()]);
        let long = self.long();
        self.finish(&mut revision, long).await
    }
}

//! Lock reconciler: installs missing dependencies.
//!
//! Every installed revision records itself and its declared dependencies in
//! the [`Lock`]. A dependency whose package has no entry is *implied*. Each
//! pass builds the dependency graph from the Lock, refuses to act on cycles,
//! and creates a Package for the first implied dependency, pinned to the
//! highest registry tag satisfying its constraint.
//!
//! Only one dependency is installed per pass. Once it is installed its own
//! revision adds it to the Lock, which triggers the next pass and surfaces any
//! dependencies it declares in turn.
//!
//! Failure handling:
//! - cycles, malformed constraints or references, unsatisfiable constraints
//!   and unsupported package types are logged and not retried
//! - tag listing and package creation failures are retried after the short wait

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::{Lock, LockNode, ObjectKey, Package, PackageType, Resource};
use crate::config::Timers;
use crate::constants::LOCK_FINALIZER;
use crate::controller::{Action, Event, Reconciler, Recorder};
use crate::core::PkgError;
use crate::dag::{Dag, Node};
use crate::pkg::{Fetcher, ImageReference, to_dns_label};
use crate::store::{ApiFinalizer, Client};
use crate::version::{Constraint, select_highest};

const ERR_GET_LOCK: &str = "cannot get package lock";
const ERR_ADD_FINALIZER: &str = "cannot add lock finalizer";
const ERR_BUILD_DAG: &str = "cannot build DAG";
const ERR_SORT_DAG: &str = "cannot sort DAG";
const ERR_INVALID_CONSTRAINT: &str = "version constraint on dependency is invalid";
const ERR_INVALID_DEPENDENCY: &str = "dependency package is not valid";
const ERR_FETCH_TAGS: &str = "cannot fetch dependency package tags";
const ERR_NO_VALID_VERSION: &str = "cannot find a valid version for package constraints";
const ERR_INVALID_PACKAGE_TYPE: &str = "cannot create invalid package dependency type";
const ERR_CREATE_DEPENDENCY: &str = "cannot create dependency package";

const REASON_RESOLVE: &str = "ResolveDependencies";

/// Configuration for the [`Resolver`].
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Package types the resolver may create.
    pub package_types: BTreeSet<PackageType>,
    /// The short wait is used for retryable failures.
    pub timers: Timers,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            package_types: BTreeSet::from([PackageType::Provider]),
            timers: Timers::default(),
        }
    }
}

/// Reconciles the Lock, creating a Package for one implied dependency per
/// pass.
///
/// The resolver adds a finalizer to the Lock and never removes it. A missing
/// Lock is not an error.
pub struct Resolver {
    client: Client,
    lock: ApiFinalizer,
    fetcher: Arc<dyn Fetcher>,
    recorder: Arc<dyn Recorder>,
    options: ResolverOptions,
}

impl Resolver {
    /// Tags for dependency constraints are listed through `fetcher`.
    pub fn new(
        client: Client,
        fetcher: Arc<dyn Fetcher>,
        recorder: Arc<dyn Recorder>,
        options: ResolverOptions,
    ) -> Self {
        Self {
            lock: ApiFinalizer::new(client.clone(), LOCK_FINALIZER),
            client,
            fetcher,
            recorder,
            options,
        }
    }

    /// Log and record a failure that retrying cannot fix.
    fn abandon(&self, key: &ObjectKey, error: anyhow::Error) -> Result<Action> {
        warn!(lock = %key.name, error = %format!("{error:#}"), "Cannot resolve dependencies");
        self.recorder.event(key, Event::warning(REASON_RESOLVE, &error));
        Ok(Action::await_change())
    }

    fn retry(&self, key: &ObjectKey, error: anyhow::Error) -> Result<Action> {
        debug!(lock = %key.name, error = %format!("{error:#}"), "Retrying dependency resolution");
        self.recorder.event(key, Event::warning(REASON_RESOLVE, &error));
        Ok(Action::requeue(self.options.timers.short_wait()))
    }
}

#[async_trait]
impl Reconciler for Resolver {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        debug!(lock = %key.name, "Reconciling lock");

        let Some(mut lock) = self.client.get_opt::<Lock>(key).await.context(ERR_GET_LOCK)? else {
            return Ok(Action::await_change());
        };

        // The guard is never removed: the Lock must outlive every package.
        if let Err(e) = self.lock.add_finalizer(&mut lock).await {
            debug!(lock = %key.name, error = %e, "{ERR_ADD_FINALIZER}");
            return Ok(Action::requeue(self.options.timers.short_wait()));
        }

        let mut dag = Dag::new();
        let implied = match dag.init(lock.to_nodes()) {
            Ok(implied) => implied,
            Err(e) => return self.abandon(key, anyhow::Error::new(e).context(ERR_BUILD_DAG)),
        };

        if let Err(e) = dag.sort() {
            return self.abandon(key, anyhow::Error::new(e).context(ERR_SORT_DAG));
        }

        let Some(first) = implied.first() else {
            return Ok(Action::await_change());
        };

        let LockNode::Dependency(dep) = first else {
            warn!(lock = %key.name, node = %first.identifier(), "{ERR_INVALID_DEPENDENCY}");
            return Ok(Action::await_change());
        };

        let constraint = match Constraint::parse(&dep.constraints) {
            Ok(c) => c,
            Err(e) => return self.abandon(key, anyhow::Error::new(e).context(ERR_INVALID_CONSTRAINT)),
        };

        let reference = match ImageReference::parse(&dep.package) {
            Ok(r) => r,
            Err(e) => return self.abandon(key, anyhow::Error::new(e).context(ERR_INVALID_DEPENDENCY)),
        };

        // No pull secrets: private dependencies must be installed by hand.
        let tags = match self.fetcher.tags(&reference, &[]).await {
            Ok(tags) => tags,
            Err(e) => return self.retry(key, anyhow::Error::new(e).context(ERR_FETCH_TAGS)),
        };

        let Some(selected) = select_highest(&constraint, tags.iter().map(String::as_str)) else {
            return self.abandon(
                key,
                anyhow::Error::new(PkgError::NoValidVersion {
                    package: dep.package.clone(),
                    constraints: dep.constraints.clone(),
                })
                .context(ERR_NO_VALID_VERSION),
            );
        };

        let package_type = match PackageType::from_str(&dep.package_type) {
            Ok(t) if self.options.package_types.contains(&t) => t,
            Ok(t) => {
                let e = PkgError::UnsupportedPackageType {
                    package_type: t.to_string(),
                };
                return self.abandon(key, anyhow::Error::new(e).context(ERR_INVALID_PACKAGE_TYPE));
            }
            Err(e) => return self.abandon(key, anyhow::Error::new(e).context(ERR_INVALID_PACKAGE_TYPE)),
        };

        let mut package = Package::new(
            package_type,
            to_dns_label(reference.repository()),
            reference.with_tag(&selected.original),
        );
        if let Err(e) = self.client.create(&mut package).await {
            return self.retry(key, anyhow::Error::new(e).context(ERR_CREATE_DEPENDENCY));
        }

        info!(
            lock = %key.name,
            package = %package.name(),
            source = %package.source(),
            "Created dependency package"
        );
        self.recorder.event(
            key,
            Event::normal(
                REASON_RESOLVE,
                format!("created {} {} from {}", package_type, package.name(), package.source()),
            ),
        );
        Ok(Action::await_change())
    }
}

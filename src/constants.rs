//! Global constants used throughout the ctlpkg codebase.
//!
//! This module contains reconcile timers, retry parameters, record names and
//! label keys that are shared by the controllers. Defining them centrally
//! keeps the wake-up tiers and well-known names in one discoverable place.

use std::time::Duration;

/// Wall-clock budget for a single reconcile pass (60 seconds).
///
/// A pass that exceeds this budget is aborted with a timeout error and
/// retried like any other failure.
pub const RECONCILE_TIMEOUT: Duration = Duration::from_secs(60);

/// Very short wait tier (5 seconds).
///
/// Used when a state change is expected almost immediately, e.g. waiting for
/// a revision identifier that is not yet available.
pub const VERY_SHORT_WAIT: Duration = Duration::from_secs(5);

/// Short wait tier (30 seconds) for transient failures.
pub const SHORT_WAIT: Duration = Duration::from_secs(30);

/// Long wait tier (60 seconds).
///
/// Used for content defects that need a corrected input and for the periodic
/// health re-check of a healthy revision.
pub const LONG_WAIT: Duration = Duration::from_secs(60);

/// Interval between registry checks for packages with an `Always` pull policy.
pub const PULL_WAIT: Duration = Duration::from_secs(60);

/// Starting delay for per-key error backoff in the controller work queue (5ms).
pub const STARTING_BACKOFF_DELAY_MS: u64 = 5;

/// Maximum per-key error backoff delay (5 minutes).
pub const MAX_BACKOFF_DELAY_MS: u64 = 300_000;

/// Maximum number of attempts for a single registry request.
pub const REGISTRY_MAX_ATTEMPTS: usize = 4;

/// Maximum delay between registry request attempts (2 seconds).
pub const REGISTRY_MAX_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Capacity of the store's watch broadcast channel.
pub const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// Default number of concurrent reconciles per controller.
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: usize = 5;

/// API group of the package records.
pub const PKG_GROUP: &str = "pkg.ctlpkg.io";

/// API version of the package records.
pub const PKG_API_VERSION: &str = "pkg.ctlpkg.io/v1";

/// API group of the package meta documents found inside a package stream.
pub const META_GROUP: &str = "meta.pkg.ctlpkg.io";

/// Name of the singleton Lock record.
pub const LOCK_NAME: &str = "lock";

/// Teardown guard placed on the Lock. Never removed.
pub const LOCK_FINALIZER: &str = "lock.pkg.ctlpkg.io";

/// Teardown guard placed on every revision.
pub const REVISION_FINALIZER: &str = "revision.pkg.ctlpkg.io";

/// Label carrying the name of a revision's parent package.
pub const PARENT_LABEL_KEY: &str = "pkg.ctlpkg.io/package";

/// Label carrying the name of the composite provider that created a package.
pub const COMPOSITE_PROVIDER_NAME_LABEL_KEY: &str = "pkg.ctlpkg.io/composite-provider-name";

/// Label carrying the namespace of the composite provider that created a package.
pub const COMPOSITE_PROVIDER_NAMESPACE_LABEL_KEY: &str =
    "pkg.ctlpkg.io/composite-provider-namespace";

/// Name of the file holding the package stream inside a package image layer.
pub const STREAM_FILE: &str = "package.yaml";

/// Default namespace for controller runtime resources.
pub const DEFAULT_NAMESPACE: &str = "pkg-system";

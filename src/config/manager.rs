//! Manager configuration loaded from a TOML file.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration:
//!
//! ```toml
//! log_level = "info"
//! namespace = "pkg-system"
//! cache_dir = "/var/cache/ctlpkg"
//! max_concurrent_reconciles = 5
//!
//! [timers]
//! reconcile_timeout_secs = 60
//! short_wait_secs = 30
//! very_short_wait_secs = 5
//! long_wait_secs = 60
//! pull_wait_secs = 60
//!
//! [registry]
//! insecure = ["localhost:5000"]
//!
//! [registry.credentials.my-pull-secret]
//! username = "robot"
//! password = "s3cr3t"
//!
//! [packages]
//! enable_intents = false
//! resolvable_types = ["Provider"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::api::PackageType;
use crate::constants::{
    DEFAULT_MAX_CONCURRENT_RECONCILES, DEFAULT_NAMESPACE, LONG_WAIT, PULL_WAIT,
    RECONCILE_TIMEOUT, SHORT_WAIT, VERY_SHORT_WAIT,
};
use crate::core::PkgError;

/// Top-level configuration of the `ctlpkg run` process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Log filter used when `RUST_LOG` is unset (e.g. `info`, `ctlpkg=debug`).
    pub log_level: Option<String>,

    /// Namespace that controller runtime resources are created in.
    pub namespace: String,

    /// Directory for unpacked package streams. `None` disables caching.
    pub cache_dir: Option<PathBuf>,

    /// Number of concurrent reconciles per controller.
    pub max_concurrent_reconciles: usize,

    /// Wake-up tiers.
    pub timers: Timers,

    /// Registry access.
    pub registry: RegistryConfig,

    /// Package types.
    pub packages: PackagesConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            cache_dir: None,
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            timers: Timers::default(),
            registry: RegistryConfig::default(),
            packages: PackagesConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from `path`.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path` when given, defaults otherwise.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path).await,
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), PkgError> {
        if self.max_concurrent_reconciles == 0 {
            return Err(PkgError::Config {
                message: "max_concurrent_reconciles must be at least 1".to_string(),
            });
        }
        if self.timers.reconcile_timeout_secs == 0 {
            return Err(PkgError::Config {
                message: "timers.reconcile_timeout_secs must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Wake-up tiers in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timers {
    /// Budget of a single reconcile pass.
    pub reconcile_timeout_secs: u64,
    /// Retry delay for transient failures.
    pub short_wait_secs: u64,
    /// Retry delay when a change is expected almost immediately.
    pub very_short_wait_secs: u64,
    /// Retry delay for content defects and healthy re-checks.
    pub long_wait_secs: u64,
    /// Registry poll interval for `Always` pull policy.
    pub pull_wait_secs: u64,
}

impl Default for Timers {
    fn default() -> Self {
        Self {
            reconcile_timeout_secs: RECONCILE_TIMEOUT.as_secs(),
            short_wait_secs: SHORT_WAIT.as_secs(),
            very_short_wait_secs: VERY_SHORT_WAIT.as_secs(),
            long_wait_secs: LONG_WAIT.as_secs(),
            pull_wait_secs: PULL_WAIT.as_secs(),
        }
    }
}

impl Timers {
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    pub fn short_wait(&self) -> Duration {
        Duration::from_secs(self.short_wait_secs)
    }

    pub fn very_short_wait(&self) -> Duration {
        Duration::from_secs(self.very_short_wait_secs)
    }

    pub fn long_wait(&self) -> Duration {
        Duration::from_secs(self.long_wait_secs)
    }

    pub fn pull_wait(&self) -> Duration {
        Duration::from_secs(self.pull_wait_secs)
    }
}

/// Registry access settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registries reached over plain HTTP.
    pub insecure: Vec<String>,

    /// Basic-auth credentials keyed by pull secret name.
    pub credentials: BTreeMap<String, Credentials>,
}

impl RegistryConfig {
    /// First credentials matching one of the given pull secret names.
    pub fn credentials_for<'a>(
        &'a self,
        secrets: impl IntoIterator<Item = &'a str>,
    ) -> Option<&'a Credentials> {
        secrets.into_iter().find_map(|name| self.credentials.get(name))
    }

    pub fn is_insecure(&self, registry: &str) -> bool {
        self.insecure.iter().any(|r| r == registry)
    }
}

/// Basic-auth credentials for a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Which package kinds run and which types the resolver may create.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagesConfig {
    /// Run the Intent package and revision controllers.
    pub enable_intents: bool,

    /// Package types the resolver creates for missing dependencies.
    pub resolvable_types: Vec<PackageType>,
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            enable_intents: false,
            resolvable_types: vec![PackageType::Provider],
        }
    }
}

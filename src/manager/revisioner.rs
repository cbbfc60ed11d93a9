//! Naming revisions after the content they install.
//!
//! A revision name is the package name joined to a short prefix of the
//! manifest digest (see [`friendly_id`]), so a source that resolves to the
//! same content always maps to the same revision.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::api::{Package, PullPolicy, Resource};
use crate::pkg::{Fetcher, ImageReference, friendly_id, stable_hash};

const ERR_FETCH_PACKAGE: &str = "failed to fetch package digest from remote";

/// Derives the revision name for the current source of a package.
///
/// An empty name means the source cannot be resolved yet.
#[async_trait]
pub trait Revisioner: Send + Sync {
    /// Returns the revision name for `package`'s current source.
    ///
    /// # Errors
    ///
    /// Returns an error when the source is not a valid reference or the
    /// registry cannot be reached.
    async fn revision(&self, package: &Package) -> Result<String>;
}

/// Resolves revision names from the registry, honouring the pull policy.
pub struct PackageRevisioner {
    fetcher: Arc<dyn Fetcher>,
}

impl PackageRevisioner {
    /// Resolves digests through `fetcher`.
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
        }
    }
}

#[async_trait]
impl Revisioner for PackageRevisioner {
    async fn revision(&self, package: &Package) -> Result<String> {
        match package.spec.package_pull_policy {
            Some(PullPolicy::Never) => {
                return Ok(friendly_id(package.name(), &stable_hash(package.source())));
            }
            Some(PullPolicy::IfNotPresent) if package.status.current_identifier == package.source() => {
                return Ok(package.status.current_revision.clone());
            }
            _ => {}
        }

        let reference = ImageReference::parse(package.source())?;
        debug!(
            package = %package.name(),
            source = %package.source(),
            current = %package.status.current_identifier,
            "Resolving package digest"
        );
        let digest = self
            .fetcher
            .head(&reference, &package.pull_secret_names())
            .await
            .context(ERR_FETCH_PACKAGE)?;
        if digest.is_empty() {
            return Ok(String::new());
        }
        Ok(friendly_id(package.name(), &digest))
    }
}

/// Never resolves anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopRevisioner;

#[async_trait]
impl Revisioner for NopRevisioner {
    async fn revision(&self, _: &Package) -> Result<String> {
        Ok(String::new())
    }
}

//! Where a revision's package stream comes from.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::api::{PackageRevision, Resource};
use crate::pkg::{Fetcher, ImageReference, PackageCache};

const ERR_GET_CACHE: &str = "cannot read package from cache";
const ERR_FETCH_PACKAGE: &str = "cannot fetch package from registry";
const ERR_STORE_CACHE: &str = "cannot store package in cache";

/// Produces the package stream of a revision.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn init(&self, revision: &PackageRevision) -> Result<String>;
}

/// Reads through the package cache, filling it from the registry on a miss.
pub struct ImageBackend {
    cache: Arc<dyn PackageCache>,
    fetcher: Arc<dyn Fetcher>,
}

impl ImageBackend {
    pub fn new(cache: Arc<dyn PackageCache>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            cache,
            fetcher,
        }
    }
}

#[async_trait]
impl Backend for ImageBackend {
    async fn init(&self, revision: &PackageRevision) -> Result<String> {
        let name = revision.name();
        if let Some(stream) = self.cache.get(name).await.context(ERR_GET_CACHE)? {
            debug!(revision = %name, "Package found in cache");
            return Ok(stream);
        }

        let reference = ImageReference::parse(&revision.spec.package_image)?;
        debug!(revision = %name, image = %reference, "Fetching package");
        let stream = self
            .fetcher
            .fetch(&reference, &revision.pull_secret_names())
            .await
            .context(ERR_FETCH_PACKAGE)?;
        self.cache.store(name, &stream).await.context(ERR_STORE_CACHE)?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RevisionKind;
    use crate::pkg::{FsCache, NopCache};
    use crate::test_utils::StaticFetcher;

    const STREAM: &str = "apiVersion: meta.pkg.ctlpkg.io/v1\nkind: Provider\n";

    fn revision() -> PackageRevision {
        let mut rev = PackageRevision::new(RevisionKind::ProviderRevision, "prov-abc");
        rev.spec.package_image = "reg.io/org/prov:v1.0.0".to_string();
        rev
    }

    #[tokio::test]
    async fn test_fills_cache_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(FsCache::new(dir.path()));
        let fetcher = Arc::new(StaticFetcher::new().with_stream("reg.io/org/prov:v1.0.0", STREAM));
        let backend = ImageBackend::new(cache.clone(), fetcher.clone());

        assert_eq!(backend.init(&revision()).await.unwrap(), STREAM);
        assert_eq!(backend.init(&revision()).await.unwrap(), STREAM);
        assert_eq!(fetcher.fetch_calls(), 1);
        assert_eq!(cache.get("prov-abc").await.unwrap().as_deref(), Some(STREAM));
    }

    #[tokio::test]
    async fn test_fetch_failure() {
        let backend = ImageBackend::new(Arc::new(NopCache), Arc::new(StaticFetcher::new()));
        let err = backend.init(&revision()).await.unwrap_err();
        assert!(format!("{err:#}").starts_with(ERR_FETCH_PACKAGE));
    }

    #[tokio::test]
    async fn test_invalid_image() {
        let backend = ImageBackend::new(Arc::new(NopCache), Arc::new(StaticFetcher::new()));
        let mut rev = revision();
        rev.spec.package_image = "Not An Image".to_string();
        assert!(backend.init(&rev).await.is_err());
    }
}

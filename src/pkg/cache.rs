//! Cache of unpacked package streams, keyed by revision name.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[async_trait]
pub trait PackageCache: Send + Sync {
    /// The cached stream for `name`, `None` on a miss.
    async fn get(&self, name: &str) -> Result<Option<String>>;

    async fn store(&self, name: &str, stream: &str) -> Result<()>;

    /// Remove the entry for `name`. Removing a missing entry succeeds.
    async fn delete(&self, name: &str) -> Result<()>;
}

/// A cache that never holds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopCache;

#[async_trait]
impl PackageCache for NopCache {
    async fn get(&self, _: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn store(&self, _: &str, _: &str) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _: &str) -> Result<()> {
        Ok(())
    }
}

/// One file per entry under a root directory.
#[derive(Debug, Clone)]
pub struct FsCache {
    root: PathBuf,
}

impl FsCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            bail!("invalid cache entry name '{name}'");
        }
        Ok(self.root.join(format!("{name}.yaml")))
    }
}

#[async_trait]
impl PackageCache for FsCache {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        let path = self.entry_path(name)?;
        match fs::read_to_string(&path).await {
            Ok(stream) => Ok(Some(stream)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read cache entry {}", path.display())),
        }
    }

    async fn store(&self, name: &str, stream: &str) -> Result<()> {
        let path = self.entry_path(name)?;
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create cache directory {}", self.root.display()))?;

        // Write then rename so readers never see a partial entry.
        let temp_path = path.with_extension("yaml.tmp");
        {
            let mut file = fs::File::create(&temp_path)
                .await
                .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
            file.write_all(stream.as_bytes())
                .await
                .with_context(|| format!("Failed to write to temp file: {}", temp_path.display()))?;
            file.sync_all().await.context("Failed to sync file to disk")?;
        }
        fs::rename(&temp_path, &path)
            .await
            .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;

        debug!(entry = name, "Stored package stream in cache");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.entry_path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove cache entry {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_cache_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = FsCache::new(dir.path().join("nested"));

        assert!(cache.get("rev-1").await.unwrap().is_none());
        cache.store("rev-1", "kind: Provider\n").await.unwrap();
        assert_eq!(cache.get("rev-1").await.unwrap().as_deref(), Some("kind: Provider\n"));

        cache.store("rev-1", "kind: Intent\n").await.unwrap();
        assert_eq!(cache.get("rev-1").await.unwrap().as_deref(), Some("kind: Intent\n"));

        cache.delete("rev-1").await.unwrap();
        assert!(cache.get("rev-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_cache_delete_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        FsCache::new(dir.path()).delete("never-stored").await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_cache_rejects_path_names() {
        let dir = TempDir::new().unwrap();
        let cache = FsCache::new(dir.path());
        assert!(cache.get("../escape").await.is_err());
        assert!(cache.store("a/b", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_nop_cache() {
        NopCache.store("a", "x").await.unwrap();
        assert!(NopCache.get("a").await.unwrap().is_none());
    }
}

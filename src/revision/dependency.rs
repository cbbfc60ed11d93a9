//! Registers a revision in the Lock and checks its dependencies against it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::api::{
    LOCK_KIND, Lock, LockNode, LockPackage, ObjectKey, PackageMeta, PackageRevision, PackageType,
    Resource,
};
use crate::constants::LOCK_NAME;
use crate::core::PkgError;
use crate::dag::Dag;
use crate::pkg::ImageReference;
use crate::store::Client;
use crate::version::{Constraint, parse_tag};

const ERR_GET_LOCK: &str = "cannot get package lock";
const ERR_CREATE_LOCK: &str = "cannot create package lock";
const ERR_UPDATE_LOCK: &str = "cannot update package lock";
const ERR_BUILD_DAG: &str = "cannot build dependency graph";

/// Dependency counts recorded on a revision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DependencyCounts {
    pub found: i64,
    pub installed: i64,
    pub invalid: i64,
}

#[async_trait]
pub trait DependencyManager: Send + Sync {
    /// Add the revision to the Lock and check its dependency tree.
    ///
    /// The counts are meaningful even when resolution fails.
    async fn resolve(&self, meta: &PackageMeta, revision: &PackageRevision) -> (DependencyCounts, Result<()>);

    /// Remove the revision's entry from the Lock.
    async fn remove_self(&self, revision: &PackageRevision) -> Result<()>;
}

/// Keeps revisions of one package type in the Lock.
pub struct PackageDependencyManager {
    client: Client,
    package_type: PackageType,
}

impl PackageDependencyManager {
    pub fn new(client: Client, package_type: PackageType) -> Self {
        Self {
            client,
            package_type,
        }
    }

    fn lock_key() -> ObjectKey {
        ObjectKey::new(LOCK_KIND, LOCK_NAME)
    }

    async fn lock(&self) -> Result<Lock> {
        if let Some(lock) = self.client.get_opt(&Self::lock_key()).await.context(ERR_GET_LOCK)? {
            return Ok(lock);
        }
        let mut lock = Lock::default();
        self.client.create(&mut lock).await.context(ERR_CREATE_LOCK)?;
        Ok(lock)
    }

    fn entry(&self, meta: &PackageMeta, revision: &PackageRevision) -> Result<LockPackage> {
        let reference = ImageReference::parse(&revision.spec.package_image)?;
        Ok(LockPackage {
            name: revision.name().to_string(),
            package_type: self.package_type.as_str().to_string(),
            source: reference.source(),
            version: reference.identifier().as_str().to_string(),
            dependencies: meta.spec.depends_on.clone(),
        })
    }

    async fn check(&self, entry: LockPackage, counts: &mut DependencyCounts) -> Result<()> {
        let mut lock = self.lock().await?;
        match lock.packages.iter().position(|p| p.name == entry.name) {
            Some(i) if lock.packages[i] == entry => {}
            Some(i) => {
                lock.packages[i] = entry.clone();
                self.client.update(&mut lock).await.context(ERR_UPDATE_LOCK)?;
            }
            None => {
                debug!(revision = %entry.name, source = %entry.source, "Adding revision to lock");
                lock.packages.push(entry.clone());
                self.client.update(&mut lock).await.context(ERR_UPDATE_LOCK)?;
            }
        }

        let mut dag = Dag::new();
        dag.init(lock.to_nodes()).context(ERR_BUILD_DAG)?;

        let tree = dag.trace_node(&entry.source).context(ERR_BUILD_DAG)?;
        let missing: Vec<String> = tree
            .values()
            .filter_map(LockNode::as_dependency)
            .map(|d| d.package.clone())
            .collect();
        counts.found = tree.len() as i64;
        counts.installed = counts.found - missing.len() as i64;
        if !missing.is_empty() {
            return Err(PkgError::MissingDependencies {
                missing,
            }
            .into());
        }

        let mut incompatible = Vec::new();
        for dependency in &entry.dependencies {
            let Some(installed) = dag.get_node(&dependency.package)?.as_package() else {
                continue;
            };
            let satisfied = match (Constraint::parse(&dependency.constraints), parse_tag(&installed.version)) {
                (Ok(constraint), Some(tag)) => constraint.matches(&tag.version),
                _ => false,
            };
            if !satisfied {
                incompatible.push(format!(
                    "{} ({}, wanted {})",
                    dependency.package, installed.version, dependency.constraints
                ));
            }
        }
        counts.invalid = incompatible.len() as i64;
        if !incompatible.is_empty() {
            return Err(PkgError::IncompatibleDependencies {
                incompatible,
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl DependencyManager for PackageDependencyManager {
    async fn resolve(&self, meta: &PackageMeta, revision: &PackageRevision) -> (DependencyCounts, Result<()>) {
        if !revision.is_active() {
            return (DependencyCounts::default(), self.remove_self(revision).await);
        }

        let mut counts = DependencyCounts {
            found: meta.spec.depends_on.len() as i64,
            ..Default::default()
        };
        let result = match self.entry(meta, revision) {
            Ok(entry) => self.check(entry, &mut counts).await,
            Err(e) => Err(e),
        };
        (counts, result)
    }

    async fn remove_self(&self, revision: &PackageRevision) -> Result<()> {
        let Some(mut lock) = self.client.get_opt::<Lock>(&Self::lock_key()).await.context(ERR_GET_LOCK)?
        else {
            return Ok(());
        };
        let before = lock.packages.len();
        lock.packages.retain(|p| p.name != revision.name());
        if lock.packages.len() == before {
            return Ok(());
        }
        debug!(revision = %revision.name(), "Removing revision from lock");
        self.client.update(&mut lock).await.context(ERR_UPDATE_LOCK)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{DesiredState, Dependency, RevisionKind};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn client() -> Client {
        Client::new(Arc::new(MemoryStore::new()))
    }

    fn meta(depends_on: &[(&str, &str)]) -> PackageMeta {
        let mut meta: PackageMeta = serde_yaml::from_str("kind: Provider").unwrap();
        meta.spec.depends_on = depends_on
            .iter()
            .map(|(package, constraints)| Dependency {
                package: package.to_string(),
                package_type: "Provider".to_string(),
                constraints: constraints.to_string(),
            })
            .collect();
        meta
    }

    fn revision(name: &str, image: &str) -> PackageRevision {
        let mut rev = PackageRevision::new(RevisionKind::ProviderRevision, name);
        rev.spec.package_image = image.to_string();
        rev.spec.desired_state = DesiredState::Active;
        rev
    }

    async fn lock(client: &Client) -> Lock {
        client.get(&ObjectKey::new(LOCK_KIND, LOCK_NAME)).await.unwrap()
    }

    #[tokio::test]
    async fn test_no_dependencies_creates_lock_entry() {
        let client = client();
        let manager = PackageDependencyManager::new(client.clone(), PackageType::Provider);

        let (counts, result) = manager.resolve(&meta(&[]), &revision("a-1", "reg.io/org/a:v1.0.0")).await;
        result.unwrap();
        assert_eq!(counts, DependencyCounts::default());

        let lock = lock(&client).await;
        assert_eq!(lock.packages.len(), 1);
        assert_eq!(lock.packages[0].source, "reg.io/org/a");
        assert_eq!(lock.packages[0].version, "v1.0.0");
        assert_eq!(lock.packages[0].package_type, "Provider");
    }

    #[tokio::test]
    async fn test_missing_dependency_is_reported() {
        let client = client();
        let manager = PackageDependencyManager::new(client.clone(), PackageType::Provider);

        let (counts, result) = manager
            .resolve(&meta(&[("reg.io/org/b", ">=1.0.0")]), &revision("a-1", "reg.io/org/a:v1.0.0"))
            .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("reg.io/org/b"));
        assert_eq!(counts.found, 1);
        assert_eq!(counts.installed, 0);

        // The entry stays so the resolver can see the implied dependency.
        assert_eq!(lock(&client).await.packages.len(), 1);
    }

    #[tokio::test]
    async fn test_installed_transitive_tree() {
        let client = client();
        let manager = PackageDependencyManager::new(client.clone(), PackageType::Provider);

        let (_, c) = manager.resolve(&meta(&[]), &revision("c-1", "reg.io/org/c:v2.0.0")).await;
        c.unwrap();
        let (_, b) = manager
            .resolve(&meta(&[("reg.io/org/c", ">=2.0.0")]), &revision("b-1", "reg.io/org/b:1.2.0"))
            .await;
        b.unwrap();

        let (counts, result) = manager
            .resolve(&meta(&[("reg.io/org/b", "^1.2.0")]), &revision("a-1", "reg.io/org/a:v1.0.0"))
            .await;
        result.unwrap();
        assert_eq!(
            counts,
            DependencyCounts {
                found: 2,
                installed: 2,
                invalid: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_incompatible_version() {
        let client = client();
        let manager = PackageDependencyManager::new(client.clone(), PackageType::Provider);
        let (_, b) = manager.resolve(&meta(&[]), &revision("b-1", "reg.io/org/b:v3.0.0")).await;
        b.unwrap();

        let (counts, result) = manager
            .resolve(&meta(&[("reg.io/org/b", ">=1.0.0 <2.0.0")]), &revision("a-1", "reg.io/org/a:v1.0.0"))
            .await;
        let err = result.unwrap_err();
        assert!(err.to_string().starts_with("incompatible package dependencies"));
        assert_eq!(counts.invalid, 1);
        assert_eq!(counts.installed, 1);
    }

    #[tokio::test]
    async fn test_changed_dependencies_refresh_entry() {
        let client = client();
        let manager = PackageDependencyManager::new(client.clone(), PackageType::Provider);
        let rev = revision("a-1", "reg.io/org/a:v1.0.0");

        let (_, first) = manager.resolve(&meta(&[]), &rev).await;
        first.unwrap();
        let (_, second) = manager.resolve(&meta(&[("reg.io/org/b", ">=1.0.0")]), &rev).await;
        assert!(second.is_err());
        assert_eq!(lock(&client).await.packages[0].dependencies.len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_removes_self() {
        let client = client();
        let manager = PackageDependencyManager::new(client.clone(), PackageType::Provider);
        let mut rev = revision("a-1", "reg.io/org/a:v1.0.0");
        let (_, result) = manager.resolve(&meta(&[]), &rev).await;
        result.unwrap();

        rev.spec.desired_state = DesiredState::Inactive;
        let (counts, result) = manager.resolve(&meta(&[]), &rev).await;
        result.unwrap();
        assert_eq!(counts, DependencyCounts::default());
        assert!(lock(&client).await.packages.is_empty());
    }

    #[tokio::test]
    async fn test_remove_self_without_lock_or_entry() {
        let client = client();
        let manager = PackageDependencyManager::new(client.clone(), PackageType::Provider);
        manager.remove_self(&revision("a-1", "reg.io/org/a:v1")).await.unwrap();

        let mut lock = Lock::default();
        client.create(&mut lock).await.unwrap();
        manager.remove_self(&revision("a-1", "reg.io/org/a:v1")).await.unwrap();
    }
}

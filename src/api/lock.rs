//! The Lock: singleton ledger of installed packages and their dependencies.
//!
//! Each revision that resolves its dependencies appends its own
//! [`LockPackage`] entry and removes it again on teardown. Nobody edits
//! another actor's entry, so concurrent writers commute.

use serde::{Deserialize, Serialize};

use super::meta::{ObjectMeta, Resource};
use crate::constants::{LOCK_NAME, PKG_API_VERSION};
use crate::core::PkgError;
use crate::dag::Node;

/// Store kind of the Lock record.
pub const LOCK_KIND: &str = "Lock";

fn default_api_version() -> String {
    PKG_API_VERSION.to_string()
}

fn default_kind() -> String {
    LOCK_KIND.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<LockPackage>,
}

impl Default for Lock {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::named(LOCK_NAME),
            packages: Vec::new(),
        }
    }
}

impl Lock {
    /// All entries as graph nodes.
    pub fn to_nodes(&self) -> Vec<LockNode> {
        self.packages.iter().cloned().map(LockNode::Package).collect()
    }
}

impl Resource for Lock {
    fn api_version(&self) -> &str {
        &self.api_version
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// An installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPackage {
    /// Name of the revision that added this entry.
    pub name: String,
    /// Package type, e.g. `Provider`.
    #[serde(rename = "type")]
    pub package_type: String,
    /// Image repository without tag or digest. Graph identifier.
    pub source: String,
    /// Installed tag or digest.
    pub version: String,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

/// A declared dependency on another package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Image repository of the dependency. Graph identifier.
    pub package: String,
    #[serde(rename = "type")]
    pub package_type: String,
    /// Semantic version constraint, e.g. `>=1.0.0 <2.0.0`.
    pub constraints: String,
}

/// A dependency graph node built from the Lock.
///
/// Entries are first-class nodes; a dependency whose package has no entry
/// remains a bare [`LockNode::Dependency`] in the graph and is "implied".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockNode {
    Package(LockPackage),
    Dependency(Dependency),
}

impl LockNode {
    pub fn as_package(&self) -> Option<&LockPackage> {
        match self {
            Self::Package(p) => Some(p),
            Self::Dependency(_) => None,
        }
    }

    pub fn as_dependency(&self) -> Option<&Dependency> {
        match self {
            Self::Package(_) => None,
            Self::Dependency(d) => Some(d),
        }
    }
}

impl Node for LockNode {
    fn identifier(&self) -> &str {
        match self {
            Self::Package(p) => &p.source,
            Self::Dependency(d) => &d.package,
        }
    }

    fn neighbors(&self) -> Vec<Self> {
        match self {
            Self::Package(p) => p.dependencies.iter().cloned().map(Self::Dependency).collect(),
            Self::Dependency(_) => Vec::new(),
        }
    }

    fn add_neighbors(&mut self, neighbors: &[Self]) -> Result<(), PkgError> {
        let identifier = self.identifier().to_string();
        match self {
            Self::Package(p) => {
                for neighbor in neighbors {
                    let Self::Dependency(dep) = neighbor else {
                        return Err(PkgError::InvalidNeighbor {
                            identifier,
                            neighbor: neighbor.identifier().to_string(),
                        });
                    };
                    if !p.dependencies.iter().any(|d| d.package == dep.package) {
                        p.dependencies.push(dep.clone());
                    }
                }
                Ok(())
            }
            // A dependency is a leaf until its package enters the lock.
            Self::Dependency(_) => Ok(()),
        }
    }
}

//! Package records: the user's intent to install a package image.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::condition::{Condition, ConditionedStatus};
use super::meta::{ObjectMeta, Reference, Resource};
use crate::constants::PKG_API_VERSION;
use crate::core::PkgError;

/// The closed set of package kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PackageType {
    Provider,
    Intent,
}

impl PackageType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provider => "Provider",
            Self::Intent => "Intent",
        }
    }

    /// Kind tag of the revisions of this package type.
    pub const fn revision_kind(self) -> RevisionKind {
        match self {
            Self::Provider => RevisionKind::ProviderRevision,
            Self::Intent => RevisionKind::IntentRevision,
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageType {
    type Err = PkgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Provider" => Ok(Self::Provider),
            "Intent" => Ok(Self::Intent),
            other => Err(PkgError::UnsupportedPackageType {
                package_type: other.to_string(),
            }),
        }
    }
}

/// Kind tag of a revision record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RevisionKind {
    ProviderRevision,
    IntentRevision,
}

impl RevisionKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProviderRevision => "ProviderRevision",
            Self::IntentRevision => "IntentRevision",
        }
    }

    pub const fn package_type(self) -> PackageType {
        match self {
            Self::ProviderRevision => PackageType::Provider,
            Self::IntentRevision => PackageType::Intent,
        }
    }
}

impl fmt::Display for RevisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationPolicy {
    /// Always activate the newest revision.
    Automatic,
    /// An external actor flips the desired state.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullPolicy {
    Always,
    IfNotPresent,
    Never,
}

fn default_api_version() -> String {
    PKG_API_VERSION.to_string()
}

fn default_true() -> Option<bool> {
    Some(true)
}

fn default_false() -> Option<bool> {
    Some(false)
}

fn default_activation_policy() -> Option<ActivationPolicy> {
    Some(ActivationPolicy::Automatic)
}

fn default_history_limit() -> Option<i64> {
    Some(1)
}

fn default_pull_policy() -> Option<PullPolicy> {
    Some(PullPolicy::IfNotPresent)
}

/// A Provider or Intent package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub kind: PackageType,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PackageSpec,
    #[serde(default)]
    pub status: PackageStatus,
}

/// Desired state of a package. Omitted fields take the documented defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    /// Image reference of the package, e.g. `registry/org/repo:tag`.
    pub package: String,

    /// Default: `true`.
    #[serde(default = "default_true", skip_serializing_if = "Option::is_none")]
    pub auto_pilot: Option<bool>,

    /// Default: `Automatic`.
    #[serde(default = "default_activation_policy", skip_serializing_if = "Option::is_none")]
    pub revision_activation_policy: Option<ActivationPolicy>,

    /// Number of inactive revisions kept. `0` disables garbage collection. Default: `1`.
    #[serde(default = "default_history_limit", skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_pull_secrets: Vec<Reference>,

    /// Default: `IfNotPresent`.
    #[serde(default = "default_pull_policy", skip_serializing_if = "Option::is_none")]
    pub package_pull_policy: Option<PullPolicy>,

    /// Default: `false`.
    #[serde(default = "default_false", skip_serializing_if = "Option::is_none")]
    pub skip_dependency_resolution: Option<bool>,

    /// Controller configuration (providers only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_ref: Option<Reference>,
}

impl Default for PackageSpec {
    fn default() -> Self {
        Self {
            package: String::new(),
            auto_pilot: default_true(),
            revision_activation_policy: default_activation_policy(),
            revision_history_limit: default_history_limit(),
            package_pull_secrets: Vec::new(),
            package_pull_policy: default_pull_policy(),
            skip_dependency_resolution: default_false(),
            controller_ref: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageStatus {
    #[serde(flatten)]
    pub conditioned: ConditionedStatus,

    /// Name of the revision currently representing this package.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_revision: String,

    /// Source that produced `current_revision`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_identifier: String,
}

impl Package {
    /// A package of `kind` named `name` pulling `source`, with default settings.
    pub fn new(kind: PackageType, name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            kind,
            metadata: ObjectMeta::named(name),
            spec: PackageSpec {
                package: source.into(),
                ..PackageSpec::default()
            },
            status: PackageStatus::default(),
        }
    }

    pub fn source(&self) -> &str {
        &self.spec.package
    }

    pub fn pull_secret_names(&self) -> Vec<String> {
        self.spec.package_pull_secrets.iter().map(|r| r.name.clone()).collect()
    }

    pub fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        self.status.conditioned.set_conditions(conditions);
    }
}

impl Resource for Package {
    fn api_version(&self) -> &str {
        &self.api_version
    }

    fn kind(&self) -> &str {
        self.kind.as_str()
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

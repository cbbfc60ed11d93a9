//! Revision records: immutable snapshots of a resolved package image.

use serde::{Deserialize, Serialize};

use super::condition::{Condition, ConditionKind, ConditionedStatus};
use super::meta::{ObjectMeta, Reference, Resource, TypedReference};
use super::meta_pkg::PolicyRule;
use super::package::{PullPolicy, RevisionKind};
use crate::constants::PKG_API_VERSION;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DesiredState {
    #[default]
    Inactive,
    Active,
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

fn default_pull_policy() -> Option<PullPolicy> {
    Some(PullPolicy::IfNotPresent)
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRevision {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub kind: RevisionKind,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RevisionSpec,
    #[serde(default)]
    pub status: RevisionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionSpec {
    /// Controller configuration copied from the package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_config_ref: Option<Reference>,

    #[serde(default)]
    pub desired_state: DesiredState,

    /// Image reference this revision was resolved from.
    #[serde(default)]
    pub package_image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_pull_secrets: Vec<Reference>,

    #[serde(default = "default_pull_policy", skip_serializing_if = "Option::is_none")]
    pub package_pull_policy: Option<PullPolicy>,

    /// Ordering number, unique per package. Gaps are allowed.
    #[serde(default)]
    pub revision: i64,

    #[serde(default = "default_true", skip_serializing_if = "Option::is_none")]
    pub auto_pilot: Option<bool>,

    #[serde(default = "default_false", skip_serializing_if = "Option::is_none")]
    pub skip_dependency_resolution: Option<bool>,
}

impl Default for RevisionSpec {
    fn default() -> Self {
        Self {
            controller_config_ref: None,
            desired_state: DesiredState::Inactive,
            package_image: String::new(),
            package_pull_secrets: Vec::new(),
            package_pull_policy: default_pull_policy(),
            revision: 0,
            auto_pilot: default_true(),
            skip_dependency_resolution: default_false(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionStatus {
    #[serde(flatten)]
    pub conditioned: ConditionedStatus,

    /// Controller workload stood up for this revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_ref: Option<Reference>,

    /// Objects this revision has established ownership of.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object_refs: Vec<TypedReference>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub found_dependencies: i64,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub installed_dependencies: i64,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub invalid_dependencies: i64,

    /// Permissions requested by the packaged controller.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permission_requests: Vec<PolicyRule>,
}

impl PackageRevision {
    pub fn new(kind: RevisionKind, name: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            kind,
            metadata: ObjectMeta::named(name),
            spec: RevisionSpec::default(),
            status: RevisionStatus::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.spec.desired_state == DesiredState::Active
    }

    pub fn skips_dependency_resolution(&self) -> bool {
        self.spec.skip_dependency_resolution.unwrap_or(false)
    }

    pub fn pull_secret_names(&self) -> Vec<String> {
        self.spec.package_pull_secrets.iter().map(|r| r.name.clone()).collect()
    }

    pub fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        self.status.conditioned.set_conditions(conditions);
    }

    pub fn get_condition(&self, kind: ConditionKind) -> Condition {
        self.status.conditioned.get_condition(kind)
    }

    pub fn set_dependency_status(&mut self, found: i64, installed: i64, invalid: i64) {
        self.status.found_dependencies = found;
        self.status.installed_dependencies = installed;
        self.status.invalid_dependencies = invalid;
    }
}

impl Resource for PackageRevision {
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

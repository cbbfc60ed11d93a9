//! Status conditions for packages and revisions.
//!
//! Conditions are the only user-facing signal of the engine: a package or
//! revision always reports whether it is installed and whether it is healthy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which aspect a condition describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionKind {
    /// Whether a package has been installed.
    PackageInstalled,
    /// Whether a package is healthy.
    PackageHealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Why a condition has its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionReason {
    #[serde(rename = "UnpackingPackage")]
    Unpacking,
    #[serde(rename = "InactivePackageRevision")]
    Inactive,
    #[serde(rename = "ActivePackageRevision")]
    Active,
    #[serde(rename = "UnhealthyPackageRevision")]
    Unhealthy,
    #[serde(rename = "HealthyPackageRevision")]
    Healthy,
    #[serde(rename = "UnknownPackageRevisionHealth")]
    UnknownHealth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "kind")]
    pub kind: ConditionKind,
    pub status: ConditionStatus,
    pub last_transition_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ConditionReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    fn new(kind: ConditionKind, status: ConditionStatus, reason: ConditionReason) -> Self {
        Self {
            kind,
            status,
            last_transition_time: Utc::now(),
            reason: Some(reason),
            message: None,
        }
    }

    /// The package manager is waiting for a revision to be unpacked.
    pub fn unpacking() -> Self {
        Self::new(ConditionKind::PackageInstalled, ConditionStatus::False, ConditionReason::Unpacking)
    }

    /// The package manager is waiting for a revision to be activated.
    pub fn inactive() -> Self {
        Self::new(ConditionKind::PackageInstalled, ConditionStatus::False, ConditionReason::Inactive)
    }

    /// A revision has been installed and activated.
    pub fn active() -> Self {
        Self::new(ConditionKind::PackageInstalled, ConditionStatus::True, ConditionReason::Active)
    }

    pub fn unhealthy() -> Self {
        Self::new(ConditionKind::PackageHealthy, ConditionStatus::False, ConditionReason::Unhealthy)
    }

    pub fn healthy() -> Self {
        Self::new(ConditionKind::PackageHealthy, ConditionStatus::True, ConditionReason::Healthy)
    }

    pub fn unknown_health() -> Self {
        Self::new(
            ConditionKind::PackageHealthy,
            ConditionStatus::Unknown,
            ConditionReason::UnknownHealth,
        )
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Equal apart from the transition time.
    pub fn equivalent(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// A list of conditions, at most one per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionedStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ConditionedStatus {
    /// Condition of `kind`, or an `Unknown` condition if none is set.
    pub fn get_condition(&self, kind: ConditionKind) -> Condition {
        self.conditions.iter().find(|c| c.kind == kind).cloned().unwrap_or(Condition {
            kind,
            status: ConditionStatus::Unknown,
            last_transition_time: DateTime::<Utc>::UNIX_EPOCH,
            reason: None,
            message: None,
        })
    }

    /// Set conditions, replacing any of the same kind.
    ///
    /// Setting a condition equivalent to the existing one keeps the existing
    /// transition time, so repeated passes do not churn the record.
    pub fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        for condition in conditions {
            match self.conditions.iter_mut().find(|c| c.kind == condition.kind) {
                Some(existing) if existing.equivalent(&condition) => {}
                Some(existing) => *existing = condition,
                None => self.conditions.push(condition),
            }
        }
    }
}

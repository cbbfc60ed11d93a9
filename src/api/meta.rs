//! Record metadata shared by every stored record.
//!
//! Records carry a [`ObjectMeta`] block with identity, optimistic-concurrency
//! token, labels, ownership links and teardown guards. Typed records implement
//! [`Resource`]; the store itself only deals in [`DynamicObject`]s.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity and bookkeeping of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Assigned by the store on create.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    /// Optimistic-concurrency token, bumped by the store on every effective write.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub resource_version: u64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,

    /// Teardown guards. A record marked for deletion is only removed once this is empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    /// Set when deletion was requested while teardown guards were present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Returns `true` when the guard was added.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Returns `true` when the guard was present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        before != self.finalizers.len()
    }

    /// The owner reference marked as controller, if any.
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller == Some(true))
    }

    /// Whether an object with this metadata may be controlled by `uid`.
    ///
    /// Objects without a controller are controllable by anyone.
    pub fn is_controllable_by(&self, uid: &str) -> bool {
        self.controller_ref().is_none_or(|r| r.uid == uid)
    }

    /// Add `reference`, replacing any existing reference to the same owner.
    pub fn add_owner_reference(&mut self, reference: OwnerReference) {
        match self.owner_references.iter_mut().find(|r| r.uid == reference.uid) {
            Some(existing) => *existing = reference,
            None => self.owner_references.push(reference),
        }
    }

    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.owner_references.iter().any(|r| r.uid == uid)
    }
}

/// Ownership link from a dependent record to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

impl OwnerReference {
    /// A non-controller reference to `owner`.
    pub fn to<R: Resource>(owner: &R) -> Self {
        Self {
            api_version: owner.api_version().to_string(),
            kind: owner.kind().to_string(),
            name: owner.metadata().name.clone(),
            uid: owner.metadata().uid.clone(),
            controller: None,
            block_owner_deletion: None,
        }
    }

    /// Mark the reference as the controlling owner.
    #[must_use]
    pub fn as_controller(mut self) -> Self {
        self.controller = Some(true);
        self
    }

    #[must_use]
    pub fn block_owner_deletion(mut self) -> Self {
        self.block_owner_deletion = Some(true);
        self
    }
}

/// A reference to a named record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
}

/// A reference to a record of a specific kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
}

/// Store key of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    /// Key of a cluster-scoped record.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// An untyped record as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicObject {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Everything else (`spec`, `status`, `packages`, ...).
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl DynamicObject {
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            kind: self.kind.clone(),
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }

    /// Decode into a typed record.
    pub fn into_typed<R: Resource>(self) -> Result<R, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }

    /// Encode a typed record.
    pub fn from_typed<R: Resource>(resource: &R) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(resource)?)
    }

    pub fn status(&self) -> Option<&serde_json::Value> {
        self.data.get("status")
    }
}

/// A typed record.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn api_version(&self) -> &str;

    /// Kind tag, which is also the store's collection name.
    fn kind(&self) -> &str;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn name(&self) -> &str {
        &self.metadata().name
    }

    fn key(&self) -> ObjectKey {
        ObjectKey {
            kind: self.kind().to_string(),
            namespace: self.metadata().namespace.clone(),
            name: self.metadata().name.clone(),
        }
    }

    fn typed_reference(&self) -> TypedReference {
        TypedReference {
            api_version: self.api_version().to_string(),
            kind: self.kind().to_string(),
            name: self.metadata().name.clone(),
            uid: self.metadata().uid.clone(),
        }
    }
}

impl Resource for DynamicObject {
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

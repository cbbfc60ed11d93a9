//! Record storage.
//!
//! The engine reads and writes every record through the [`Store`] trait.
//! [`MemoryStore`] is the in-process implementation; [`Client`] adds typed
//! access and the apply semantics the reconcilers rely on.
//!
//! Store contract:
//! - `update` writes everything except `status`; `update_status` writes only `status`
//! - both reject a non-zero stale `resourceVersion` with [`StoreError::Conflict`]
//! - writes that change nothing keep the version and emit no watch event
//! - `delete` on a record with finalizers only marks it for deletion

pub mod client;
mod error;
pub mod finalizer;
pub mod memory;

pub use client::Client;
pub use error::{StoreError, ignore_not_found};
pub use finalizer::ApiFinalizer;
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

use crate::api::{DynamicObject, ObjectKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// A change to a stored record.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub event_type: EventType,
    pub object: DynamicObject,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, StoreError>;

    /// Records of `kind` carrying every label in `labels`.
    async fn list(
        &self,
        kind: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    async fn create(&self, object: DynamicObject) -> Result<DynamicObject, StoreError>;

    async fn update(&self, object: DynamicObject) -> Result<DynamicObject, StoreError>;

    async fn update_status(&self, object: DynamicObject) -> Result<DynamicObject, StoreError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;

    /// Subscribe to changes made after this call.
    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}

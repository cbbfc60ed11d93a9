//! In-process record store.
//!
//! Records live in a single map guarded by a mutex, so every call is atomic.
//! Deletion is two-phase: a record with finalizers is only marked
//! (`deletionTimestamp`) and disappears once its last finalizer is removed.
//! When a record disappears, dependents lose their owner reference to it and
//! are deleted themselves once no owner remains.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, trace};
use uuid::Uuid;

use super::{EventType, Store, StoreError, WatchEvent};
use crate::api::{DynamicObject, ObjectKey};
use crate::constants::WATCH_CHANNEL_CAPACITY;

const STATUS: &str = "status";

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<ObjectKey, DynamicObject>,
    last_version: u64,
}

impl State {
    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    fn emit(&self, event_type: EventType, object: &DynamicObject) {
        trace!(key = %object.key(), ?event_type, "Watch event");
        // No subscribers is fine.
        let _ = self.events.send(WatchEvent {
            event_type,
            object: object.clone(),
        });
    }

    /// Write `candidate` over the stored record at `key`, unless nothing changed.
    fn commit(&self, state: &mut State, key: &ObjectKey, mut candidate: DynamicObject) -> DynamicObject {
        let Some(stored) = state.records.get(key) else {
            return candidate;
        };
        candidate.metadata.resource_version = stored.metadata.resource_version;
        if &candidate == stored {
            return candidate;
        }

        candidate.metadata.resource_version = state.next_version();
        if candidate.metadata.is_deleting() && candidate.metadata.finalizers.is_empty() {
            self.remove(state, key);
            return candidate;
        }

        state.records.insert(key.clone(), candidate.clone());
        self.emit(EventType::Modified, &candidate);
        candidate
    }

    /// Remove the record at `key` and collect the garbage it leaves behind.
    fn remove(&self, state: &mut State, key: &ObjectKey) {
        let mut orphaned_owners = VecDeque::new();
        if let Some(removed) = state.records.remove(key) {
            debug!(key = %key, "Removed record");
            self.emit(EventType::Deleted, &removed);
            orphaned_owners.push_back(removed.metadata.uid);
        }

        while let Some(owner_uid) = orphaned_owners.pop_front() {
            let dependents: Vec<ObjectKey> = state
                .records
                .iter()
                .filter(|(_, o)| o.metadata.is_owned_by(&owner_uid))
                .map(|(k, _)| k.clone())
                .collect();

            for dependent_key in dependents {
                let Some(mut dependent) = state.records.get(&dependent_key).cloned() else {
                    continue;
                };
                dependent.metadata.owner_references.retain(|r| r.uid != owner_uid);
                dependent.metadata.resource_version = state.next_version();

                if !dependent.metadata.owner_references.is_empty() {
                    state.records.insert(dependent_key, dependent.clone());
                    self.emit(EventType::Modified, &dependent);
                } else if !dependent.metadata.finalizers.is_empty() {
                    if dependent.metadata.deletion_timestamp.is_none() {
                        dependent.metadata.deletion_timestamp = Some(Utc::now());
                    }
                    state.records.insert(dependent_key, dependent.clone());
                    self.emit(EventType::Modified, &dependent);
                } else {
                    debug!(key = %dependent_key, "Collected orphaned record");
                    state.records.remove(&dependent_key);
                    self.emit(EventType::Deleted, &dependent);
                    orphaned_owners.push_back(dependent.metadata.uid);
                }
            }
        }
    }

    fn check_version(stored: &DynamicObject, incoming: &DynamicObject) -> Result<(), StoreError> {
        let version = incoming.metadata.resource_version;
        if version != 0 && version != stored.metadata.resource_version {
            return Err(StoreError::Conflict {
                key: stored.key().to_string(),
            });
        }
        Ok(())
    }
}

fn not_found(key: &ObjectKey) -> StoreError {
    StoreError::NotFound {
        key: key.to_string(),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, StoreError> {
        let state = self.state.lock().await;
        state.records.get(key).cloned().ok_or_else(|| not_found(key))
    }

    async fn list(
        &self,
        kind: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|o| o.kind == kind)
            .filter(|o| labels.iter().all(|(k, v)| o.metadata.labels.get(k) == Some(v)))
            .cloned()
            .collect())
    }

    async fn create(&self, mut object: DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = object.key();
        let mut state = self.state.lock().await;
        if state.records.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                key: key.to_string(),
            });
        }

        if object.metadata.uid.is_empty() {
            object.metadata.uid = Uuid::new_v4().to_string();
        }
        object.metadata.resource_version = state.next_version();
        object.metadata.creation_timestamp = Some(Utc::now());
        object.metadata.deletion_timestamp = None;

        state.records.insert(key, object.clone());
        self.emit(EventType::Added, &object);
        Ok(object)
    }

    async fn update(&self, object: DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = object.key();
        let mut state = self.state.lock().await;
        let stored = state.records.get(&key).ok_or_else(|| not_found(&key))?;
        Self::check_version(stored, &object)?;

        let mut candidate = object;
        candidate.metadata.uid.clone_from(&stored.metadata.uid);
        candidate.metadata.creation_timestamp = stored.metadata.creation_timestamp;
        candidate.metadata.deletion_timestamp = stored.metadata.deletion_timestamp;
        candidate.data.remove(STATUS);
        if let Some(status) = stored.data.get(STATUS) {
            candidate.data.insert(STATUS.to_string(), status.clone());
        }

        Ok(self.commit(&mut state, &key, candidate))
    }

    async fn update_status(&self, object: DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = object.key();
        let mut state = self.state.lock().await;
        let stored = state.records.get(&key).ok_or_else(|| not_found(&key))?;
        Self::check_version(stored, &object)?;

        let mut candidate = stored.clone();
        candidate.data.remove(STATUS);
        if let Some(status) = object.data.get(STATUS) {
            candidate.data.insert(STATUS.to_string(), status.clone());
        }

        Ok(self.commit(&mut state, &key, candidate))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let stored = state.records.get(key).ok_or_else(|| not_found(key))?;

        if stored.metadata.finalizers.is_empty() {
            self.remove(&mut state, key);
            return Ok(());
        }
        if stored.metadata.is_deleting() {
            return Ok(());
        }

        let mut marked = stored.clone();
        marked.metadata.deletion_timestamp = Some(Utc::now());
        marked.metadata.resource_version = state.next_version();
        state.records.insert(key.clone(), marked.clone());
        self.emit(EventType::Modified, &marked);
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

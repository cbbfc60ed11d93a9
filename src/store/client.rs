//! Typed access to a [`Store`].

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Store, StoreError, WatchEvent, ignore_not_found};
use crate::api::{DynamicObject, ObjectKey, Resource};
use tokio::sync::broadcast;

const STATUS: &str = "status";

/// Typed store client shared by all reconcilers.
///
/// Write methods take the record by `&mut` and replace it with the stored
/// result, so the caller always holds the latest resource version.
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
        }
    }

    pub fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.store.watch()
    }

    pub async fn get<R: Resource>(&self, key: &ObjectKey) -> Result<R, StoreError> {
        Ok(self.store.get(key).await?.into_typed()?)
    }

    /// Like [`Client::get`], with not-found mapped to `None`.
    pub async fn get_opt<R: Resource>(&self, key: &ObjectKey) -> Result<Option<R>, StoreError> {
        ignore_not_found(self.get(key).await)
    }

    pub async fn get_dynamic(&self, key: &ObjectKey) -> Result<DynamicObject, StoreError> {
        self.store.get(key).await
    }

    pub async fn list<R: Resource>(
        &self,
        kind: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<R>, StoreError> {
        self.store
            .list(kind, labels)
            .await?
            .into_iter()
            .map(|o| o.into_typed().map_err(StoreError::from))
            .collect()
    }

    pub async fn list_dynamic(&self, kind: &str) -> Result<Vec<DynamicObject>, StoreError> {
        self.store.list(kind, &BTreeMap::new()).await
    }

    pub async fn create<R: Resource>(&self, resource: &mut R) -> Result<(), StoreError> {
        let created = self.store.create(DynamicObject::from_typed(resource)?).await?;
        *resource = created.into_typed()?;
        Ok(())
    }

    pub async fn update<R: Resource>(&self, resource: &mut R) -> Result<(), StoreError> {
        let updated = self.store.update(DynamicObject::from_typed(resource)?).await?;
        *resource = updated.into_typed()?;
        Ok(())
    }

    pub async fn update_status<R: Resource>(&self, resource: &mut R) -> Result<(), StoreError> {
        let updated = self.store.update_status(DynamicObject::from_typed(resource)?).await?;
        *resource = updated.into_typed()?;
        Ok(())
    }

    /// Create `resource` or merge it into the existing record.
    ///
    /// Labels, annotations and owner references are merged into the existing
    /// metadata, top-level fields other than `status` replace their stored
    /// counterparts. The stored status is kept.
    pub async fn apply<R: Resource>(&self, resource: &mut R) -> Result<(), StoreError> {
        self.apply_checked(resource, None).await
    }

    /// Like [`Client::apply`], but refuses to touch an existing record that is
    /// controlled by anyone other than `controller_uid`.
    pub async fn apply_controlled<R: Resource>(
        &self,
        resource: &mut R,
        controller_uid: &str,
    ) -> Result<(), StoreError> {
        self.apply_checked(resource, Some(controller_uid)).await
    }

    async fn apply_checked<R: Resource>(
        &self,
        resource: &mut R,
        controller_uid: Option<&str>,
    ) -> Result<(), StoreError> {
        let desired = DynamicObject::from_typed(resource)?;
        let key = desired.key();

        let Some(mut existing) = ignore_not_found(self.store.get(&key).await)? else {
            return self.create(resource).await;
        };

        if let Some(uid) = controller_uid
            && !existing.metadata.is_controllable_by(uid)
        {
            let owner = existing
                .metadata
                .controller_ref()
                .map(|r| format!("{} {}", r.kind, r.name))
                .unwrap_or_default();
            return Err(StoreError::NotControllable {
                key: key.to_string(),
                owner,
            });
        }

        merge_into(&mut existing, desired);
        let updated = self.store.update(existing).await?;
        *resource = updated.into_typed()?;
        Ok(())
    }

    pub async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        self.store.delete(key).await
    }

    /// Delete, treating an absent record as already deleted.
    pub async fn delete_ignore_not_found(&self, key: &ObjectKey) -> Result<(), StoreError> {
        ignore_not_found(self.store.delete(key).await).map(|_| ())
    }
}

fn merge_into(existing: &mut DynamicObject, desired: DynamicObject) {
    let DynamicObject {
        api_version,
        metadata,
        data,
        ..
    } = desired;

    existing.api_version = api_version;
    existing.metadata.labels.extend(metadata.labels);
    existing.metadata.annotations.extend(metadata.annotations);
    for reference in metadata.owner_references {
        existing.metadata.add_owner_reference(reference);
    }
    for finalizer in &metadata.finalizers {
        existing.metadata.add_finalizer(finalizer);
    }
    for (field, value) in data {
        if field != STATUS {
            existing.data.insert(field, value);
        }
    }
}

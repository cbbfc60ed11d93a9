//! Finalizers hold a record in the deleting state until its owner's
//! teardown has finished.

use super::{Client, StoreError};
use crate::api::Resource;

/// Adds and removes one named teardown guard, writing only when it changes.
#[derive(Debug, Clone)]
pub struct ApiFinalizer {
    client: Client,
    finalizer: &'static str,
}

impl ApiFinalizer {
    pub fn new(client: Client, finalizer: &'static str) -> Self {
        Self {
            client,
            finalizer,
        }
    }

    /// Adds the finalizer to `resource`, updating the store if it was absent.
    pub async fn add_finalizer<R: Resource>(&self, resource: &mut R) -> Result<(), StoreError> {
        if resource.metadata_mut().add_finalizer(self.finalizer) {
            self.client.update(resource).await?;
        }
        Ok(())
    }

    pub async fn remove_finalizer<R: Resource>(&self, resource: &mut R) -> Result<(), StoreError> {
        if resource.metadata_mut().remove_finalizer(self.finalizer) {
            self.client.update(resource).await?;
        }
        Ok(())
    }
}

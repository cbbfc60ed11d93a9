//! Takes or releases ownership of the objects a package installs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::api::{DynamicObject, OwnerReference, PackageRevision, Resource, TypedReference};
use crate::store::{Client, ignore_not_found};

const ERR_GET_OBJECT: &str = "cannot get package object";
const ERR_APPLY_OBJECT: &str = "cannot apply package object";
const ERR_UPDATE_OBJECT: &str = "cannot update package object";

#[async_trait]
pub trait Establisher: Send + Sync {
    /// Establish `objects` on behalf of `parent`, returning references to
    /// every object that now exists.
    ///
    /// With `control` the parent becomes the controller of each object and
    /// missing objects are created. Without it the parent only keeps a plain
    /// owner reference on objects that already exist.
    async fn establish(
        &self,
        objects: &[DynamicObject],
        parent: &PackageRevision,
        control: bool,
    ) -> Result<Vec<TypedReference>>;
}

/// Establishes objects through the store.
pub struct ApiEstablisher {
    client: Client,
}

impl ApiEstablisher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
        }
    }

    async fn control(&self, object: &DynamicObject, parent: &PackageRevision) -> Result<DynamicObject> {
        let mut desired = object.clone();
        desired
            .metadata
            .add_owner_reference(OwnerReference::to(parent).as_controller().block_owner_deletion());
        self.client
            .apply_controlled(&mut desired, &parent.metadata.uid)
            .await
            .with_context(|| format!("{ERR_APPLY_OBJECT} {}", object.key()))?;
        Ok(desired)
    }

    async fn release(&self, object: &DynamicObject, parent: &PackageRevision) -> Result<Option<DynamicObject>> {
        let key = object.key();
        let Some(mut existing) = ignore_not_found(self.client.get_dynamic(&key).await)
            .with_context(|| format!("{ERR_GET_OBJECT} {key}"))?
        else {
            debug!(object = %key, revision = %parent.name(), "Object does not exist, nothing to release");
            return Ok(None);
        };

        let owner = OwnerReference::to(parent);
        if existing.metadata.owner_references.iter().any(|r| r == &owner) {
            return Ok(Some(existing));
        }
        existing.metadata.add_owner_reference(owner);
        self.client
            .update(&mut existing)
            .await
            .with_context(|| format!("{ERR_UPDATE_OBJECT} {key}"))?;
        Ok(Some(existing))
    }
}

#[async_trait]
impl Establisher for ApiEstablisher {
    async fn establish(
        &self,
        objects: &[DynamicObject],
        parent: &PackageRevision,
        control: bool,
    ) -> Result<Vec<TypedReference>> {
        let mut references = Vec::with_capacity(objects.len());
        for object in objects {
            let established = if control {
                Some(self.control(object, parent).await?)
            } else {
                self.release(object, parent).await?
            };
            if let Some(established) = established {
                references.push(established.typed_reference());
            }
        }
        Ok(references)
    }
}

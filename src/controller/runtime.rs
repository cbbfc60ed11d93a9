//! The controller loop.
//!
//! A [`Controller`] turns store changes into keys on a [`WorkQueue`] and runs
//! a fixed pool of workers over it. The [`Action`](super::Action) a pass
//! returns decides when the key is seen again. A failed pass is retried with
//! a per-key exponential backoff that resets on the next success.

use anyhow::Result;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{Reconciler, WorkQueue};
use crate::api::{DynamicObject, ObjectKey};
use crate::constants::{DEFAULT_MAX_CONCURRENT_RECONCILES, RECONCILE_TIMEOUT};
use crate::core::PkgError;
use crate::store::{Client, WatchEvent};
use crate::utils::exponential_backoff_delay;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Number of workers. Zero is treated as one.
    pub max_concurrent_reconciles: usize,
    /// A pass running longer than this fails with [`PkgError::Timeout`].
    pub reconcile_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            reconcile_timeout: RECONCILE_TIMEOUT,
        }
    }
}

/// Runs one [`Reconciler`] for every record of a primary kind.
///
/// Changes to records of the primary kind enqueue that record. Changes to
/// records of an owned kind enqueue their controlling owner, when it is of
/// the primary kind. Primary records are cluster-scoped.
pub struct Controller {
    name: String,
    kind: String,
    owns: Vec<String>,
    client: Client,
    reconciler: Arc<dyn Reconciler>,
    options: ControllerOptions,
    queue: Arc<WorkQueue>,
    failures: DashMap<ObjectKey, u32>,
}

impl Controller {
    /// A controller named `name` that runs `reconciler` for records of `kind`.
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        client: Client,
        reconciler: Arc<dyn Reconciler>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            owns: Vec::new(),
            client,
            reconciler,
            options: ControllerOptions::default(),
            queue: WorkQueue::new(),
            failures: DashMap::new(),
        }
    }

    /// Also react to changes of records of `kind` controlled by a primary record.
    #[must_use]
    pub fn owns(mut self, kind: impl Into<String>) -> Self {
        self.owns.push(kind.into());
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Keys to enqueue for a change to `object`.
    fn map_event(&self, object: &DynamicObject) -> Option<ObjectKey> {
        if object.kind == self.kind {
            return Some(ObjectKey::new(&self.kind, &object.metadata.name));
        }
        if self.owns.contains(&object.kind)
            && let Some(owner) = object.metadata.controller_ref()
            && owner.kind == self.kind
        {
            return Some(ObjectKey::new(&self.kind, &owner.name));
        }
        None
    }

    async fn enqueue_all(&self) -> Result<()> {
        for object in self.client.list_dynamic(&self.kind).await? {
            self.queue.add(ObjectKey::new(&self.kind, &object.metadata.name)).await;
        }
        Ok(())
    }

    /// Run until `shutdown` flips to `true`.
    ///
    /// Every existing record is reconciled once at start. Pending requeues
    /// are cancelled on shutdown and in-flight passes run to completion.
    ///
    /// # Errors
    ///
    /// Returns an error when the initial listing fails.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let controller = Arc::new(self);
        info!(controller = %controller.name, kind = %controller.kind, "Starting controller");

        // Subscribe before listing so no change slips between the two.
        let mut events = controller.client.watch();
        controller.enqueue_all().await?;

        let workers = (0..controller.options.max_concurrent_reconciles.max(1))
            .map(|_| {
                let controller = Arc::clone(&controller);
                async move { controller.worker().await }
            })
            .collect::<Vec<_>>();
        let workers = tokio::spawn(join_all(workers));

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(WatchEvent { object, .. }) => {
                        if let Some(key) = controller.map_event(&object) {
                            controller.queue.add(key).await;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(controller = %controller.name, missed, "Watch lagged, re-listing");
                        controller.enqueue_all().await?;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        info!(controller = %controller.name, "Stopping controller");
        controller.queue.shutdown().await;
        if let Err(e) = workers.await {
            warn!(controller = %controller.name, error = %e, "Controller worker panicked");
        }
        Ok(())
    }

    async fn worker(&self) {
        while let Some(key) = self.queue.get().await {
            self.process(&key).await;
            self.queue.done(&key).await;
        }
    }

    async fn process(&self, key: &ObjectKey) {
        debug!(controller = %self.name, %key, "Reconciling");
        let timeout = self.options.reconcile_timeout;
        let result = match tokio::time::timeout(timeout, self.reconciler.reconcile(key)).await {
            Ok(result) => result,
            Err(_) => Err(PkgError::Timeout {
                key: key.to_string(),
                seconds: timeout.as_secs(),
            }
            .into()),
        };

        match result {
            Ok(action) => {
                self.failures.remove(key);
                if let Some(delay) = action.requeue_after() {
                    debug!(controller = %self.name, %key, ?delay, "Requeue");
                    self.queue.add_after(key.clone(), delay);
                }
            }
            Err(e) => {
                let failures = {
                    let mut entry = self.failures.entry(key.clone()).or_insert(0);
                    let failures = *entry;
                    *entry = entry.saturating_add(1);
                    failures
                };
                let delay = exponential_backoff_delay(failures);
                warn!(controller = %self.name, %key, ?delay, error = %format!("{e:#}"), "Reconcile failed");
                self.queue.add_after(key.clone(), delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{OwnerReference, Package, PackageRevision, PackageType, Resource, RevisionKind};
    use crate::controller::Action;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Counting {
        seen: Mutex<Vec<ObjectKey>>,
        fail_first: bool,
    }

    #[async_trait]
    impl Reconciler for Counting {
        async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
            let first = {
                let mut seen = self.seen.lock().unwrap();
                seen.push(key.clone());
                seen.len() == 1
            };
            if self.fail_first && first {
                anyhow::bail!("transient");
            }
            Ok(Action::await_change())
        }
    }

    async fn wait_for(reconciler: &Counting, count: usize) {
        for _ in 0..200 {
            if reconciler.seen.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("reconciler saw {} keys, wanted {count}", reconciler.seen.lock().unwrap().len());
    }

    #[tokio::test]
    async fn test_map_event_primary_and_owned() {
        let client = Client::new(Arc::new(MemoryStore::new()));
        let controller = Controller::new("test", "Provider", client, Arc::new(Counting::default()))
            .owns("ProviderRevision");

        let mut pkg = Package::new(PackageType::Provider, "prov", "reg/x:v1");
        pkg.metadata.uid = "u1".to_string();
        let primary = DynamicObject::from_typed(&pkg).unwrap();
        assert_eq!(controller.map_event(&primary), Some(ObjectKey::new("Provider", "prov")));

        let mut rev = PackageRevision::new(RevisionKind::ProviderRevision, "prov-abc");
        rev.metadata.add_owner_reference(OwnerReference::to(&pkg).as_controller());
        let owned = DynamicObject::from_typed(&rev).unwrap();
        assert_eq!(controller.map_event(&owned), Some(ObjectKey::new("Provider", "prov")));

        let unowned = DynamicObject::from_typed(&PackageRevision::new(RevisionKind::ProviderRevision, "x")).unwrap();
        assert_eq!(controller.map_event(&unowned), None);
    }

    #[tokio::test]
    async fn test_run_reconciles_existing_and_new_records() {
        let client = Client::new(Arc::new(MemoryStore::new()));
        let mut existing = Package::new(PackageType::Provider, "a", "reg/a:v1");
        client.create(&mut existing).await.unwrap();

        let reconciler = Arc::new(Counting::default());
        let controller = Controller::new("test", "Provider", client.clone(), reconciler.clone());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(controller.run(rx));

        wait_for(&reconciler, 1).await;
        let mut added = Package::new(PackageType::Provider, "b", "reg/b:v1");
        client.create(&mut added).await.unwrap();
        wait_for(&reconciler, 2).await;

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        let seen = reconciler.seen.lock().unwrap().clone();
        assert!(seen.contains(&existing.key()));
        assert!(seen.contains(&added.key()));
    }

    #[tokio::test]
    async fn test_errors_are_retried() {
        let client = Client::new(Arc::new(MemoryStore::new()));
        let mut pkg = Package::new(PackageType::Provider, "a", "reg/a:v1");
        client.create(&mut pkg).await.unwrap();

        let reconciler = Arc::new(Counting {
            fail_first: true,
            ..Counting::default()
        });
        let controller = Controller::new("test", "Provider", client, reconciler.clone());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(controller.run(rx));

        wait_for(&reconciler, 2).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}

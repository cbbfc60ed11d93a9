//! Level-triggered work queue.
//!
//! A key is held in at most one of three places: queued, processing, or
//! neither. Adding a key that is already queued is a no-op; adding a key that
//! is being processed marks it dirty, and it is queued again once the worker
//! calls [`WorkQueue::done`]. No key is ever processed by two workers at once.
//!
//! Delayed adds sleep in their own task and are cancelled by
//! [`WorkQueue::shutdown`], so no timer outlives the queue's consumers.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, watch};

use crate::api::ObjectKey;

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    shutting_down: bool,
}

#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    /// Flips to `true` on shutdown; pending delayed adds watch it.
    closed: watch::Sender<bool>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            notify: Notify::new(),
            closed: watch::Sender::new(false),
        }
    }
}

impl WorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().await;
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        self.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed, unless the queue shuts down first.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => queue.add(key).await,
                () = async { let _ = closed.wait_for(|closed| *closed).await; } => {}
            }
        });
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as processed, re-queueing it if it was added meanwhile.
    pub async fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            self.notify.notify_one();
        }
    }

    pub async fn shutdown(&self) {
        self.state.lock().await.shutting_down = true;
        self.closed.send_replace(true);
        self.notify.notify_waiters();
    }

    /// Delayed adds still waiting on their timer.
    pub fn pending_delayed(&self) -> usize {
        self.closed.receiver_count()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("Provider", name)
    }

    #[tokio::test]
    async fn test_duplicate_adds_coalesce() {
        let queue = WorkQueue::new();
        queue.add(key("a")).await;
        queue.add(key("a")).await;
        queue.add(key("b")).await;
        assert_eq!(queue.len().await, 2);

        assert_eq!(queue.get().await, Some(key("a")));
        assert_eq!(queue.get().await, Some(key("b")));
    }

    #[tokio::test]
    async fn test_add_while_processing_requeues_on_done() {
        let queue = WorkQueue::new();
        queue.add(key("a")).await;
        let a = queue.get().await.unwrap();

        queue.add(key("a")).await;
        queue.add(key("a")).await;
        assert_eq!(queue.len().await, 0);

        queue.done(&a).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.get().await, Some(key("a")));
        queue.done(&a).await;
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let queue = WorkQueue::new();
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shutdown().await;
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_after() {
        let queue = WorkQueue::new();
        queue.add_after(key("a"), Duration::from_millis(10));
        let got = tokio::time::timeout(Duration::from_secs(5), queue.get()).await.unwrap();
        assert_eq!(got, Some(key("a")));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_delayed_adds() {
        let queue = WorkQueue::new();
        queue.add_after(key("a"), Duration::from_secs(60));
        queue.add_after(key("b"), Duration::from_secs(60));
        assert_eq!(queue.pending_delayed(), 2);

        queue.shutdown().await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.pending_delayed() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(queue.is_empty().await);

        // Nothing is scheduled once the queue is closed.
        queue.add_after(key("c"), Duration::from_millis(1));
        assert_eq!(queue.pending_delayed(), 0);
    }
}

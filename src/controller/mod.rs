//! Controller runtime: drives reconcilers from store changes.
//!
//! - [`Reconciler`] - one pass over one record, returning the next wake-up
//! - [`WorkQueue`] - de-duplicating, single-flight queue of record keys
//! - [`Controller`] - watch stream to queue to bounded pool of workers
//! - [`event`] - event recording for reconcilers

pub mod event;
mod queue;
mod runtime;

pub use event::{Event, NopRecorder, Recorder, TracingRecorder};
pub use queue::WorkQueue;
pub use runtime::{Controller, ControllerOptions};

use async_trait::async_trait;
use std::time::Duration;

use crate::api::ObjectKey;

/// What a successful pass asks of the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Run again after `delay`, even if nothing changes.
    pub fn requeue(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }

    /// Run again only when a watched record changes.
    pub fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }

    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Bring the record at `key` one step closer to its desired state.
    ///
    /// An `Err` is retried with per-key exponential backoff.
    async fn reconcile(&self, key: &ObjectKey) -> anyhow::Result<Action>;
}

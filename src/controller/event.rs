//! Events: human-readable notes attached to a record.
//!
//! Reconcilers record an event whenever they take a notable action or hit a
//! failure that is not reflected in status conditions alone.

use tracing::{info, warn};

use crate::api::ObjectKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_type: EventType,
    /// Machine-readable reason, e.g. `InstallPackageRevision`.
    pub reason: String,
    pub message: String,
}

impl Event {
    pub fn normal(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Normal,
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// A warning carrying the full error chain.
    pub fn warning(reason: impl Into<String>, error: &anyhow::Error) -> Self {
        Self {
            event_type: EventType::Warning,
            reason: reason.into(),
            message: format!("{error:#}"),
        }
    }
}

pub trait Recorder: Send + Sync {
    fn event(&self, key: &ObjectKey, event: Event);
}

/// Emits events as log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl Recorder for TracingRecorder {
    fn event(&self, key: &ObjectKey, event: Event) {
        match event.event_type {
            EventType::Normal => {
                info!(target: "ctlpkg::event", object = %key, reason = %event.reason, "{}", event.message);
            }
            EventType::Warning => {
                warn!(target: "ctlpkg::event", object = %key, reason = %event.reason, "{}", event.message);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NopRecorder;

impl Recorder for NopRecorder {
    fn event(&self, _: &ObjectKey, _: Event) {}
}

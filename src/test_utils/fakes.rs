//! In-memory stand-ins for the registry, the parser backend, hooks and the
//! event recorder.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::api::{ObjectKey, PackageMeta, PackageRevision};
use crate::controller::{Event, Recorder};
use crate::core::PkgError;
use crate::pkg::{Fetcher, ImageReference};
use crate::revision::{Backend, Hooks};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A registry served from maps.
///
/// Tags are keyed by repository source (`reg.io/org/pkg`), digests and
/// streams by the full reference as written. A missing digest resolves to an
/// empty string, the way an image that is still being pushed looks.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    tags: Mutex<HashMap<String, Vec<String>>>,
    digests: Mutex<HashMap<String, String>>,
    streams: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
    head_calls: AtomicUsize,
    tag_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags(self, source: &str, tags: &[&str]) -> Self {
        self.set_tags(source, tags);
        self
    }

    pub fn with_digest(self, reference: &str, digest: impl Into<String>) -> Self {
        self.set_digest(reference, digest);
        self
    }

    pub fn with_stream(self, reference: &str, stream: impl Into<String>) -> Self {
        self.set_stream(reference, stream);
        self
    }

    pub fn set_tags(&self, source: &str, tags: &[&str]) {
        lock(&self.tags).insert(source.to_string(), tags.iter().map(|t| t.to_string()).collect());
    }

    pub fn set_digest(&self, reference: &str, digest: impl Into<String>) {
        lock(&self.digests).insert(reference.to_string(), digest.into());
    }

    pub fn set_stream(&self, reference: &str, stream: impl Into<String>) {
        lock(&self.streams).insert(reference.to_string(), stream.into());
    }

    /// Make every call fail with a registry error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn tag_calls(&self) -> usize {
        self.tag_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn check(&self, reference: &ImageReference) -> Result<(), PkgError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PkgError::Registry {
                url: reference.as_str().to_string(),
                reason: "registry unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn head(&self, reference: &ImageReference, _: &[String]) -> Result<String, PkgError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        self.check(reference)?;
        Ok(lock(&self.digests).get(reference.as_str()).cloned().unwrap_or_default())
    }

    async fn tags(&self, reference: &ImageReference, _: &[String]) -> Result<Vec<String>, PkgError> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        self.check(reference)?;
        Ok(lock(&self.tags).get(&reference.source()).cloned().unwrap_or_default())
    }

    async fn fetch(&self, reference: &ImageReference, _: &[String]) -> Result<String, PkgError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.check(reference)?;
        lock(&self.streams)
            .get(reference.as_str())
            .cloned()
            .ok_or_else(|| PkgError::Registry {
                url: reference.as_str().to_string(),
                reason: "manifest unknown".to_string(),
            })
    }
}

/// A backend that hands every revision the same stream.
#[derive(Debug)]
pub struct StaticBackend {
    stream: Mutex<String>,
}

impl StaticBackend {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: Mutex::new(stream.into()),
        }
    }

    pub fn set_stream(&self, stream: impl Into<String>) {
        *lock(&self.stream) = stream.into();
    }
}

#[async_trait]
impl Backend for StaticBackend {
    async fn init(&self, _: &PackageRevision) -> Result<String> {
        Ok(lock(&self.stream).clone())
    }
}

/// Hooks that remember each call and the CRD names they were given.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    post_error: Mutex<Option<String>>,
}

impl RecordingHooks {
    /// Fail every following `post` with `message`.
    pub fn fail_post(&self, message: impl Into<String>) {
        *lock(&self.post_error) = Some(message.into());
    }

    /// `(hook, crds)` per call, in call order.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Hooks for RecordingHooks {
    async fn pre(&self, _: &PackageMeta, _: &mut PackageRevision, crds: &[String]) -> Result<()> {
        lock(&self.calls).push(("pre".to_string(), crds.to_vec()));
        Ok(())
    }

    async fn post(&self, _: &PackageMeta, _: &mut PackageRevision, crds: &[String]) -> Result<()> {
        lock(&self.calls).push(("post".to_string(), crds.to_vec()));
        match lock(&self.post_error).clone() {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }
}

/// Keeps every event it is handed.
#[derive(Debug, Default)]
pub struct RecordingRecorder {
    events: Mutex<Vec<(ObjectKey, Event)>>,
}

impl RecordingRecorder {
    pub fn events(&self) -> Vec<(ObjectKey, Event)> {
        lock(&self.events).clone()
    }

    pub fn messages(&self) -> Vec<String> {
        lock(&self.events).iter().map(|(_, e)| e.message.clone()).collect()
    }

    pub fn reasons(&self) -> Vec<String> {
        lock(&self.events).iter().map(|(_, e)| e.reason.clone()).collect()
    }
}

impl Recorder for RecordingRecorder {
    fn event(&self, key: &ObjectKey, event: Event) {
        lock(&self.events).push((key.clone(), event));
    }
}

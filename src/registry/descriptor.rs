//! API descriptor: the immutable-after-registration vtable + state for one
//! named API.

use crate::error::{Error, Kind};
use crate::request::Request;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// The capability set every registered API implements: call handling,
/// start-up, log masking, and self-description, as a trait object whose
/// implementor carries its own state instead of a vtable + closure pair.
#[async_trait]
pub trait ApiImpl: Send + Sync {
    /// Handle one verb call.
    async fn process(&self, req: Arc<Request>);

    /// Run once, the first time this API transitions to `Starting`.
    async fn service_start(&self) -> Result<(), Error> {
        Ok(())
    }

    fn set_logmask(&self, _mask: u32) {}

    fn get_logmask(&self) -> u32 {
        0
    }

    /// JSON description of the API (verbs, metadata) for `DESCRIBE`.
    fn describe(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    /// Called exactly once when the descriptor is removed from its last set.
    fn unref(&self) {}
}

/// Monotonic initialization status: moves only forward,
/// `NotStarted -> Starting -> (Started|Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    NotStarted,
    Starting,
    Started,
    Failed(Kind),
}

/// Validate the case-insensitive charset accepted for API/alias/class names:
/// ASCII alphanumerics, `-`, `_`, `.`. Non-empty.
pub fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::with_detail(Kind::Invalid, "empty name"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.') {
        return Err(Error::with_detail(Kind::Invalid, format!("invalid charset in name '{name}'")));
    }
    Ok(())
}

pub(crate) fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

pub struct ApiDescriptor {
    /// Canonical-case name as registered.
    pub name: String,
    pub imp: Arc<dyn ApiImpl>,
    /// Serialization discipline group; `None` means unserialized.
    pub group: Option<Arc<str>>,
    status: Mutex<InitStatus>,
    required_classes: Mutex<Vec<String>>,
    required_apis: Mutex<Vec<String>>,
    logmask: AtomicU32,
}

impl ApiDescriptor {
    pub fn new(name: impl Into<String>, imp: Arc<dyn ApiImpl>, group: Option<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            imp,
            group,
            status: Mutex::new(InitStatus::NotStarted),
            required_classes: Mutex::new(Vec::new()),
            required_apis: Mutex::new(Vec::new()),
            logmask: AtomicU32::new(0),
        }
    }

    pub fn status(&self) -> InitStatus {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, s: InitStatus) {
        *self.status.lock() = s;
    }

    pub fn require_class(&self, class: impl Into<String>) {
        let class = class.into();
        let mut g = self.required_classes.lock();
        if !g.contains(&class) {
            g.push(class);
        }
    }

    pub fn require_api(&self, api: impl Into<String>) {
        let api = api.into();
        let mut g = self.required_apis.lock();
        if !g.contains(&api) {
            g.push(api);
        }
    }

    pub fn required_classes(&self) -> Vec<String> {
        self.required_classes.lock().clone()
    }

    pub fn required_apis(&self) -> Vec<String> {
        self.required_apis.lock().clone()
    }

    pub fn logmask(&self) -> u32 {
        self.logmask.load(Ordering::Relaxed)
    }

    pub fn set_logmask(&self, mask: u32) {
        self.logmask.store(mask, Ordering::Relaxed);
        self.imp.set_logmask(mask);
    }
}

impl Drop for ApiDescriptor {
    fn drop(&mut self) {
        self.imp.unref();
    }
}

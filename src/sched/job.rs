//! A single unit of deferred work.

use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Job ids are handed out from a 31-bit space; the top bit is reserved so
/// a job id can never collide with a wire-protocol cancel marker.
pub const MAX_JOB_ID: u32 = (1 << 31) - 1;

pub type JobCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

pub struct Job {
    pub id: u32,
    /// Jobs sharing a group never run concurrently with each other.
    pub group: Option<Arc<str>>,
    pub delay: Duration,
    pub timeout: Option<Duration>,
    callback: parking_lot::Mutex<Option<JobCallback>>,
    blocked: AtomicBool,
    active: AtomicBool,
    /// When the job becomes runnable, relative to `delay`; set once by the
    /// queue at post time (so repeated reads agree on a single base instant).
    ready_at: parking_lot::Mutex<Option<Instant>>,
}

use std::sync::Arc;

impl Job {
    pub fn new(id: u32, group: Option<Arc<str>>, delay: Duration, timeout: Option<Duration>, callback: JobCallback) -> Self {
        Self {
            id,
            group,
            delay,
            timeout,
            callback: parking_lot::Mutex::new(Some(callback)),
            blocked: AtomicBool::new(false),
            active: AtomicBool::new(false),
            ready_at: parking_lot::Mutex::new(None),
        }
    }

    /// Record the instant this job becomes runnable, computed from a common
    /// delay base at post time.
    pub(crate) fn mark_posted(&self, base: Instant) {
        *self.ready_at.lock() = Some(base + self.delay);
    }

    /// `true` once the job's delay (if any) has elapsed. A job never posted
    /// (no `ready_at` recorded yet) is treated as immediately ready.
    pub fn is_ready(&self, now: Instant) -> bool {
        self.ready_at.lock().map(|t| now >= t).unwrap_or(true)
    }

    /// Time remaining until this job becomes runnable, or `None` if it
    /// already is.
    pub fn remaining_delay(&self, now: Instant) -> Option<Duration> {
        self.ready_at.lock().and_then(|t| t.checked_duration_since(now)).filter(|d| !d.is_zero())
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    pub fn set_blocked(&self, v: bool) {
        self.blocked.store(v, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, v: bool) {
        self.active.store(v, Ordering::Release);
    }

    /// Take the callback out for execution. Returns `None` if already taken
    /// (cancelled, or already run).
    pub fn take_callback(&self) -> Option<JobCallback> {
        self.callback.lock().take()
    }

    pub fn is_cancelled(&self) -> bool {
        self.callback.lock().is_none() && !self.is_active()
    }
}

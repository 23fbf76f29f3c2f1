//! Single shared event-loop arbiter: at most one caller holds it at a time,
//! reinterpreted as an async mutex with an explicit
//! try/blocking-acquire pair rather than a bare lock, since callers often
//! want to opportunistically skip running the loop themselves.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

pub struct EventManager {
    held: Mutex<bool>,
    notify: Notify,
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EventManager {
    pub fn new() -> Self {
        Self { held: Mutex::new(false), notify: Notify::new() }
    }

    /// Acquire the loop without waiting; `None` if another holder has it.
    pub fn try_get(self: &Arc<Self>) -> Option<EventManagerGuard> {
        let mut held = self.held.lock();
        if *held {
            None
        } else {
            *held = true;
            Some(EventManagerGuard { mgr: self.clone() })
        }
    }

    /// Acquire the loop, waiting for the current holder to release it.
    pub async fn get(self: &Arc<Self>) -> EventManagerGuard {
        loop {
            if let Some(guard) = self.try_get() {
                return guard;
            }
            self.notify.notified().await;
        }
    }

    fn release(&self) {
        *self.held.lock() = false;
        self.notify.notify_one();
    }

    pub fn is_held(&self) -> bool {
        *self.held.lock()
    }
}

/// Releases the event manager when dropped.
pub struct EventManagerGuard {
    mgr: Arc<EventManager>,
}

impl Drop for EventManagerGuard {
    fn drop(&mut self) {
        self.mgr.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_one_holder_at_a_time() {
        let mgr = Arc::new(EventManager::new());
        let guard = mgr.try_get().unwrap();
        assert!(mgr.try_get().is_none());
        drop(guard);
        assert!(mgr.try_get().is_some());
    }

    #[tokio::test]
    async fn get_waits_for_release() {
        let mgr = Arc::new(EventManager::new());
        let guard = mgr.try_get().unwrap();
        let mgr2 = mgr.clone();
        let waiter = tokio::spawn(async move {
            let _g = mgr2.get().await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        drop(guard);
        waiter.await.unwrap();
    }
}

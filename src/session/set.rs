//! Bounded collection of sessions, keyed by UUID.

use super::session::{Session, TIMEOUT_INHERIT};
use crate::error::{Error, Kind};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

pub const MIN_CAPACITY: usize = 5;
pub const MAX_CAPACITY: usize = 1000;

pub struct SessionSet {
    by_uuid: DashMap<String, Arc<Session>>,
    capacity: usize,
    default_timeout: i64,
    next_local_id: AtomicU16,
}

impl SessionSet {
    pub fn new(capacity: usize, default_timeout: i64) -> Self {
        Self {
            by_uuid: DashMap::new(),
            capacity: capacity.clamp(MIN_CAPACITY, MAX_CAPACITY),
            default_timeout,
            next_local_id: AtomicU16::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.by_uuid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uuid.is_empty()
    }

    pub fn default_timeout(&self) -> i64 {
        self.default_timeout
    }

    fn fresh_local_id(&self) -> u16 {
        loop {
            let id = self.next_local_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Exact lookup by UUID, no creation.
    pub fn search(&self, uuid: &str) -> Option<Arc<Session>> {
        self.by_uuid.get(uuid).map(|e| {
            e.addref();
            e.value().clone()
        })
    }

    /// Returns the existing session for `uuid`, or creates one, bumping its
    /// reference count either way. Fails with `Kind::Busy` once the set is
    /// at capacity and `uuid` names no existing session.
    pub fn get_or_create(&self, uuid: &str, timeout: Option<i64>, autoclose: bool) -> Result<Arc<Session>, Error> {
        if let Some(existing) = self.by_uuid.get(uuid) {
            existing.addref();
            return Ok(existing.value().clone());
        }
        if self.by_uuid.len() >= self.capacity {
            return Err(Error::with_detail(Kind::Busy, "session set at capacity"));
        }
        let session = Arc::new(Session::new(
            uuid.to_string(),
            self.fresh_local_id(),
            timeout.unwrap_or(TIMEOUT_INHERIT),
            autoclose,
        ));
        session.addref();
        self.by_uuid.insert(uuid.to_string(), session.clone());
        Ok(session)
    }

    /// Create a brand-new session under a freshly generated UUID, retrying
    /// on the vanishingly unlikely chance of a collision. Fails with
    /// `Kind::Busy` once the set is at capacity.
    pub fn create(&self, timeout: Option<i64>, autoclose: bool) -> Result<Arc<Session>, Error> {
        loop {
            let uuid = uuid::Uuid::new_v4().to_string();
            if !self.by_uuid.contains_key(&uuid) {
                return self.get_or_create(&uuid, timeout, autoclose);
            }
        }
    }

    /// Remove and return a session unconditionally, regardless of its
    /// closed/referenced state (used by tests and forced eviction).
    pub fn remove(&self, uuid: &str) -> Option<Arc<Session>> {
        self.by_uuid.remove(uuid).map(|(_, s)| s)
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.by_uuid.contains_key(uuid)
    }

    /// Drop every closed or expired session from the set. A session already
    /// closed (e.g. via `unref` autoclose) is evicted unconditionally; a
    /// still-open session past its expiration is closed first, then evicted.
    pub fn purge(&self) -> usize {
        let mut dead = Vec::new();
        for entry in self.by_uuid.iter() {
            let session = entry.value();
            if session.is_closed() {
                dead.push(entry.key().clone());
            } else if session.is_expired() {
                session.close();
                dead.push(entry.key().clone());
            }
        }
        for uuid in &dead {
            self.by_uuid.remove(uuid);
        }
        dead.len()
    }

    pub fn iter_uuids(&self) -> Vec<String> {
        self.by_uuid.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_exhaustion_returns_busy_then_recovers_after_close() {
        let set = SessionSet::new(MIN_CAPACITY, -1);
        let mut uuids = Vec::new();
        for i in 0..MIN_CAPACITY {
            let uuid = format!("s{i}");
            set.get_or_create(&uuid, None, false).unwrap();
            uuids.push(uuid);
        }
        let err = set.get_or_create("overflow", None, false).unwrap_err();
        assert_eq!(err.kind, Kind::Busy);

        let first = set.search(&uuids[0]).unwrap();
        first.close();
        assert_eq!(set.purge(), 1);

        set.get_or_create("overflow", None, false).unwrap();
    }

    #[test]
    fn create_generates_a_fresh_uuid_each_time() {
        let set = SessionSet::new(MIN_CAPACITY, -1);
        let a = set.create(None, false).unwrap();
        let b = set.create(None, false).unwrap();
        assert_ne!(a.uuid, b.uuid);
        assert_eq!(a.uuid.len(), 36);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn create_returns_busy_once_the_set_is_full() {
        let set = SessionSet::new(MIN_CAPACITY, -1);
        for _ in 0..MIN_CAPACITY {
            set.create(None, false).unwrap();
        }
        let err = set.create(None, false).unwrap_err();
        assert_eq!(err.kind, Kind::Busy);
    }

    #[test]
    fn get_or_create_is_idempotent_per_uuid() {
        let set = SessionSet::new(MIN_CAPACITY, -1);
        let a = set.get_or_create("x", None, false).unwrap();
        let b = set.get_or_create("x", None, false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn purge_evicts_only_closed_sessions() {
        let set = SessionSet::new(MIN_CAPACITY, -1);
        let open = set.get_or_create("open", None, false).unwrap();
        let closed = set.get_or_create("closed", None, false).unwrap();
        closed.close();
        assert_eq!(set.purge(), 1);
        assert!(set.contains("open"));
        assert!(!set.contains("closed"));
        drop(open);
    }
}

//! A single client session: UUID, local id, cookies, LOA, timeout,
//! expiration.

use super::cookie::{CookieKey, CookieMap, SetOutcome};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// `-1` = infinite, `-2` = inherit the owning set's default.
pub const TIMEOUT_INFINITE: i64 = -1;
pub const TIMEOUT_INHERIT: i64 = -2;

pub struct Session {
    pub uuid: String,
    pub id: u16,
    /// User-visible reference count (distinct from the `Arc` strong count,
    /// which also counts the owning `SessionSet`'s own storage slot).
    external_refs: AtomicUsize,
    autoclose: AtomicBool,
    closed: AtomicBool,
    timeout_secs: AtomicI64,
    expiration: Mutex<Instant>,
    language: Mutex<Option<String>>,
    cookies: Mutex<CookieMap>,
}

impl Session {
    pub fn new(uuid: String, id: u16, timeout_secs: i64, autoclose: bool) -> Self {
        let now = Instant::now();
        let expiration = compute_expiration(now, timeout_secs, 3600);
        Self {
            uuid,
            id,
            external_refs: AtomicUsize::new(0),
            autoclose: AtomicBool::new(autoclose),
            closed: AtomicBool::new(false),
            timeout_secs: AtomicI64::new(timeout_secs),
            expiration: Mutex::new(expiration),
            language: Mutex::new(None),
            cookies: Mutex::new(CookieMap::new()),
        }
    }

    pub fn addref(&self) -> usize {
        self.external_refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns `true` if this was the last external reference (the caller
    /// should then consider the session a candidate for set purge if closed).
    pub fn unref(&self) -> bool {
        let prev = self.external_refs.fetch_sub(1, Ordering::AcqRel);
        let was_last = prev == 1;
        if was_last && self.autoclose.load(Ordering::Relaxed) {
            self.close();
        }
        was_last
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn set_autoclose(&self, v: bool) {
        self.autoclose.store(v, Ordering::Relaxed);
    }

    /// Fire every cookie's free callback exactly once and mark closed.
    /// Idempotent: closing twice fires nothing the second time.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cookies.lock().clear();
    }

    pub fn timeout_secs(&self, set_default: i64) -> i64 {
        match self.timeout_secs.load(Ordering::Relaxed) {
            TIMEOUT_INHERIT => set_default,
            t => t,
        }
    }

    pub fn touch(&self, set_default: i64) {
        let t = self.timeout_secs(set_default);
        *self.expiration.lock() = compute_expiration(Instant::now(), t, set_default.max(1) as u64);
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= *self.expiration.lock()
    }

    pub fn language(&self) -> Option<String> {
        self.language.lock().clone()
    }

    pub fn set_language(&self, lang: impl Into<String>) {
        *self.language.lock() = Some(lang.into());
    }

    // ---- cookies --------------------------------------------------------

    pub fn cookie_set(&self, key: CookieKey, value: Box<dyn Any + Send>, free: Option<Box<dyn FnOnce(Box<dyn Any + Send>) + Send>>, loa: i32) -> SetOutcome {
        self.cookies.lock().set(key, value, free, loa)
    }

    pub fn cookie_exists(&self, key: CookieKey) -> bool {
        self.cookies.lock().exists(key)
    }

    pub fn cookie_get<T: Clone + 'static>(&self, key: CookieKey) -> Option<T> {
        self.cookies.lock().get(key).and_then(|v| v.downcast_ref::<T>().cloned())
    }

    pub fn cookie_delete(&self, key: CookieKey) -> bool {
        self.cookies.lock().delete(key)
    }

    pub fn loa_get(&self, key: CookieKey) -> i32 {
        self.cookies.lock().loa(key)
    }

    pub fn loa_set(&self, key: CookieKey, loa: i32) {
        self.cookies.lock().set_loa(key, loa)
    }

    pub fn drop_key(&self, key: CookieKey) {
        self.cookies.lock().drop_key(key)
    }
}

fn compute_expiration(now: Instant, timeout_secs: i64, inherited_default: u64) -> Instant {
    match timeout_secs {
        TIMEOUT_INFINITE => now + Duration::from_secs(u64::MAX / 2),
        TIMEOUT_INHERIT => now + Duration::from_secs(inherited_default),
        t if t <= 0 => now,
        t => now + Duration::from_secs(t as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_fires_cookie_frees_exactly_once_on_replace_and_close() {
        let session = Session::new("u".into(), 1, TIMEOUT_INFINITE, false);
        static K: u8 = 0;
        let key = CookieKey::from_ref(&K);
        let calls: std::sync::Arc<Mutex<Vec<&'static str>>> = Default::default();
        let c1 = calls.clone();
        session.cookie_set(key, Box::new("v"), Some(Box::new(move |v| {
            c1.lock().push(*v.downcast::<&str>().unwrap());
        })), 1);
        let c2 = calls.clone();
        session.cookie_set(key, Box::new("v2"), Some(Box::new(move |v| {
            c2.lock().push(*v.downcast::<&str>().unwrap());
        })), 1);
        assert_eq!(*calls.lock(), vec!["v"]);
        session.close();
        assert_eq!(*calls.lock(), vec!["v", "v2"]);
        // Closing again must not refire.
        session.close();
        assert_eq!(*calls.lock(), vec!["v", "v2"]);
    }
}

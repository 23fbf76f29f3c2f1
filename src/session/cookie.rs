//! Per-session cookie map: `(key-pointer -> (value, free-callback, LOA))`,
//! stored in a small hashed bucket array.

use std::any::Any;

/// Opaque key, compared by identity. Construct one from the address of
/// anything with a stable address
/// (typically a `'static` key object owned by the calling module).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CookieKey(pub usize);

impl CookieKey {
    pub fn from_ref<T>(r: &T) -> Self {
        CookieKey(r as *const T as usize)
    }
}

const BUCKETS: usize = 8;

fn bucket_index(key: CookieKey) -> usize {
    // Simple multiplicative hash of the pointer address into BUCKETS slots.
    (key.0.wrapping_mul(2654435761)) % BUCKETS
}

type FreeFn = Box<dyn FnOnce(Box<dyn Any + Send>) + Send>;

struct Entry {
    key: CookieKey,
    value: Option<Box<dyn Any + Send>>,
    free: Option<FreeFn>,
    loa: i32,
}

impl Entry {
    fn fire_free(&mut self) {
        if let (Some(value), Some(free)) = (self.value.take(), self.free.take()) {
            free(value);
        }
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        self.fire_free();
    }
}

/// Result of a `set` call: whether the key was newly created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Created,
    Updated,
}

pub struct CookieMap {
    buckets: [Vec<Entry>; BUCKETS],
}

impl Default for CookieMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieMap {
    pub fn new() -> Self {
        Self { buckets: std::array::from_fn(|_| Vec::new()) }
    }

    fn find(&self, key: CookieKey) -> Option<usize> {
        self.buckets[bucket_index(key)].iter().position(|e| e.key == key)
    }

    /// Set a cookie's value and free callback, firing the previous value's
    /// free callback exactly once if one existed.
    pub fn set(
        &mut self,
        key: CookieKey,
        value: Box<dyn Any + Send>,
        free: Option<FreeFn>,
        loa: i32,
    ) -> SetOutcome {
        let bucket = &mut self.buckets[bucket_index(key)];
        if let Some(idx) = bucket.iter().position(|e| e.key == key) {
            bucket[idx].fire_free();
            bucket[idx].value = Some(value);
            bucket[idx].free = free;
            bucket[idx].loa = loa;
            SetOutcome::Updated
        } else {
            bucket.push(Entry { key, value: Some(value), free, loa });
            SetOutcome::Created
        }
    }

    pub fn exists(&self, key: CookieKey) -> bool {
        self.find(key).map(|i| self.buckets[bucket_index(key)][i].value.is_some()).unwrap_or(false)
    }

    pub fn get(&self, key: CookieKey) -> Option<&(dyn Any + Send)> {
        let idx = self.find(key)?;
        self.buckets[bucket_index(key)][idx].value.as_deref()
    }

    /// Remove a cookie, firing its free callback. Returns whether one existed.
    pub fn delete(&mut self, key: CookieKey) -> bool {
        let b = bucket_index(key);
        if let Some(idx) = self.buckets[b].iter().position(|e| e.key == key) {
            let mut removed = self.buckets[b].remove(idx);
            removed.fire_free();
            true
        } else {
            false
        }
    }

    /// Atomically test-or-initialize: if the key is absent, call `init` to
    /// produce a value (and optional free), insert it, and return the fresh
    /// reference; otherwise return the existing reference. `1` == created,
    /// `0` == present, matching spec's "getinit" contract via `SetOutcome`.
    pub fn getinit(
        &mut self,
        key: CookieKey,
        init: impl FnOnce() -> (Box<dyn Any + Send>, Option<FreeFn>, i32),
    ) -> (&(dyn Any + Send), SetOutcome) {
        let b = bucket_index(key);
        if let Some(idx) = self.buckets[b].iter().position(|e| e.key == key) {
            let v = self.buckets[b][idx].value.as_deref().expect("cookie present without value");
            return (v, SetOutcome::Updated);
        }
        let (value, free, loa) = init();
        self.buckets[b].push(Entry { key, value: Some(value), free, loa });
        let v = self.buckets[b].last().unwrap().value.as_deref().unwrap();
        (v, SetOutcome::Created)
    }

    pub fn loa(&self, key: CookieKey) -> i32 {
        self.find(key).map(|i| self.buckets[bucket_index(key)][i].loa).unwrap_or(0)
    }

    /// Set LOA for `key`. If LOA is set to 0 on a cookie with no value, the
    /// entry is removed and no allocation occurs.
    pub fn set_loa(&mut self, key: CookieKey, loa: i32) {
        let b = bucket_index(key);
        if let Some(idx) = self.buckets[b].iter().position(|e| e.key == key) {
            if loa == 0 && self.buckets[b][idx].value.is_none() {
                self.buckets[b].remove(idx);
            } else {
                self.buckets[b][idx].loa = loa;
            }
        } else if loa != 0 {
            self.buckets[b].push(Entry { key, value: None, free: None, loa });
        }
        // loa == 0 on an absent cookie: no-op, no allocation.
    }

    /// Remove a cookie (firing its free callback) and clear its LOA.
    pub fn drop_key(&mut self, key: CookieKey) {
        self.delete(key);
    }

    /// Fire every cookie's free callback exactly once (session close).
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear(); // Drop impl fires free callbacks
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static A: u8 = 0;
    static B: u8 = 0;

    #[test]
    fn replace_fires_old_free_exactly_once() {
        let mut map = CookieMap::new();
        let key = CookieKey::from_ref(&A);
        let calls: std::sync::Arc<std::sync::Mutex<Vec<String>>> = Default::default();
        let c1 = calls.clone();
        map.set(key, Box::new("v"), Some(Box::new(move |v| {
            c1.lock().unwrap().push(*v.downcast::<&str>().unwrap());
        })), 1);
        let c2 = calls.clone();
        map.set(key, Box::new("v2"), Some(Box::new(move |v| {
            c2.lock().unwrap().push(*v.downcast::<&str>().unwrap());
        })), 1);
        assert_eq!(*calls.lock().unwrap(), vec!["v".to_string()]);
        map.clear();
        assert_eq!(*calls.lock().unwrap(), vec!["v".to_string(), "v2".to_string()]);
    }

    #[test]
    fn loa_zero_on_absent_is_noop() {
        let mut map = CookieMap::new();
        let key = CookieKey::from_ref(&B);
        map.set_loa(key, 0);
        assert!(!map.exists(key));
        assert_eq!(map.loa(key), 0);
    }

    #[test]
    fn loa_zero_with_no_value_removes_entry() {
        let mut map = CookieMap::new();
        let key = CookieKey::from_ref(&B);
        map.set_loa(key, 5);
        assert_eq!(map.loa(key), 5);
        map.set_loa(key, 0);
        assert_eq!(map.loa(key), 0);
    }
}

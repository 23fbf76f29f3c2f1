//! Pointer-keyed reader/writer locker.
//!
//! Grounded on the original `lockany.c`: a small fixed pool of
//! `{condvar, readers, writer}` slots keyed by the address of whatever is
//! being locked, so data-object conversion rings don't
//! need a dedicated lock allocated per object.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct Slot {
    readers: usize,
    writer: bool,
    cond: Condvar,
}

/// Keys any `usize` (typically a pointer/ring-head identity) to a lock slot.
pub struct LockAny {
    slots: Mutex<HashMap<usize, Arc<Mutex<Slot>>>>,
}

impl Default for LockAny {
    fn default() -> Self {
        Self::new()
    }
}

impl LockAny {
    pub fn new() -> Self {
        Self { slots: Mutex::new(HashMap::new()) }
    }

    fn slot(&self, key: usize) -> Arc<Mutex<Slot>> {
        self.slots
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(Slot::default())))
            .clone()
    }

    pub fn lock_read(&self, key: usize) {
        let slot = self.slot(key);
        let mut s = slot.lock();
        while s.writer {
            s.cond.wait(&mut s);
        }
        s.readers += 1;
    }

    pub fn try_lock_read(&self, key: usize) -> bool {
        let slot = self.slot(key);
        let mut s = slot.lock();
        if s.writer {
            false
        } else {
            s.readers += 1;
            true
        }
    }

    pub fn lock_write(&self, key: usize) {
        let slot = self.slot(key);
        let mut s = slot.lock();
        while s.writer || s.readers > 0 {
            s.cond.wait(&mut s);
        }
        s.writer = true;
    }

    pub fn try_lock_write(&self, key: usize) -> bool {
        let slot = self.slot(key);
        let mut s = slot.lock();
        if s.writer || s.readers > 0 {
            false
        } else {
            s.writer = true;
            true
        }
    }

    pub fn unlock(&self, key: usize) {
        let slot = self.slot(key);
        let mut s = slot.lock();
        if s.writer {
            s.writer = false;
        } else if s.readers > 0 {
            s.readers -= 1;
        }
        s.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::thread;

    #[test]
    fn readers_share_writers_exclude() {
        let locker = StdArc::new(LockAny::new());
        locker.lock_read(1);
        locker.lock_read(1);
        assert!(!locker.try_lock_write(1));
        locker.unlock(1);
        locker.unlock(1);
        assert!(locker.try_lock_write(1));
        locker.unlock(1);
    }

    #[test]
    fn independent_keys_dont_block() {
        let locker = StdArc::new(LockAny::new());
        locker.lock_write(1);
        assert!(locker.try_lock_write(2));
        locker.unlock(2);
        locker.unlock(1);
    }

    #[test]
    fn blocked_writer_wakes_on_unlock() {
        let locker = StdArc::new(LockAny::new());
        locker.lock_read(7);
        let l2 = locker.clone();
        let handle = thread::spawn(move || {
            l2.lock_write(7);
            l2.unlock(7);
        });
        thread::sleep(std::time::Duration::from_millis(20));
        locker.unlock(7);
        handle.join().unwrap();
    }
}

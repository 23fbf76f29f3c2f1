//! The data object itself: a reference-counted, type-tagged value living
//! on a conversion ring with its siblings.
//!
//! Grounded on `util::LockAny` for guarding each ring's membership list —
//! the same "lock keyed by identity" pattern used for session cookies,
//! generalized here to guard a ring rather than a single entry.

use super::types::TypeName;
use crate::util::LockAny;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Weak};

/// Shared lock table for conversion-ring heads, keyed by the ring's own
/// address. One table serves every ring in the process, mirroring how
/// `LockAny` is meant to be used: a single instance, many independent keys.
static RING_LOCKS: Lazy<LockAny> = Lazy::new(LockAny::new);

pub struct ConversionRing {
    members: Mutex<Vec<Weak<DataObject>>>,
}

impl ConversionRing {
    fn new() -> Arc<Self> {
        Arc::new(Self { members: Mutex::new(Vec::new()) })
    }

    fn key(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }

    fn join(self: &Arc<Self>, member: &Arc<DataObject>) {
        RING_LOCKS.lock_write(self.key());
        self.members.lock().push(Arc::downgrade(member));
        RING_LOCKS.unlock(self.key());
    }

    fn members_snapshot(self: &Arc<Self>) -> Vec<Arc<DataObject>> {
        RING_LOCKS.lock_read(self.key());
        let snapshot: Vec<Arc<DataObject>> = {
            let mut guard = self.members.lock();
            guard.retain(|w| w.strong_count() > 0);
            guard.iter().filter_map(Weak::upgrade).collect()
        };
        RING_LOCKS.unlock(self.key());
        snapshot
    }
}

/// Independent boolean properties a data object can carry.
#[derive(Default)]
pub struct DataFlags {
    pub volatile: AtomicBool,
    pub constant: AtomicBool,
    pub valid: AtomicBool,
    pub locked: AtomicBool,
    pub alias: AtomicBool,
}

impl DataFlags {
    fn new(valid: bool) -> Self {
        Self { valid: AtomicBool::new(valid), ..Default::default() }
    }
}

pub struct DataObject {
    pub type_name: TypeName,
    payload: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    pub flags: DataFlags,
    opaque_id: AtomicU16,
    ring: Arc<ConversionRing>,
    depends_on: Mutex<Vec<Arc<DataObject>>>,
}

impl DataObject {
    /// Wrap an already-produced payload as a brand-new, single-member ring.
    pub fn create_raw(type_name: TypeName, payload: Arc<dyn Any + Send + Sync>) -> Arc<Self> {
        let ring = ConversionRing::new();
        let data = Arc::new(Self {
            type_name,
            payload: Mutex::new(Some(payload)),
            flags: DataFlags::new(true),
            opaque_id: AtomicU16::new(0),
            ring: ring.clone(),
            depends_on: Mutex::new(Vec::new()),
        });
        ring.join(&data);
        data
    }

    /// A fresh zero-filled buffer of `size` bytes.
    pub fn create_alloc0(type_name: TypeName, size: usize) -> Arc<Self> {
        Self::create_raw(type_name, Arc::new(vec![0u8; size]))
    }

    /// A detached copy of `other`'s current payload, on its own ring
    ///. Requires the payload type be `Clone`;
    /// byte buffers (the common case) always are.
    pub fn create_copy_bytes(other: &Arc<DataObject>) -> Option<Arc<Self>> {
        let payload = other.payload.lock().clone()?;
        let bytes = payload.downcast_ref::<Vec<u8>>()?.clone();
        Some(Self::create_raw(other.type_name.clone(), Arc::new(bytes)))
    }

    /// A new representation of the same logical value, sharing `other`'s
    /// ring but initially unconverted.
    pub fn create_alias(other: &Arc<DataObject>, as_type: TypeName) -> Arc<Self> {
        let data = Arc::new(Self {
            type_name: as_type,
            payload: Mutex::new(None),
            flags: DataFlags::new(false),
            opaque_id: AtomicU16::new(0),
            ring: other.ring.clone(),
            depends_on: Mutex::new(Vec::new()),
        });
        data.flags.alias.store(true, Ordering::Relaxed);
        other.ring.join(&data);
        data
    }

    pub fn is_valid(&self) -> bool {
        self.flags.valid.load(Ordering::Acquire)
    }

    pub fn payload(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        if !self.is_valid() {
            return None;
        }
        self.payload.lock().clone()
    }

    pub(super) fn set_payload(&self, payload: Arc<dyn Any + Send + Sync>) {
        *self.payload.lock() = Some(payload);
        self.flags.valid.store(true, Ordering::Release);
    }

    pub(super) fn invalidate(&self) {
        self.flags.valid.store(false, Ordering::Release);
    }

    pub fn ring_members(self: &Arc<Self>) -> Vec<Arc<DataObject>> {
        self.ring.members_snapshot()
    }

    pub fn ring_find(self: &Arc<Self>, type_name: &TypeName) -> Option<Arc<DataObject>> {
        self.ring_members().into_iter().find(|m| &m.type_name == type_name && m.is_valid())
    }

    pub(super) fn ring(&self) -> Arc<ConversionRing> {
        self.ring.clone()
    }

    /// Mark every other ring member invalid — this object is now the
    /// authoritative representation.
    pub fn notify_changed(self: &Arc<Self>) {
        for member in self.ring_members() {
            if !Arc::ptr_eq(&member, self) {
                member.invalidate();
            }
        }
    }

    pub fn depends_on(&self, dep: Arc<DataObject>) {
        self.depends_on.lock().push(dep);
    }

    pub fn dependency_count(&self) -> usize {
        self.depends_on.lock().len()
    }

    pub fn opaque_id(&self) -> u16 {
        self.opaque_id.load(Ordering::Relaxed)
    }

    pub(super) fn set_opaque_id(&self, id: u16) {
        self.opaque_id.store(id, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(v: &[u8]) -> Arc<dyn Any + Send + Sync> {
        Arc::new(v.to_vec())
    }

    #[test]
    fn alias_joins_ring_and_notify_changed_invalidates_siblings() {
        let raw: TypeName = Arc::from("text/plain");
        let alias_ty: TypeName = Arc::from("text/upper");
        let original = DataObject::create_raw(raw, bytes(b"hi"));
        let alias = DataObject::create_alias(&original, alias_ty);
        assert!(!alias.is_valid());
        alias.set_payload(bytes(b"HI"));
        assert!(alias.is_valid());
        assert!(original.is_valid());

        alias.notify_changed();
        assert!(!original.is_valid());
        assert!(alias.is_valid());
        assert_eq!(original.ring_members().len(), 2);
    }

    #[test]
    fn create_copy_bytes_is_detached_from_source_ring() {
        let ty: TypeName = Arc::from("text/plain");
        let original = DataObject::create_raw(ty, bytes(b"hi"));
        let copy = DataObject::create_copy_bytes(&original).unwrap();
        assert_eq!(copy.ring_members().len(), 1);
        assert_eq!(original.ring_members().len(), 1);
    }
}

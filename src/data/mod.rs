//! Data objects: ref-counted, type-tagged values connected into conversion
//! rings, plus the type registry and the opaque-id table used to hand them
//! across the wire protocol.

pub mod object;
pub mod opacifier;
pub mod types;

pub use object::{ConversionRing, DataFlags, DataObject};
pub use opacifier::Opacifier;
pub use types::{ConvertFn, TypeName, TypeRegistry, UpdateFn};

use crate::error::{Error, Kind};
use std::sync::Arc;

/// Find or produce a representation of `data` typed `target`: an existing valid ring member is reused; otherwise the
/// registered conversion function is run and the result joins the ring.
pub fn convert(registry: &TypeRegistry, data: &Arc<DataObject>, target: &TypeName) -> Result<Arc<DataObject>, Error> {
    if &data.type_name == target && data.is_valid() {
        return Ok(data.clone());
    }
    if !data.is_valid() {
        return Err(Error::with_detail(Kind::Invalid, "cannot convert an invalidated data object"));
    }
    if let Some(existing) = data.ring_find(target) {
        return Ok(existing);
    }
    let convert_fn = registry
        .convert_fn(&data.type_name, target)
        .ok_or_else(|| Error::with_detail(Kind::NotFound, format!("no conversion {} -> {target}", data.type_name)))?;
    let payload = convert_fn(data)?;
    let produced = DataObject::create_alias(data, target.clone());
    produced.set_payload(payload);
    Ok(produced)
}

/// Recompute `data`'s own payload via its type's registered update
/// function, then invalidate every other ring member since `data` is now
/// the fresh, authoritative representation.
pub fn update(registry: &TypeRegistry, data: &Arc<DataObject>) -> Result<(), Error> {
    let update_fn = registry
        .update_fn(&data.type_name)
        .ok_or_else(|| Error::with_detail(Kind::NotAvailable, format!("no update function for {}", data.type_name)))?;
    let payload = update_fn(data)?;
    data.set_payload(payload);
    data.notify_changed();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    #[test]
    fn convert_reuses_existing_ring_member_without_reinvoking_fn() {
        let registry = TypeRegistry::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let c = calls.clone();
        let from: TypeName = Arc::from("a");
        let to: TypeName = Arc::from("b");
        registry.register_convert(
            from.clone(),
            to.clone(),
            Arc::new(move |_d| {
                c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(Arc::new(b"converted".to_vec()) as Arc<dyn Any + Send + Sync>)
            }),
        );
        let source = DataObject::create_raw(from, Arc::new(b"source".to_vec()));
        let first = convert(&registry, &source, &to).unwrap();
        let second = convert(&registry, &source, &to).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn convert_on_an_invalidated_data_object_fails_without_running_the_conversion() {
        let registry = TypeRegistry::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let c = calls.clone();
        let from: TypeName = Arc::from("a");
        let to: TypeName = Arc::from("b");
        registry.register_convert(
            from.clone(),
            to.clone(),
            Arc::new(move |_d| {
                c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(Arc::new(b"converted".to_vec()) as Arc<dyn Any + Send + Sync>)
            }),
        );
        let source = DataObject::create_raw(from.clone(), Arc::new(b"source".to_vec()));
        let fresher = DataObject::create_alias(&source, from);
        fresher.set_payload(Arc::new(b"newer".to_vec()));
        fresher.notify_changed();
        assert!(!source.is_valid());

        let err = convert(&registry, &source, &to).unwrap_err();
        assert_eq!(err.kind, Kind::Invalid);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn convert_without_registered_fn_fails_not_found() {
        let registry = TypeRegistry::new();
        let from: TypeName = Arc::from("a");
        let to: TypeName = Arc::from("z");
        let source = DataObject::create_raw(from, Arc::new(b"x".to_vec()));
        let err = convert(&registry, &source, &to).unwrap_err();
        assert_eq!(err.kind, Kind::NotFound);
    }

    #[test]
    fn update_invalidates_other_ring_members() {
        let registry = TypeRegistry::new();
        let ty: TypeName = Arc::from("live/value");
        registry.register_update(
            ty.clone(),
            Arc::new(|_d| Ok(Arc::new(b"fresh".to_vec()) as Arc<dyn Any + Send + Sync>)),
        );
        let data = DataObject::create_raw(ty.clone(), Arc::new(b"stale".to_vec()));
        let alias = DataObject::create_alias(&data, ty);
        alias.set_payload(Arc::new(b"also valid".to_vec()));
        assert!(data.is_valid() && alias.is_valid());

        update(&registry, &data).unwrap();
        assert!(data.is_valid());
        assert!(!alias.is_valid());
    }
}

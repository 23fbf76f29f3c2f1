//! Opaque 16-bit handle table for data objects crossing the wire
//! protocol, capped at `i16::MAX` live handles.

use super::object::DataObject;
use crate::error::{Error, Kind};
use crate::util::U16IdMap;
use parking_lot::Mutex;
use std::sync::Arc;

pub struct Opacifier {
    table: Mutex<U16IdMap<Arc<DataObject>>>,
}

impl Opacifier {
    pub fn new() -> Self {
        Self { table: Mutex::new(U16IdMap::new(i16::MAX as usize)) }
    }

    pub fn opacify(&self, data: Arc<DataObject>) -> Result<u16, Error> {
        let mut table = self.table.lock();
        let data_for_insert = data.clone();
        let id = table
            .insert_with(move |_id| data_for_insert)
            .ok_or_else(|| Error::with_detail(Kind::TooBig, "opacifier table full"))?;
        data.set_opaque_id(id);
        Ok(id)
    }

    pub fn resolve(&self, id: u16) -> Option<Arc<DataObject>> {
        self.table.lock().get(id).cloned()
    }

    pub fn release(&self, id: u16) -> Option<Arc<DataObject>> {
        let data = self.table.lock().remove(id);
        if let Some(d) = &data {
            d.set_opaque_id(0);
        }
        data
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

impl Default for Opacifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    #[test]
    fn opacify_then_resolve_then_release() {
        let opacifier = Opacifier::new();
        let ty: super::super::types::TypeName = Arc::from("text/plain");
        let payload: Arc<dyn Any + Send + Sync> = Arc::new(b"hi".to_vec());
        let data = DataObject::create_raw(ty, payload);
        let id = opacifier.opacify(data.clone()).unwrap();
        assert_ne!(id, 0);
        assert_eq!(data.opaque_id(), id);
        assert!(opacifier.resolve(id).is_some());
        let released = opacifier.release(id).unwrap();
        assert_eq!(released.opaque_id(), 0);
        assert!(opacifier.resolve(id).is_none());
    }
}

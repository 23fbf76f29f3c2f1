//! Type registry: named data types plus the conversion and update
//! functions registered against them.

use super::object::DataObject;
use crate::error::Error;
use dashmap::DashMap;
use std::sync::Arc;

pub type TypeName = Arc<str>;

/// Produces the bytes for `target` given `source`'s current payload.
pub type ConvertFn = Arc<dyn Fn(&DataObject) -> Result<Arc<dyn std::any::Any + Send + Sync>, Error> + Send + Sync>;

/// Recomputes a data object's own payload in place.
pub type UpdateFn = Arc<dyn Fn(&DataObject) -> Result<Arc<dyn std::any::Any + Send + Sync>, Error> + Send + Sync>;

#[derive(Default)]
pub struct TypeRegistry {
    convert: DashMap<(TypeName, TypeName), ConvertFn>,
    update: DashMap<TypeName, UpdateFn>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_convert(&self, from: TypeName, to: TypeName, f: ConvertFn) {
        self.convert.insert((from, to), f);
    }

    pub fn register_update(&self, ty: TypeName, f: UpdateFn) {
        self.update.insert(ty, f);
    }

    pub fn convert_fn(&self, from: &TypeName, to: &TypeName) -> Option<ConvertFn> {
        self.convert.get(&(from.clone(), to.clone())).map(|e| e.clone())
    }

    pub fn update_fn(&self, ty: &TypeName) -> Option<UpdateFn> {
        self.update.get(ty).map(|e| e.clone())
    }
}

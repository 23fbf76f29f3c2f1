//! Shared infrastructure utilities used across the registry, data, and RPC
//! layers.

pub mod cred;
pub mod lockany;
pub mod u16id;

pub use cred::ExportedCred;
pub use lockany::LockAny;
pub use u16id::U16IdMap;

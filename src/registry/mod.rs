//! API registry: namespaced, reference-counted directory of APIs with
//! aliases, class-based provide/require dependencies, staged
//! initialization, and a recursive fallback chain.

pub mod apiset;
pub mod class;
pub mod descriptor;

pub use apiset::ApiSet;
pub use class::NameKind;
pub use descriptor::{validate_name, ApiDescriptor, ApiImpl, InitStatus};

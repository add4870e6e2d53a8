//! Followup Core - Tenant and Entity Types
//!
//! Tenants, tenant-scoped entities, the capability traits that mark them,
//! and the error taxonomy shared by every other crate. No I/O lives here.

mod crm;
mod entities;
mod enums;
mod error;
mod identity;
mod macros;
mod traits;

pub use crm::*;
pub use entities::*;
pub use enums::*;
pub use error::*;
pub use identity::*;
pub use traits::*;

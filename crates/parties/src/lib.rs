//! Parties domain module (suppliers).
//!
//! Suppliers register with the registry and keep their legal details current;
//! administrators may suspend them.

pub mod outbox;
pub mod supplier;

pub use outbox::{SupplierHandler, SupplierWire, event_names, register};
pub use supplier::{Supplier, SupplierDto, SupplierId, SupplierStatus};

//! Products domain module.
//!
//! Suppliers submit product data, administrators approve or reject it. Every
//! state change is recorded through the outbox using the snapshot DTO and the
//! handler defined here.

pub mod outbox;
pub mod product;

pub use outbox::{CategoryNames, ProductHandler, ProductWire, event_names, register};
pub use product::{Product, ProductDto, ProductId, ProductStatus};

//! Supplier agreements domain module.
//!
//! An agreement lists which products a supplier may deliver and for how long.

pub mod agreement;
pub mod outbox;

pub use agreement::{Agreement, AgreementDto, AgreementId, AgreementStatus};
pub use outbox::{AgreementHandler, AgreementWire, event_names, register};

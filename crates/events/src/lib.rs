//! Outbox mechanics: records, payload handlers, wire envelopes.
//!
//! Everything here is pure (no IO, no async). Persistence, scheduling and the
//! broker connection live in `supplyreg-infra`.

pub mod envelope;
pub mod handler;
pub mod leader;
pub mod record;
pub mod registry;

pub use envelope::{DTO_VERSION_KEY, Metadata, PRODUCER_ID_KEY, WireEnvelope, merge_metadata};
pub use handler::{ErasedHandler, HandlerError, PayloadHandler, PreparedMessage, WireMessage};
pub use leader::{AlwaysLeader, FlagLeaderGate, LeaderGate};
pub use record::{AggregateType, EventRecord, EventStatus};
pub use registry::{PayloadRegistry, PayloadRegistryBuilder, RegistryError};

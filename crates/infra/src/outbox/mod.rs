//! Transactional outbox persistence.

pub mod r#trait;
pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryOutboxStore, InMemoryOutboxTx};
pub use postgres::PostgresOutboxStore;
pub use r#trait::{
    DeliveryLog, DeliveryState, OutboxBackend, OutboxStats, OutboxStore, OutboxStoreError, OutboxWriter,
};

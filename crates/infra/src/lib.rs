//! Infrastructure layer: outbox persistence, relay loops, broker clients, config.

pub mod bootstrap;
pub mod broker;
pub mod config;
pub mod dispatch;
pub mod enqueue;
pub mod outbox;
pub mod push;
pub mod reference_cache;
pub mod retention;
pub mod retry;
pub mod scheduler;


pub use bootstrap::build_registry;
pub use config::{ConfigError, RelayConfig};
pub use dispatch::{DispatchError, DispatchReport, OutboxDispatcher, TickOutcome};
pub use enqueue::{EnqueueError, EnqueueRequest, EnqueueService};
pub use push::{BusPushAdapter, PushError};
pub use retention::{RetentionJob, RetentionOutcome};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use scheduler::{LoopHandle, PeriodicJob, spawn_periodic};

//! Message broker clients the push adapter publishes through.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use supplyreg_events::WireEnvelope;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_streams;

pub use in_memory::InMemoryBroker;
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsBroker;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker rejected message: {0}")]
    Rejected(String),

    #[error("envelope serialization error: {0}")]
    Serialization(String),
}

/// Sends one envelope to the external bus. Resolves once the broker has
/// acknowledged the write.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn send(&self, envelope: &WireEnvelope) -> Result<(), BrokerError>;
}

#[async_trait]
impl<C> BrokerClient for Arc<C>
where
    C: BrokerClient + ?Sized,
{
    async fn send(&self, envelope: &WireEnvelope) -> Result<(), BrokerError> {
        (**self).send(envelope).await
    }
}

//! Redis Streams broker client.
//!
//! Every envelope becomes one XADD entry on a single stream
//! (`supplyreg:outbox` by default) with the fields `routing_key`,
//! `event_name`, `event_id` and `envelope` (the JSON-encoded envelope).
//! Consumers read via their own consumer groups and deduplicate on
//! `event_id`.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use supplyreg_events::WireEnvelope;

use super::{BrokerClient, BrokerError};

pub const DEFAULT_STREAM_KEY: &str = "supplyreg:outbox";

pub struct RedisStreamsBroker {
    client: redis::Client,
    stream_key: String,
    max_len: Option<usize>,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl std::fmt::Debug for RedisStreamsBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsBroker")
            .field("stream_key", &self.stream_key)
            .field("max_len", &self.max_len)
            .finish_non_exhaustive()
    }
}

impl RedisStreamsBroker {
    /// `redis_url` e.g. `redis://localhost:6379`. Connecting is lazy.
    pub fn new(redis_url: impl AsRef<str>, stream_key: Option<String>) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            stream_key: stream_key.unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string()),
            max_len: None,
            conn: Mutex::new(None),
        })
    }

    /// Cap the stream at roughly `max_len` entries (`MAXLEN ~`).
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    async fn connection(&self) -> Result<MultiplexedConnection, BrokerError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn reset_connection(&self) {
        *self.conn.lock().await = None;
    }
}

#[async_trait]
impl BrokerClient for RedisStreamsBroker {
    #[instrument(
        skip(self, envelope),
        fields(stream_key = %self.stream_key, event_id = %envelope.event_id),
        err
    )]
    async fn send(&self, envelope: &WireEnvelope) -> Result<(), BrokerError> {
        let body = serde_json::to_string(envelope)
            .map_err(|e| BrokerError::Serialization(e.to_string()))?;
        let event_id = envelope.event_id.to_string();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream_key);
        if let Some(max_len) = self.max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*")
            .arg("routing_key")
            .arg(&envelope.routing_key)
            .arg("event_name")
            .arg(&envelope.event_name)
            .arg("event_id")
            .arg(&event_id)
            .arg("envelope")
            .arg(&body);

        let mut conn = self.connection().await?;
        let result: Result<String, redis::RedisError> = cmd.query_async(&mut conn).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_io_error() || e.is_connection_dropped() => {
                warn!(error = %e, "redis connection lost; reconnecting on next send");
                self.reset_connection().await;
                Err(BrokerError::Connection(e.to_string()))
            }
            Err(e) => Err(BrokerError::Rejected(format!("XADD failed: {}", e))),
        }
    }
}

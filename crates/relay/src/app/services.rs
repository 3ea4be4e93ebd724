//! Infrastructure wiring: store, broker, registry, loops.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use supplyreg_events::{FlagLeaderGate, PayloadRegistry};
use supplyreg_infra::broker::{BrokerClient, InMemoryBroker};
use supplyreg_infra::outbox::{InMemoryOutboxStore, OutboxBackend, PostgresOutboxStore};
use supplyreg_infra::reference_cache::{PgCategorySource, ReferenceCache, ReferenceSource, StaticReferenceSource};
use supplyreg_infra::{
    BusPushAdapter, LoopHandle, OutboxDispatcher, RelayConfig, RetentionJob, build_registry, spawn_periodic,
};

pub type Dispatcher = OutboxDispatcher<Arc<dyn OutboxBackend>, Arc<dyn BrokerClient>, Arc<FlagLeaderGate>>;
pub type Retention = RetentionJob<Arc<dyn OutboxBackend>, Arc<FlagLeaderGate>>;
pub type Categories = ReferenceCache<Arc<dyn ReferenceSource>>;

/// Everything the relay runs, built once at startup.
pub struct RelayServices {
    pub store: Arc<dyn OutboxBackend>,
    pub leader: Arc<FlagLeaderGate>,
    pub registry: PayloadRegistry,
    pub categories: Arc<Categories>,
    pub dispatcher: Arc<Dispatcher>,
    pub retention: Arc<Retention>,
}

/// Pick adapters from the configuration and build the relay.
///
/// Fails when the database or broker cannot be reached, when a durable store
/// would be drained into the in-memory broker, or when a payload handler is
/// missing for any aggregate type.
pub async fn build_services(config: &RelayConfig) -> anyhow::Result<RelayServices> {
    let broker = build_broker(config)?;

    let (store, categories_source): (Arc<dyn OutboxBackend>, Arc<dyn ReferenceSource>) =
        match &config.database_url {
            Some(url) => {
                let store = PostgresOutboxStore::connect(url)
                    .await
                    .context("connecting to the outbox database")?;
                store.ensure_schema().await.context("applying outbox schema")?;
                let source = PgCategorySource::new(store.pool().clone());
                info!("using postgres outbox store");
                let store: Arc<dyn OutboxBackend> = Arc::new(store);
                let source: Arc<dyn ReferenceSource> = Arc::new(source);
                (store, source)
            }
            None => {
                warn!("DATABASE_URL not set; outbox records are kept in memory only");
                let store: Arc<dyn OutboxBackend> = Arc::new(InMemoryOutboxStore::new());
                let source: Arc<dyn ReferenceSource> = Arc::new(StaticReferenceSource::default());
                (store, source)
            }
        };

    let categories = Arc::new(
        ReferenceCache::load(categories_source)
            .await
            .context("loading product categories")?,
    );
    let registry = build_registry(categories.clone()).context("building payload registry")?;
    let leader = Arc::new(FlagLeaderGate::new(config.is_leader));

    let push = BusPushAdapter::new(broker, config.producer_id.clone()).with_timeout(config.push_timeout);
    let dispatcher = OutboxDispatcher::new(store.clone(), registry.clone(), push, leader.clone())
        .with_retry_policy(config.retry.clone());
    let retention = RetentionJob::new(store.clone(), leader.clone()).with_window(config.retention_window);

    Ok(RelayServices {
        store,
        leader,
        registry,
        categories,
        dispatcher: Arc::new(dispatcher),
        retention: Arc::new(retention),
    })
}

fn build_broker(config: &RelayConfig) -> anyhow::Result<Arc<dyn BrokerClient>> {
    let durable = config.database_url.is_some();
    match &config.redis_url {
        #[cfg(feature = "redis")]
        Some(url) => {
            let broker = supplyreg_infra::broker::RedisStreamsBroker::new(url, None)
                .context("creating redis streams client")?;
            info!(stream = broker.stream_key(), "using redis streams broker");
            Ok(Arc::new(broker))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            if durable {
                anyhow::bail!(
                    "REDIS_URL is set but this build lacks the `redis` feature; \
                     refusing to mark postgres outbox records sent through the in-memory broker"
                );
            }
            warn!("REDIS_URL set but redis feature not enabled, falling back to in-memory broker");
            Ok(Arc::new(InMemoryBroker::new()))
        }
        None => {
            if durable {
                anyhow::bail!(
                    "DATABASE_URL is set without REDIS_URL; \
                     refusing to mark postgres outbox records sent through the in-memory broker"
                );
            }
            warn!("REDIS_URL not set; envelopes go to the in-memory broker");
            Ok(Arc::new(InMemoryBroker::new()))
        }
    }
}

impl RelayServices {
    /// Spawn the dispatch, retention and category refresh loops.
    pub fn start(&self, config: &RelayConfig) -> Vec<LoopHandle> {
        vec![
            spawn_periodic(self.dispatcher.clone(), config.dispatch_interval),
            spawn_periodic(self.retention.clone(), config.retention_interval),
            spawn_periodic(self.categories.clone(), config.cache_refresh_interval),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_database(redis_url: Option<&str>) -> RelayConfig {
        RelayConfig {
            database_url: Some("postgres://supplyreg@db.internal/supplyreg".to_string()),
            redis_url: redis_url.map(str::to_string),
            ..RelayConfig::default()
        }
    }

    #[tokio::test]
    async fn postgres_store_without_broker_is_refused() {
        let err = build_services(&with_database(None)).await.err().unwrap();
        assert!(err.to_string().contains("in-memory broker"));
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn postgres_store_with_redis_url_needs_the_redis_feature() {
        let err = build_services(&with_database(Some("redis://broker.internal:6379")))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("`redis` feature"));
    }

    #[tokio::test]
    async fn fully_in_memory_setup_still_starts() {
        let services = build_services(&RelayConfig::default()).await.unwrap();
        for tag in supplyreg_events::AggregateType::ALL {
            assert!(services.registry.contains(tag));
        }
    }
}

//! Read-mostly reference data (category names) shared by payload handlers.
//!
//! The cache is loaded eagerly when it is built, so handlers never see a
//! half-initialised cache. `refresh` swaps in a complete new snapshot; readers
//! keep the old one until the swap.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};

use supplyreg_products::CategoryNames;

use crate::scheduler::PeriodicJob;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("reference data unavailable: {0}")]
    Unavailable(String),
}

/// Where reference entries come from.
#[async_trait]
pub trait ReferenceSource: Send + Sync + 'static {
    async fn load(&self) -> Result<HashMap<String, String>, ReferenceError>;
}

#[async_trait]
impl<S> ReferenceSource for Arc<S>
where
    S: ReferenceSource + ?Sized,
{
    async fn load(&self) -> Result<HashMap<String, String>, ReferenceError> {
        (**self).load().await
    }
}

/// Fixed entries, for tests and database-less runs.
#[derive(Debug, Clone, Default)]
pub struct StaticReferenceSource(HashMap<String, String>);

impl StaticReferenceSource {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[async_trait]
impl ReferenceSource for StaticReferenceSource {
    async fn load(&self) -> Result<HashMap<String, String>, ReferenceError> {
        Ok(self.0.clone())
    }
}

/// `product_categories(code, name)` table.
#[derive(Debug, Clone)]
pub struct PgCategorySource {
    pool: PgPool,
}

impl PgCategorySource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferenceSource for PgCategorySource {
    async fn load(&self) -> Result<HashMap<String, String>, ReferenceError> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT code, name FROM product_categories")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ReferenceError::Unavailable(e.to_string()))?;
        Ok(rows.into_iter().collect())
    }
}

#[derive(Debug)]
struct Snapshot {
    entries: Arc<HashMap<String, String>>,
    loaded_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ReferenceCache<S> {
    source: S,
    snapshot: RwLock<Snapshot>,
}

impl<S> ReferenceCache<S>
where
    S: ReferenceSource,
{
    /// Build the cache with its first snapshot already loaded.
    pub async fn load(source: S) -> Result<Self, ReferenceError> {
        let entries = source.load().await?;
        info!(entries = entries.len(), "reference cache loaded");
        Ok(Self {
            source,
            snapshot: RwLock::new(Snapshot {
                entries: Arc::new(entries),
                loaded_at: Utc::now(),
            }),
        })
    }

    /// Reload from the source. On failure the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<usize, ReferenceError> {
        let entries = self.source.load().await?;
        let count = entries.len();
        let mut snapshot = self
            .snapshot
            .write()
            .map_err(|_| ReferenceError::Unavailable("cache lock poisoned".to_string()))?;
        *snapshot = Snapshot {
            entries: Arc::new(entries),
            loaded_at: Utc::now(),
        };
        Ok(count)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    pub fn entries(&self) -> Arc<HashMap<String, String>> {
        self.snapshot
            .read()
            .map(|s| Arc::clone(&s.entries))
            .unwrap_or_default()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.read().ok().map(|s| s.loaded_at)
    }
}

impl<S> CategoryNames for ReferenceCache<S>
where
    S: ReferenceSource,
{
    fn category_name(&self, code: &str) -> Option<String> {
        self.get(code)
    }
}

#[async_trait]
impl<S> PeriodicJob for ReferenceCache<S>
where
    S: ReferenceSource,
{
    fn name(&self) -> &'static str {
        "reference-cache-refresh"
    }

    async fn run_tick(&self) {
        match self.refresh().await {
            Ok(count) => info!(entries = count, "reference cache refreshed"),
            Err(e) => warn!(error = %e, "reference cache refresh failed; keeping previous snapshot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Scripted(Mutex<Vec<Result<HashMap<String, String>, ReferenceError>>>);

    #[async_trait]
    impl ReferenceSource for Scripted {
        async fn load(&self) -> Result<HashMap<String, String>, ReferenceError> {
            self.0
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ReferenceError::Unavailable("exhausted".into())))
        }
    }

    fn entries(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn loads_eagerly_and_serves_category_names() {
        let cache = ReferenceCache::load(StaticReferenceSource::new([("OFFICE", "Office supplies")]))
            .await
            .unwrap();
        assert_eq!(cache.category_name("OFFICE").as_deref(), Some("Office supplies"));
        assert_eq!(cache.category_name("GARDEN"), None);
        assert!(cache.loaded_at().is_some());
    }

    #[tokio::test]
    async fn refresh_swaps_snapshot_and_survives_failures() {
        // popped from the back
        let source = Scripted(Mutex::new(vec![
            Err(ReferenceError::Unavailable("db down".into())),
            Ok(entries(&[("A", "Alpha v2"), ("B", "Beta")])),
            Ok(entries(&[("A", "Alpha")])),
        ]));
        let cache = ReferenceCache::load(source).await.unwrap();
        let before = cache.entries();
        assert_eq!(cache.get("A").as_deref(), Some("Alpha"));

        assert_eq!(cache.refresh().await.unwrap(), 2);
        assert_eq!(cache.get("A").as_deref(), Some("Alpha v2"));
        assert_eq!(before.get("A").map(String::as_str), Some("Alpha"));

        assert!(cache.refresh().await.is_err());
        assert_eq!(cache.get("B").as_deref(), Some("Beta"));
    }

    #[tokio::test]
    async fn failing_first_load_yields_no_cache() {
        let source = Scripted(Mutex::new(vec![Err(ReferenceError::Unavailable("db down".into()))]));
        assert!(ReferenceCache::load(source).await.is_err());
    }
}

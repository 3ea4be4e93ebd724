//! Postgres-backed outbox.
//!
//! Two tables: `outbox_events` holds the records, `outbox_delivery` holds
//! retry bookkeeping for records that failed at least once (rows cascade on
//! delete). The schema lives in `migrations/0001_outbox.sql`.
//!
//! ## Error Mapping
//!
//! | SQLx error | Code | OutboxStoreError |
//! |------------|------|------------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (check violation) | `23514` | `Corrupt` |
//! | Database (other) | any | `Storage` |
//! | PoolClosed / Io / other | n/a | `Storage` |
//!
//! `find_by_status` decodes row by row: a row that cannot be decoded (unknown
//! aggregate type, malformed metadata) is logged and skipped so the rest of
//! the backlog still flows.
//!
//! Writes inside a business transaction go through the [`OutboxWriter`] impl
//! on `sqlx::Transaction<'_, Postgres>`, so the outbox row commits or rolls
//! back together with the caller's own statements.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{error, instrument};
use uuid::Uuid;

use supplyreg_core::{AggregateId, UserId};
use supplyreg_events::{AggregateType, EventRecord, EventStatus, Metadata};

use super::r#trait::{DeliveryLog, DeliveryState, OutboxStats, OutboxStore, OutboxStoreError, OutboxWriter};

/// Outbox DDL, applied by [`PostgresOutboxStore::ensure_schema`].
pub const SCHEMA: &str = include_str!("../../migrations/0001_outbox.sql");

const INSERT_RECORD: &str = r#"
    INSERT INTO outbox_events (
        event_id, aggregate_id, aggregate_type, status, event_name,
        by_user, extra_metadata, payload, created, updated
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
"#;

const SELECT_RECORD: &str = r#"
    SELECT event_id, aggregate_id, aggregate_type, status, event_name,
           by_user, extra_metadata, payload, created, updated
    FROM outbox_events
"#;

#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, OutboxStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the outbox tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), OutboxStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Start a transaction for a business write plus its outbox insert.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, OutboxStoreError> {
        self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))
    }
}

async fn insert_record<'e, E>(executor: E, record: &EventRecord) -> Result<(), OutboxStoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let extra_metadata = serde_json::to_value(record.extra_metadata())
        .map_err(|e| OutboxStoreError::Corrupt(format!("extra_metadata: {e}")))?;

    sqlx::query(INSERT_RECORD)
        .bind(record.event_id())
        .bind(record.aggregate_id().as_uuid())
        .bind(record.aggregate_type().as_str())
        .bind(record.status().as_str())
        .bind(record.event_name())
        .bind(record.by_user().as_uuid())
        .bind(extra_metadata)
        .bind(record.payload())
        .bind(record.created())
        .bind(record.updated())
        .execute(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                OutboxStoreError::Duplicate(record.event_id())
            } else {
                map_sqlx_error("insert", e)
            }
        })?;
    Ok(())
}

#[async_trait]
impl OutboxWriter for Transaction<'_, Postgres> {
    #[instrument(skip(self, record), fields(event_id = %record.event_id(), aggregate_type = %record.aggregate_type()), err)]
    async fn insert(&mut self, record: EventRecord) -> Result<EventRecord, OutboxStoreError> {
        insert_record(&mut **self, &record).await?;
        Ok(record)
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    #[instrument(skip(self, record), fields(event_id = %record.event_id()), err)]
    async fn save(&self, record: EventRecord) -> Result<EventRecord, OutboxStoreError> {
        insert_record(&self.pool, &record).await?;
        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn find_by_status(&self, status: EventStatus) -> Result<Vec<EventRecord>, OutboxStoreError> {
        let sql = format!("{SELECT_RECORD} WHERE status = $1 ORDER BY created ASC, event_id ASC");
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_status", e))?;

        decodable_records(rows.iter().map(RawRecord::from_row))
    }

    #[instrument(skip(self), err)]
    async fn update_status(
        &self,
        event_id: Uuid,
        status: EventStatus,
        updated: DateTime<Utc>,
    ) -> Result<(), OutboxStoreError> {
        if status != EventStatus::Sent {
            let from = self.current_status(event_id).await?;
            return Err(OutboxStoreError::IllegalTransition { event_id, from, to: status });
        }

        let result = sqlx::query(
            "UPDATE outbox_events SET status = $2, updated = $3 WHERE event_id = $1 AND status = $4",
        )
        .bind(event_id)
        .bind(status.as_str())
        .bind(updated)
        .bind(EventStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_status", e))?;

        if result.rows_affected() == 0 {
            let from = self.current_status(event_id).await?;
            return Err(OutboxStoreError::IllegalTransition { event_id, from, to: status });
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_where(
        &self,
        status: EventStatus,
        updated_before: DateTime<Utc>,
    ) -> Result<u64, OutboxStoreError> {
        let result = sqlx::query("DELETE FROM outbox_events WHERE status = $1 AND updated < $2")
            .bind(status.as_str())
            .bind(updated_before)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_where", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<OutboxStats, OutboxStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'PENDING') AS pending,
                COUNT(*) FILTER (WHERE status = 'SENT') AS sent,
                MIN(created) FILTER (WHERE status = 'PENDING') AS oldest_pending
            FROM outbox_events
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let pending: i64 = row.try_get("pending").map_err(|e| map_sqlx_error("stats", e))?;
        let sent: i64 = row.try_get("sent").map_err(|e| map_sqlx_error("stats", e))?;
        let oldest: Option<DateTime<Utc>> =
            row.try_get("oldest_pending").map_err(|e| map_sqlx_error("stats", e))?;

        Ok(OutboxStats {
            pending: pending.max(0) as u64,
            sent: sent.max(0) as u64,
            oldest_pending_created: oldest,
        })
    }
}

impl PostgresOutboxStore {
    async fn current_status(&self, event_id: Uuid) -> Result<EventStatus, OutboxStoreError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM outbox_events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_status", e))?;

        let status = status.ok_or(OutboxStoreError::NotFound(event_id))?;
        EventStatus::from_str(&status).map_err(|e| OutboxStoreError::Corrupt(e.to_string()))
    }
}

#[async_trait]
impl DeliveryLog for PostgresOutboxStore {
    #[instrument(skip(self), err)]
    async fn delivery_states(&self) -> Result<HashMap<Uuid, DeliveryState>, OutboxStoreError> {
        let rows = sqlx::query(
            "SELECT event_id, attempts, last_error, next_attempt_at, parked FROM outbox_delivery",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("delivery_states", e))?;

        rows.iter()
            .map(|row| delivery_from_row(row).map(|d| (d.event_id, d)))
            .collect()
    }

    #[instrument(skip(self, state), fields(event_id = %state.event_id, attempts = state.attempts), err)]
    async fn save_delivery_state(&self, state: DeliveryState) -> Result<(), OutboxStoreError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_delivery (event_id, attempts, last_error, next_attempt_at, parked)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_id) DO UPDATE
            SET attempts = EXCLUDED.attempts,
                last_error = EXCLUDED.last_error,
                next_attempt_at = EXCLUDED.next_attempt_at,
                parked = EXCLUDED.parked
            "#,
        )
        .bind(state.event_id)
        .bind(i32::try_from(state.attempts).unwrap_or(i32::MAX))
        .bind(&state.last_error)
        .bind(state.next_attempt_at)
        .bind(state.parked)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_delivery_state", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn clear_delivery_state(&self, event_id: Uuid) -> Result<(), OutboxStoreError> {
        sqlx::query("DELETE FROM outbox_delivery WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("clear_delivery_state", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn parked(&self) -> Result<Vec<DeliveryState>, OutboxStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, attempts, last_error, next_attempt_at, parked
            FROM outbox_delivery
            WHERE parked
            ORDER BY event_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("parked", e))?;

        rows.iter().map(delivery_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn requeue(&self, event_id: Uuid, now: DateTime<Utc>) -> Result<bool, OutboxStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_delivery
            SET parked = FALSE, attempts = 0, next_attempt_at = $2
            WHERE event_id = $1 AND parked
            "#,
        )
        .bind(event_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("requeue", e))?;
        Ok(result.rows_affected() > 0)
    }
}

/// Column values of one `outbox_events` row before tag and metadata parsing.
#[derive(Debug, Clone)]
struct RawRecord {
    event_id: Uuid,
    aggregate_id: Uuid,
    aggregate_type: String,
    status: String,
    event_name: String,
    by_user: Uuid,
    extra_metadata: serde_json::Value,
    payload: serde_json::Value,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

impl RawRecord {
    fn from_row(row: &PgRow) -> Result<Self, OutboxStoreError> {
        let get = |e: sqlx::Error| map_sqlx_error("decode outbox row", e);

        Ok(Self {
            event_id: row.try_get("event_id").map_err(get)?,
            aggregate_id: row.try_get("aggregate_id").map_err(get)?,
            aggregate_type: row.try_get("aggregate_type").map_err(get)?,
            status: row.try_get("status").map_err(get)?,
            event_name: row.try_get("event_name").map_err(get)?,
            by_user: row.try_get("by_user").map_err(get)?,
            extra_metadata: row.try_get("extra_metadata").map_err(get)?,
            payload: row.try_get("payload").map_err(get)?,
            created: row.try_get("created").map_err(get)?,
            updated: row.try_get("updated").map_err(get)?,
        })
    }

    fn into_record(self) -> Result<EventRecord, OutboxStoreError> {
        let event_id = self.event_id;
        let aggregate_type = AggregateType::from_str(&self.aggregate_type)
            .map_err(|e| OutboxStoreError::Corrupt(format!("{event_id}: {e}")))?;
        let status = EventStatus::from_str(&self.status)
            .map_err(|e| OutboxStoreError::Corrupt(format!("{event_id}: {e}")))?;
        let extra_metadata: Metadata = serde_json::from_value(self.extra_metadata)
            .map_err(|e| OutboxStoreError::Corrupt(format!("{event_id}: extra_metadata: {e}")))?;

        Ok(EventRecord::restore(
            event_id,
            AggregateId::from_uuid(self.aggregate_id),
            aggregate_type,
            status,
            self.event_name,
            UserId::from_uuid(self.by_user),
            extra_metadata,
            self.payload,
            self.created,
            self.updated,
        ))
    }
}

/// Decode rows one by one. Undecodable rows are logged and left in the
/// table (still `PENDING`); only a storage outage fails the scan.
fn decodable_records<I>(rows: I) -> Result<Vec<EventRecord>, OutboxStoreError>
where
    I: IntoIterator<Item = Result<RawRecord, OutboxStoreError>>,
{
    let mut records = Vec::new();
    for raw in rows {
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) if e.is_unavailable() => return Err(e),
            Err(e) => {
                error!(error = %e, "skipping undecodable outbox row");
                continue;
            }
        };
        let event_id = raw.event_id;
        match raw.into_record() {
            Ok(record) => records.push(record),
            Err(e) => error!(event_id = %event_id, error = %e, "skipping undecodable outbox row"),
        }
    }
    Ok(records)
}

fn delivery_from_row(row: &PgRow) -> Result<DeliveryState, OutboxStoreError> {
    let get = |e: sqlx::Error| map_sqlx_error("decode delivery row", e);
    let attempts: i32 = row.try_get("attempts").map_err(get)?;

    Ok(DeliveryState {
        event_id: row.try_get("event_id").map_err(get)?,
        attempts: attempts.max(0) as u32,
        last_error: row.try_get("last_error").map_err(get)?,
        next_attempt_at: row.try_get("next_attempt_at").map_err(get)?,
        parked: row.try_get("parked").map_err(get)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OutboxStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23514") => OutboxStoreError::Corrupt(msg),
                _ => OutboxStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            OutboxStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_) => {
            OutboxStoreError::Corrupt(format!("{}: {}", operation, err))
        }
        _ => OutboxStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_closed_is_a_storage_outage() {
        let err = map_sqlx_error("find_by_status", sqlx::Error::PoolClosed);
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("find_by_status"));
    }

    #[test]
    fn decode_failures_are_corruption_not_outage() {
        let err = map_sqlx_error("decode", sqlx::Error::ColumnNotFound("payload".into()));
        assert!(matches!(err, OutboxStoreError::Corrupt(_)));
        assert!(!err.is_unavailable());
    }

    fn raw(aggregate_type: &str, extra_metadata: serde_json::Value) -> RawRecord {
        let now = Utc::now();
        RawRecord {
            event_id: Uuid::now_v7(),
            aggregate_id: Uuid::now_v7(),
            aggregate_type: aggregate_type.to_string(),
            status: "PENDING".to_string(),
            event_name: "registered".to_string(),
            by_user: Uuid::now_v7(),
            extra_metadata,
            payload: serde_json::json!({}),
            created: now,
            updated: now,
        }
    }

    #[test]
    fn unknown_tag_or_bad_metadata_skips_only_that_row() {
        let good = raw("SUPPLIER", serde_json::json!({ "source": "import" }));
        let good_id = good.event_id;
        let rows = vec![
            Ok(raw("CATALOG", serde_json::json!({}))),
            Ok(good),
            Ok(raw("PRODUCT", serde_json::json!(["not", "a", "map"]))),
            Err(OutboxStoreError::Corrupt("decode outbox row: payload".to_string())),
        ];

        let records = decodable_records(rows).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_id(), good_id);
        assert_eq!(records[0].aggregate_type(), AggregateType::Supplier);
    }

    #[test]
    fn storage_outage_still_fails_the_scan() {
        let rows = vec![
            Ok(raw("SUPPLIER", serde_json::json!({}))),
            Err(OutboxStoreError::Storage("connection reset".to_string())),
        ];
        assert!(decodable_records(rows).unwrap_err().is_unavailable());
    }

    #[test]
    fn schema_declares_both_tables() {
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS outbox_events"));
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS outbox_delivery"));
        assert!(SCHEMA.contains("ON DELETE CASCADE"));
    }
}

//! Operator view of the outbox backlog.

use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use supplyreg_events::LeaderGate;
use supplyreg_infra::outbox::{DeliveryLog, DeliveryState, OutboxStore};

use crate::app::errors::{json_error, store_error_to_response};
use crate::app::services::RelayServices;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub pending: u64,
    pub sent: u64,
    pub parked: usize,
    pub oldest_pending_created: Option<DateTime<Utc>>,
    pub oldest_pending_age_secs: Option<i64>,
    pub is_leader: bool,
}

pub async fn stats(Extension(services): Extension<Arc<RelayServices>>) -> Response {
    let stats = match services.store.stats().await {
        Ok(s) => s,
        Err(e) => return store_error_to_response(e),
    };
    let parked = match services.store.parked().await {
        Ok(p) => p.len(),
        Err(e) => return store_error_to_response(e),
    };

    let now = Utc::now();
    Json(StatsResponse {
        pending: stats.pending,
        sent: stats.sent,
        parked,
        oldest_pending_created: stats.oldest_pending_created,
        oldest_pending_age_secs: stats.oldest_pending_age_secs(now),
        is_leader: services.leader.is_leader(),
    })
    .into_response()
}

pub async fn parked(Extension(services): Extension<Arc<RelayServices>>) -> Response {
    match services.store.parked().await {
        Ok(parked) => Json::<Vec<DeliveryState>>(parked).into_response(),
        Err(e) => store_error_to_response(e),
    }
}

pub async fn requeue(
    Extension(services): Extension<Arc<RelayServices>>,
    Path(event_id): Path<Uuid>,
) -> Response {
    match services.store.requeue(event_id, Utc::now()).await {
        Ok(true) => {
            info!(event_id = %event_id, "parked record requeued by operator");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => json_error(
            StatusCode::NOT_FOUND,
            "not_parked",
            format!("{event_id} is not parked"),
        ),
        Err(e) => store_error_to_response(e),
    }
}

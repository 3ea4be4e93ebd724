//! Ops HTTP surface of the relay (Axum router + service wiring).
//!
//! - `services.rs`: store, broker, registry and background loops
//! - `routes/`: HTTP handlers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Extension, Router};
use tower::ServiceBuilder;

pub mod errors;
pub mod routes;
pub mod services;

use services::RelayServices;

/// Build the ops router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<RelayServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .route("/outbox/stats", get(routes::outbox::stats))
        .route("/outbox/parked", get(routes::outbox::parked))
        .route("/outbox/parked/:event_id/requeue", post(routes::outbox::requeue))
        .layer(ServiceBuilder::new().layer(Extension(services)))
}

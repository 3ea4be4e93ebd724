use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use serde_json::{Value, json};

use supplyreg_core::{AggregateId, UserId};
use supplyreg_events::{AggregateType, EventRecord, Metadata};
use supplyreg_infra::outbox::OutboxStore;
use supplyreg_infra::{RelayConfig, RetryPolicy};
use supplyreg_parties::{Supplier, SupplierId};
use supplyreg_relay::app::{self, services::RelayServices};

struct TestServer {
    base_url: String,
    services: Arc<RelayServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(config: RelayConfig) -> Self {
        // Same router as prod, in-memory adapters, ephemeral port.
        let services = Arc::new(
            app::services::build_services(&config)
                .await
                .expect("failed to build services"),
        );
        let router = app::build_app(services.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }

    async fn get_json(&self, client: &reqwest::Client, path: &str) -> Value {
        let res = client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK, "GET {path}");
        res.json().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn supplier_record() -> EventRecord {
    let now = Utc::now();
    let supplier = Supplier::register(
        SupplierId::new(AggregateId::new()),
        "Nordwind Logistik AG",
        "HRB 98765",
        None,
        now,
    )
    .unwrap();
    EventRecord::pending(
        AggregateType::Supplier,
        supplier.id().0,
        UserId::new(),
        "registered",
        serde_json::to_value(supplier.snapshot()).unwrap(),
        Metadata::new(),
        now,
    )
}

fn broken_record() -> EventRecord {
    EventRecord::pending(
        AggregateType::Supplier,
        AggregateId::new(),
        UserId::new(),
        "registered",
        json!({ "unexpected": true }),
        Metadata::new(),
        Utc::now(),
    )
}

#[tokio::test]
async fn health_is_ok() {
    let server = TestServer::spawn(RelayConfig::default()).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn stats_follow_the_backlog_through_a_tick() {
    let server = TestServer::spawn(RelayConfig::default()).await;
    let client = reqwest::Client::new();

    let stats = server.get_json(&client, "/outbox/stats").await;
    assert_eq!(stats["pending"], 0);
    assert_eq!(stats["oldestPendingCreated"], Value::Null);
    assert_eq!(stats["isLeader"], true);

    let record = supplier_record();
    server.services.store.save(record.clone()).await.unwrap();

    let stats = server.get_json(&client, "/outbox/stats").await;
    assert_eq!(stats["pending"], 1);
    assert_eq!(stats["sent"], 0);
    assert!(stats["oldestPendingAgeSecs"].as_i64().is_some());

    let outcome = server.services.dispatcher.tick().await;
    assert_eq!(outcome.report().unwrap().sent, 1);

    let stats = server.get_json(&client, "/outbox/stats").await;
    assert_eq!(stats["pending"], 0);
    assert_eq!(stats["sent"], 1);
    assert_eq!(stats["parked"], 0);
}

#[tokio::test]
async fn parked_records_are_listed_and_can_be_requeued_once() {
    let config = RelayConfig {
        retry: RetryPolicy::exponential(Some(1), Duration::ZERO, Duration::ZERO),
        ..RelayConfig::default()
    };
    let server = TestServer::spawn(config).await;
    let client = reqwest::Client::new();

    let record = broken_record();
    server.services.store.save(record.clone()).await.unwrap();
    let outcome = server.services.dispatcher.tick().await;
    assert_eq!(outcome.report().unwrap().parked, 1);

    let parked = server.get_json(&client, "/outbox/parked").await;
    let parked = parked.as_array().unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0]["event_id"], json!(record.event_id()));

    let requeue_url = format!(
        "{}/outbox/parked/{}/requeue",
        server.base_url,
        record.event_id()
    );
    let res = client.post(&requeue_url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client.post(&requeue_url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_parked");

    let stats = server.get_json(&client, "/outbox/stats").await;
    assert_eq!(stats["pending"], 1);
    assert_eq!(stats["parked"], 0);
}

#[tokio::test]
async fn non_leader_reports_itself_and_leaves_backlog_alone() {
    let config = RelayConfig {
        is_leader: false,
        ..RelayConfig::default()
    };
    let server = TestServer::spawn(config).await;
    let client = reqwest::Client::new();

    server.services.store.save(supplier_record()).await.unwrap();
    server.services.dispatcher.tick().await;

    let stats = server.get_json(&client, "/outbox/stats").await;
    assert_eq!(stats["isLeader"], false);
    assert_eq!(stats["pending"], 1);
}

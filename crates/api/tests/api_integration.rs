//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::AppState;
use api::config::Config;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use common::{WalletAddress, Wei};
use ledger_gateway::SimulatedChain;
use ledger_store::InMemoryStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    Collaborators, InMemoryCatalog, InMemoryUserDirectory, RecordingNotifier, RecordingSleeper,
};
use serde_json::{Value, json};
use tower::ServiceExt;

const TENANT: &str = "0x1111111111111111111111111111111111111111";
const HOST: &str = "0x2222222222222222222222222222222222222222";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: Router,
    state: Arc<AppState<InMemoryStore>>,
    chain: SimulatedChain,
    catalog: InMemoryCatalog,
    users: InMemoryUserDirectory,
}

impl TestApp {
    async fn new() -> Self {
        let config = Config::default();
        let chain = SimulatedChain::new(config.chain_config());
        api::fund_dev_wallets(&chain, &config, Wei::ether(10)).await;
        chain.fund(&WalletAddress::new(TENANT), Wei::ether(5)).await;

        let catalog = InMemoryCatalog::new();
        let users = InMemoryUserDirectory::new();
        let collaborators = Collaborators::new(
            Arc::new(catalog.clone()),
            Arc::new(users.clone()),
            Arc::new(RecordingNotifier::new()),
        );
        let state = api::create_state(
            InMemoryStore::new(),
            &config,
            chain.clone(),
            collaborators,
            Arc::new(RecordingSleeper::new()),
        );
        let app = api::create_app(state.clone(), get_metrics_handle());

        Self {
            app,
            state,
            chain,
            catalog,
            users,
        }
    }

    async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request("GET", uri, None).await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request("POST", uri, Some(body)).await
    }

    /// Books a stay starting today and returns its ID.
    async fn book(&self) -> String {
        let (status, json) = self.post("/reservations", booking(Some(HOST))).await;
        assert_eq!(status, StatusCode::CREATED, "{json}");
        json["id"].as_str().unwrap().to_string()
    }

    /// Runs queued commands, mines, relays and applies outcomes.
    async fn settle(&self) {
        for _ in 0..3 {
            self.state.runtime.drain().await;
            if self.chain.mempool_len().await > 0 {
                self.chain.mine().await;
            }
            self.state.runtime.relay.poll_once().await.unwrap();
        }
        self.state.runtime.drain().await;
    }
}

fn booking(host: Option<&str>) -> Value {
    let today = Utc::now().date_naive();
    let mut body = json!({
        "property_id": "prop-1",
        "tenant_wallet": TENANT,
        "check_in_date": today.to_string(),
        "check_out_date": (today + chrono::Duration::days(2)).to_string(),
        "rental_amount": "1",
    });
    if let Some(host) = host {
        body["host_wallet"] = json!(host);
    }
    body
}

#[tokio::test]
async fn test_health_check() {
    let t = TestApp::new().await;

    let (status, json) = t.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["ledger_head"], 0);
}

#[tokio::test]
async fn test_health_reports_unreachable_ledger() {
    let t = TestApp::new().await;
    t.chain.set_offline(true).await;

    let (status, json) = t.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "degraded");
    assert!(json["ledger_head"].is_null());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = TestApp::new().await;

    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

mod reservations {
    use super::*;

    #[tokio::test]
    async fn test_create_reservation_quotes_fee() {
        let t = TestApp::new().await;

        let (status, json) = t.post("/reservations", booking(Some(HOST))).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["rental_amount"], "1000000000000000000");
        assert_eq!(json["platform_fee"], "50000000000000000");
        assert_eq!(json["total_amount"], "1050000000000000000");
        assert_eq!(json["payment_confirmed"], false);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_wallet() {
        let t = TestApp::new().await;
        let mut body = booking(Some(HOST));
        body["tenant_wallet"] = json!("not-a-wallet");

        let (status, json) = t.post("/reservations", body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("tenant_wallet"));
    }

    #[tokio::test]
    async fn test_create_resolves_host_wallet() {
        let t = TestApp::new().await;
        t.catalog.set_owner("prop-1", "user-9").await;
        t.users
            .set_wallet("user-9", WalletAddress::new(HOST))
            .await;

        let (status, json) = t.post("/reservations", booking(None)).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["host_wallet"], HOST);
    }

    #[tokio::test]
    async fn test_create_without_known_host_is_rejected() {
        let t = TestApp::new().await;

        let (status, _) = t.post("/reservations", booking(None)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_unknown_and_malformed_ids() {
        let t = TestApp::new().await;

        let (status, _) = t
            .get(&format!("/reservations/{}", uuid::Uuid::new_v4()))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = t.get("/reservations/not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let t = TestApp::new().await;
        t.book().await;

        let (status, json) = t.get("/reservations?status=PENDING").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);

        let (_, json) = t.get("/reservations?status=COMPLETED").await;
        assert!(json.as_array().unwrap().is_empty());

        let (status, _) = t.get("/reservations?status=SOMEDAY").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_payment_confirms_reservation_with_history() {
        let t = TestApp::new().await;
        let id = t.book().await;

        t.settle().await;

        let (_, json) = t.get(&format!("/reservations/{id}")).await;
        assert_eq!(json["status"], "CONFIRMED");
        assert_eq!(json["payment_confirmed"], true);

        let (status, events) = t.get(&format!("/reservations/{id}/events")).await;
        assert_eq!(status, StatusCode::OK);
        let types: Vec<&str> = events
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event_type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["ReservationCreated", "PaymentConfirmed"]);
    }

    #[tokio::test]
    async fn test_check_out_before_date_is_rejected() {
        let t = TestApp::new().await;
        let id = t.book().await;
        t.settle().await;

        let (status, json) = t
            .request("POST", &format!("/reservations/{id}/check-in"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "CHECKED_IN");

        let (status, _) = t
            .request("POST", &format!("/reservations/{id}/check-out"), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_after_payment_refunds() {
        let t = TestApp::new().await;
        let id = t.book().await;
        t.settle().await;

        let (status, json) = t
            .post(
                &format!("/reservations/{id}/cancel"),
                json!({ "reason": "plans changed" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "CANCELLED");
        assert_eq!(json["cancellation_reason"], "plans changed");

        t.settle().await;

        let (_, json) = t.get(&format!("/reservations/{id}")).await;
        assert_eq!(json["refunded"], true);
    }

    #[tokio::test]
    async fn test_retry_payment_requires_failed_payment() {
        let t = TestApp::new().await;
        let id = t.book().await;

        let (status, _) = t
            .request("POST", &format!("/reservations/{id}/retry-payment"), None)
            .await;

        assert_eq!(status, StatusCode::CONFLICT);
    }
}

mod payments {
    use super::*;

    #[tokio::test]
    async fn test_ledger_rows_by_reservation_and_hash() {
        let t = TestApp::new().await;
        let id = t.book().await;
        t.settle().await;

        let (status, rows) = t.get(&format!("/payments/reservation/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["purpose"], "PAYMENT");
        assert_eq!(rows[0]["status"], "CONFIRMED");

        let hash = rows[0]["tx_hash"].as_str().unwrap();
        let (status, row) = t.get(&format!("/payments/tx/{hash}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(row["reservation_id"], id.as_str());

        let (status, _) = t.get("/payments/tx/0xdeadbeef").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_replayed_payment_reports_existing_row() {
        let t = TestApp::new().await;
        let id = t.book().await;
        t.settle().await;

        let (status, json) = t.post("/payments", json!({ "reservation_id": id })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "CONFIRMED");
        assert_eq!(json["outcome"], "ALREADY_CONFIRMED");
        assert_eq!(t.chain.send_attempts().await, 1);
    }

    #[tokio::test]
    async fn test_submitted_payment_is_processing() {
        let t = TestApp::new().await;
        let (_, json) = t.post("/reservations", booking(Some(HOST))).await;
        let id = json["id"].as_str().unwrap();

        let (status, json) = t.post("/payments", json!({ "reservation_id": id })).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["status"], "PROCESSING");
        assert_eq!(json["outcome"], "SUBMITTED");
    }

    #[tokio::test]
    async fn test_release_before_checkout_conflicts() {
        let t = TestApp::new().await;
        let id = t.book().await;
        t.settle().await;

        let (status, _) = t
            .request("POST", &format!("/payments/reservation/{id}/release"), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, rows) = t.get(&format!("/payments/reservation/{id}")).await;
        assert_eq!(rows.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_refund_without_payment_conflicts() {
        let t = TestApp::new().await;
        let (_, json) = t.post("/reservations", booking(Some(HOST))).await;
        let id = json["id"].as_str().unwrap();

        let (status, _) = t
            .request("POST", &format!("/payments/reservation/{id}/refund"), None)
            .await;

        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_balance_lookup() {
        let t = TestApp::new().await;

        let (status, json) = t.get(&format!("/payments/balance/{TENANT}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["balance"], "5000000000000000000");
        assert_eq!(json["pending_withdrawal"], "0");

        let (status, _) = t.get("/payments/balance/nope").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

mod webhooks {
    use super::*;

    #[tokio::test]
    async fn test_webhook_confirms_from_receipt() {
        let t = TestApp::new().await;
        let id = t.book().await;
        t.state.runtime.drain().await;
        t.chain.mine().await;
        let (_, rows) = t.get(&format!("/payments/reservation/{id}")).await;
        let hash = rows[0]["tx_hash"].as_str().unwrap().to_string();

        let (status, json) = t
            .post(
                "/webhooks/ledger",
                json!({
                    "event_type": "BookingCreated",
                    "transaction_hash": hash,
                    "confirmed": true
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["settlement"], "CONFIRMED");

        t.state.runtime.drain().await;
        let (_, json) = t.get(&format!("/reservations/{id}")).await;
        assert_eq!(json["status"], "CONFIRMED");

        let (_, json) = t
            .post(
                "/webhooks/ledger",
                json!({ "event_type": "BookingCreated", "transaction_hash": hash }),
            )
            .await;
        assert_eq!(json["settlement"], "ALREADY_SETTLED");
    }

    #[tokio::test]
    async fn test_webhook_for_unknown_hash_is_not_found() {
        let t = TestApp::new().await;

        let (status, _) = t
            .post(
                "/webhooks/ledger",
                json!({ "event_type": "BookingCreated", "transaction_hash": "0xabc" }),
            )
            .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_verify_echoes_challenge() {
        let t = TestApp::new().await;

        let (status, json) = t.get("/webhooks/verify?challenge=abc123").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["challenge"], "abc123");

        let (status, _) = t.get("/webhooks/verify").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

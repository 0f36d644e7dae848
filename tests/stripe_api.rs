//! Card payment tests: the full router against a fake Stripe API on loopback.
#![allow(clippy::panic)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use chrono::Utc;
use serde_json::{Value, json};
use tower::ServiceExt;

use donation_ledger::api;
use donation_ledger::app_state::AppState;
use donation_ledger::config::{AmountLimits, StripeConfig, ZaloPayConfig};
use donation_ledger::domain::EventBus;
use donation_ledger::gateway::signing::hmac_sha256_hex;
use donation_ledger::gateway::{StripeClient, ZaloPayClient};
use donation_ledger::persistence::{LedgerBackend, MemoryLedger};
use donation_ledger::secret::Secret;

const SECRET_KEY: &str = "sk_test_4eC39HqLyjWDarjtT1zdp7dc";
const WEBHOOK_SECRET: &str = "whsec_test_secret";
const OPERATOR_TOKEN: &str = "operator-secret";

#[derive(Debug, Clone)]
struct Intent {
    id: String,
    amount: u64,
}

/// Fake card processor. Intents are kept by transaction code; refunds answer
/// with the configured status.
#[derive(Debug, Clone)]
struct FakeStripe {
    intents: Arc<Mutex<HashMap<String, Intent>>>,
    refunds: Arc<AtomicUsize>,
    refund_status: &'static str,
}

impl FakeStripe {
    fn new(refund_status: &'static str) -> Self {
        Self {
            intents: Arc::default(),
            refunds: Arc::default(),
            refund_status,
        }
    }

    async fn spawn(&self) -> SocketAddr {
        let router = Router::new()
            .route("/v1/payment_intents", post(fake_create_intent))
            .route("/v1/payment_intents/search", get(fake_search))
            .route("/v1/refunds", post(fake_refund))
            .with_state(self.clone());
        let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
            panic!("cannot bind fake processor");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("fake processor has no address");
        };
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        addr
    }

    fn intent_for(&self, code: &str) -> Option<Intent> {
        self.intents
            .lock()
            .ok()
            .and_then(|intents| intents.get(code).cloned())
    }
}

fn unauthorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        != Some(format!("Bearer {SECRET_KEY}").as_str())
}

fn auth_error() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": {"message": "Invalid API Key provided"}})),
    )
        .into_response()
}

async fn fake_create_intent(
    State(fake): State<FakeStripe>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> axum::response::Response {
    if unauthorized(&headers) {
        return auth_error();
    }
    let (Some(code), Some(amount)) = (
        form.get("metadata[transaction_code]"),
        form.get("amount").and_then(|a| a.parse::<u64>().ok()),
    ) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"code": "parameter_missing"}})),
        )
            .into_response();
    };
    let Ok(mut intents) = fake.intents.lock() else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let id = format!("pi_{}", intents.len() + 1);
    intents.insert(
        code.clone(),
        Intent {
            id: id.clone(),
            amount,
        },
    );
    Json(json!({
        "id": id,
        "object": "payment_intent",
        "client_secret": format!("{id}_secret_x"),
        "status": "requires_payment_method",
        "amount": amount,
        "amount_received": 0,
        "metadata": {"transaction_code": code}
    }))
    .into_response()
}

async fn fake_search(
    State(fake): State<FakeStripe>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    if unauthorized(&headers) {
        return auth_error();
    }
    let query = params.get("query").map_or("", String::as_str);
    let code = query
        .strip_prefix("metadata['transaction_code']:'")
        .and_then(|rest| rest.strip_suffix('\''))
        .unwrap_or_default();
    let data: Vec<Value> = fake
        .intent_for(code)
        .map(|intent| {
            json!({
                "id": intent.id,
                "status": "succeeded",
                "amount": intent.amount,
                "amount_received": intent.amount,
                "metadata": {"transaction_code": code}
            })
        })
        .into_iter()
        .collect();
    Json(json!({"object": "search_result", "data": data, "has_more": false})).into_response()
}

async fn fake_refund(
    State(fake): State<FakeStripe>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> axum::response::Response {
    if unauthorized(&headers) {
        return auth_error();
    }
    if !form
        .get("payment_intent")
        .is_some_and(|id| id.starts_with("pi_"))
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"message": "No such payment_intent"}})),
        )
            .into_response();
    }
    let n = fake.refunds.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({"id": format!("re_{n}"), "status": fake.refund_status})).into_response()
}

fn stripe_config(processor: SocketAddr) -> StripeConfig {
    StripeConfig {
        secret_key: Secret::from(SECRET_KEY),
        webhook_secret: Secret::from(WEBHOOK_SECRET),
        api_base: format!("http://{processor}"),
        currency: "usd".to_string(),
        timeout: Duration::from_millis(500),
        limits: AmountLimits {
            min: 50,
            max: 99_999_999,
        },
        signature_tolerance: Duration::from_secs(300),
    }
}

/// Wallet side is never called here; it points at a closed port.
fn zalopay_config() -> ZaloPayConfig {
    ZaloPayConfig {
        app_id: "2554".to_string(),
        outbound_key: Secret::from("sdngKKJmqEMzvh5QQcdD2A9XBSKUNaYn"),
        inbound_key: Secret::from("trMrHtvjo6myautxDUiAcYsVtaeQ8nhf"),
        create_endpoint: "http://127.0.0.1:9/v2/create".to_string(),
        query_endpoint: "http://127.0.0.1:9/v2/query".to_string(),
        refund_endpoint: "http://127.0.0.1:9/v2/refund".to_string(),
        callback_url: "http://localhost:3000/api/zalopay/callback".to_string(),
        merchant_info: "Charity Donation Platform".to_string(),
        timeout: Duration::from_millis(300),
        limits: AmountLimits {
            min: 1_000,
            max: 5_000_000,
        },
        currency: "VND".to_string(),
    }
}

async fn card_app(refund_status: &'static str) -> (Router, AppState, FakeStripe) {
    let fake = FakeStripe::new(refund_status);
    let addr = fake.spawn().await;
    let (Ok(zalopay), Ok(stripe)) = (
        ZaloPayClient::new(zalopay_config()),
        StripeClient::new(stripe_config(addr)),
    ) else {
        panic!("clients build");
    };
    let state = AppState::new(
        LedgerBackend::Memory(MemoryLedger::new()),
        zalopay,
        Some(stripe),
        EventBus::new(64),
        Some(Secret::from(OPERATOR_TOKEN)),
    );
    let app = api::app(state.clone(), Duration::from_secs(5));
    (app, state, fake)
}

async fn read(request: Request<Body>, app: &Router) -> (StatusCode, Value) {
    let Ok(response) = app.clone().oneshot(request).await else {
        panic!("router is infallible");
    };
    let status = response.status();
    let Ok(bytes) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
        panic!("body readable");
    };
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let Ok(request) = builder.body(body) else {
        panic!("request builds");
    };
    read(request, app).await
}

fn intent_event(event_type: &str, code: &str, intent: &Intent, received: u64) -> String {
    let status = if received > 0 {
        "succeeded"
    } else {
        "requires_payment_method"
    };
    json!({
        "id": format!("evt_{event_type}"),
        "type": event_type,
        "data": {"object": {
            "id": intent.id,
            "status": status,
            "amount": intent.amount,
            "amount_received": received,
            "metadata": {"transaction_code": code},
            "last_payment_error": {"message": "Your card was declined."},
            "cancellation_reason": "abandoned"
        }}
    })
    .to_string()
}

async fn deliver(app: &Router, event: String, secret: &str) -> StatusCode {
    let timestamp = Utc::now().timestamp();
    let Ok(tag) = hmac_sha256_hex(secret, &format!("{timestamp}.{event}")) else {
        panic!("key refused");
    };
    let Ok(request) = Request::builder()
        .method("POST")
        .uri("/api/stripe/webhook")
        .header("content-type", "application/json")
        .header("stripe-signature", format!("t={timestamp},v1={tag}"))
        .body(Body::from(event))
    else {
        panic!("request builds");
    };
    let (status, ack) = read(request, app).await;
    if status == StatusCode::OK {
        assert_eq!(ack, json!({"received": true}));
    }
    status
}

async fn create_campaign(app: &Router) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/campaigns",
        Some(json!({
            "name": "School meals Dien Bien",
            "target_amount": 500_000,
            "status": "active"
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let Some(id) = body["id"].as_str() else {
        panic!("campaign id missing: {body}");
    };
    id.to_string()
}

/// Opens a card payment and returns its transaction code and donation id.
async fn open_intent(app: &Router, campaign_id: &str, amount: u64) -> (String, String) {
    let (status, body) = send(
        app,
        "POST",
        "/api/stripe/create-payment-intent",
        Some(json!({
            "amount": amount,
            "donor_id": "card-donor-7",
            "campaign_id": campaign_id,
            "donor_name": "Tran Thi B"
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(
        body["client_secret"]
            .as_str()
            .is_some_and(|s| s.ends_with("_secret_x"))
    );
    let (Some(code), Some(id)) = (
        body["transaction_code"].as_str(),
        body["donation_id"].as_str(),
    ) else {
        panic!("intent response incomplete: {body}");
    };
    (code.to_string(), id.to_string())
}

async fn donation(app: &Router, code: &str) -> Value {
    let (status, body) = send(app, "GET", &format!("/api/zalopay/donation/{code}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    body["donation"].clone()
}

async fn campaign_total(app: &Router, campaign_id: &str) -> Value {
    let (status, body) = send(app, "GET", &format!("/api/campaigns/{campaign_id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    body["current_total"].clone()
}

fn known_intent(fake: &FakeStripe, code: &str) -> Intent {
    let Some(intent) = fake.intent_for(code) else {
        panic!("processor never saw {code}");
    };
    intent
}

#[tokio::test]
async fn payment_intent_records_a_pending_card_donation() {
    let (app, _state, fake) = card_app("succeeded").await;
    let campaign_id = create_campaign(&app).await;
    let (code, donation_id) = open_intent(&app, &campaign_id, 2_500).await;

    let intent = known_intent(&fake, &code);
    assert_eq!(intent.id, "pi_1");
    assert_eq!(intent.amount, 2_500);

    let record = donation(&app, &code).await;
    assert_eq!(record["id"], donation_id.as_str());
    assert_eq!(record["status"], "PENDING");
    assert_eq!(record["payment_method"], "STRIPE");
    assert_eq!(campaign_total(&app, &campaign_id).await, 0);

    let (status, _) = send(
        &app,
        "POST",
        "/api/stripe/create-payment-intent",
        Some(json!({
            "amount": 49,
            "donor_id": "card-donor-7",
            "campaign_id": campaign_id,
            "donor_name": "Tran Thi B"
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn signed_webhook_credits_once_across_redelivery() {
    let (app, _state, fake) = card_app("succeeded").await;
    let campaign_id = create_campaign(&app).await;
    let (code, _) = open_intent(&app, &campaign_id, 2_500).await;
    let intent = known_intent(&fake, &code);
    let event = intent_event("payment_intent.succeeded", &code, &intent, 2_500);

    assert_eq!(
        deliver(&app, event.clone(), "whsec_forged").await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(campaign_total(&app, &campaign_id).await, 0);

    assert_eq!(deliver(&app, event.clone(), WEBHOOK_SECRET).await, StatusCode::OK);
    assert_eq!(deliver(&app, event, WEBHOOK_SECRET).await, StatusCode::OK);

    let record = donation(&app, &code).await;
    assert_eq!(record["status"], "SUCCESSFUL");
    assert_eq!(record["gateway_transaction_id"], "pi_1");
    assert_eq!(campaign_total(&app, &campaign_id).await, 2_500);
}

#[tokio::test]
async fn declined_attempt_then_success_is_credited() {
    let (app, _state, fake) = card_app("succeeded").await;
    let campaign_id = create_campaign(&app).await;
    let (code, _) = open_intent(&app, &campaign_id, 2_500).await;
    let intent = known_intent(&fake, &code);

    let declined = intent_event("payment_intent.payment_failed", &code, &intent, 0);
    assert_eq!(deliver(&app, declined, WEBHOOK_SECRET).await, StatusCode::OK);
    assert_eq!(donation(&app, &code).await["status"], "PENDING");

    let succeeded = intent_event("payment_intent.succeeded", &code, &intent, 2_500);
    assert_eq!(deliver(&app, succeeded, WEBHOOK_SECRET).await, StatusCode::OK);
    assert_eq!(donation(&app, &code).await["status"], "SUCCESSFUL");
    assert_eq!(campaign_total(&app, &campaign_id).await, 2_500);
}

#[tokio::test]
async fn canceled_intent_fails_the_donation() {
    let (app, _state, fake) = card_app("succeeded").await;
    let campaign_id = create_campaign(&app).await;
    let (code, _) = open_intent(&app, &campaign_id, 2_500).await;
    let intent = known_intent(&fake, &code);

    let canceled = intent_event("payment_intent.canceled", &code, &intent, 0);
    assert_eq!(deliver(&app, canceled, WEBHOOK_SECRET).await, StatusCode::OK);
    assert_eq!(donation(&app, &code).await["status"], "FAILED");

    let late = intent_event("payment_intent.succeeded", &code, &intent, 2_500);
    assert_eq!(deliver(&app, late, WEBHOOK_SECRET).await, StatusCode::OK);
    assert_eq!(donation(&app, &code).await["status"], "FAILED");
    assert_eq!(campaign_total(&app, &campaign_id).await, 0);
}

/// Pays a fresh intent, then asks the operator route to refund it.
async fn pay_then_refund(
    refund_status: &'static str,
) -> (Router, FakeStripe, String, String, StatusCode) {
    let (app, _state, fake) = card_app(refund_status).await;
    let campaign_id = create_campaign(&app).await;
    let (code, donation_id) = open_intent(&app, &campaign_id, 4_000).await;
    let intent = known_intent(&fake, &code);
    let paid = intent_event("payment_intent.succeeded", &code, &intent, 4_000);
    assert_eq!(deliver(&app, paid, WEBHOOK_SECRET).await, StatusCode::OK);
    assert_eq!(campaign_total(&app, &campaign_id).await, 4_000);

    let (status, _) = send(
        &app,
        "PATCH",
        &format!("/api/zalopay/donation/{donation_id}/status"),
        Some(json!({"status": "REFUNDED"})),
        Some(OPERATOR_TOKEN),
    )
    .await;
    (app, fake, campaign_id, code, status)
}

#[tokio::test]
async fn confirmed_refunds_debit_the_campaign() {
    for refund_status in ["succeeded", "pending"] {
        let (app, fake, campaign_id, code, status) = pay_then_refund(refund_status).await;
        assert_eq!(status, StatusCode::OK, "refund status {refund_status}");
        assert_eq!(fake.refunds.load(Ordering::SeqCst), 1);
        assert_eq!(donation(&app, &code).await["status"], "REFUNDED");
        assert_eq!(campaign_total(&app, &campaign_id).await, 0);
    }
}

#[tokio::test]
async fn unconfirmed_refund_keeps_the_donation_successful() {
    let (app, fake, campaign_id, code, status) = pay_then_refund("failed").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(fake.refunds.load(Ordering::SeqCst), 1);
    assert_eq!(donation(&app, &code).await["status"], "SUCCESSFUL");
    assert_eq!(campaign_total(&app, &campaign_id).await, 4_000);

    let (status, audit) = send(
        &app,
        "GET",
        &format!("/api/campaigns/{campaign_id}/audit"),
        None,
        Some(OPERATOR_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(audit["consistent"], true);
}

#[tokio::test]
async fn status_query_searches_by_transaction_code() {
    let (app, state, _fake) = card_app("succeeded").await;
    let campaign_id = create_campaign(&app).await;
    let (code, _) = open_intent(&app, &campaign_id, 2_500).await;
    let Ok(ledger) = state.stripe() else {
        panic!("card ledger configured");
    };

    let Ok(view) = ledger.query_status(&code).await else {
        panic!("query failed");
    };
    assert!(view.gateway.is_paid);
    assert_eq!(view.gateway.gateway_transaction_id.as_deref(), Some("pi_1"));
    assert_eq!(view.gateway.amount, Some(2_500));
    let Some(local) = view.donation else {
        panic!("local donation missing from the view");
    };
    assert_eq!(local.transaction_code, code);

    let Ok(missing) = ledger.query_status("241017_0000000000000000").await else {
        panic!("empty search must not fail");
    };
    assert_eq!(missing.gateway.return_code, -1);
    assert!(!missing.gateway.is_paid);
    assert!(!missing.gateway.is_processing);
    assert!(missing.donation.is_none());

    assert!(ledger.query_status("x' OR status:'succeeded").await.is_err());
}

//! In-process integration harness for the Duka API.
//!
//! [`TestApp::spawn`] boots the real router over a fresh in-memory
//! database on an ephemeral port, with the payment gateway swapped for
//! [`StubDaraja`]: a local server speaking Daraja's OAuth, STK push,
//! and status query wire format. Outcomes are scripted per request, so
//! a test can walk a payment through push, poll, and callback with no
//! network access and no sandbox credentials.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p duka-integration-tests
//! ```
//!
//! Everything is hermetic; no external services are required.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use url::Url;

use duka_server::config::{MpesaConfig, ServerConfig};
use duka_server::state::AppState;
use duka_server::{db, routes};

/// Staff id stamped on mutating requests by [`TestApp::post`].
pub const STAFF_ID: &str = "1";

// ============================================================================
// Stub Daraja gateway
// ============================================================================

/// Scripted outcome for the next `stkpush/v1/processrequest` call.
#[derive(Debug, Clone)]
pub enum PushOutcome {
    /// Accept the push and mint a fresh checkout request id.
    Accept,
    /// Answer with the given HTTP status and raw body.
    Reject { status: u16, body: String },
}

/// Scripted outcome for the next `stkpushquery/v1/query` call.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    /// A resolved push, with `ResultCode`/`ResultDesc` as Daraja sends
    /// them (the code is a string on this endpoint).
    Result { code: String, desc: String },
    /// The push has not resolved on the handset yet; served as the
    /// gateway's `500.001.1001` error response.
    Processing,
}

#[derive(Default)]
struct StubState {
    push_outcomes: Mutex<VecDeque<PushOutcome>>,
    query_outcomes: Mutex<VecDeque<QueryOutcome>>,
    push_count: AtomicUsize,
    query_count: AtomicUsize,
    serial: AtomicUsize,
}

/// A local stand-in for the Daraja gateway.
///
/// Unscripted pushes are accepted and unscripted queries report
/// still-processing, so tests only script the calls they care about.
/// The request counters let a test prove that a code path never
/// reached the gateway at all.
pub struct StubDaraja {
    state: Arc<StubState>,
    base_url: Url,
}

impl StubDaraja {
    /// Bind the stub on an ephemeral local port.
    pub async fn spawn() -> Self {
        let state = Arc::new(StubState::default());
        let app = Router::new()
            .route("/oauth/v1/generate", get(oauth_token))
            .route("/mpesa/stkpush/v1/processrequest", post(stk_push))
            .route("/mpesa/stkpushquery/v1/query", post(stk_query))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub gateway");
        let addr = listener.local_addr().expect("stub gateway address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("stub gateway failed");
        });

        let base_url = Url::parse(&format!("http://{addr}/")).expect("stub gateway url");
        Self { state, base_url }
    }

    /// Base URL to point the server's gateway client at.
    #[must_use]
    pub fn base_url(&self) -> Url {
        self.base_url.clone()
    }

    /// Queue the outcome for the next STK push.
    pub fn script_push(&self, outcome: PushOutcome) {
        self.state
            .push_outcomes
            .lock()
            .expect("stub state poisoned")
            .push_back(outcome);
    }

    /// Queue the outcome for the next status query.
    pub fn script_query(&self, outcome: QueryOutcome) {
        self.state
            .query_outcomes
            .lock()
            .expect("stub state poisoned")
            .push_back(outcome);
    }

    /// STK pushes served so far.
    #[must_use]
    pub fn push_count(&self) -> usize {
        self.state.push_count.load(Ordering::SeqCst)
    }

    /// Status queries served so far.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.state.query_count.load(Ordering::SeqCst)
    }
}

async fn oauth_token() -> Json<Value> {
    // Daraja reports the expiry in seconds, as a string.
    Json(json!({"access_token": "stub-access-token", "expires_in": "3599"}))
}

async fn stk_push(State(state): State<Arc<StubState>>) -> Response {
    state.push_count.fetch_add(1, Ordering::SeqCst);
    let outcome = state
        .push_outcomes
        .lock()
        .expect("stub state poisoned")
        .pop_front()
        .unwrap_or(PushOutcome::Accept);
    match outcome {
        PushOutcome::Accept => {
            let n = state.serial.fetch_add(1, Ordering::SeqCst) + 1;
            Json(json!({
                "MerchantRequestID": format!("stub-merchant-{n}"),
                "CheckoutRequestID": format!("ws_CO_stub_{n:05}"),
                "ResponseCode": "0",
                "ResponseDescription": "Success. Request accepted for processing",
                "CustomerMessage": "Success. Request accepted for processing",
            }))
            .into_response()
        }
        PushOutcome::Reject { status, body } => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST),
            body,
        )
            .into_response(),
    }
}

async fn stk_query(State(state): State<Arc<StubState>>) -> Response {
    state.query_count.fetch_add(1, Ordering::SeqCst);
    let outcome = state
        .query_outcomes
        .lock()
        .expect("stub state poisoned")
        .pop_front()
        .unwrap_or(QueryOutcome::Processing);
    match outcome {
        QueryOutcome::Result { code, desc } => Json(json!({
            "ResponseCode": "0",
            "ResponseDescription": "The service request has been accepted successfully",
            "ResultCode": code,
            "ResultDesc": desc,
        }))
        .into_response(),
        QueryOutcome::Processing => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({
                "requestId": "stub-req-1",
                "errorCode": "500.001.1001",
                "errorMessage": "The transaction is being processed",
            })
            .to_string(),
        )
            .into_response(),
    }
}

// ============================================================================
// Test application
// ============================================================================

/// A running Duka server over a fresh in-memory database, with its
/// gateway client pointed at a [`StubDaraja`].
pub struct TestApp {
    /// Base address of the running server, e.g. `http://127.0.0.1:41234`.
    pub address: String,
    /// Plain HTTP client for requests against [`Self::address`].
    pub client: reqwest::Client,
    /// The stub gateway backing this server's M-Pesa calls.
    pub daraja: StubDaraja,
}

impl TestApp {
    /// Bring up the full stack: migrated in-memory database, stub
    /// gateway, and the real router on an ephemeral port.
    pub async fn spawn() -> Self {
        let daraja = StubDaraja::spawn().await;

        let database_url = SecretString::from("sqlite::memory:");
        let pool = db::create_pool(&database_url).await.expect("create pool");
        db::MIGRATOR.run(&pool).await.expect("run migrations");

        let config = ServerConfig {
            database_url,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            mpesa: MpesaConfig {
                base_url: daraja.base_url(),
                consumer_key: "stub-consumer-key".to_owned(),
                consumer_secret: SecretString::from("stub-consumer-secret"),
                short_code: "174379".to_owned(),
                passkey: SecretString::from("stub-passkey"),
                callback_url: Url::parse("http://127.0.0.1:3000/api/payments/mpesa/callback")
                    .expect("callback url"),
            },
            sentry_dsn: None,
            sentry_environment: None,
        };

        let state = AppState::new(config, pool).expect("build app state");
        let app = routes::routes().with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind server");
        let addr = listener.local_addr().expect("server address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server failed");
        });

        Self {
            address: format!("http://{addr}"),
            client: reqwest::Client::new(),
            daraja,
        }
    }

    /// GET a path.
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.address))
            .send()
            .await
            .expect("request failed")
    }

    /// POST a JSON body with the staff header set.
    pub async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.address))
            .header("X-Staff-Id", STAFF_ID)
            .json(body)
            .send()
            .await
            .expect("request failed")
    }

    /// POST a raw body with no staff header, the way the gateway calls
    /// the callback route.
    pub async fn post_raw(&self, path: &str, body: String) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.address))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .expect("request failed")
    }

    // ------------------------------------------------------------------
    // Seeding helpers
    // ------------------------------------------------------------------

    /// Create a product with 16% VAT and the given opening stock;
    /// returns its JSON representation.
    pub async fn seed_product(&self, sku: &str, price: &str, stock: i64) -> Value {
        let response = self
            .post(
                "/api/products",
                &json!({
                    "name": format!("Product {sku}"),
                    "sku": sku,
                    "price": price,
                    "tax_rate": "16",
                    "initial_stock": stock,
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        read_json(response).await
    }

    /// Create a customer; returns its JSON representation.
    pub async fn seed_customer(&self, name: &str, phone: &str, credit_limit: &str) -> Value {
        let response = self
            .post(
                "/api/customers",
                &json!({
                    "name": name,
                    "phone": phone,
                    "credit_limit": credit_limit,
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        read_json(response).await
    }

    /// Current stock level of a product, read back over the API.
    pub async fn stock_of(&self, product_id: i64) -> i64 {
        let response = self.get(&format!("/api/products/{product_id}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        read_json(response).await["current_stock"]
            .as_i64()
            .expect("current_stock")
    }

    /// Run an STK push through the stub and the success callback so a
    /// settled transaction is available for checkout. Returns the
    /// checkout request id.
    pub async fn settled_mpesa_payment(&self, phone: &str, amount: &str, reference: &str) -> String {
        let response = self
            .post(
                "/api/payments/mpesa/initiate",
                &json!({"phone": phone, "amount": amount, "reference": reference}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let checkout_request_id = read_json(response).await["checkout_request_id"]
            .as_str()
            .expect("checkout_request_id")
            .to_owned();

        let response = self
            .post_raw(
                "/api/payments/mpesa/callback",
                success_callback(&checkout_request_id, "NLJ7RT61SV").to_string(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        checkout_request_id
    }
}

// ============================================================================
// Free helpers
// ============================================================================

/// Decode a response body as JSON.
pub async fn read_json(response: reqwest::Response) -> Value {
    response.json().await.expect("JSON body")
}

/// Parse a string-serialized money field for value comparison, so
/// `"28.8"` and `"28.80"` compare equal.
#[must_use]
pub fn money(value: &Value) -> Decimal {
    let text = value.as_str().unwrap_or_else(|| panic!("not a money string: {value}"));
    Decimal::from_str_exact(text).unwrap_or_else(|_| panic!("unparseable amount: {text}"))
}

/// Shorthand for a decimal literal in assertions.
#[must_use]
pub fn dec(text: &str) -> Decimal {
    Decimal::from_str_exact(text).unwrap_or_else(|_| panic!("unparseable amount: {text}"))
}

/// A Daraja success callback envelope for the given transaction.
#[must_use]
pub fn success_callback(checkout_request_id: &str, receipt: &str) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "stub-merchant-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        {"Name": "Amount", "Value": 500.0},
                        {"Name": "MpesaReceiptNumber", "Value": receipt},
                        {"Name": "TransactionDate", "Value": 20260820134512_i64},
                        {"Name": "PhoneNumber", "Value": 254712345678_i64}
                    ]
                }
            }
        }
    })
}

/// A Daraja failure callback envelope for the given transaction.
#[must_use]
pub fn failure_callback(checkout_request_id: &str, result_code: i64, desc: &str) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "stub-merchant-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": result_code,
                "ResultDesc": desc,
            }
        }
    })
}

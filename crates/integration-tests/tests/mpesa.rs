//! STK push initiation, polling, and callback settlement against the
//! stub gateway.
//!
//! Run with: cargo test -p duka-integration-tests

use duka_integration_tests::{
    PushOutcome, QueryOutcome, TestApp, dec, failure_callback, money, read_json, success_callback,
};
use reqwest::StatusCode;
use serde_json::{Value, json};

async fn initiate(app: &TestApp, phone: &str, amount: &str, reference: &str) -> Value {
    let response = app
        .post(
            "/api/payments/mpesa/initiate",
            &json!({"phone": phone, "amount": amount, "reference": reference}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    read_json(response).await
}

async fn status_of(app: &TestApp, checkout_request_id: &str) -> Value {
    let response = app
        .get(&format!("/api/payments/mpesa/{checkout_request_id}"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    read_json(response).await
}

// ============================================================================
// Initiation
// ============================================================================

#[tokio::test]
async fn initiate_records_a_pending_transaction() {
    let app = TestApp::spawn().await;

    let transaction = initiate(&app, "0712 345 678", "500", "POS-1").await;
    assert_eq!(transaction["checkout_request_id"], "ws_CO_stub_00001");
    assert_eq!(transaction["merchant_request_id"], "stub-merchant-1");
    assert_eq!(transaction["phone_number"], "254712345678");
    assert_eq!(money(&transaction["amount"]), dec("500"));
    assert_eq!(transaction["account_reference"], "POS-1");
    assert_eq!(transaction["status"], "pending");
    assert!(transaction["mpesa_receipt_number"].is_null());
    assert!(transaction["sale_id"].is_null());

    assert_eq!(app.daraja.push_count(), 1);
}

#[tokio::test]
async fn invalid_pushes_never_reach_the_gateway() {
    let app = TestApp::spawn().await;

    for body in [
        json!({"phone": "0712345678", "amount": "0.50", "reference": "POS-1"}),
        json!({"phone": "12345", "amount": "500", "reference": "POS-1"}),
        json!({"phone": "0712345678", "amount": "500", "reference": "  "}),
    ] {
        let response = app.post("/api/payments/mpesa/initiate", &body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error = read_json(response).await;
        assert_eq!(error["error"]["code"], "validation_error");
    }

    assert_eq!(app.daraja.push_count(), 0);
}

#[tokio::test]
async fn a_live_reference_cannot_be_pushed_twice() {
    let app = TestApp::spawn().await;
    initiate(&app, "0712345678", "500", "POS-1").await;

    // Different phone, same reference: refused before the gateway.
    let response = app
        .post(
            "/api/payments/mpesa/initiate",
            &json!({"phone": "0733987654", "amount": "500", "reference": "POS-1"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let error = read_json(response).await;
    assert_eq!(error["error"]["code"], "duplicate");
    assert_eq!(app.daraja.push_count(), 1);
}

#[tokio::test]
async fn pushes_are_rate_limited_per_phone() {
    let app = TestApp::spawn().await;

    for n in 1..=3 {
        initiate(&app, "0712345678", "500", &format!("POS-{n}")).await;
    }

    let response = app
        .post(
            "/api/payments/mpesa/initiate",
            &json!({"phone": "0712345678", "amount": "500", "reference": "POS-4"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let error = read_json(response).await;
    assert_eq!(error["error"]["code"], "rate_limited");
    assert_eq!(app.daraja.push_count(), 3);

    // A different phone is unaffected.
    initiate(&app, "0733987654", "500", "POS-5").await;
}

#[tokio::test]
async fn gateway_rejection_maps_to_bad_gateway() {
    let app = TestApp::spawn().await;
    app.daraja.script_push(PushOutcome::Reject {
        status: 400,
        body: json!({
            "requestId": "stub-req-7",
            "errorCode": "400.002.02",
            "errorMessage": "Bad Request - Invalid Amount",
        })
        .to_string(),
    });

    let response = app
        .post(
            "/api/payments/mpesa/initiate",
            &json!({"phone": "0712345678", "amount": "500", "reference": "POS-1"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let error = read_json(response).await;
    assert_eq!(error["error"]["code"], "gateway_error");
}

// ============================================================================
// Callbacks
// ============================================================================

#[tokio::test]
async fn success_callback_settles_and_short_circuits_polling() {
    let app = TestApp::spawn().await;
    let transaction = initiate(&app, "0712345678", "500", "POS-1").await;
    let id = transaction["checkout_request_id"].as_str().expect("id");

    let response = app
        .post_raw(
            "/api/payments/mpesa/callback",
            success_callback(id, "NLJ7RT61SV").to_string(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = read_json(response).await;
    assert_eq!(ack["ResultCode"], 0);
    assert_eq!(ack["ResultDesc"], "Accepted");

    let view = status_of(&app, id).await;
    assert_eq!(view["status"], "success");
    assert_eq!(view["mpesa_receipt_number"], "NLJ7RT61SV");
    assert_eq!(view["result_code"], 0);
    assert!(view["transaction_date"].is_string());

    // Terminal records never hit the gateway again.
    status_of(&app, id).await;
    assert_eq!(app.daraja.query_count(), 0);
}

#[tokio::test]
async fn late_failure_callback_cannot_overwrite_success() {
    let app = TestApp::spawn().await;
    let transaction = initiate(&app, "0712345678", "500", "POS-1").await;
    let id = transaction["checkout_request_id"].as_str().expect("id");

    app.post_raw(
        "/api/payments/mpesa/callback",
        success_callback(id, "NLJ7RT61SV").to_string(),
    )
    .await;
    let response = app
        .post_raw(
            "/api/payments/mpesa/callback",
            failure_callback(id, 1032, "Request cancelled by user").to_string(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let view = status_of(&app, id).await;
    assert_eq!(view["status"], "success");
    assert_eq!(view["mpesa_receipt_number"], "NLJ7RT61SV");
    assert_eq!(view["result_code"], 0);
}

#[tokio::test]
async fn unknown_and_unparseable_callbacks_are_acknowledged() {
    let app = TestApp::spawn().await;

    let response = app
        .post_raw(
            "/api/payments/mpesa/callback",
            failure_callback("ws_CO_unknown", 1, "Insufficient balance").to_string(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = read_json(response).await;
    assert_eq!(ack["ResultCode"], 0);

    // Garbage still gets a 200 so the gateway stops retrying.
    let response = app
        .post_raw("/api/payments/mpesa/callback", "not json at all".to_owned())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let ack = read_json(response).await;
    assert_eq!(ack["ResultDesc"], "Accepted");
}

// ============================================================================
// Polling
// ============================================================================

#[tokio::test]
async fn polling_a_pending_push_is_cooled_down() {
    let app = TestApp::spawn().await;
    let transaction = initiate(&app, "0712345678", "500", "POS-1").await;
    let id = transaction["checkout_request_id"].as_str().expect("id");

    // First poll claims the slot; the unscripted stub answers
    // still-processing, so the record stays pending.
    let view = status_of(&app, id).await;
    assert_eq!(view["status"], "pending");
    assert_eq!(view["retry_count"], 1);
    assert_eq!(app.daraja.query_count(), 1);

    // A second poll inside the window is served from the record.
    let view = status_of(&app, id).await;
    assert_eq!(view["status"], "pending");
    assert_eq!(view["retry_count"], 1);
    assert_eq!(app.daraja.query_count(), 1);
}

#[tokio::test]
async fn poll_applies_a_cancellation() {
    let app = TestApp::spawn().await;
    let transaction = initiate(&app, "0712345678", "500", "POS-1").await;
    let id = transaction["checkout_request_id"].as_str().expect("id");

    app.daraja.script_query(QueryOutcome::Result {
        code: "1032".to_owned(),
        desc: "Request cancelled by user".to_owned(),
    });

    let view = status_of(&app, id).await;
    assert_eq!(view["status"], "cancelled");
    assert_eq!(view["result_code"], 1032);
    assert_eq!(view["result_desc"], "Request cancelled by user");
    assert!(view["mpesa_receipt_number"].is_null());

    // Now terminal: no further gateway traffic.
    status_of(&app, id).await;
    assert_eq!(app.daraja.query_count(), 1);
}

#[tokio::test]
async fn poll_observed_success_is_only_a_hint() {
    let app = TestApp::spawn().await;
    let transaction = initiate(&app, "0712345678", "500", "POS-1").await;
    let id = transaction["checkout_request_id"].as_str().expect("id");

    app.daraja.script_query(QueryOutcome::Result {
        code: "0".to_owned(),
        desc: "The service request is processed successfully.".to_owned(),
    });

    // The record stays pending; the receipt must come from the callback.
    let view = status_of(&app, id).await;
    assert_eq!(view["status"], "pending");
    assert_eq!(view["gateway_hint"], "success");
    assert!(view["mpesa_receipt_number"].is_null());

    app.post_raw(
        "/api/payments/mpesa/callback",
        success_callback(id, "NLJ7RT61SV").to_string(),
    )
    .await;
    let view = status_of(&app, id).await;
    assert_eq!(view["status"], "success");
    assert_eq!(view["mpesa_receipt_number"], "NLJ7RT61SV");
    assert!(view.get("gateway_hint").is_none());
}

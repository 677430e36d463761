//! M-Pesa STK push handlers.
//!
//! The callback route is the one surface Daraja itself calls. It must
//! answer 200 with an acknowledgement body no matter what arrives,
//! otherwise the gateway retries and can wedge the shortcode queue, so
//! it parses the body by hand instead of letting the JSON extractor
//! reject malformed payloads with a 400.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use duka_core::mpesa::CallbackEnvelope;

use crate::error::AppError;
use crate::middleware::Actor;
use crate::models::mpesa::{InitiateStkInput, MpesaTransaction};
use crate::services::reconciliation::{MpesaService, PaymentStatusView};
use crate::state::AppState;

/// Build the payments router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/initiate", post(initiate))
        .route("/callback", post(callback))
        .route("/{checkout_request_id}", get(status))
}

/// Acknowledgement body Daraja expects from a callback receiver.
#[derive(Debug, Serialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: &'static str,
}

impl CallbackAck {
    const ACCEPTED: Self = Self {
        result_code: 0,
        result_desc: "Accepted",
    };
}

/// Send an STK push to the customer's phone.
///
/// # Errors
///
/// Returns 400 for a bad phone or amount, 409 when the reference already
/// has a live transaction, 429 when the phone is rate limited, 502 when
/// Daraja rejects the push.
pub async fn initiate(
    Actor(staff): Actor,
    State(state): State<AppState>,
    Json(input): Json<InitiateStkInput>,
) -> Result<(StatusCode, Json<MpesaTransaction>), AppError> {
    let transaction = MpesaService::initiate(
        state.pool(),
        state.daraja(),
        state.limiter(),
        staff,
        &input,
        Utc::now(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

/// Fetch a transaction, polling Daraja when it is still pending.
///
/// # Errors
///
/// Returns 404 for an unknown checkout request ID, 502 when a poll was
/// made and Daraja failed it.
pub async fn status(
    State(state): State<AppState>,
    Path(checkout_request_id): Path<String>,
) -> Result<Json<PaymentStatusView>, AppError> {
    let view =
        MpesaService::status(state.pool(), state.daraja(), &checkout_request_id, Utc::now())
            .await?;
    Ok(Json(view))
}

/// Receive the asynchronous settlement callback from Daraja.
///
/// Always answers 200 with the acknowledgement body. Malformed payloads
/// and internal failures are logged and swallowed; Daraja gets nothing
/// actionable from an error status.
pub async fn callback(State(state): State<AppState>, body: Bytes) -> Json<CallbackAck> {
    match serde_json::from_slice::<CallbackEnvelope>(&body) {
        Ok(envelope) => {
            if let Err(error) = MpesaService::handle_callback(state.pool(), &envelope, Utc::now())
                .await
            {
                tracing::error!(%error, "m-pesa callback processing failed");
            }
        }
        Err(error) => {
            tracing::warn!(%error, "unparseable m-pesa callback dropped");
        }
    }
    Json(CallbackAck::ACCEPTED)
}

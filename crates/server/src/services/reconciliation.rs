//! M-Pesa STK push reconciliation.
//!
//! The lifecycle is `pending → success | failed | cancelled`, driven by
//! two independent paths that may race: the gateway callback and client
//! polling. Both settle through the same conditional from-pending
//! transition, so terminal states stick and receipts are never
//! overwritten. The poll path deliberately never writes `success`: the
//! callback is the only source of receipt numbers, and a poll-observed
//! success is surfaced to the client as a hint on the still-pending
//! record.

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use duka_core::StaffId;
use duka_core::mpesa::{CallbackEnvelope, status_for_result_code};
use duka_core::types::{Money, MpesaStatus, PhoneNumber};

use crate::db::RepositoryError;
use crate::db::mpesa::{MpesaRepository, NewMpesaTransaction};
use crate::error::AppError;
use crate::models::mpesa::{InitiateStkInput, MpesaTransaction};
use crate::services::daraja::{DarajaClient, DarajaError};
use crate::services::limiter::AttemptLimiter;

/// STK pushes allowed per phone within [`INITIATE_WINDOW`].
const INITIATE_ATTEMPTS: usize = 3;
/// Sliding window for the per-phone initiation limit.
const INITIATE_WINDOW: Duration = Duration::from_secs(60);
/// Minimum seconds between upstream status queries per transaction.
const POLL_COOLDOWN_SECS: i64 = 5;
/// Daraja error code for a push that has not resolved yet.
const STILL_PROCESSING: &str = "500.001.1001";

/// A transaction as served to pollers, with an optional gateway-observed
/// status that the record does not reflect yet.
#[derive(Debug, Serialize)]
pub struct PaymentStatusView {
    #[serde(flatten)]
    pub transaction: MpesaTransaction,
    /// Set when polling saw an upstream success before the callback
    /// arrived; the record stays `pending` until the callback confirms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_hint: Option<MpesaStatus>,
}

/// Orchestrates STK push initiation, polling, and callback settlement.
pub struct MpesaService;

impl MpesaService {
    /// Send an STK push and record the pending transaction.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for a malformed phone or an
    /// amount under one shilling, [`AppError::RateLimited`] when the
    /// phone exhausted its attempt window, [`AppError::Duplicate`] when
    /// the account reference already has a live transaction, and
    /// [`AppError::Gateway`] when Daraja rejects the push.
    pub async fn initiate(
        pool: &SqlitePool,
        daraja: &DarajaClient,
        limiter: &dyn AttemptLimiter,
        actor: StaffId,
        input: &InitiateStkInput,
        now: DateTime<Utc>,
    ) -> Result<MpesaTransaction, AppError> {
        if input.amount < Money::from_major(1) {
            return Err(AppError::Validation(format!(
                "amount must be at least 1 KES, got {}",
                input.amount
            )));
        }
        if input.reference.trim().is_empty() {
            return Err(AppError::Validation(
                "an account reference is required".to_owned(),
            ));
        }
        let phone = PhoneNumber::parse(&input.phone)
            .map_err(|e| AppError::Validation(e.to_string()))?;

        if !limiter.allow(phone.as_str(), INITIATE_ATTEMPTS, INITIATE_WINDOW) {
            return Err(AppError::RateLimited(format!(
                "too many payment attempts for {phone}; wait a minute and retry"
            )));
        }

        let repo = MpesaRepository::new(pool);
        // Friendly pre-check; the partial unique index is the real guard.
        if repo.has_live_reference(&input.reference).await? {
            return Err(AppError::Duplicate(format!(
                "a live transaction already exists for reference '{}'",
                input.reference
            )));
        }

        let description = input
            .description
            .clone()
            .unwrap_or_else(|| "POS payment".to_owned());
        let push = daraja
            .stk_push(&phone, input.amount, &input.reference, &description)
            .await?;

        let transaction = repo
            .insert(
                &NewMpesaTransaction {
                    checkout_request_id: push.checkout_request_id,
                    merchant_request_id: push.merchant_request_id,
                    phone_number: phone,
                    amount: input.amount,
                    account_reference: input.reference.clone(),
                    transaction_desc: description,
                },
                now,
            )
            .await?;

        tracing::info!(
            checkout_request_id = %transaction.checkout_request_id,
            reference = %transaction.account_reference,
            amount = %transaction.amount,
            staff = %actor,
            "STK push initiated"
        );
        Ok(transaction)
    }

    /// Serve the current state of a transaction, polling the gateway for
    /// pending ones at most once per cooldown window.
    ///
    /// Terminal records are returned without an upstream call. A pending
    /// record first claims the poll slot with a conditional update;
    /// losers get the stored record as-is. The winner queries Daraja and
    /// applies cancellations and failures through the from-pending
    /// transition. An upstream success only sets `gateway_hint`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown id and
    /// [`AppError::Gateway`] when the claimed query fails upstream.
    pub async fn status(
        pool: &SqlitePool,
        daraja: &DarajaClient,
        checkout_request_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentStatusView, AppError> {
        let repo = MpesaRepository::new(pool);
        let transaction = repo
            .get(checkout_request_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("transaction {checkout_request_id} not found"))
            })?;

        if transaction.status.is_terminal() {
            return Ok(PaymentStatusView {
                transaction,
                gateway_hint: None,
            });
        }

        let cutoff = now - ChronoDuration::seconds(POLL_COOLDOWN_SECS);
        let claimed = repo.claim_query_slot(checkout_request_id, cutoff, now).await?;
        if !claimed {
            // Inside the cooldown window (or settled since the read
            // above): serve the stored record without bothering Daraja.
            return Ok(PaymentStatusView {
                transaction,
                gateway_hint: None,
            });
        }

        let query = match daraja.stk_query(checkout_request_id).await {
            Ok(response) => response,
            Err(DarajaError::Api { ref message, .. }) if message.contains(STILL_PROCESSING) => {
                // The push has not resolved on the handset yet.
                return Ok(Self::view(&repo, checkout_request_id, None).await?);
            }
            Err(e) => return Err(e.into()),
        };

        let result_code: i64 = query.result_code.parse().map_err(|_| {
            AppError::Gateway(DarajaError::Parse(format!(
                "non-numeric ResultCode '{}'",
                query.result_code
            )))
        })?;
        let observed = status_for_result_code(result_code);

        let mut gateway_hint = None;
        match observed {
            // Success is the callback's to write; it brings the receipt.
            MpesaStatus::Success => gateway_hint = Some(MpesaStatus::Success),
            MpesaStatus::Cancelled | MpesaStatus::Failed => {
                let applied = repo
                    .transition_from_pending(
                        checkout_request_id,
                        observed,
                        result_code,
                        &query.result_desc,
                        None,
                        None,
                        now,
                    )
                    .await?;
                if !applied {
                    tracing::debug!(
                        checkout_request_id,
                        "poll outcome arrived after settlement; ignored"
                    );
                }
            }
            MpesaStatus::Pending => {}
        }

        Ok(Self::view(&repo, checkout_request_id, gateway_hint).await?)
    }

    /// Settle a transaction from the gateway callback.
    ///
    /// Code 0 settles the payment with the receipt number and completion
    /// time pulled from the metadata items by name; any other code fails
    /// it. Replays and callbacks racing a poll are no-ops against the
    /// conditional transition. Unknown ids are logged and swallowed so
    /// the route can acknowledge regardless.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Database`] on query failure.
    pub async fn handle_callback(
        pool: &SqlitePool,
        envelope: &CallbackEnvelope,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let callback = &envelope.body.stk_callback;
        let repo = MpesaRepository::new(pool);

        let (status, receipt, date) = if callback.succeeded() {
            (
                MpesaStatus::Success,
                callback.receipt_number(),
                callback.transaction_date(),
            )
        } else {
            (MpesaStatus::Failed, None, None)
        };

        let applied = repo
            .transition_from_pending(
                &callback.checkout_request_id,
                status,
                callback.result_code,
                &callback.result_desc,
                receipt.as_deref(),
                date,
                now,
            )
            .await?;

        if applied {
            tracing::info!(
                checkout_request_id = %callback.checkout_request_id,
                status = %status,
                receipt = receipt.as_deref().unwrap_or("-"),
                "callback settled transaction"
            );
        } else if repo.get(&callback.checkout_request_id).await?.is_some() {
            tracing::debug!(
                checkout_request_id = %callback.checkout_request_id,
                "callback replay against settled transaction ignored"
            );
        } else {
            tracing::warn!(
                checkout_request_id = %callback.checkout_request_id,
                "callback for unknown transaction acknowledged and dropped"
            );
        }
        Ok(())
    }

    async fn view(
        repo: &MpesaRepository<'_>,
        checkout_request_id: &str,
        gateway_hint: Option<MpesaStatus>,
    ) -> Result<PaymentStatusView, RepositoryError> {
        let transaction = repo
            .get(checkout_request_id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        Ok(PaymentStatusView {
            transaction,
            gateway_hint,
        })
    }
}

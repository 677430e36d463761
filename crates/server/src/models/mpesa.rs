//! M-Pesa transaction domain models.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use duka_core::{Money, MpesaStatus, PhoneNumber, SaleId};

/// A locally tracked STK push transaction.
///
/// Created `pending` at initiation and resolved exactly once by the
/// gateway callback (success/failed/cancelled) or, for failures only, by
/// the poll path. Terminal rows are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpesaTransaction {
    /// Gateway-issued checkout request ID, unique.
    pub checkout_request_id: String,
    /// Gateway-issued merchant request ID.
    pub merchant_request_id: String,
    /// Paying phone number, canonical form.
    pub phone_number: PhoneNumber,
    /// Amount requested, whole shillings.
    pub amount: Money,
    /// Merchant account reference shown to the payer.
    pub account_reference: String,
    /// Transaction description shown to the payer.
    pub transaction_desc: String,
    /// Reconciliation status.
    pub status: MpesaStatus,
    /// M-Pesa receipt number; set only by a success callback.
    pub mpesa_receipt_number: Option<String>,
    /// Completion time as reported by the gateway.
    pub transaction_date: Option<NaiveDateTime>,
    /// Raw gateway result code, once known.
    pub result_code: Option<i64>,
    /// Raw gateway result description, once known.
    pub result_desc: Option<String>,
    /// Number of upstream status queries performed.
    pub retry_count: i64,
    /// When the last upstream status query ran (poll cooldown).
    pub last_query_at: Option<DateTime<Utc>>,
    /// Sale settled against this transaction; set exactly once.
    pub sale_id: Option<SaleId>,
    /// When the transaction was initiated.
    pub created_at: DateTime<Utc>,
    /// When the transaction was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Input for initiating an STK push.
///
/// The phone arrives as free-form text and is normalized before the
/// gateway call.
#[derive(Debug, Clone, Deserialize)]
pub struct InitiateStkInput {
    /// Customer phone number in any accepted Kenyan format.
    pub phone: String,
    /// Amount to collect, at least 1 KES.
    pub amount: Money,
    /// Merchant account reference; must not collide with a live one.
    pub reference: String,
    /// Optional description shown on the customer's phone.
    pub description: Option<String>,
}

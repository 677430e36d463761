//! M-Pesa STK push wire-level rules.
//!
//! Pure pieces of the Daraja gateway integration: request signing inputs,
//! result code mapping, and callback payload parsing. The HTTP client
//! itself lives in the server crate; keeping these here means the tricky
//! parts (metadata extraction, the compact timestamp format) are testable
//! without any network plumbing.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::money::Money;
use crate::types::status::MpesaStatus;

/// Result code the gateway sends when the customer dismisses the PIN
/// prompt.
pub const RESULT_CODE_CANCELLED: i64 = 1032;

/// Timestamp in the gateway's `YYYYMMDDHHMMSS` format.
#[must_use]
pub fn stk_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// STK push password: `base64(shortcode + passkey + timestamp)`.
///
/// The timestamp must be the same string sent in the request's
/// `Timestamp` field.
#[must_use]
pub fn stk_password(short_code: &str, passkey: &str, timestamp: &str) -> String {
    BASE64.encode(format!("{short_code}{passkey}{timestamp}"))
}

/// Map a gateway result code onto a transaction status.
///
/// `0` is success, `1032` is a customer cancellation, and every other
/// code (insufficient funds, timeouts, unreachable handset, ...) is a
/// failure.
#[must_use]
pub const fn status_for_result_code(code: i64) -> MpesaStatus {
    match code {
        0 => MpesaStatus::Success,
        RESULT_CODE_CANCELLED => MpesaStatus::Cancelled,
        _ => MpesaStatus::Failed,
    }
}

/// Parse the gateway's compact numeric timestamp (`20231025143022`).
///
/// Exactly 14 digits: `YYYYMMDDHHMMSS`. Anything else is `None`.
#[must_use]
pub fn parse_compact_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if raw.len() != 14 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let field = |range: std::ops::Range<usize>| raw.get(range)?.parse::<u32>().ok();

    let date = NaiveDate::from_ymd_opt(
        raw.get(0..4)?.parse::<i32>().ok()?,
        field(4..6)?,
        field(6..8)?,
    )?;
    date.and_hms_opt(field(8..10)?, field(10..12)?, field(12..14)?)
}

// ============================================================================
// Callback payload
// ============================================================================

/// The webhook body the gateway POSTs after an STK push resolves.
///
/// Field names mirror the wire format exactly; everything the gateway
/// controls is treated as untrusted input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

/// The callback proper, keyed by `CheckoutRequestID`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    /// Present only on success.
    #[serde(
        rename = "CallbackMetadata",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub callback_metadata: Option<CallbackMetadata>,
}

/// Variable-length list of name/value pairs.
///
/// The gateway documents no ordering for these items, so lookups must go
/// by `Name`, never by position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl StkCallback {
    /// Whether the gateway reports the payment as completed.
    ///
    /// The callback resolves to exactly two outcomes: code 0 settles the
    /// payment, any other code fails it. Only the query path distinguishes
    /// a user cancellation ([`status_for_result_code`]).
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.result_code == 0
    }

    fn metadata_value(&self, name: &str) -> Option<&Value> {
        self.callback_metadata
            .as_ref()?
            .items
            .iter()
            .find(|item| item.name == name)?
            .value
            .as_ref()
    }

    /// The M-Pesa receipt number (e.g. `NLJ7RT61SV`), success only.
    #[must_use]
    pub fn receipt_number(&self) -> Option<String> {
        self.metadata_value("MpesaReceiptNumber")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    /// The transaction completion time, from the compact numeric format.
    ///
    /// The gateway sends this as a bare number (`20231025143022`); a
    /// string form is accepted too.
    #[must_use]
    pub fn transaction_date(&self) -> Option<NaiveDateTime> {
        let raw = match self.metadata_value("TransactionDate")? {
            Value::Number(n) => n.as_u64()?.to_string(),
            Value::String(s) => s.clone(),
            _ => return None,
        };
        parse_compact_timestamp(&raw)
    }

    /// The amount the customer actually paid.
    #[must_use]
    pub fn amount(&self) -> Option<Money> {
        match self.metadata_value("Amount")? {
            Value::Number(n) => n
                .as_f64()
                .and_then(Decimal::from_f64)
                .map(|d| Money::new(d).rounded()),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// The paying phone number as the gateway reports it.
    #[must_use]
    pub fn phone_number(&self) -> Option<String> {
        match self.metadata_value("PhoneNumber")? {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stk_password_is_plain_concatenation() {
        let password = stk_password("174379", "secretpasskey", "20231025143022");
        let decoded = BASE64.decode(password).unwrap();
        assert_eq!(
            String::from_utf8(decoded).unwrap(),
            "174379secretpasskey20231025143022"
        );
    }

    #[test]
    fn test_stk_timestamp_format() {
        let at = DateTime::parse_from_rfc3339("2023-10-25T14:30:22Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(stk_timestamp(&at), "20231025143022");
    }

    #[test]
    fn test_result_code_mapping() {
        assert_eq!(status_for_result_code(0), MpesaStatus::Success);
        assert_eq!(status_for_result_code(1032), MpesaStatus::Cancelled);
        assert_eq!(status_for_result_code(1), MpesaStatus::Failed);
        assert_eq!(status_for_result_code(1037), MpesaStatus::Failed);
        assert_eq!(status_for_result_code(2001), MpesaStatus::Failed);
        assert_eq!(status_for_result_code(-1), MpesaStatus::Failed);
    }

    #[test]
    fn test_parse_compact_timestamp() {
        let parsed = parse_compact_timestamp("20231025143022").unwrap();
        assert_eq!(parsed.to_string(), "2023-10-25 14:30:22");

        assert!(parse_compact_timestamp("2023-10-25").is_none());
        assert!(parse_compact_timestamp("").is_none());
        // 14 digits but month 13
        assert!(parse_compact_timestamp("20231325143022").is_none());
    }

    fn success_callback_json() -> &'static str {
        // Items deliberately out of the usual documented order
        r#"{
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            { "Name": "TransactionDate", "Value": 20231025143022 },
                            { "Name": "PhoneNumber", "Value": 254712345678 },
                            { "Name": "MpesaReceiptNumber", "Value": "ABC123" },
                            { "Name": "Amount", "Value": 500.0 }
                        ]
                    }
                }
            }
        }"#
    }

    #[test]
    fn test_callback_extraction_by_name() {
        let envelope: CallbackEnvelope = serde_json::from_str(success_callback_json()).unwrap();
        let callback = &envelope.body.stk_callback;

        assert!(callback.succeeded());
        assert_eq!(callback.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(callback.receipt_number().unwrap(), "ABC123");
        assert_eq!(
            callback.transaction_date().unwrap().to_string(),
            "2023-10-25 14:30:22"
        );
        assert_eq!(callback.amount().unwrap(), Money::from_major(500));
        assert_eq!(callback.phone_number().unwrap(), "254712345678");
    }

    #[test]
    fn test_failed_callback_has_no_metadata() {
        let json = r#"{
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        }"#;

        let envelope: CallbackEnvelope = serde_json::from_str(json).unwrap();
        let callback = &envelope.body.stk_callback;

        assert!(!callback.succeeded());
        assert!(callback.callback_metadata.is_none());
        assert!(callback.receipt_number().is_none());
        assert!(callback.transaction_date().is_none());
    }

    #[test]
    fn test_metadata_item_without_value() {
        let json = r#"{
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "1",
                    "CheckoutRequestID": "ws_CO_1",
                    "ResultCode": 0,
                    "ResultDesc": "ok",
                    "CallbackMetadata": {
                        "Item": [
                            { "Name": "MpesaReceiptNumber" },
                            { "Name": "TransactionDate", "Value": "not-a-date" }
                        ]
                    }
                }
            }
        }"#;

        let envelope: CallbackEnvelope = serde_json::from_str(json).unwrap();
        let callback = &envelope.body.stk_callback;

        assert!(callback.receipt_number().is_none());
        assert!(callback.transaction_date().is_none());
    }

    #[test]
    fn test_transaction_date_as_string() {
        let json = r#"{
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "1",
                    "CheckoutRequestID": "ws_CO_1",
                    "ResultCode": 0,
                    "ResultDesc": "ok",
                    "CallbackMetadata": {
                        "Item": [{ "Name": "TransactionDate", "Value": "20231025143022" }]
                    }
                }
            }
        }"#;

        let envelope: CallbackEnvelope = serde_json::from_str(json).unwrap();
        assert!(envelope.body.stk_callback.transaction_date().is_some());
    }
}

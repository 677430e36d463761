//! Counter reset boundaries and document number formats.
//!
//! Receipt and order numbers are built from a date prefix plus a gapless
//! per-day sequence handed out by the counter service; the formats here
//! are pure so numbering can be tested without a database.

use chrono::NaiveDate;

use crate::types::status::ResetPeriod;

impl ResetPeriod {
    /// The period marker a date falls into.
    ///
    /// Two calls on the same key belong to the same sequence run exactly
    /// when their markers are equal; a changed marker resets the counter.
    /// `Never` always yields the empty marker.
    #[must_use]
    pub fn marker(self, date: NaiveDate) -> String {
        match self {
            Self::Daily => date.format("%Y-%m-%d").to_string(),
            Self::Monthly => date.format("%Y-%m").to_string(),
            Self::Yearly => date.format("%Y").to_string(),
            Self::Never => String::new(),
        }
    }
}

/// Receipt number: `RCP` + YYMMDD + 5-digit sequence.
#[must_use]
pub fn receipt_number(date: NaiveDate, seq: i64) -> String {
    format!("RCP{}{seq:05}", date.format("%y%m%d"))
}

/// Order number: `ORD` + YYMMDD + 5-digit sequence.
#[must_use]
pub fn order_number(date: NaiveDate, seq: i64) -> String {
    format!("ORD{}{seq:05}", date.format("%y%m%d"))
}

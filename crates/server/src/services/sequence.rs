//! Receipt and order number issuance.
//!
//! Thin wrapper over the counter upsert: claims the next daily sequence
//! and formats the document number. Callers pass the connection of the
//! transaction that persists the document, so a rolled back creation
//! returns its number to the pool and sequences stay gapless.

use chrono::{DateTime, Utc};
use duka_core::sequence::{order_number, receipt_number};
use duka_core::types::ResetPeriod;
use sqlx::SqliteConnection;

use crate::db::counters::{CounterRepository, ORDER_KEY, RECEIPT_KEY};
use crate::db::RepositoryError;

/// Issues gapless document numbers from the counters table.
pub struct SequenceService;

impl SequenceService {
    /// Next receipt number (`RCP` + YYMMDD + zero-padded daily sequence).
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the counter upsert fails.
    pub async fn next_receipt_number(
        conn: &mut SqliteConnection,
        now: DateTime<Utc>,
    ) -> Result<String, RepositoryError> {
        let seq = CounterRepository::next(conn, RECEIPT_KEY, ResetPeriod::Daily, now).await?;
        Ok(receipt_number(now.date_naive(), seq))
    }

    /// Next order number (`ORD` + YYMMDD + zero-padded daily sequence).
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the counter upsert fails.
    pub async fn next_order_number(
        conn: &mut SqliteConnection,
        now: DateTime<Utc>,
    ) -> Result<String, RepositoryError> {
        let seq = CounterRepository::next(conn, ORDER_KEY, ResetPeriod::Daily, now).await?;
        Ok(order_number(now.date_naive(), seq))
    }
}

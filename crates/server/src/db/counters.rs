//! Atomic document sequence counters.
//!
//! Each counter row holds the last issued sequence for a key
//! (`"receipt"`, `"order"`) together with the period marker it was
//! issued in. A single upsert claims the next value and resets the
//! sequence when the period rolls over, so two transactions can never
//! observe the same number.

use chrono::{DateTime, Utc};
use duka_core::types::ResetPeriod;
use sqlx::SqliteConnection;

use super::RepositoryError;

/// Counter key for sale receipt numbers.
pub const RECEIPT_KEY: &str = "receipt";
/// Counter key for order numbers.
pub const ORDER_KEY: &str = "order";

// ===== Repository =====

/// Repository for sequence counters.
///
/// All operations take a connection so callers can claim numbers inside
/// the same transaction that persists the document using them. A rolled
/// back transaction returns the number to the pool, keeping sequences
/// gapless.
pub struct CounterRepository;

impl CounterRepository {
    /// Claim the next sequence value for `key`.
    ///
    /// The counter resets to 1 whenever the period marker derived from
    /// `now` differs from the stored one.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the upsert fails.
    pub async fn next(
        conn: &mut SqliteConnection,
        key: &str,
        reset_period: ResetPeriod,
        now: DateTime<Utc>,
    ) -> Result<i64, RepositoryError> {
        let marker = reset_period.marker(now.date_naive());

        let seq = sqlx::query_scalar::<_, i64>(
            r"
            INSERT INTO counters (key, seq, reset_period, period_marker, last_reset)
            VALUES (?1, 1, ?2, ?3, ?4)
            ON CONFLICT (key) DO UPDATE SET
                seq = CASE
                    WHEN counters.period_marker = excluded.period_marker
                    THEN counters.seq + 1
                    ELSE 1
                END,
                period_marker = excluded.period_marker,
                last_reset = CASE
                    WHEN counters.period_marker = excluded.period_marker
                    THEN counters.last_reset
                    ELSE excluded.last_reset
                END
            RETURNING seq
            ",
        )
        .bind(key)
        .bind(reset_period)
        .bind(&marker)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        Ok(seq)
    }
}

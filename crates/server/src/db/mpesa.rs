//! M-Pesa transaction repository.
//!
//! Terminal state is applied through a single conditional UPDATE keyed
//! on `status = 'pending'`, so callback replays and poll/callback races
//! collapse into no-ops instead of overwriting a settled row.

use chrono::{DateTime, NaiveDateTime, Utc};
use duka_core::types::{Money, MpesaStatus, PhoneNumber, SaleId};
use sqlx::{SqliteConnection, SqlitePool};

use super::RepositoryError;
use crate::models::mpesa::MpesaTransaction;

// ===== Internal Row Types =====

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    checkout_request_id: String,
    merchant_request_id: String,
    phone_number: String,
    amount: Money,
    account_reference: String,
    transaction_desc: String,
    status: MpesaStatus,
    mpesa_receipt_number: Option<String>,
    transaction_date: Option<NaiveDateTime>,
    result_code: Option<i64>,
    result_desc: Option<String>,
    retry_count: i64,
    last_query_at: Option<DateTime<Utc>>,
    sale_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for MpesaTransaction {
    type Error = RepositoryError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let phone_number = PhoneNumber::parse(&row.phone_number).map_err(|e| {
            RepositoryError::DataCorruption(format!(
                "invalid phone number on transaction {}: {e}",
                row.checkout_request_id
            ))
        })?;

        Ok(Self {
            checkout_request_id: row.checkout_request_id,
            merchant_request_id: row.merchant_request_id,
            phone_number,
            amount: row.amount,
            account_reference: row.account_reference,
            transaction_desc: row.transaction_desc,
            status: row.status,
            mpesa_receipt_number: row.mpesa_receipt_number,
            transaction_date: row.transaction_date,
            result_code: row.result_code,
            result_desc: row.result_desc,
            retry_count: row.retry_count,
            last_query_at: row.last_query_at,
            sale_id: row.sale_id.map(SaleId::new),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const TRANSACTION_COLUMNS: &str = r"
    checkout_request_id, merchant_request_id, phone_number, amount,
    account_reference, transaction_desc, status, mpesa_receipt_number,
    transaction_date, result_code, result_desc, retry_count,
    last_query_at, sale_id, created_at, updated_at
";

// ===== Repository =====

/// A pending transaction to record after a successful STK push.
#[derive(Debug)]
pub struct NewMpesaTransaction {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub phone_number: PhoneNumber,
    pub amount: Money,
    pub account_reference: String,
    pub transaction_desc: String,
}

/// Repository for STK push transactions.
pub struct MpesaRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MpesaRepository<'a> {
    /// Create a new repository backed by the given pool.
    #[must_use]
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a freshly initiated transaction in `pending` state.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` when the checkout request id
    /// is already recorded or the account reference collides with a live
    /// (pending or successful) transaction, `RepositoryError::Database`
    /// on other query failures.
    pub async fn insert(
        &self,
        new: &NewMpesaTransaction,
        now: DateTime<Utc>,
    ) -> Result<MpesaTransaction, RepositoryError> {
        let sql = format!(
            r"
            INSERT INTO mpesa_transactions (
                checkout_request_id, merchant_request_id, phone_number,
                amount, account_reference, transaction_desc, created_at,
                updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            RETURNING {TRANSACTION_COLUMNS}
            "
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(&new.checkout_request_id)
            .bind(&new.merchant_request_id)
            .bind(new.phone_number.as_str())
            .bind(new.amount)
            .bind(&new.account_reference)
            .bind(&new.transaction_desc)
            .bind(now)
            .fetch_one(self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_unique_violation()
                {
                    return RepositoryError::Conflict(format!(
                        "a live transaction already exists for reference '{}'",
                        new.account_reference
                    ));
                }
                e.into()
            })?;

        MpesaTransaction::try_from(row)
    }

    /// Fetch a transaction by checkout request id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure or
    /// `RepositoryError::DataCorruption` if stored data is invalid.
    pub async fn get(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<MpesaTransaction>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut conn, checkout_request_id).await
    }

    /// Fetch a transaction by checkout request id on an explicit
    /// connection, for use inside a sale transaction.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure or
    /// `RepositoryError::DataCorruption` if stored data is invalid.
    pub async fn fetch(
        conn: &mut SqliteConnection,
        checkout_request_id: &str,
    ) -> Result<Option<MpesaTransaction>, RepositoryError> {
        let sql = format!(
            r"
            SELECT {TRANSACTION_COLUMNS}
            FROM mpesa_transactions
            WHERE checkout_request_id = ?1
            "
        );
        let row = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(checkout_request_id)
            .fetch_optional(&mut *conn)
            .await?;

        row.map(MpesaTransaction::try_from).transpose()
    }

    /// Whether a pending or successful transaction already uses this
    /// account reference.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn has_live_reference(&self, reference: &str) -> Result<bool, RepositoryError> {
        let live = sqlx::query_scalar::<_, bool>(
            r"
            SELECT EXISTS (
                SELECT 1 FROM mpesa_transactions
                WHERE account_reference = ?1 AND status IN ('pending', 'success')
            )
            ",
        )
        .bind(reference)
        .fetch_one(self.pool)
        .await?;

        Ok(live)
    }

    /// Try to claim the upstream poll slot for a pending transaction.
    ///
    /// Succeeds when the transaction is pending and has not been queried
    /// since `cutoff`; the claim bumps `retry_count` and stamps
    /// `last_query_at` in the same statement, so concurrent pollers get
    /// at most one winner per cooldown window.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn claim_query_slot(
        &self,
        checkout_request_id: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE mpesa_transactions
            SET retry_count = retry_count + 1, last_query_at = ?1, updated_at = ?1
            WHERE checkout_request_id = ?2
              AND status = 'pending'
              AND (last_query_at IS NULL OR last_query_at <= ?3)
            ",
        )
        .bind(now)
        .bind(checkout_request_id)
        .bind(cutoff)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Apply a terminal outcome to a still-pending transaction.
    ///
    /// Returns `false` when the transaction is unknown or already
    /// terminal; the receipt number and transaction date of a settled
    /// row are never overwritten.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn transition_from_pending(
        &self,
        checkout_request_id: &str,
        status: MpesaStatus,
        result_code: i64,
        result_desc: &str,
        receipt_number: Option<&str>,
        transaction_date: Option<NaiveDateTime>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE mpesa_transactions
            SET status = ?1,
                result_code = ?2,
                result_desc = ?3,
                mpesa_receipt_number = COALESCE(?4, mpesa_receipt_number),
                transaction_date = COALESCE(?5, transaction_date),
                updated_at = ?6
            WHERE checkout_request_id = ?7 AND status = 'pending'
            ",
        )
        .bind(status)
        .bind(result_code)
        .bind(result_desc)
        .bind(receipt_number)
        .bind(transaction_date)
        .bind(now)
        .bind(checkout_request_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Claim a successful transaction for a sale.
    ///
    /// The `sale_id IS NULL` guard makes the back-reference single-shot:
    /// of two sales racing for one transaction, exactly one claim wins.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn link_sale(
        conn: &mut SqliteConnection,
        checkout_request_id: &str,
        sale_id: SaleId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE mpesa_transactions
            SET sale_id = ?1, updated_at = ?2
            WHERE checkout_request_id = ?3
              AND status = 'success'
              AND sale_id IS NULL
            ",
        )
        .bind(sale_id)
        .bind(now)
        .bind(checkout_request_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::db::sales::{NewSale, SaleRepository};
    use crate::db::testing::memory_pool;
    use duka_core::types::{PaymentMethod, PaymentStatus, StaffId};

    fn new_transaction(checkout_id: &str, reference: &str) -> NewMpesaTransaction {
        NewMpesaTransaction {
            checkout_request_id: checkout_id.to_owned(),
            merchant_request_id: format!("mr-{checkout_id}"),
            phone_number: PhoneNumber::parse("0712345678").unwrap(),
            amount: Money::from_major(250),
            account_reference: reference.to_owned(),
            transaction_desc: "till payment".to_owned(),
        }
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let pool = memory_pool().await;
        let repo = MpesaRepository::new(&pool);

        repo.insert(&new_transaction("ws_CO_1", "INV-1"), Utc::now())
            .await
            .unwrap();

        let found = repo.get("ws_CO_1").await.unwrap().unwrap();
        assert_eq!(found.status, MpesaStatus::Pending);
        assert_eq!(found.phone_number.as_str(), "254712345678");
        assert_eq!(found.retry_count, 0);
        assert_eq!(found.sale_id, None);
        assert_eq!(found.mpesa_receipt_number, None);
    }

    #[tokio::test]
    async fn live_reference_collision_is_a_conflict() {
        let pool = memory_pool().await;
        let repo = MpesaRepository::new(&pool);

        repo.insert(&new_transaction("ws_CO_1", "INV-1"), Utc::now())
            .await
            .unwrap();
        assert!(repo.has_live_reference("INV-1").await.unwrap());

        let err = repo
            .insert(&new_transaction("ws_CO_2", "INV-1"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn settled_reference_can_be_reused() {
        let pool = memory_pool().await;
        let repo = MpesaRepository::new(&pool);

        repo.insert(&new_transaction("ws_CO_1", "INV-1"), Utc::now())
            .await
            .unwrap();
        repo.transition_from_pending(
            "ws_CO_1",
            MpesaStatus::Failed,
            1037,
            "DS timeout",
            None,
            None,
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(!repo.has_live_reference("INV-1").await.unwrap());
        repo.insert(&new_transaction("ws_CO_2", "INV-1"), Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn poll_slot_respects_cooldown() {
        let pool = memory_pool().await;
        let repo = MpesaRepository::new(&pool);
        repo.insert(&new_transaction("ws_CO_1", "INV-1"), Utc::now())
            .await
            .unwrap();

        let now = Utc::now();
        let cutoff = now - Duration::seconds(5);
        assert!(repo.claim_query_slot("ws_CO_1", cutoff, now).await.unwrap());
        assert!(!repo.claim_query_slot("ws_CO_1", cutoff, now).await.unwrap());

        // A cutoff after the stamped time frees the slot again.
        let later = now + Duration::seconds(10);
        assert!(repo.claim_query_slot("ws_CO_1", later, later).await.unwrap());

        let found = repo.get("ws_CO_1").await.unwrap().unwrap();
        assert_eq!(found.retry_count, 2);
    }

    #[tokio::test]
    async fn terminal_transitions_are_single_shot() {
        let pool = memory_pool().await;
        let repo = MpesaRepository::new(&pool);
        repo.insert(&new_transaction("ws_CO_1", "INV-1"), Utc::now())
            .await
            .unwrap();

        let date = chrono::NaiveDate::from_ymd_opt(2023, 10, 25)
            .unwrap()
            .and_hms_opt(14, 30, 22)
            .unwrap();
        let applied = repo
            .transition_from_pending(
                "ws_CO_1",
                MpesaStatus::Success,
                0,
                "processed successfully",
                Some("SJU12ABC34"),
                Some(date),
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(applied);

        // A late failure callback must not clobber the settled row.
        let replay = repo
            .transition_from_pending(
                "ws_CO_1",
                MpesaStatus::Failed,
                1032,
                "cancelled by user",
                None,
                None,
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(!replay);

        let found = repo.get("ws_CO_1").await.unwrap().unwrap();
        assert_eq!(found.status, MpesaStatus::Success);
        assert_eq!(found.mpesa_receipt_number.as_deref(), Some("SJU12ABC34"));
        assert_eq!(found.transaction_date, Some(date));
        assert_eq!(found.result_code, Some(0));

        // The poll slot is gone too: terminal rows are never queried.
        let now = Utc::now();
        assert!(
            !repo
                .claim_query_slot("ws_CO_1", now - Duration::seconds(5), now)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn sale_linkage_is_claimed_exactly_once() {
        let pool = memory_pool().await;
        let repo = MpesaRepository::new(&pool);
        repo.insert(&new_transaction("ws_CO_1", "INV-1"), Utc::now())
            .await
            .unwrap();
        repo.transition_from_pending(
            "ws_CO_1",
            MpesaStatus::Success,
            0,
            "processed successfully",
            Some("SJU12ABC34"),
            None,
            Utc::now(),
        )
        .await
        .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let sale = SaleRepository::insert(
            &mut conn,
            &NewSale {
                receipt_number: "RCP26031400001".to_owned(),
                customer_id: None,
                subtotal: Money::from_major(250),
                discount_total: Money::ZERO,
                tax_total: Money::ZERO,
                total: Money::from_major(250),
                payment_method: PaymentMethod::Mpesa,
                payment_status: PaymentStatus::Paid,
                total_paid: Money::from_major(250),
                change: Money::ZERO,
                mpesa_checkout_request_id: Some("ws_CO_1".to_owned()),
                notes: None,
                created_by: StaffId::new(1),
            },
            Utc::now(),
        )
        .await
        .unwrap();

        assert!(
            MpesaRepository::link_sale(&mut conn, "ws_CO_1", sale.id, Utc::now())
                .await
                .unwrap()
        );
        assert!(
            !MpesaRepository::link_sale(&mut conn, "ws_CO_1", sale.id, Utc::now())
                .await
                .unwrap()
        );
        drop(conn);

        let found = repo.get("ws_CO_1").await.unwrap().unwrap();
        assert_eq!(found.sale_id, Some(sale.id));
    }

    #[tokio::test]
    async fn pending_transactions_cannot_be_linked() {
        let pool = memory_pool().await;
        let repo = MpesaRepository::new(&pool);
        repo.insert(&new_transaction("ws_CO_1", "INV-1"), Utc::now())
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert!(
            !MpesaRepository::link_sale(&mut conn, "ws_CO_1", SaleId::new(1), Utc::now())
                .await
                .unwrap()
        );
    }
}

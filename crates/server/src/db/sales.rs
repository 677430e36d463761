//! Sale repository: receipts, line items and the refund accumulator.

use chrono::{DateTime, Utc};
use duka_core::types::{
    CustomerId, Money, PaymentMethod, PaymentStatus, ProductId, SaleId, SaleStatus, StaffId,
};
use sqlx::{SqliteConnection, SqlitePool};

use super::{RepositoryError, parse_decimal};
use crate::models::sale::{Sale, SaleItem, SaleWithItems};

// ===== Internal Row Types =====

#[derive(Debug, sqlx::FromRow)]
struct SaleRow {
    id: i64,
    receipt_number: String,
    customer_id: Option<i64>,
    status: SaleStatus,
    subtotal: Money,
    discount_total: Money,
    tax_total: Money,
    total: Money,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    total_paid: Money,
    change: Money,
    mpesa_checkout_request_id: Option<String>,
    voided_by: Option<i64>,
    void_reason: Option<String>,
    voided_at: Option<DateTime<Utc>>,
    refunded_total: Money,
    refunded_by: Option<i64>,
    refund_reason: Option<String>,
    refunded_at: Option<DateTime<Utc>>,
    notes: Option<String>,
    created_by: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SaleRow> for Sale {
    fn from(row: SaleRow) -> Self {
        Self {
            id: SaleId::new(row.id),
            receipt_number: row.receipt_number,
            customer_id: row.customer_id.map(CustomerId::new),
            status: row.status,
            subtotal: row.subtotal,
            discount_total: row.discount_total,
            tax_total: row.tax_total,
            total: row.total,
            payment_method: row.payment_method,
            payment_status: row.payment_status,
            total_paid: row.total_paid,
            change: row.change,
            mpesa_checkout_request_id: row.mpesa_checkout_request_id,
            voided_by: row.voided_by.map(StaffId::new),
            void_reason: row.void_reason,
            voided_at: row.voided_at,
            refunded_total: row.refunded_total,
            refunded_by: row.refunded_by.map(StaffId::new),
            refund_reason: row.refund_reason,
            refunded_at: row.refunded_at,
            notes: row.notes,
            created_by: StaffId::new(row.created_by),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SaleItemRow {
    sale_id: i64,
    product_id: i64,
    product_name: String,
    sku: String,
    quantity: i64,
    unit_price: Money,
    discount_percent: String,
    tax_rate: String,
    subtotal: Money,
    refunded_quantity: i64,
}

impl TryFrom<SaleItemRow> for SaleItem {
    type Error = RepositoryError;

    fn try_from(row: SaleItemRow) -> Result<Self, Self::Error> {
        let discount_percent = parse_decimal(&row.discount_percent, "sale_items.discount_percent")?;
        let tax_rate = parse_decimal(&row.tax_rate, "sale_items.tax_rate")?;
        Ok(Self {
            sale_id: SaleId::new(row.sale_id),
            product_id: ProductId::new(row.product_id),
            product_name: row.product_name,
            sku: row.sku,
            quantity: row.quantity,
            unit_price: row.unit_price,
            discount_percent,
            tax_rate,
            subtotal: row.subtotal,
            refunded_quantity: row.refunded_quantity,
        })
    }
}

// ===== Repository =====

/// A sale header to insert; items follow via [`SaleRepository::insert_item`].
#[derive(Debug)]
pub struct NewSale {
    pub receipt_number: String,
    pub customer_id: Option<CustomerId>,
    pub subtotal: Money,
    pub discount_total: Money,
    pub tax_total: Money,
    pub total: Money,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub total_paid: Money,
    pub change: Money,
    pub mpesa_checkout_request_id: Option<String>,
    pub notes: Option<String>,
    pub created_by: StaffId,
}

/// Repository for sales and their line items.
pub struct SaleRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SaleRepository<'a> {
    /// Create a new repository backed by the given pool.
    #[must_use]
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch a sale with its line items.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure or
    /// `RepositoryError::DataCorruption` if stored numerics are invalid.
    pub async fn get_with_items(&self, id: SaleId) -> Result<Option<SaleWithItems>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let Some(sale) = Self::fetch(&mut conn, id).await? else {
            return Ok(None);
        };
        let items = Self::fetch_items(&mut conn, id).await?;
        Ok(Some(SaleWithItems { sale, items }))
    }

    /// List sales, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn list_recent(&self, limit: i64, offset: i64) -> Result<Vec<Sale>, RepositoryError> {
        let rows = sqlx::query_as::<_, SaleRow>(
            r"
            SELECT id, receipt_number, customer_id, status, subtotal,
                   discount_total, tax_total, total, payment_method,
                   payment_status, total_paid, change, mpesa_checkout_request_id,
                   voided_by, void_reason, voided_at, refunded_total,
                   refunded_by, refund_reason, refunded_at, notes,
                   created_by, created_at, updated_at
            FROM sales
            ORDER BY id DESC
            LIMIT ?1 OFFSET ?2
            ",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Sale::from).collect())
    }

    /// Insert a sale header.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the receipt number is
    /// already taken, `RepositoryError::Database` on other query failures.
    pub async fn insert(
        conn: &mut SqliteConnection,
        new: &NewSale,
        now: DateTime<Utc>,
    ) -> Result<Sale, RepositoryError> {
        let row = sqlx::query_as::<_, SaleRow>(
            r"
            INSERT INTO sales (
                receipt_number, customer_id, subtotal, discount_total,
                tax_total, total, payment_method, payment_status, total_paid,
                change, mpesa_checkout_request_id, notes, created_by,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
            RETURNING id, receipt_number, customer_id, status, subtotal,
                      discount_total, tax_total, total, payment_method,
                      payment_status, total_paid, change, mpesa_checkout_request_id,
                      voided_by, void_reason, voided_at, refunded_total,
                      refunded_by, refund_reason, refunded_at, notes,
                      created_by, created_at, updated_at
            ",
        )
        .bind(&new.receipt_number)
        .bind(new.customer_id)
        .bind(new.subtotal)
        .bind(new.discount_total)
        .bind(new.tax_total)
        .bind(new.total)
        .bind(new.payment_method)
        .bind(new.payment_status)
        .bind(new.total_paid)
        .bind(new.change)
        .bind(&new.mpesa_checkout_request_id)
        .bind(&new.notes)
        .bind(new.created_by)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return RepositoryError::Conflict(format!(
                    "receipt number '{}' already exists",
                    new.receipt_number
                ));
            }
            e.into()
        })?;

        Ok(Sale::from(row))
    }

    /// Insert one line item.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn insert_item(
        conn: &mut SqliteConnection,
        item: &SaleItem,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO sale_items (
                sale_id, product_id, product_name, sku, quantity, unit_price,
                discount_percent, tax_rate, subtotal, refunded_quantity
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
        )
        .bind(item.sale_id)
        .bind(item.product_id)
        .bind(&item.product_name)
        .bind(&item.sku)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.discount_percent.to_string())
        .bind(item.tax_rate.to_string())
        .bind(item.subtotal)
        .bind(item.refunded_quantity)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Fetch a sale header by id on an explicit connection.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn fetch(
        conn: &mut SqliteConnection,
        id: SaleId,
    ) -> Result<Option<Sale>, RepositoryError> {
        let row = sqlx::query_as::<_, SaleRow>(
            r"
            SELECT id, receipt_number, customer_id, status, subtotal,
                   discount_total, tax_total, total, payment_method,
                   payment_status, total_paid, change, mpesa_checkout_request_id,
                   voided_by, void_reason, voided_at, refunded_total,
                   refunded_by, refund_reason, refunded_at, notes,
                   created_by, created_at, updated_at
            FROM sales
            WHERE id = ?1
            ",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(Sale::from))
    }

    /// Fetch the line items of a sale on an explicit connection.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure or
    /// `RepositoryError::DataCorruption` if stored numerics are invalid.
    pub async fn fetch_items(
        conn: &mut SqliteConnection,
        sale_id: SaleId,
    ) -> Result<Vec<SaleItem>, RepositoryError> {
        let rows = sqlx::query_as::<_, SaleItemRow>(
            r"
            SELECT sale_id, product_id, product_name, sku, quantity,
                   unit_price, discount_percent, tax_rate, subtotal,
                   refunded_quantity
            FROM sale_items
            WHERE sale_id = ?1
            ORDER BY id
            ",
        )
        .bind(sale_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(SaleItem::try_from).collect()
    }

    /// Void a completed sale. Returns `false` if the sale was not in
    /// `completed` state (already voided or refunded).
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn mark_voided(
        conn: &mut SqliteConnection,
        id: SaleId,
        voided_by: StaffId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE sales
            SET status = 'voided', voided_by = ?1, void_reason = ?2,
                voided_at = ?3, updated_at = ?3
            WHERE id = ?4 AND status = 'completed'
            ",
        )
        .bind(voided_by)
        .bind(reason)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Claim refund quantity against a line's accumulator.
    ///
    /// The guard `refunded_quantity + n <= quantity` sits in the UPDATE
    /// itself, so two overlapping refunds can never both claim the same
    /// units. Returns `false` when the line is missing or the claim would
    /// overshoot.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn claim_refund_quantity(
        conn: &mut SqliteConnection,
        sale_id: SaleId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE sale_items
            SET refunded_quantity = refunded_quantity + ?1
            WHERE sale_id = ?2 AND product_id = ?3
              AND refunded_quantity + ?1 <= quantity
            ",
        )
        .bind(quantity)
        .bind(sale_id)
        .bind(product_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record the outcome of a refund on the sale header.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the sale does not exist,
    /// `RepositoryError::Database` on query failure.
    pub async fn apply_refund(
        conn: &mut SqliteConnection,
        id: SaleId,
        status: SaleStatus,
        refunded_total: Money,
        refunded_by: StaffId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE sales
            SET status = ?1, refunded_total = ?2, refunded_by = ?3,
                refund_reason = ?4, refunded_at = ?5, updated_at = ?5
            WHERE id = ?6
            ",
        )
        .bind(status)
        .bind(refunded_total)
        .bind(refunded_by)
        .bind(reason)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

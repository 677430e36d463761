//! Order repository: the fulfilment pipeline with its append-only
//! status history and payment log.

use chrono::{DateTime, Utc};
use duka_core::types::{
    CustomerId, DeliveryType, Money, OrderId, OrderPaymentStatus, OrderStatus, PaymentMethod,
    ProductId, StaffId,
};
use sqlx::{SqliteConnection, SqlitePool};

use super::{RepositoryError, parse_decimal};
use crate::models::order::{Order, OrderItem, OrderPayment, OrderStatusChange, OrderWithDetails};

// ===== Internal Row Types =====

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i64,
    order_number: String,
    customer_id: Option<i64>,
    status: OrderStatus,
    subtotal: Money,
    discount_total: Money,
    tax_total: Money,
    delivery_fee: Money,
    total: Money,
    delivery_type: DeliveryType,
    scheduled_date: Option<DateTime<Utc>>,
    delivery_person: Option<String>,
    payment_status: OrderPaymentStatus,
    notes: Option<String>,
    created_by: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            id: OrderId::new(row.id),
            order_number: row.order_number,
            customer_id: row.customer_id.map(CustomerId::new),
            status: row.status,
            subtotal: row.subtotal,
            discount_total: row.discount_total,
            tax_total: row.tax_total,
            delivery_fee: row.delivery_fee,
            total: row.total,
            delivery_type: row.delivery_type,
            scheduled_date: row.scheduled_date,
            delivery_person: row.delivery_person,
            payment_status: row.payment_status,
            notes: row.notes,
            created_by: StaffId::new(row.created_by),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    order_id: i64,
    product_id: i64,
    product_name: String,
    sku: String,
    quantity: i64,
    unit_price: Money,
    discount_percent: String,
    tax_rate: String,
    subtotal: Money,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = RepositoryError;

    fn try_from(row: OrderItemRow) -> Result<Self, Self::Error> {
        let discount_percent =
            parse_decimal(&row.discount_percent, "order_items.discount_percent")?;
        let tax_rate = parse_decimal(&row.tax_rate, "order_items.tax_rate")?;
        Ok(Self {
            order_id: OrderId::new(row.order_id),
            product_id: ProductId::new(row.product_id),
            product_name: row.product_name,
            sku: row.sku,
            quantity: row.quantity,
            unit_price: row.unit_price,
            discount_percent,
            tax_rate,
            subtotal: row.subtotal,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    order_id: i64,
    from_status: Option<OrderStatus>,
    to_status: OrderStatus,
    changed_by: i64,
    notes: Option<String>,
    changed_at: DateTime<Utc>,
}

impl From<HistoryRow> for OrderStatusChange {
    fn from(row: HistoryRow) -> Self {
        Self {
            order_id: OrderId::new(row.order_id),
            from_status: row.from_status,
            to_status: row.to_status,
            changed_by: StaffId::new(row.changed_by),
            notes: row.notes,
            changed_at: row.changed_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    order_id: i64,
    method: PaymentMethod,
    amount: Money,
    reference: Option<String>,
    recorded_by: i64,
    created_at: DateTime<Utc>,
}

impl From<PaymentRow> for OrderPayment {
    fn from(row: PaymentRow) -> Self {
        Self {
            order_id: OrderId::new(row.order_id),
            method: row.method,
            amount: row.amount,
            reference: row.reference,
            recorded_by: StaffId::new(row.recorded_by),
            created_at: row.created_at,
        }
    }
}

// ===== Repository =====

/// An order header to insert; items and the opening history row follow
/// on the same connection.
#[derive(Debug)]
pub struct NewOrder {
    pub order_number: String,
    pub customer_id: Option<CustomerId>,
    pub subtotal: Money,
    pub discount_total: Money,
    pub tax_total: Money,
    pub delivery_fee: Money,
    pub total: Money,
    pub delivery_type: DeliveryType,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub delivery_person: Option<String>,
    pub notes: Option<String>,
    pub created_by: StaffId,
}

/// Repository for orders, their items, history and payments.
pub struct OrderRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> OrderRepository<'a> {
    /// Create a new repository backed by the given pool.
    #[must_use]
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch an order with items, history and payments.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure or
    /// `RepositoryError::DataCorruption` if stored numerics are invalid.
    pub async fn get_with_details(
        &self,
        id: OrderId,
    ) -> Result<Option<OrderWithDetails>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let Some(order) = Self::fetch(&mut conn, id).await? else {
            return Ok(None);
        };
        let items = Self::fetch_items(&mut conn, id).await?;
        let history = Self::fetch_history(&mut conn, id).await?;
        let payments = Self::fetch_payments(&mut conn, id).await?;
        Ok(Some(OrderWithDetails {
            order,
            items,
            history,
            payments,
        }))
    }

    /// List orders, newest first, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn list(
        &self,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r"
            SELECT id, order_number, customer_id, status, subtotal,
                   discount_total, tax_total, delivery_fee, total,
                   delivery_type, scheduled_date, delivery_person,
                   payment_status, notes, created_by, created_at, updated_at
            FROM orders
            WHERE ?1 IS NULL OR status = ?1
            ORDER BY id DESC
            LIMIT ?2 OFFSET ?3
            ",
        )
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Order::from).collect())
    }

    /// Insert an order header.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the order number is already
    /// taken, `RepositoryError::Database` on other query failures.
    pub async fn insert(
        conn: &mut SqliteConnection,
        new: &NewOrder,
        now: DateTime<Utc>,
    ) -> Result<Order, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(
            r"
            INSERT INTO orders (
                order_number, customer_id, subtotal, discount_total,
                tax_total, delivery_fee, total, delivery_type, scheduled_date,
                delivery_person, notes, created_by, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
            RETURNING id, order_number, customer_id, status, subtotal,
                      discount_total, tax_total, delivery_fee, total,
                      delivery_type, scheduled_date, delivery_person,
                      payment_status, notes, created_by, created_at, updated_at
            ",
        )
        .bind(&new.order_number)
        .bind(new.customer_id)
        .bind(new.subtotal)
        .bind(new.discount_total)
        .bind(new.tax_total)
        .bind(new.delivery_fee)
        .bind(new.total)
        .bind(new.delivery_type)
        .bind(new.scheduled_date)
        .bind(&new.delivery_person)
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
                    "order number '{}' already exists",
                    new.order_number
                ));
            }
            e.into()
        })?;

        Ok(Order::from(row))
    }

    /// Insert one line item.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn insert_item(
        conn: &mut SqliteConnection,
        item: &OrderItem,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO order_items (
                order_id, product_id, product_name, sku, quantity,
                unit_price, discount_percent, tax_rate, subtotal
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )
        .bind(item.order_id)
        .bind(item.product_id)
        .bind(&item.product_name)
        .bind(&item.sku)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.discount_percent.to_string())
        .bind(item.tax_rate.to_string())
        .bind(item.subtotal)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Fetch an order header by id on an explicit connection.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn fetch(
        conn: &mut SqliteConnection,
        id: OrderId,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(
            r"
            SELECT id, order_number, customer_id, status, subtotal,
                   discount_total, tax_total, delivery_fee, total,
                   delivery_type, scheduled_date, delivery_person,
                   payment_status, notes, created_by, created_at, updated_at
            FROM orders
            WHERE id = ?1
            ",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(Order::from))
    }

    /// Fetch the line items of an order.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure or
    /// `RepositoryError::DataCorruption` if stored numerics are invalid.
    pub async fn fetch_items(
        conn: &mut SqliteConnection,
        order_id: OrderId,
    ) -> Result<Vec<OrderItem>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderItemRow>(
            r"
            SELECT order_id, product_id, product_name, sku, quantity,
                   unit_price, discount_percent, tax_rate, subtotal
            FROM order_items
            WHERE order_id = ?1
            ORDER BY id
            ",
        )
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(OrderItem::try_from).collect()
    }

    /// Fetch the status history of an order, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn fetch_history(
        conn: &mut SqliteConnection,
        order_id: OrderId,
    ) -> Result<Vec<OrderStatusChange>, RepositoryError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r"
            SELECT order_id, from_status, to_status, changed_by, notes, changed_at
            FROM order_status_history
            WHERE order_id = ?1
            ORDER BY id
            ",
        )
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.into_iter().map(OrderStatusChange::from).collect())
    }

    /// Fetch the payments recorded against an order, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn fetch_payments(
        conn: &mut SqliteConnection,
        order_id: OrderId,
    ) -> Result<Vec<OrderPayment>, RepositoryError> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            r"
            SELECT order_id, method, amount, reference, recorded_by, created_at
            FROM order_payments
            WHERE order_id = ?1
            ORDER BY id
            ",
        )
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.into_iter().map(OrderPayment::from).collect())
    }

    /// Move an order from one status to another.
    ///
    /// The expected current status sits in the WHERE clause, so a
    /// concurrent transition makes this return `false` instead of
    /// clobbering it.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn update_status(
        conn: &mut SqliteConnection,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE orders
            SET status = ?1, updated_at = ?2
            WHERE id = ?3 AND status = ?4
            ",
        )
        .bind(to)
        .bind(now)
        .bind(id)
        .bind(from)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Append a status history entry.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn insert_history(
        conn: &mut SqliteConnection,
        change: &OrderStatusChange,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO order_status_history (
                order_id, from_status, to_status, changed_by, notes, changed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(change.order_id)
        .bind(change.from_status)
        .bind(change.to_status)
        .bind(change.changed_by)
        .bind(&change.notes)
        .bind(change.changed_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Record a payment row.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` on query failure.
    pub async fn insert_payment(
        conn: &mut SqliteConnection,
        payment: &OrderPayment,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO order_payments (
                order_id, method, amount, reference, recorded_by, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(payment.order_id)
        .bind(payment.method)
        .bind(payment.amount)
        .bind(&payment.reference)
        .bind(payment.recorded_by)
        .bind(payment.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Overwrite the derived payment status.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the order does not exist,
    /// `RepositoryError::Database` on query failure.
    pub async fn set_payment_status(
        conn: &mut SqliteConnection,
        id: OrderId,
        status: OrderPaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE orders
            SET payment_status = ?1, updated_at = ?2
            WHERE id = ?3
            ",
        )
        .bind(status)
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

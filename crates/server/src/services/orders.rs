//! Customer order lifecycle: creation, status transitions, payments.
//!
//! Orders reserve nothing against inventory. Stock moves exactly once,
//! on the transition into `delivered`, which is also when the customer's
//! lifetime stats are updated. Payments accumulate independently of the
//! status machine; `payment_status` is derived from the paid balance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};

use duka_core::sale::{LineTotals, line_totals, sale_totals};
use duka_core::types::{
    DeliveryType, LoyaltyTier, Money, MovementType, OrderPaymentStatus, OrderStatus,
};
use duka_core::{OrderId, ProductId, StaffId, loyalty};

use crate::db::RepositoryError;
use crate::db::customers::CustomerRepository;
use crate::db::orders::{NewOrder, OrderRepository};
use crate::db::products::ProductRepository;
use crate::error::AppError;
use crate::models::order::{
    CreateOrderInput, Order, OrderItem, OrderItemInput, OrderPayment, OrderStatusChange,
    OrderWithDetails, RecordOrderPaymentInput, TransitionOrderInput,
};
use crate::services::inventory::{InventoryService, StockChange};
use crate::services::sequence::SequenceService;

/// One validated order line with its catalog snapshot.
struct OrderLine {
    product_id: ProductId,
    product_name: String,
    sku: String,
    quantity: i64,
    unit_price: Money,
    discount_percent: Decimal,
    tax_rate: Decimal,
    totals: LineTotals,
}

/// Orchestrates the order lifecycle over the repositories.
pub struct OrderService;

impl OrderService {
    /// Create an order in `pending` state with an opening history row.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for malformed items or a
    /// `delivery` order without a scheduled date, and
    /// [`AppError::NotFound`] for unknown products or customers.
    pub async fn create(
        pool: &SqlitePool,
        actor: StaffId,
        input: &CreateOrderInput,
        now: DateTime<Utc>,
    ) -> Result<OrderWithDetails, AppError> {
        validate_order_items(&input.items)?;
        if input.delivery.delivery_type == DeliveryType::Delivery
            && input.delivery.scheduled_date.is_none()
        {
            return Err(AppError::Validation(
                "delivery orders require a scheduled date".to_owned(),
            ));
        }
        let delivery_fee = input.delivery_fee.unwrap_or(Money::ZERO);
        if delivery_fee.is_negative() {
            return Err(AppError::Validation(format!(
                "delivery fee cannot be negative, got {delivery_fee}"
            )));
        }

        let mut tx = pool.begin().await.map_err(RepositoryError::from)?;

        if let Some(customer_id) = input.customer_id {
            CustomerRepository::fetch(&mut tx, customer_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("customer {customer_id} not found")))?;
        }

        let lines = snapshot_order_lines(&mut tx, &input.items).await?;
        let totals = sale_totals(lines.iter().map(|line| &line.totals));

        let order_number = SequenceService::next_order_number(&mut tx, now).await?;
        let order = OrderRepository::insert(
            &mut tx,
            &NewOrder {
                order_number,
                customer_id: input.customer_id,
                subtotal: totals.subtotal,
                discount_total: totals.discount_total,
                tax_total: totals.tax_total,
                delivery_fee,
                total: totals.total + delivery_fee,
                delivery_type: input.delivery.delivery_type,
                scheduled_date: input.delivery.scheduled_date,
                delivery_person: input.delivery.delivery_person.clone(),
                notes: input.notes.clone(),
                created_by: actor,
            },
            now,
        )
        .await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = OrderItem {
                order_id: order.id,
                product_id: line.product_id,
                product_name: line.product_name.clone(),
                sku: line.sku.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                discount_percent: line.discount_percent,
                tax_rate: line.tax_rate,
                subtotal: line.totals.total,
            };
            OrderRepository::insert_item(&mut tx, &item).await?;
            items.push(item);
        }

        let opening = OrderStatusChange {
            order_id: order.id,
            from_status: None,
            to_status: OrderStatus::Pending,
            changed_by: actor,
            notes: None,
            changed_at: now,
        };
        OrderRepository::insert_history(&mut tx, &opening).await?;

        tx.commit().await.map_err(RepositoryError::from)?;

        tracing::info!(order = %order.order_number, total = %order.total, "order created");

        Ok(OrderWithDetails {
            order,
            items,
            history: vec![opening],
            payments: Vec::new(),
        })
    }

    /// Move an order to a new status if the state machine allows it.
    ///
    /// The current status sits in the UPDATE's WHERE clause, so two
    /// concurrent transitions serialize: the loser observes a changed
    /// row count and reports a conflict instead of double-applying.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown order,
    /// [`AppError::StateConflict`] for a transition the state machine
    /// forbids, and [`AppError::InsufficientStock`] when delivery cannot
    /// be served from stock.
    pub async fn transition(
        pool: &SqlitePool,
        actor: StaffId,
        order_id: OrderId,
        input: &TransitionOrderInput,
        now: DateTime<Utc>,
    ) -> Result<OrderWithDetails, AppError> {
        let mut tx = pool.begin().await.map_err(RepositoryError::from)?;

        let order = OrderRepository::fetch(&mut tx, order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if !order.status.can_transition_to(input.status) {
            let allowed: Vec<String> = order
                .status
                .allowed_transitions()
                .iter()
                .map(ToString::to_string)
                .collect();
            return Err(AppError::StateConflict(format!(
                "order {} is {} and cannot move to {}; allowed: [{}]",
                order.order_number,
                order.status,
                input.status,
                allowed.join(", ")
            )));
        }

        let moved =
            OrderRepository::update_status(&mut tx, order_id, order.status, input.status, now)
                .await?;
        if !moved {
            return Err(AppError::StateConflict(format!(
                "order {} was concurrently moved out of {}",
                order.order_number, order.status
            )));
        }

        OrderRepository::insert_history(
            &mut tx,
            &OrderStatusChange {
                order_id,
                from_status: Some(order.status),
                to_status: input.status,
                changed_by: actor,
                notes: input.notes.clone(),
                changed_at: now,
            },
        )
        .await?;

        if input.status == OrderStatus::Delivered {
            Self::fulfill(&mut tx, &order, actor, now).await?;
        }

        let result = load(&mut tx, order_id).await?;
        tx.commit().await.map_err(RepositoryError::from)?;

        tracing::info!(
            order = %result.order.order_number,
            from = %order.status,
            to = %input.status,
            "order transitioned"
        );
        Ok(result)
    }

    /// Record a payment against an order and rederive `payment_status`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown order,
    /// [`AppError::StateConflict`] for cancelled orders, and
    /// [`AppError::Validation`] for a non-positive amount.
    pub async fn record_payment(
        pool: &SqlitePool,
        actor: StaffId,
        order_id: OrderId,
        input: &RecordOrderPaymentInput,
        now: DateTime<Utc>,
    ) -> Result<OrderWithDetails, AppError> {
        if input.amount <= Money::ZERO {
            return Err(AppError::Validation(format!(
                "payment amount must be positive, got {}",
                input.amount
            )));
        }

        let mut tx = pool.begin().await.map_err(RepositoryError::from)?;

        let order = OrderRepository::fetch(&mut tx, order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
        if order.status == OrderStatus::Cancelled {
            return Err(AppError::StateConflict(format!(
                "order {} is cancelled and cannot take payments",
                order.order_number
            )));
        }

        OrderRepository::insert_payment(
            &mut tx,
            &OrderPayment {
                order_id,
                method: input.method,
                amount: input.amount,
                reference: input.reference.clone(),
                recorded_by: actor,
                created_at: now,
            },
        )
        .await?;

        let payments = OrderRepository::fetch_payments(&mut tx, order_id).await?;
        let paid: Money = payments.iter().map(|p| p.amount).sum();
        let status = payment_status_for(paid, order.total);
        OrderRepository::set_payment_status(&mut tx, order_id, status, now).await?;

        let result = load(&mut tx, order_id).await?;
        tx.commit().await.map_err(RepositoryError::from)?;

        tracing::info!(
            order = %result.order.order_number,
            amount = %input.amount,
            payment_status = ?result.order.payment_status,
            "order payment recorded"
        );
        Ok(result)
    }

    /// Delivery side effects: one `sale` movement per item, product sale
    /// stats, customer lifetime stats, and a fresh payment status.
    async fn fulfill(
        conn: &mut SqliteConnection,
        order: &Order,
        actor: StaffId,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let items = OrderRepository::fetch_items(conn, order.id).await?;
        for item in &items {
            InventoryService::adjust(
                conn,
                StockChange {
                    product_id: item.product_id,
                    movement_type: MovementType::Sale,
                    quantity: item.quantity,
                    reference: &order.order_number,
                    reason: None,
                    performed_by: actor,
                },
                now,
            )
            .await?;
            let product = ProductRepository::fetch(conn, item.product_id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("product {} not found", item.product_id))
                })?;
            ProductRepository::update_sale_stats(
                conn,
                item.product_id,
                product.total_sold + item.quantity,
                product.total_revenue + item.subtotal,
                now,
            )
            .await?;
        }

        if let Some(customer_id) = order.customer_id {
            let customer = CustomerRepository::fetch(conn, customer_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("customer {customer_id} not found")))?;
            let total_orders = customer.total_orders + 1;
            let total_spent = customer.total_spent + order.total;
            let points = customer.loyalty_points + loyalty::points_for(order.total);
            let tier = LoyaltyTier::for_totals(total_spent, total_orders);
            CustomerRepository::update_lifetime_stats(
                conn,
                customer_id,
                total_orders,
                total_spent,
                points,
                tier,
                now,
            )
            .await?;
        }

        let payments = OrderRepository::fetch_payments(conn, order.id).await?;
        let paid: Money = payments.iter().map(|p| p.amount).sum();
        OrderRepository::set_payment_status(conn, order.id, payment_status_for(paid, order.total), now)
            .await?;

        Ok(())
    }
}

/// Derive the payment status from the paid balance.
fn payment_status_for(paid: Money, total: Money) -> OrderPaymentStatus {
    if paid >= total && !total.is_zero() {
        OrderPaymentStatus::Paid
    } else if paid > Money::ZERO {
        OrderPaymentStatus::Partial
    } else {
        OrderPaymentStatus::Pending
    }
}

/// Reject structurally invalid order lines before touching the database.
fn validate_order_items(items: &[OrderItemInput]) -> Result<(), AppError> {
    if items.is_empty() {
        return Err(AppError::Validation(
            "an order requires at least one item".to_owned(),
        ));
    }
    for (i, item) in items.iter().enumerate() {
        if item.quantity <= 0 {
            return Err(AppError::Validation(format!(
                "item {i}: quantity must be positive, got {}",
                item.quantity
            )));
        }
        if let Some(discount) = item.discount_percent
            && !(Decimal::ZERO..=Decimal::ONE_HUNDRED).contains(&discount)
        {
            return Err(AppError::Validation(format!(
                "item {i}: discount must be between 0 and 100, got {discount}"
            )));
        }
        if items.iter().take(i).any(|prev| prev.product_id == item.product_id) {
            return Err(AppError::Validation(format!(
                "item {i}: product {} appears more than once",
                item.product_id
            )));
        }
    }
    Ok(())
}

/// Re-read each product for the price/tax snapshot. Availability is not
/// checked here: orders promise future fulfilment, and stock is enforced
/// when the order is delivered.
async fn snapshot_order_lines(
    conn: &mut SqliteConnection,
    items: &[OrderItemInput],
) -> Result<Vec<OrderLine>, AppError> {
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        let product = ProductRepository::fetch(conn, item.product_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("product {} not found", item.product_id)))?;
        if !product.active {
            return Err(AppError::Validation(format!(
                "product '{}' is inactive",
                product.name
            )));
        }
        let discount_percent = item.discount_percent.unwrap_or(Decimal::ZERO);
        let totals = line_totals(item.quantity, product.price, discount_percent, product.tax_rate);
        lines.push(OrderLine {
            product_id: product.id,
            product_name: product.name,
            sku: product.sku,
            quantity: item.quantity,
            unit_price: product.price,
            discount_percent,
            tax_rate: product.tax_rate,
            totals,
        });
    }
    Ok(lines)
}

/// Assemble the order with fresh rows on the caller's connection.
async fn load(conn: &mut SqliteConnection, id: OrderId) -> Result<OrderWithDetails, AppError> {
    let order = OrderRepository::fetch(conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;
    let items = OrderRepository::fetch_items(conn, id).await?;
    let history = OrderRepository::fetch_history(conn, id).await?;
    let payments = OrderRepository::fetch_payments(conn, id).await?;
    Ok(OrderWithDetails {
        order,
        items,
        history,
        payments,
    })
}

//! Order domain models: the fulfilment pipeline aggregate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use duka_core::{
    CustomerId, DeliveryType, Money, OrderId, OrderPaymentStatus, OrderStatus, PaymentMethod,
    ProductId, StaffId,
};

/// A customer order moving through the fulfilment pipeline.
///
/// Orders reserve nothing against inventory; stock moves exactly once,
/// on the transition into `delivered`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique order ID.
    pub id: OrderId,
    /// Order number (`ORD` + YYMMDD + daily sequence), unique.
    pub order_number: String,
    /// Customer, when attributed.
    pub customer_id: Option<CustomerId>,
    /// Current pipeline status.
    pub status: OrderStatus,
    /// Sum of line gross amounts.
    pub subtotal: Money,
    /// Sum of line discounts.
    pub discount_total: Money,
    /// Sum of line taxes.
    pub tax_total: Money,
    /// Delivery fee added on top of the items total.
    pub delivery_fee: Money,
    /// Items total plus delivery fee.
    pub total: Money,
    /// Pickup or delivery.
    pub delivery_type: DeliveryType,
    /// Scheduled delivery date (required for `delivery` orders).
    pub scheduled_date: Option<DateTime<Utc>>,
    /// Who is delivering.
    pub delivery_person: Option<String>,
    /// Settlement state derived from recorded payments.
    pub payment_status: OrderPaymentStatus,
    /// Optional free-text notes.
    pub notes: Option<String>,
    /// Staff who took the order.
    pub created_by: StaffId,
    /// When the order was created.
    pub created_at: DateTime<Utc>,
    /// When the order was last updated.
    pub updated_at: DateTime<Utc>,
}

/// An order line item, snapshotted at order time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    /// Order this line belongs to.
    pub order_id: OrderId,
    /// Product ordered.
    pub product_id: ProductId,
    /// Product name at order time.
    pub product_name: String,
    /// SKU at order time.
    pub sku: String,
    /// Units ordered.
    pub quantity: i64,
    /// Unit price at order time.
    pub unit_price: Money,
    /// Line discount percentage.
    pub discount_percent: Decimal,
    /// Tax rate at order time.
    pub tax_rate: Decimal,
    /// Line total (gross - discount + tax).
    pub subtotal: Money,
}

/// One entry in an order's append-only status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusChange {
    /// Order the change applies to.
    pub order_id: OrderId,
    /// Status before the change; `None` for the creation entry.
    pub from_status: Option<OrderStatus>,
    /// Status after the change.
    pub to_status: OrderStatus,
    /// Staff who made the change.
    pub changed_by: StaffId,
    /// Optional note recorded with the change.
    pub notes: Option<String>,
    /// When the change happened.
    pub changed_at: DateTime<Utc>,
}

/// A payment recorded against an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPayment {
    /// Order the payment applies to.
    pub order_id: OrderId,
    /// Payment method.
    pub method: PaymentMethod,
    /// Amount paid.
    pub amount: Money,
    /// External reference (M-Pesa receipt, card slip, ...).
    pub reference: Option<String>,
    /// Staff who recorded the payment.
    pub recorded_by: StaffId,
    /// When the payment was recorded.
    pub created_at: DateTime<Utc>,
}

/// An order with its items, status history and payments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderWithDetails {
    /// The order itself.
    #[serde(flatten)]
    pub order: Order,
    /// Line items.
    pub items: Vec<OrderItem>,
    /// Status history, oldest first.
    pub history: Vec<OrderStatusChange>,
    /// Recorded payments, oldest first.
    pub payments: Vec<OrderPayment>,
}

/// One requested line of a new order.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderItemInput {
    /// Product to order.
    pub product_id: ProductId,
    /// Units to order, positive.
    pub quantity: i64,
    /// Line discount percentage, 0-100 (default 0).
    pub discount_percent: Option<Decimal>,
}

/// Delivery details of a new order.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryInput {
    /// Pickup or delivery.
    pub delivery_type: DeliveryType,
    /// Scheduled date; required when `delivery_type` is `delivery`.
    pub scheduled_date: Option<DateTime<Utc>>,
    /// Who is delivering.
    pub delivery_person: Option<String>,
}

/// Input for creating an order.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderInput {
    /// Customer to attribute the order to.
    pub customer_id: Option<CustomerId>,
    /// Line items, non-empty, one per product.
    pub items: Vec<OrderItemInput>,
    /// Delivery details.
    pub delivery: DeliveryInput,
    /// Delivery fee (default 0).
    pub delivery_fee: Option<Money>,
    /// Optional free-text notes.
    pub notes: Option<String>,
}

/// Input for transitioning an order's status.
#[derive(Debug, Clone, Deserialize)]
pub struct TransitionOrderInput {
    /// Target status.
    pub status: OrderStatus,
    /// Optional note recorded in the history.
    pub notes: Option<String>,
}

/// Input for recording a payment against an order.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordOrderPaymentInput {
    /// Payment method.
    pub method: PaymentMethod,
    /// Amount paid, positive.
    pub amount: Money,
    /// External reference (M-Pesa receipt, card slip, ...).
    pub reference: Option<String>,
}

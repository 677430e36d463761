//! Sale domain models: the point-of-sale transaction aggregate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use duka_core::{CustomerId, Money, PaymentMethod, PaymentStatus, ProductId, SaleId, SaleStatus, StaffId};

/// A completed point-of-sale transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    /// Unique sale ID.
    pub id: SaleId,
    /// Receipt number (`RCP` + YYMMDD + daily sequence), unique.
    pub receipt_number: String,
    /// Customer, when the sale was attributed to one.
    pub customer_id: Option<CustomerId>,
    /// Lifecycle status.
    pub status: SaleStatus,
    /// Sum of line gross amounts.
    pub subtotal: Money,
    /// Sum of line discounts.
    pub discount_total: Money,
    /// Sum of line taxes.
    pub tax_total: Money,
    /// What the customer owed.
    pub total: Money,
    /// How the sale was paid.
    pub payment_method: PaymentMethod,
    /// Whether payment has settled (`credit` sales stay pending).
    pub payment_status: PaymentStatus,
    /// Amount tendered.
    pub total_paid: Money,
    /// Change returned to the customer (cash only).
    pub change: Money,
    /// Linked M-Pesa transaction, for `mpesa` sales.
    pub mpesa_checkout_request_id: Option<String>,
    /// Staff who voided the sale.
    pub voided_by: Option<StaffId>,
    /// Why the sale was voided.
    pub void_reason: Option<String>,
    /// When the sale was voided.
    pub voided_at: Option<DateTime<Utc>>,
    /// Cumulative amount refunded across all partial refunds.
    pub refunded_total: Money,
    /// Staff who performed the latest refund.
    pub refunded_by: Option<StaffId>,
    /// Reason for the latest refund.
    pub refund_reason: Option<String>,
    /// When the latest refund happened.
    pub refunded_at: Option<DateTime<Utc>>,
    /// Optional free-text notes.
    pub notes: Option<String>,
    /// Staff who rang up the sale.
    pub created_by: StaffId,
    /// When the sale was created.
    pub created_at: DateTime<Utc>,
    /// When the sale was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A sale line item, snapshotted at sale time.
///
/// Price, name and tax are copied from the product so later catalog edits
/// never rewrite history. `refunded_quantity` accumulates across partial
/// refunds and can never exceed `quantity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleItem {
    /// Sale this line belongs to.
    pub sale_id: SaleId,
    /// Product sold.
    pub product_id: ProductId,
    /// Product name at sale time.
    pub product_name: String,
    /// SKU at sale time.
    pub sku: String,
    /// Units sold.
    pub quantity: i64,
    /// Unit price at sale time.
    pub unit_price: Money,
    /// Line discount percentage.
    pub discount_percent: Decimal,
    /// Tax rate at sale time.
    pub tax_rate: Decimal,
    /// Line total (gross - discount + tax).
    pub subtotal: Money,
    /// Units already refunded from this line.
    pub refunded_quantity: i64,
}

/// A sale together with its line items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleWithItems {
    /// The sale itself.
    #[serde(flatten)]
    pub sale: Sale,
    /// Line items.
    pub items: Vec<SaleItem>,
}

/// One requested line of a new sale.
#[derive(Debug, Clone, Deserialize)]
pub struct SaleItemInput {
    /// Product to sell.
    pub product_id: ProductId,
    /// Units to sell, positive.
    pub quantity: i64,
    /// Line discount percentage, 0-100 (default 0).
    pub discount_percent: Option<Decimal>,
}

/// Payment details of a new sale.
#[derive(Debug, Clone, Deserialize)]
pub struct SalePaymentInput {
    /// Payment method.
    pub method: PaymentMethod,
    /// Amount tendered (cash/card).
    pub total_paid: Option<Money>,
    /// Successful M-Pesa transaction to settle against (`mpesa` only).
    pub checkout_request_id: Option<String>,
}

/// Input for creating a sale (checkout).
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSaleInput {
    /// Customer to attribute the sale to.
    pub customer_id: Option<CustomerId>,
    /// Line items, non-empty, one per product.
    pub items: Vec<SaleItemInput>,
    /// Payment details.
    pub payment: SalePaymentInput,
    /// Optional free-text notes.
    pub notes: Option<String>,
}

/// Input for voiding a sale.
#[derive(Debug, Clone, Deserialize)]
pub struct VoidSaleInput {
    /// Why the sale is being voided.
    pub reason: String,
}

/// One line of a refund request.
#[derive(Debug, Clone, Deserialize)]
pub struct RefundItemInput {
    /// Product to refund.
    pub product_id: ProductId,
    /// Units to refund, positive.
    pub quantity: i64,
}

/// Input for refunding part or all of a sale.
#[derive(Debug, Clone, Deserialize)]
pub struct RefundSaleInput {
    /// Lines to refund.
    pub items: Vec<RefundItemInput>,
    /// Why the refund is happening.
    pub reason: String,
}

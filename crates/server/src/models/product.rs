//! Product catalog domain models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use duka_core::{Money, ProductId};

/// A catalog product with its live stock level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    /// Unique product ID.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Stock-keeping unit, unique across the catalog.
    pub sku: String,
    /// Optional description.
    pub description: Option<String>,
    /// Optional category label.
    pub category: Option<String>,
    /// Current selling price.
    pub price: Money,
    /// VAT percentage applied at sale time (e.g. 16).
    pub tax_rate: Decimal,
    /// Units on hand. Changes only through recorded stock movements.
    pub current_stock: i64,
    /// Minimum stock level before the product counts as low.
    pub min_stock: i64,
    /// Explicit reorder threshold; falls back to `min_stock` when unset.
    pub reorder_point: Option<i64>,
    /// Whether sales may drive stock negative.
    pub allow_backorder: bool,
    /// Whether stock is tracked at all (services, misc items: false).
    pub track_inventory: bool,
    /// Lifetime units sold.
    pub total_sold: i64,
    /// Lifetime revenue.
    pub total_revenue: Money,
    /// When the product last appeared on a sale.
    pub last_sold_at: Option<DateTime<Utc>>,
    /// Whether the product is available for sale.
    pub active: bool,
    /// When the product was created.
    pub created_at: DateTime<Utc>,
    /// When the product was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Whether stock has reached the reorder threshold.
    ///
    /// Only meaningful for tracked, active products.
    #[must_use]
    pub fn needs_reorder(&self) -> bool {
        self.track_inventory
            && self.active
            && self.current_stock <= self.reorder_point.unwrap_or(self.min_stock)
    }
}

/// Input for creating a new product.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProductInput {
    /// Display name.
    pub name: String,
    /// Stock-keeping unit.
    pub sku: String,
    /// Optional description.
    pub description: Option<String>,
    /// Optional category label.
    pub category: Option<String>,
    /// Selling price.
    pub price: Money,
    /// VAT percentage (default 16).
    pub tax_rate: Option<Decimal>,
    /// Opening stock, recorded as a `purchase` movement.
    pub initial_stock: Option<i64>,
    /// Minimum stock level (default 0).
    pub min_stock: Option<i64>,
    /// Explicit reorder threshold.
    pub reorder_point: Option<i64>,
    /// Whether sales may drive stock negative (default false).
    pub allow_backorder: Option<bool>,
    /// Whether stock is tracked (default true).
    pub track_inventory: Option<bool>,
}

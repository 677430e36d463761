//! Customer domain models: loyalty and store credit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use duka_core::{CustomerId, LoyaltyTier, Money, PhoneNumber};

/// A registered customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    /// Unique customer ID.
    pub id: CustomerId,
    /// Customer name.
    pub name: String,
    /// Canonical phone number (254XXXXXXXXX), unique when present.
    pub phone: Option<PhoneNumber>,
    /// Optional email address.
    pub email: Option<String>,
    /// Maximum store credit the customer may carry.
    pub credit_limit: Money,
    /// Outstanding store credit.
    pub credit_balance: Money,
    /// Lifetime number of sales and delivered orders.
    pub total_orders: i64,
    /// Lifetime spend.
    pub total_spent: Money,
    /// Accumulated loyalty points.
    pub loyalty_points: i64,
    /// Current loyalty tier, recomputed from lifetime totals.
    pub loyalty_tier: LoyaltyTier,
    /// When the customer was created.
    pub created_at: DateTime<Utc>,
    /// When the customer was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    /// Store credit still available to this customer.
    #[must_use]
    pub fn available_credit(&self) -> Money {
        self.credit_limit - self.credit_balance
    }
}

/// Input for creating a new customer.
///
/// The phone arrives as free-form text and is normalized by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCustomerInput {
    /// Customer name.
    pub name: String,
    /// Phone number in any accepted Kenyan format.
    pub phone: Option<String>,
    /// Optional email address.
    pub email: Option<String>,
    /// Store credit limit (default 0).
    pub credit_limit: Option<Money>,
}

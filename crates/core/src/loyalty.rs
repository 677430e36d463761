//! Customer loyalty tiers and points.

use rust_decimal::prelude::ToPrimitive;

use crate::types::money::Money;
use crate::types::status::LoyaltyTier;

/// Spend in whole shillings that earns one loyalty point.
pub const SHILLINGS_PER_POINT: i64 = 100;

impl LoyaltyTier {
    /// Lifetime spend and order count required for this tier.
    #[must_use]
    pub fn thresholds(self) -> (Money, i64) {
        match self {
            Self::Bronze => (Money::ZERO, 0),
            Self::Silver => (Money::from_major(50_000), 10),
            Self::Gold => (Money::from_major(150_000), 25),
            Self::Platinum => (Money::from_major(300_000), 50),
        }
    }

    /// The tier a customer qualifies for.
    ///
    /// Picks the highest tier whose spend *and* order-count thresholds are
    /// both met. Tiers are recomputed from lifetime totals after every
    /// qualifying sale or delivered order, so they can move up but never
    /// decay on their own.
    #[must_use]
    pub fn for_totals(total_spent: Money, total_orders: i64) -> Self {
        [Self::Platinum, Self::Gold, Self::Silver]
            .into_iter()
            .find(|tier| {
                let (spend, orders) = tier.thresholds();
                total_spent >= spend && total_orders >= orders
            })
            .unwrap_or(Self::Bronze)
    }
}

/// Loyalty points earned for an amount spent.
///
/// One point per whole multiple of [`SHILLINGS_PER_POINT`]; fractional
/// remainders earn nothing.
#[must_use]
pub fn points_for(amount: Money) -> i64 {
    amount.amount().floor().to_i64().map_or(0, |units| {
        if units <= 0 {
            0
        } else {
            units / SHILLINGS_PER_POINT
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(s: &str) -> Money {
        s.parse().unwrap_or(Money::ZERO)
    }

    #[test]
    fn test_tier_requires_both_thresholds() {
        // Big spender, few orders: spend alone is not enough
        assert_eq!(
            LoyaltyTier::for_totals(money("400000"), 5),
            LoyaltyTier::Bronze
        );
        // Many orders, low spend: also not enough
        assert_eq!(
            LoyaltyTier::for_totals(money("10000"), 60),
            LoyaltyTier::Bronze
        );
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(
            LoyaltyTier::for_totals(money("50000"), 10),
            LoyaltyTier::Silver
        );
        assert_eq!(
            LoyaltyTier::for_totals(money("49999.99"), 10),
            LoyaltyTier::Bronze
        );
        assert_eq!(
            LoyaltyTier::for_totals(money("150000"), 25),
            LoyaltyTier::Gold
        );
        assert_eq!(
            LoyaltyTier::for_totals(money("300000"), 50),
            LoyaltyTier::Platinum
        );
    }

    #[test]
    fn test_highest_qualifying_tier_wins() {
        assert_eq!(
            LoyaltyTier::for_totals(money("1000000"), 200),
            LoyaltyTier::Platinum
        );
        // Qualifies for silver and gold, not platinum
        assert_eq!(
            LoyaltyTier::for_totals(money("200000"), 30),
            LoyaltyTier::Gold
        );
    }

    #[test]
    fn test_points_per_hundred() {
        assert_eq!(points_for(money("99.99")), 0);
        assert_eq!(points_for(money("100")), 1);
        assert_eq!(points_for(money("250")), 2);
        assert_eq!(points_for(money("208.8")), 2);
    }

    #[test]
    fn test_points_never_negative() {
        assert_eq!(points_for(money("-500")), 0);
    }
}

//! Sale line and total arithmetic.
//!
//! Totals are always derived from the line items, never hand-edited. The
//! discount applies to the gross line amount and tax applies to the
//! *discounted* amount:
//!
//! ```text
//! gross    = unit_price * quantity
//! discount = gross * discount_percent / 100
//! tax      = (gross - discount) * tax_rate / 100
//! total    = gross - discount + tax
//! ```
//!
//! Every component is rounded to 2 decimal places before the line total is
//! assembled, so `total == gross - discount + tax` holds exactly on the
//! rounded values.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::money::Money;
use crate::types::status::SaleStatus;

/// Computed amounts for a single line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineTotals {
    /// `unit_price * quantity` before discount and tax.
    pub gross: Money,
    /// Discount amount (not percent).
    pub discount: Money,
    /// Tax amount, computed on the discounted amount.
    pub tax: Money,
    /// What the customer pays for this line.
    pub total: Money,
}

/// Aggregated amounts for a whole sale or order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleTotals {
    /// Sum of line gross amounts.
    pub subtotal: Money,
    /// Sum of line discounts.
    pub discount_total: Money,
    /// Sum of line taxes.
    pub tax_total: Money,
    /// Sum of line totals.
    pub total: Money,
}

/// Compute the amounts for one line item.
///
/// `discount_percent` and `tax_rate` are percentages (e.g. `16` for 16%).
/// Quantity and rate validation belongs to the caller; this function only
/// does arithmetic.
#[must_use]
pub fn line_totals(
    quantity: i64,
    unit_price: Money,
    discount_percent: Decimal,
    tax_rate: Decimal,
) -> LineTotals {
    let gross = unit_price.amount() * Decimal::from(quantity);
    let discount = gross * discount_percent / Decimal::ONE_HUNDRED;
    let taxable = gross - discount;
    let tax = taxable * tax_rate / Decimal::ONE_HUNDRED;

    let gross = Money::new(gross).rounded();
    let discount = Money::new(discount).rounded();
    let tax = Money::new(tax).rounded();

    LineTotals {
        gross,
        discount,
        tax,
        total: gross - discount + tax,
    }
}

/// Aggregate line totals into sale totals.
#[must_use]
pub fn sale_totals<'a, I>(lines: I) -> SaleTotals
where
    I: IntoIterator<Item = &'a LineTotals>,
{
    let mut totals = SaleTotals {
        subtotal: Money::ZERO,
        discount_total: Money::ZERO,
        tax_total: Money::ZERO,
        total: Money::ZERO,
    };

    for line in lines {
        totals.subtotal += line.gross;
        totals.discount_total += line.discount;
        totals.tax_total += line.tax;
        totals.total += line.total;
    }

    totals
}

/// Refund amount for part of a line.
///
/// Proportional to the line total, so discount and tax are refunded in the
/// same ratio they were charged: `(line_total / line_quantity) *
/// refund_quantity`, rounded to 2 decimal places.
#[must_use]
pub fn refund_amount(line_total: Money, line_quantity: i64, refund_quantity: i64) -> Money {
    if line_quantity <= 0 {
        return Money::ZERO;
    }

    let per_unit = line_total.amount() / Decimal::from(line_quantity);
    Money::new(per_unit * Decimal::from(refund_quantity)).rounded()
}

/// Sale status after a refund, given the cumulative refunded amount.
///
/// Cumulative refunds at or above the sale total close the sale as
/// `refunded`; anything less is a `partial_refund`.
#[must_use]
pub fn status_after_refund(refunded_total: Money, sale_total: Money) -> SaleStatus {
    if refunded_total >= sale_total {
        SaleStatus::Refunded
    } else {
        SaleStatus::PartialRefund
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn money(s: &str) -> Money {
        s.parse().unwrap()
    }

    #[test]
    fn test_line_totals_discount_then_tax() {
        // qty 2 @ 100, 10% discount, 16% tax:
        // gross 200, discount 20, taxable 180, tax 28.8, total 208.8
        let line = line_totals(2, money("100"), Decimal::from(10), Decimal::from(16));

        assert_eq!(line.gross, money("200"));
        assert_eq!(line.discount, money("20"));
        assert_eq!(line.tax, money("28.8"));
        assert_eq!(line.total, money("208.8"));
    }

    #[test]
    fn test_line_totals_no_discount_no_tax() {
        let line = line_totals(3, money("50"), Decimal::ZERO, Decimal::ZERO);

        assert_eq!(line.gross, money("150"));
        assert_eq!(line.discount, Money::ZERO);
        assert_eq!(line.tax, Money::ZERO);
        assert_eq!(line.total, money("150"));
    }

    #[test]
    fn test_line_totals_rounding_consistency() {
        // Awkward unit price; the identity total = gross - discount + tax
        // must hold on the rounded components.
        let line = line_totals(3, money("33.33"), Decimal::from(7), Decimal::from(16));

        assert_eq!(line.total, line.gross - line.discount + line.tax);
    }

    #[test]
    fn test_sale_totals_aggregation() {
        let a = line_totals(2, money("100"), Decimal::from(10), Decimal::from(16));
        let b = line_totals(1, money("50"), Decimal::ZERO, Decimal::from(16));

        let totals = sale_totals([a, b].iter());

        assert_eq!(totals.subtotal, money("250"));
        assert_eq!(totals.discount_total, money("20"));
        assert_eq!(totals.tax_total, money("36.8"));
        assert_eq!(totals.total, money("266.8"));
    }

    #[test]
    fn test_refund_amount_proportional() {
        // Line total 208.8 for qty 2 -> refunding 1 returns 104.4
        assert_eq!(refund_amount(money("208.8"), 2, 1), money("104.4"));
        // Refunding everything returns the full line total
        assert_eq!(refund_amount(money("208.8"), 2, 2), money("208.8"));
    }

    #[test]
    fn test_refund_amount_rounds() {
        // 100 / 3 = 33.333... -> 33.33 per unit
        assert_eq!(refund_amount(money("100"), 3, 1), money("33.33"));
        assert_eq!(refund_amount(money("100"), 3, 2), money("66.67"));
    }

    #[test]
    fn test_refund_amount_zero_quantity_line() {
        assert_eq!(refund_amount(money("100"), 0, 1), Money::ZERO);
    }

    #[test]
    fn test_status_after_refund() {
        assert_eq!(
            status_after_refund(money("100"), money("208.8")),
            SaleStatus::PartialRefund
        );
        assert_eq!(
            status_after_refund(money("208.8"), money("208.8")),
            SaleStatus::Refunded
        );
        assert_eq!(
            status_after_refund(money("210"), money("208.8")),
            SaleStatus::Refunded
        );
    }
}

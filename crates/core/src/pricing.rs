//! Cart pricing.
//!
//! [`summarize`] turns a list of cart lines into a [`PricingSummary`]. It is
//! deterministic and side-effect free; callers re-run it after every cart
//! mutation instead of patching a previous summary.

use rust_decimal::Decimal;

use crate::types::price::to_money;
use crate::types::{CartLine, PricingSummary};

/// Orders whose discounted total is below this amount pay for delivery.
pub const FREE_DELIVERY_THRESHOLD: Decimal = Decimal::from_parts(500, 0, 0, false, 0);

/// Delivery fee charged below [`FREE_DELIVERY_THRESHOLD`].
pub const DELIVERY_FEE: Decimal = Decimal::from_parts(90, 0, 0, false, 0);

/// Delivery fee for a given discounted total.
#[must_use]
pub fn delivery_price(total_after_discount: Decimal) -> Decimal {
    if total_after_discount < FREE_DELIVERY_THRESHOLD {
        to_money(DELIVERY_FEE)
    } else {
        to_money(Decimal::ZERO)
    }
}

/// Compute the monetary summary of a cart.
///
/// Line totals are accumulated at full precision and rounded to two fraction
/// digits only once, when the summary is produced.
#[must_use]
pub fn summarize(lines: &[CartLine]) -> PricingSummary {
    if lines.is_empty() {
        return PricingSummary::zero();
    }

    let (without, after, discount) = lines.iter().fold(
        (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
        |(without, after, discount), line| {
            let unit = &line.unit_pricing;
            (
                without + line.extend(unit.price_without_discount),
                after + line.extend(unit.price_after_discount),
                discount + line.extend(unit.discount_price),
            )
        },
    );

    let total_after_discount = to_money(after);
    let delivery = delivery_price(total_after_discount);

    PricingSummary {
        total_without_discount: to_money(without),
        total_after_discount,
        discount_price: to_money(discount),
        delivery_price: delivery,
        total_price: to_money(total_after_discount + delivery),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CartLineId, ProductId, UnitPricing};

    fn line(product: &str, after: Decimal, quantity: u32) -> CartLine {
        CartLine {
            id: CartLineId::new(format!("line-{product}")),
            product_ref: ProductId::new(product),
            quantity,
            unit_pricing: UnitPricing::new(after, after, Decimal::ZERO),
        }
    }

    #[test]
    fn test_empty_cart_is_all_zero() {
        let summary = summarize(&[]);
        assert_eq!(summary, PricingSummary::zero());
        assert_eq!(summary.total_price.to_string(), "0.00");
        assert_eq!(summary.delivery_price, Decimal::ZERO);
    }

    #[test]
    fn test_free_delivery_at_threshold() {
        let summary = summarize(&[line("p1", Decimal::from(200), 3)]);
        assert_eq!(summary.total_after_discount.to_string(), "600.00");
        assert_eq!(summary.delivery_price, Decimal::ZERO);
        assert_eq!(summary.total_price.to_string(), "600.00");
    }

    #[test]
    fn test_delivery_charged_just_below_threshold() {
        let summary = summarize(&[line("p1", Decimal::new(49_999, 2), 1)]);
        assert_eq!(summary.total_after_discount.to_string(), "499.99");
        assert_eq!(summary.delivery_price.to_string(), "90.00");
        assert_eq!(summary.total_price.to_string(), "589.99");
    }

    #[test]
    fn test_no_delivery_exactly_at_threshold() {
        let summary = summarize(&[line("p1", Decimal::from(250), 2)]);
        assert_eq!(summary.total_after_discount.to_string(), "500.00");
        assert_eq!(summary.delivery_price.to_string(), "0.00");
        assert_eq!(summary.total_price.to_string(), "500.00");
    }

    #[test]
    fn test_rounds_once_not_per_line() {
        // 3 x 0.335 = 1.005 -> 1.01; rounding per line would give 3 x 0.34 = 1.02
        let lines = [
            line("p1", Decimal::new(335, 3), 1),
            line("p2", Decimal::new(335, 3), 1),
            line("p3", Decimal::new(335, 3), 1),
        ];
        let summary = summarize(&lines);
        assert_eq!(summary.total_after_discount.to_string(), "1.01");
    }

    #[test]
    fn test_all_totals_accumulate() {
        let lines = [
            CartLine {
                id: CartLineId::new("a"),
                product_ref: ProductId::new("p1"),
                quantity: 2,
                unit_pricing: UnitPricing::new(
                    Decimal::from(300),
                    Decimal::from(270),
                    Decimal::from(30),
                ),
            },
            CartLine {
                id: CartLineId::new("b"),
                product_ref: ProductId::new("p2"),
                quantity: 1,
                unit_pricing: UnitPricing::new(
                    Decimal::from(80),
                    Decimal::from(80),
                    Decimal::ZERO,
                ),
            },
        ];
        let summary = summarize(&lines);
        assert_eq!(summary.total_without_discount, Decimal::from(680));
        assert_eq!(summary.total_after_discount, Decimal::from(620));
        assert_eq!(summary.discount_price, Decimal::from(60));
        assert_eq!(summary.delivery_price, Decimal::ZERO);
        assert_eq!(summary.total_price, Decimal::from(620));
    }
}

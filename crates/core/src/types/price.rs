//! Decimal price types for cart lines and cart summaries.
//!
//! All amounts use [`Decimal`] so that totals never pick up binary floating
//! point error. Amounts are in the store's standard currency unit.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of fraction digits carried by every summary amount.
pub const MONEY_SCALE: u32 = 2;

/// Round half away from zero to `dp` fraction digits.
///
/// For the non-negative amounts handled here this matches the storefront's
/// historical "round half up" behavior.
#[must_use]
pub fn round_half_up(amount: Decimal, dp: u32) -> Decimal {
    amount.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Round to two fraction digits and fix the scale so `0` renders as `0.00`.
#[must_use]
pub fn to_money(amount: Decimal) -> Decimal {
    let mut rounded = round_half_up(amount, MONEY_SCALE);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// Errors raised when pricing inputs would make a cart total negative.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    /// A list price below zero.
    #[error("price cannot be negative: {0}")]
    NegativePrice(Decimal),
    /// A discount percentage outside `0..=100`.
    #[error("discount must be between 0 and 100 percent: {0}")]
    DiscountOutOfRange(Decimal),
    /// Unit amounts that are negative or discount past the list price.
    #[error(
        "inconsistent unit pricing: without={without} after={after} discount={discount}"
    )]
    Inconsistent {
        without: Decimal,
        after: Decimal,
        discount: Decimal,
    },
}

/// Per-unit pricing attached to a cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitPricing {
    /// List price before any discount.
    pub price_without_discount: Decimal,
    /// Price the customer pays per unit.
    pub price_after_discount: Decimal,
    /// Discount granted per unit.
    pub discount_price: Decimal,
}

impl UnitPricing {
    /// Create unit pricing from explicit amounts.
    #[must_use]
    pub const fn new(
        price_without_discount: Decimal,
        price_after_discount: Decimal,
        discount_price: Decimal,
    ) -> Self {
        Self {
            price_without_discount,
            price_after_discount,
            discount_price,
        }
    }

    /// Derive unit pricing from a list price and a discount percentage.
    ///
    /// The discounted price and the discount amount are each rounded to a
    /// whole currency unit; the list price is kept as-is.
    ///
    /// ```rust
    /// # use plantorium_core::UnitPricing;
    /// # use rust_decimal::Decimal;
    /// let pricing = UnitPricing::from_list_price(Decimal::from(199), Decimal::from(15)).unwrap();
    /// assert_eq!(pricing.price_after_discount, Decimal::from(169));
    /// assert_eq!(pricing.discount_price, Decimal::from(30));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `PricingError` for a negative price or a discount outside
    /// `0..=100`.
    pub fn from_list_price(price: Decimal, discount_percent: Decimal) -> Result<Self, PricingError> {
        if price < Decimal::ZERO {
            return Err(PricingError::NegativePrice(price));
        }
        if discount_percent < Decimal::ZERO || discount_percent > Decimal::ONE_HUNDRED {
            return Err(PricingError::DiscountOutOfRange(discount_percent));
        }

        let discount = price * discount_percent / Decimal::ONE_HUNDRED;
        Ok(Self {
            price_without_discount: price,
            price_after_discount: round_half_up(price - discount, 0),
            discount_price: round_half_up(discount, 0),
        })
    }

    /// Check that every amount is non-negative and the discounted price does
    /// not exceed the list price.
    ///
    /// # Errors
    ///
    /// Returns `PricingError::Inconsistent` otherwise.
    pub fn validate(&self) -> Result<(), PricingError> {
        let non_negative = [
            self.price_without_discount,
            self.price_after_discount,
            self.discount_price,
        ]
        .iter()
        .all(|amount| *amount >= Decimal::ZERO);

        if non_negative && self.price_after_discount <= self.price_without_discount {
            Ok(())
        } else {
            Err(PricingError::Inconsistent {
                without: self.price_without_discount,
                after: self.price_after_discount,
                discount: self.discount_price,
            })
        }
    }
}

/// Monetary summary of a whole cart.
///
/// Always derived from the cart lines by [`crate::pricing::summarize`];
/// never edited field by field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingSummary {
    pub total_without_discount: Decimal,
    pub total_after_discount: Decimal,
    pub discount_price: Decimal,
    pub delivery_price: Decimal,
    pub total_price: Decimal,
}

impl PricingSummary {
    /// The summary of an empty cart.
    #[must_use]
    pub fn zero() -> Self {
        let zero = to_money(Decimal::ZERO);
        Self {
            total_without_discount: zero,
            total_after_discount: zero,
            discount_price: zero,
            delivery_price: zero,
            total_price: zero,
        }
    }
}

impl Default for PricingSummary {
    fn default() -> Self {
        Self::zero()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_list_price_rounds_half_up() {
        // 25% of 250 = 62.5 -> 63, 250 - 62.5 = 187.5 -> 188
        let pricing = UnitPricing::from_list_price(Decimal::from(250), Decimal::from(25)).unwrap();
        assert_eq!(pricing.price_without_discount, Decimal::from(250));
        assert_eq!(pricing.price_after_discount, Decimal::from(188));
        assert_eq!(pricing.discount_price, Decimal::from(63));
    }

    #[test]
    fn test_from_list_price_without_discount() {
        let pricing = UnitPricing::from_list_price(Decimal::from(120), Decimal::ZERO).unwrap();
        assert_eq!(pricing.price_after_discount, Decimal::from(120));
        assert_eq!(pricing.discount_price, Decimal::ZERO);
    }

    #[test]
    fn test_from_list_price_bounds() {
        let full = UnitPricing::from_list_price(Decimal::from(80), Decimal::ONE_HUNDRED).unwrap();
        assert_eq!(full.price_after_discount, Decimal::ZERO);
        assert_eq!(full.discount_price, Decimal::from(80));

        assert_eq!(
            UnitPricing::from_list_price(Decimal::from(100), Decimal::from(150)),
            Err(PricingError::DiscountOutOfRange(Decimal::from(150)))
        );
        assert_eq!(
            UnitPricing::from_list_price(Decimal::from(100), Decimal::from(-5)),
            Err(PricingError::DiscountOutOfRange(Decimal::from(-5)))
        );
        assert_eq!(
            UnitPricing::from_list_price(Decimal::from(-40), Decimal::ZERO),
            Err(PricingError::NegativePrice(Decimal::from(-40)))
        );
    }

    #[test]
    fn test_validate_rejects_negative_or_inverted_amounts() {
        let ok = UnitPricing::new(Decimal::from(100), Decimal::from(80), Decimal::from(20));
        assert!(ok.validate().is_ok());

        let negative = UnitPricing::new(Decimal::from(100), Decimal::from(-50), Decimal::from(150));
        assert!(matches!(negative.validate(), Err(PricingError::Inconsistent { .. })));

        let inverted = UnitPricing::new(Decimal::from(80), Decimal::from(100), Decimal::ZERO);
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_to_money_fixes_scale() {
        assert_eq!(to_money(Decimal::ZERO).to_string(), "0.00");
        assert_eq!(to_money(Decimal::new(499_995, 3)).to_string(), "500.00");
        assert_eq!(to_money(Decimal::new(12_344, 3)).to_string(), "12.34");
    }

    #[test]
    fn test_unit_pricing_serializes_camel_case() {
        let pricing = UnitPricing::new(Decimal::from(10), Decimal::from(9), Decimal::from(1));
        let json = serde_json::to_value(pricing).expect("serialize");
        assert!(json.get("priceWithoutDiscount").is_some());
        assert!(json.get("priceAfterDiscount").is_some());
        assert!(json.get("discountPrice").is_some());
    }

    #[test]
    fn test_unit_pricing_accepts_numeric_json() {
        let json = r#"{"priceWithoutDiscount": 300, "priceAfterDiscount": 270, "discountPrice": 30}"#;
        let pricing: UnitPricing = serde_json::from_str(json).expect("deserialize");
        assert_eq!(pricing.price_after_discount, Decimal::from(270));
    }
}

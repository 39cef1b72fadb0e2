//! Cart line and cart snapshot types.
//!
//! A cart can live in two stores: an anonymous list kept on the device and
//! the authenticated list kept by the backend. Both normalise into the same
//! [`CartLine`] shape so that pricing never has to care where a line came from.

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{CartLineId, ProductId};
use super::price::{PricingError, PricingSummary, UnitPricing};
use crate::pricing::summarize;

/// A product as presented to the cart by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    #[serde(alias = "_id")]
    pub id: ProductId,
    #[serde(default)]
    pub name: String,
    /// List price per unit.
    pub price: Decimal,
    /// Discount percentage (0-100).
    #[serde(default)]
    pub discount: Decimal,
}

impl Product {
    /// Create a product reference with pricing information.
    #[must_use]
    pub fn new(id: impl Into<ProductId>, price: Decimal, discount: Decimal) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            price,
            discount,
        }
    }

    /// Attach a display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Unit pricing for one unit of this product.
    ///
    /// # Errors
    ///
    /// Returns `PricingError` for a negative price or a discount outside
    /// `0..=100`.
    pub fn unit_pricing(&self) -> Result<UnitPricing, PricingError> {
        UnitPricing::from_list_price(self.price, self.discount)
    }
}

/// One line of a cart: a product and how many units of it.
///
/// Within a single cart list there is at most one line per `product_ref`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub id: CartLineId,
    pub product_ref: ProductId,
    pub quantity: u32,
    pub unit_pricing: UnitPricing,
}

impl CartLine {
    /// Line total for one pricing field.
    pub(crate) fn extend(&self, unit: Decimal) -> Decimal {
        unit * Decimal::from(self.quantity)
    }
}

/// Which store is authoritative for the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartMode {
    /// Anonymous cart persisted on the device.
    #[default]
    Local,
    /// Authenticated cart held by the backend.
    Remote,
}

impl fmt::Display for CartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// The active cart together with its derived pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    pub mode: CartMode,
    pub lines: Vec<CartLine>,
    pub summary: PricingSummary,
}

impl CartSnapshot {
    /// Build a snapshot, recomputing the summary from `lines`.
    #[must_use]
    pub fn new(mode: CartMode, lines: Vec<CartLine>) -> Self {
        let summary = summarize(&lines);
        Self {
            mode,
            lines,
            summary,
        }
    }

    /// Number of distinct lines (the cart badge count).
    #[must_use]
    pub const fn item_count(&self) -> usize {
        self.lines.len()
    }

    /// Find the line holding `product`, if any.
    #[must_use]
    pub fn line_for(&self, product: &ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|line| &line.product_ref == product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_accepts_backend_id_key() {
        let json = r#"{"_id": "p1", "name": "Monstera", "price": 450, "discount": 10}"#;
        let product: Product = serde_json::from_str(json).expect("deserialize");
        assert_eq!(product.id, ProductId::new("p1"));
        assert_eq!(
            product.unit_pricing().expect("valid pricing").price_after_discount,
            Decimal::from(405)
        );
    }

    #[test]
    fn test_product_with_bad_discount_has_no_pricing() {
        let product = Product::new("p1", Decimal::from(100), Decimal::from(150));
        assert!(product.unit_pricing().is_err());
    }

    #[test]
    fn test_snapshot_recomputes_summary() {
        let line = CartLine {
            id: CartLineId::new("l1"),
            product_ref: ProductId::new("p1"),
            quantity: 2,
            unit_pricing: UnitPricing::new(Decimal::from(100), Decimal::from(90), Decimal::from(10)),
        };
        let snapshot = CartSnapshot::new(CartMode::Local, vec![line]);
        assert_eq!(snapshot.item_count(), 1);
        assert_eq!(snapshot.summary.total_after_discount, Decimal::from(180));
        assert!(snapshot.line_for(&ProductId::new("p1")).is_some());
        assert!(snapshot.line_for(&ProductId::new("p2")).is_none());
    }

    #[test]
    fn test_cart_mode_display() {
        assert_eq!(CartMode::Local.to_string(), "local");
        assert_eq!(CartMode::Remote.to_string(), "remote");
        assert_eq!(CartMode::default(), CartMode::Local);
    }
}

//! Backend cart line shapes, normalised into [`CartLine`] at the boundary.
//!
//! The backend is loose about how it sends a line: the product may be under
//! `plant` or `product`, either populated or as a bare ID, and pricing may be
//! attached to the line, to the product, or only implied by the product's
//! list price and discount.

use plantorium_core::{CartLine, CartLineId, PricingError, ProductId, UnitPricing};
use rust_decimal::Decimal;
use serde::Deserialize;

use super::CartError;

#[derive(Debug, Deserialize)]
pub(crate) struct RemoteCartLine {
    #[serde(rename = "_id", alias = "id")]
    id: String,
    #[serde(rename = "plant", alias = "product")]
    product: RemoteProduct,
    quantity: u32,
    #[serde(default)]
    pricing: Option<RemotePricing>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RemoteProduct {
    Populated(RemoteProductDoc),
    Bare(String),
}

#[derive(Debug, Deserialize)]
struct RemoteProductDoc {
    #[serde(rename = "_id", alias = "id")]
    id: String,
    #[serde(default)]
    pricing: Option<RemotePricing>,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    discount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemotePricing {
    price_without_discount: Decimal,
    price_after_discount: Decimal,
    #[serde(default)]
    discount_price: Option<Decimal>,
}

impl TryFrom<RemotePricing> for UnitPricing {
    type Error = PricingError;

    fn try_from(p: RemotePricing) -> Result<Self, Self::Error> {
        let discount = p
            .discount_price
            .unwrap_or(p.price_without_discount - p.price_after_discount);
        let pricing = Self::new(p.price_without_discount, p.price_after_discount, discount);
        pricing.validate()?;
        Ok(pricing)
    }
}

/// Either a single line or the full line list; mutations answer with one,
/// listings with the other.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RemoteLines {
    Many(Vec<RemoteCartLine>),
    One(Box<RemoteCartLine>),
}

impl TryFrom<RemoteCartLine> for CartLine {
    type Error = CartError;

    fn try_from(line: RemoteCartLine) -> Result<Self, Self::Error> {
        let invalid = |e: PricingError| CartError::Decode(format!("cart line {}: {e}", line.id));

        let (product_ref, product_pricing) = match line.product {
            RemoteProduct::Bare(id) => (id, None),
            RemoteProduct::Populated(doc) => {
                let pricing = match (doc.pricing, doc.price) {
                    (Some(pricing), _) => Some(UnitPricing::try_from(pricing).map_err(invalid)?),
                    (None, Some(price)) => Some(
                        UnitPricing::from_list_price(price, doc.discount.unwrap_or(Decimal::ZERO))
                            .map_err(invalid)?,
                    ),
                    (None, None) => None,
                };
                (doc.id, pricing)
            }
        };

        let unit_pricing = match line.pricing {
            Some(pricing) => UnitPricing::try_from(pricing).map_err(invalid)?,
            None => product_pricing.ok_or_else(|| {
                CartError::Decode(format!("cart line {} carries no pricing", line.id))
            })?,
        };

        Ok(Self {
            id: CartLineId::new(line.id),
            product_ref: ProductId::new(product_ref),
            quantity: line.quantity,
            unit_pricing,
        })
    }
}

/// Normalise every line, failing on the first one without valid pricing.
pub(crate) fn normalize_all(lines: Vec<RemoteCartLine>) -> Result<Vec<CartLine>, CartError> {
    lines.into_iter().map(CartLine::try_from).collect()
}

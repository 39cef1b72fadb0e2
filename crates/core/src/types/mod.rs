//! Core types for the Plantorium client.
//!
//! This module provides type-safe wrappers for cart and session concepts.

pub mod cart;
pub mod credential;
pub mod id;
pub mod price;

pub use cart::{CartLine, CartMode, CartSnapshot, Product};
pub use credential::{CredentialError, CredentialPair};
pub use id::*;
pub use price::{PricingError, PricingSummary, UnitPricing};

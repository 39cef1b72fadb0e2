//! Plantorium Core - Shared types library.
//!
//! This crate provides the types used by every Plantorium client component:
//! - `plantorium-client` - Authenticated request pipeline and cart reconciliation
//! - `plantorium-cli` - Command-line front-end
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no storage
//! access, no HTTP clients. Cart pricing lives here because it is a pure
//! function of the cart lines.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, unit pricing, cart lines, and credentials
//! - [`pricing`] - Monetary summary of a cart line list

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod pricing;
pub mod types;

pub use pricing::summarize;
pub use types::*;

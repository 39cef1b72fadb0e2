//! Dual-mode cart.
//!
//! # Architecture
//!
//! - [`LocalCartStore`] - anonymous cart persisted on the device
//! - [`RemoteCart`] - authenticated cart held by the backend
//! - [`CartReconciler`] - routes each operation to the active store and
//!   migrates the anonymous cart to the backend on sign-in
//!
//! Every mutation returns a fresh [`CartSnapshot`] whose pricing summary is
//! recomputed from the full line list.

pub mod local;
pub mod reconciler;
pub mod remote;
mod wire;

use plantorium_core::{CartSnapshot, Product};
use serde::Serialize;
use thiserror::Error;

pub use local::LocalCartStore;
pub use reconciler::CartReconciler;
pub use remote::RemoteCart;

use crate::auth::AuthError;
use crate::http::{ApiResponse, ClientError, DomainError};
use crate::storage::StorageError;

/// Errors that can occur during cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// Input rejected before any mutation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Talking to the backend failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A cart line from the backend could not be normalised.
    #[error("decode error: {0}")]
    Decode(String),

    /// The local cart document could not be read or written.
    #[error("local cart storage error: {0}")]
    Storage(#[from] StorageError),

    /// The backend rejected a line on a business rule.
    #[error("rejected: {0}")]
    Rejected(DomainError),

    /// Migrating the anonymous cart stopped part-way.
    #[error("cart migration stopped after {migrated} of {total} lines: {source}")]
    Migration {
        /// Lines the backend accepted before the failure.
        migrated: usize,
        /// Lines in the anonymous cart.
        total: usize,
        /// Why the next line failed.
        #[source]
        source: Box<CartError>,
    },
}

impl CartError {
    /// Whether the user has to sign in again.
    #[must_use]
    pub fn is_session_expired(&self) -> bool {
        match self {
            Self::Client(err) => err.is_session_expired(),
            Self::Migration { source, .. } => source.is_session_expired(),
            _ => false,
        }
    }
}

impl From<AuthError> for CartError {
    fn from(err: AuthError) -> Self {
        Self::Client(ClientError::Auth(err))
    }
}

/// Result of a cart operation the active store processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartOutcome {
    /// The mutation was applied; here is the new cart.
    Applied(CartSnapshot),
    /// The backend rejected the mutation on a business rule.
    Rejected(DomainError),
}

impl CartOutcome {
    /// The new cart, if the mutation was applied.
    #[must_use]
    pub const fn snapshot(&self) -> Option<&CartSnapshot> {
        match self {
            Self::Applied(snapshot) => Some(snapshot),
            Self::Rejected(_) => None,
        }
    }
}

impl From<ApiResponse<CartSnapshot>> for CartOutcome {
    fn from(response: ApiResponse<CartSnapshot>) -> Self {
        match response {
            ApiResponse::Accepted(snapshot) => Self::Applied(snapshot),
            ApiResponse::Rejected(err) => Self::Rejected(err),
        }
    }
}

/// Summary of a completed local-to-remote migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// Lines replayed onto the backend cart.
    pub migrated: usize,
    /// The backend cart after migration.
    pub cart: CartSnapshot,
}

/// Reject quantities below one before touching any store.
pub(crate) fn validate_quantity(quantity: u32) -> Result<(), CartError> {
    if quantity == 0 {
        return Err(CartError::Validation(
            "quantity must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Reject a product whose price or discount would make a cart total
/// negative.
pub(crate) fn validate_product(product: &Product) -> Result<(), CartError> {
    product
        .unit_pricing()
        .map(|_| ())
        .map_err(|e| CartError::Validation(format!("{}: {e}", product.id)))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(matches!(
            validate_quantity(0),
            Err(CartError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_product() {
        let ok = Product::new("p1", Decimal::from(450), Decimal::from(10));
        assert!(validate_product(&ok).is_ok());

        for (price, discount) in [(100, 150), (100, -1), (-40, 0)] {
            let bad = Product::new("p2", Decimal::from(price), Decimal::from(discount));
            assert!(matches!(
                validate_product(&bad),
                Err(CartError::Validation(msg)) if msg.starts_with("p2: ")
            ));
        }
    }

    #[test]
    fn test_migration_error_display() {
        let err = CartError::Migration {
            migrated: 1,
            total: 3,
            source: Box::new(CartError::Rejected(DomainError {
                code: "OUT_OF_STOCK".to_string(),
                message: "Fiddle leaf fig is sold out".to_string(),
            })),
        };
        assert_eq!(
            err.to_string(),
            "cart migration stopped after 1 of 3 lines: rejected: OUT_OF_STOCK: Fiddle leaf fig is sold out"
        );
    }

    #[test]
    fn test_session_expiry_propagates_through_migration() {
        let err = CartError::Migration {
            migrated: 0,
            total: 2,
            source: Box::new(CartError::from(AuthError::AuthExpired)),
        };
        assert!(err.is_session_expired());
    }
}

//! Anonymous cart persisted on the device.
//!
//! The whole line list is stored as one JSON document under
//! `storage_keys::LOCAL_CART`. Local mutations never fail from the caller's
//! point of view: storage problems are logged and the cart is left as it was.

use std::sync::{Arc, Mutex, PoisonError};

use plantorium_core::{CartLine, CartLineId, CartMode, CartSnapshot, Product};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::{PersistenceAdapter, StorageError, storage_keys};

/// CRUD over the anonymous cart document.
pub struct LocalCartStore {
    storage: Arc<dyn PersistenceAdapter>,
    write: Mutex<()>,
}

impl LocalCartStore {
    /// Create a store over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn PersistenceAdapter>) -> Self {
        Self {
            storage,
            write: Mutex::new(()),
        }
    }

    /// The stored lines, or the storage error that prevented reading them.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the document cannot be read or decoded.
    pub fn try_lines(&self) -> Result<Vec<CartLine>, StorageError> {
        match self.storage.get(storage_keys::LOCAL_CART)? {
            Some(document) if !document.trim().is_empty() => Ok(serde_json::from_str(&document)?),
            _ => Ok(Vec::new()),
        }
    }

    /// The stored lines; an unreadable document reads as an empty cart.
    #[must_use]
    pub fn lines(&self) -> Vec<CartLine> {
        self.try_lines().unwrap_or_else(|e| {
            warn!(error = %e, "failed to read local cart");
            Vec::new()
        })
    }

    /// The local cart with its pricing summary.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        CartSnapshot::new(CartMode::Local, self.lines())
    }

    /// Add `quantity` units of `product`.
    ///
    /// Increments the existing line for the product, or inserts a new line
    /// with a fresh local ID and unit pricing derived from the product. A
    /// product with a negative price or a discount outside `0..=100` leaves
    /// the cart unchanged.
    pub fn add(&self, product: &Product, quantity: u32) -> CartSnapshot {
        if quantity == 0 {
            warn!(product = %product.id, "ignoring local add with zero quantity");
            return self.snapshot();
        }
        let unit_pricing = match product.unit_pricing() {
            Ok(pricing) => pricing,
            Err(e) => {
                warn!(product = %product.id, error = %e, "ignoring local add with invalid pricing");
                return self.snapshot();
            }
        };

        self.mutate("add", |lines| {
            if let Some(line) = lines.iter_mut().find(|line| line.product_ref == product.id) {
                line.quantity = line.quantity.saturating_add(quantity);
            } else {
                lines.push(CartLine {
                    id: new_line_id(),
                    product_ref: product.id.clone(),
                    quantity,
                    unit_pricing,
                });
            }
            true
        })
    }

    /// Set the quantity of line `id`.
    ///
    /// No-op unless `quantity >= 1` and the line exists. A zero quantity is
    /// never treated as a removal.
    pub fn update_quantity(&self, id: &CartLineId, quantity: u32) -> CartSnapshot {
        if quantity == 0 {
            debug!(line = %id, "ignoring local quantity update below 1");
            return self.snapshot();
        }

        self.mutate("update_quantity", |lines| {
            lines
                .iter_mut()
                .find(|line| &line.id == id)
                .map(|line| line.quantity = quantity)
                .is_some()
        })
    }

    /// Remove line `id`. An unknown ID is a no-op.
    pub fn remove(&self, id: &CartLineId) -> CartSnapshot {
        self.mutate("remove", |lines| {
            let before = lines.len();
            lines.retain(|line| &line.id != id);
            lines.len() != before
        })
    }

    /// Empty the local cart.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the empty document cannot be written.
    pub fn clear(&self) -> Result<(), StorageError> {
        let _write = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        self.save(&[])
    }

    /// Read-modify-write under the write lock. `apply` returns whether it
    /// changed anything; unchanged lists are not rewritten.
    fn mutate(&self, op: &str, apply: impl FnOnce(&mut Vec<CartLine>) -> bool) -> CartSnapshot {
        let _write = self.write.lock().unwrap_or_else(PoisonError::into_inner);

        let mut lines = match self.try_lines() {
            Ok(lines) => lines,
            Err(e) => {
                warn!(error = %e, op, "failed to read local cart, leaving it unchanged");
                return CartSnapshot::new(CartMode::Local, Vec::new());
            }
        };
        let original = lines.clone();

        if apply(&mut lines) {
            if let Err(e) = self.save(&lines) {
                warn!(error = %e, op, "failed to save local cart, leaving it unchanged");
                return CartSnapshot::new(CartMode::Local, original);
            }
            debug!(op, lines = lines.len(), "local cart updated");
        }

        CartSnapshot::new(CartMode::Local, lines)
    }

    fn save(&self, lines: &[CartLine]) -> Result<(), StorageError> {
        let document = serde_json::to_string(lines)?;
        self.storage.set(storage_keys::LOCAL_CART, &document)
    }
}

impl std::fmt::Debug for LocalCartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCartStore").finish_non_exhaustive()
    }
}

fn new_line_id() -> CartLineId {
    CartLineId::new(format!("{}{}", CartLineId::LOCAL_PREFIX, Uuid::new_v4().simple()))
}

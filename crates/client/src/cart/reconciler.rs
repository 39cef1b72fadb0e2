//! Routes cart operations to the active store and owns the local-to-remote
//! migration that runs on sign-in.
//!
//! Mode transitions:
//!
//! ```text
//!            sign_in / resume_session (migration succeeded)
//!   Local ─────────────────────────────────────────────────▶ Remote
//!     ▲                                                        │
//!     └────────────── sign_out / session expired ──────────────┘
//! ```
//!
//! A failed migration leaves the anonymous cart untouched and the mode at
//! `Local`; calling [`CartReconciler::migrate_to_remote`] again retries it.

use std::sync::{Arc, PoisonError, RwLock};

use plantorium_core::{CartLineId, CartMode, CartSnapshot, CredentialPair, Product, ProductId};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::{
    CartError, CartOutcome, LocalCartStore, MigrationReport, RemoteCart, validate_product,
};
use crate::auth::TokenCoordinator;
use crate::http::ApiResponse;

/// The cart as the application sees it.
pub struct CartReconciler {
    local: LocalCartStore,
    remote: RemoteCart,
    coordinator: Arc<TokenCoordinator>,
    mode: RwLock<CartMode>,
    migration: Mutex<()>,
}

impl CartReconciler {
    /// Create a reconciler in `Local` mode.
    #[must_use]
    pub fn new(local: LocalCartStore, remote: RemoteCart, coordinator: Arc<TokenCoordinator>) -> Self {
        Self {
            local,
            remote,
            coordinator,
            mode: RwLock::new(CartMode::Local),
            migration: Mutex::new(()),
        }
    }

    /// The coordinator holding the session credentials.
    #[must_use]
    pub const fn coordinator(&self) -> &Arc<TokenCoordinator> {
        &self.coordinator
    }

    /// Which store is currently authoritative.
    #[must_use]
    pub fn mode(&self) -> CartMode {
        *self.mode.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The active cart and its pricing summary.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        match self.mode() {
            CartMode::Local => self.local.snapshot(),
            CartMode::Remote => self.remote.snapshot(),
        }
    }

    /// Number of lines in the active cart.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.snapshot().item_count()
    }

    // =========================================================================
    // Cart operations
    // =========================================================================

    /// Add `quantity` units of `product` to the active cart.
    ///
    /// # Errors
    ///
    /// In `Remote` mode, returns `CartError::Validation` for a zero quantity
    /// or invalid product pricing, and `CartError::Client` if the request
    /// fails. `Local` mode never errors.
    pub async fn add(&self, product: &Product, quantity: u32) -> Result<CartOutcome, CartError> {
        if let Some(snapshot) = self.with_local(|local| local.add(product, quantity)).await {
            return Ok(CartOutcome::Applied(snapshot));
        }
        validate_product(product)?;
        let result = self.remote.add(&product.id, quantity).await;
        self.settle(result)
    }

    /// Set the quantity of line `id` in the active cart.
    ///
    /// # Errors
    ///
    /// Same as [`Self::add`].
    pub async fn update_quantity(
        &self,
        id: &CartLineId,
        quantity: u32,
    ) -> Result<CartOutcome, CartError> {
        if let Some(snapshot) = self
            .with_local(|local| local.update_quantity(id, quantity))
            .await
        {
            return Ok(CartOutcome::Applied(snapshot));
        }
        let result = self.remote.update_quantity(id, quantity).await;
        self.settle(result)
    }

    /// Remove line `id` from the active cart.
    ///
    /// # Errors
    ///
    /// In `Remote` mode, returns `CartError::Client` if the request fails.
    pub async fn remove(&self, id: &CartLineId) -> Result<CartOutcome, CartError> {
        if let Some(snapshot) = self.with_local(|local| local.remove(id)).await {
            return Ok(CartOutcome::Applied(snapshot));
        }
        let result = self.remote.remove(id).await;
        self.settle(result)
    }

    /// Re-fetch the server cart in `Remote` mode; the local cart otherwise.
    ///
    /// # Errors
    ///
    /// In `Remote` mode, returns `CartError` if the fetch fails.
    pub async fn refresh(&self) -> Result<CartOutcome, CartError> {
        match self.mode() {
            CartMode::Local => Ok(CartOutcome::Applied(self.local.snapshot())),
            CartMode::Remote => {
                let result = self.remote.fetch().await;
                self.settle(result)
            }
        }
    }

    /// Drop the products of a placed order from the server cart and forget
    /// the order-scoped token.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Client` if the order token cannot be removed.
    pub fn complete_order(&self, products: &[ProductId]) -> Result<CartSnapshot, CartError> {
        self.remote.discard_products(products);
        self.coordinator.clear_order_token()?;
        info!(products = products.len(), "order completed");
        Ok(self.snapshot())
    }

    // =========================================================================
    // Session transitions
    // =========================================================================

    /// Store a freshly issued session and move the anonymous cart onto it.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Client` if the session cannot be stored, or
    /// `CartError::Migration` if migration stops part-way.
    #[instrument(skip_all)]
    pub async fn sign_in(&self, pair: &CredentialPair) -> Result<MigrationReport, CartError> {
        self.coordinator.store_session(pair)?;
        self.migrate_to_remote().await
    }

    /// Pick up a stored session at start-up.
    ///
    /// Without a stored session the cart stays local. With one, any
    /// anonymous lines are migrated first; otherwise the server cart is
    /// fetched directly. An unreadable anonymous cart is left in place and
    /// not migrated.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if migration or the fetch fails.
    pub async fn resume_session(&self) -> Result<CartSnapshot, CartError> {
        if self.coordinator.session()?.is_none() {
            return Ok(self.local.snapshot());
        }

        let has_local_lines = match self.local.try_lines() {
            Ok(lines) => !lines.is_empty(),
            Err(e) => {
                warn!(error = %e, "local cart unreadable, resuming the account cart without it");
                false
            }
        };
        if has_local_lines {
            return self.migrate_to_remote().await.map(|report| report.cart);
        }

        self.set_mode(CartMode::Remote);
        match self.refresh().await? {
            CartOutcome::Applied(snapshot) => Ok(snapshot),
            CartOutcome::Rejected(err) => Err(CartError::Rejected(err)),
        }
    }

    /// Replay every anonymous line onto the server cart, in stored order.
    ///
    /// Only after every line is accepted is the anonymous cart cleared and
    /// the mode switched to `Remote`. Concurrent calls run one at a time.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Migration` if a line is rejected or its request
    /// fails. The anonymous cart is left intact and lines already accepted
    /// stay on the server, so a retry re-adds them.
    #[instrument(skip(self))]
    pub async fn migrate_to_remote(&self) -> Result<MigrationReport, CartError> {
        let _migration = self.migration.lock().await;

        let lines = self.local.try_lines()?;
        let total = lines.len();
        let mut migrated = 0;

        for line in &lines {
            let source = match self.remote.add(&line.product_ref, line.quantity).await {
                Ok(ApiResponse::Accepted(_)) => {
                    migrated += 1;
                    continue;
                }
                Ok(ApiResponse::Rejected(err)) => CartError::Rejected(err),
                Err(err) => err,
            };

            warn!(migrated, total, error = %source, "cart migration stopped");
            if source.is_session_expired() {
                self.fall_back_to_local();
            }
            return Err(CartError::Migration {
                migrated,
                total,
                source: Box::new(source),
            });
        }

        if let Err(e) = self.local.clear() {
            warn!(error = %e, "migrated cart but failed to clear the local copy");
        }
        self.set_mode(CartMode::Remote);
        info!(migrated, "cart migrated to remote");

        let cart = match self.remote.fetch().await {
            Ok(ApiResponse::Accepted(snapshot)) => snapshot,
            Ok(ApiResponse::Rejected(err)) => {
                warn!(error = %err, "remote cart fetch rejected after migration");
                self.remote.snapshot()
            }
            Err(err) => {
                if err.is_session_expired() {
                    self.fall_back_to_local();
                }
                return Err(err);
            }
        };

        Ok(MigrationReport { migrated, cart })
    }

    /// Forget the session and return to the anonymous cart.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Client` if stored credentials cannot be removed.
    /// The mode is reset regardless.
    #[instrument(skip(self))]
    pub fn sign_out(&self) -> Result<CartSnapshot, CartError> {
        self.fall_back_to_local();
        self.coordinator.clear_session()?;
        info!("signed out");
        Ok(self.local.snapshot())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Run `op` against the local store if it is active.
    ///
    /// Waits for an in-flight migration first, so no line lands in an
    /// anonymous cart that is about to be cleared.
    async fn with_local(
        &self,
        op: impl FnOnce(&LocalCartStore) -> CartSnapshot,
    ) -> Option<CartSnapshot> {
        let _migration = self.migration.lock().await;
        (self.mode() == CartMode::Local).then(|| op(&self.local))
    }

    /// Turn a remote result into an outcome, dropping to `Local` when the
    /// session has expired.
    fn settle(
        &self,
        result: Result<ApiResponse<CartSnapshot>, CartError>,
    ) -> Result<CartOutcome, CartError> {
        match result {
            Ok(response) => Ok(response.into()),
            Err(err) => {
                if err.is_session_expired() {
                    warn!(error = %err, "session expired, falling back to local cart");
                    self.fall_back_to_local();
                }
                Err(err)
            }
        }
    }

    fn fall_back_to_local(&self) {
        self.remote.clear_cache();
        self.set_mode(CartMode::Local);
    }

    fn set_mode(&self, mode: CartMode) {
        *self.mode.write().unwrap_or_else(PoisonError::into_inner) = mode;
    }
}

impl std::fmt::Debug for CartReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartReconciler")
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use futures::future::BoxFuture;
    use rust_decimal::Decimal;
    use secrecy::SecretString;
    use url::Url;

    use super::*;
    use crate::auth::{AuthError, RefreshTransport};
    use crate::http::AuthenticatedHttpClient;
    use crate::storage::{MemoryStore, PersistenceAdapter, storage_keys};

    struct NoRefresh;

    impl RefreshTransport for NoRefresh {
        fn refresh<'a>(
            &'a self,
            _refresh_token: &'a SecretString,
        ) -> BoxFuture<'a, Result<CredentialPair, AuthError>> {
            Box::pin(async { Err(AuthError::RefreshFailed("offline".to_string())) })
        }
    }

    /// A reconciler whose backend is never reachable; only local paths work.
    fn offline() -> (Arc<MemoryStore>, CartReconciler) {
        let storage = Arc::new(MemoryStore::new());
        let adapter: Arc<dyn PersistenceAdapter> = storage.clone();
        let coordinator = Arc::new(TokenCoordinator::new(
            Arc::clone(&adapter),
            Arc::new(NoRefresh),
            Duration::from_secs(1),
        ));
        let client = AuthenticatedHttpClient::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:9").unwrap(),
            Arc::clone(&coordinator),
        );
        let reconciler = CartReconciler::new(
            LocalCartStore::new(adapter),
            RemoteCart::new(client),
            coordinator,
        );
        (storage, reconciler)
    }

    fn fern() -> Product {
        Product::new("p-fern", Decimal::from(250), Decimal::from(20))
    }

    #[tokio::test]
    async fn test_starts_local() {
        let (_, cart) = offline();
        assert_eq!(cart.mode(), CartMode::Local);
        assert_eq!(cart.item_count(), 0);
        assert_eq!(cart.snapshot().summary.total_price, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_local_operations_route_to_local_store() {
        let (_, cart) = offline();

        let outcome = cart.add(&fern(), 2).await.unwrap();
        let snapshot = outcome.snapshot().unwrap().clone();
        assert_eq!(snapshot.mode, CartMode::Local);
        assert_eq!(snapshot.summary.total_after_discount, Decimal::from(400));
        assert_eq!(snapshot.summary.delivery_price, Decimal::from(90));

        let id = snapshot.lines[0].id.clone();
        let outcome = cart.update_quantity(&id, 0).await.unwrap();
        assert_eq!(outcome.snapshot().unwrap().lines[0].quantity, 2);

        let outcome = cart.remove(&id).await.unwrap();
        assert_eq!(outcome.snapshot().unwrap().item_count(), 0);
    }

    #[tokio::test]
    async fn test_resume_without_session_stays_local() {
        let (_, cart) = offline();
        cart.add(&fern(), 1).await.unwrap();

        let snapshot = cart.resume_session().await.unwrap();
        assert_eq!(snapshot.mode, CartMode::Local);
        assert_eq!(snapshot.item_count(), 1);
        assert_eq!(cart.mode(), CartMode::Local);
    }

    #[tokio::test]
    async fn test_failed_migration_keeps_local_cart() {
        let (_, cart) = offline();
        cart.add(&fern(), 1).await.unwrap();

        let err = cart.migrate_to_remote().await.unwrap_err();
        match err {
            CartError::Migration {
                migrated, total, ..
            } => {
                assert_eq!(migrated, 0);
                assert_eq!(total, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(cart.mode(), CartMode::Local);
        assert_eq!(cart.item_count(), 1);
    }

    #[tokio::test]
    async fn test_sign_out_clears_credentials() {
        let (storage, cart) = offline();
        storage.set(storage_keys::ACCESS_TOKEN, "a1").unwrap();
        storage.set(storage_keys::REFRESH_TOKEN, "r1").unwrap();
        storage.set(storage_keys::ORDER_TOKEN, "o1").unwrap();

        let snapshot = cart.sign_out().unwrap();
        assert_eq!(snapshot.mode, CartMode::Local);
        assert!(storage.get(storage_keys::ACCESS_TOKEN).unwrap().is_none());
        assert!(storage.get(storage_keys::ORDER_TOKEN).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_order_clears_order_token() {
        let (storage, cart) = offline();
        storage.set(storage_keys::ORDER_TOKEN, "o1").unwrap();

        cart.complete_order(&[ProductId::new("p-fern")]).unwrap();
        assert!(storage.get(storage_keys::ORDER_TOKEN).unwrap().is_none());
    }
}

//! Authenticated cart held by the backend.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use plantorium_core::{CartLine, CartLineId, CartMode, CartSnapshot, ProductId};
use reqwest::Method;
use serde_json::json;
use tracing::{debug, instrument};

use super::wire::{RemoteCartLine, RemoteLines, normalize_all};
use super::{CartError, validate_quantity};
use crate::auth::TokenCoordinator;
use crate::http::{ApiResponse, AuthenticatedHttpClient};

/// Collection path for the signed-in user's cart.
pub const CARTS_PATH: &str = "/api/v2/user/carts";

/// Backend cart operations plus a cache of the last known server list.
#[derive(Debug)]
pub struct RemoteCart {
    client: AuthenticatedHttpClient,
    cache: Mutex<Vec<CartLine>>,
}

impl RemoteCart {
    /// Create a remote cart over `client` with an empty cache.
    #[must_use]
    pub const fn new(client: AuthenticatedHttpClient) -> Self {
        Self {
            client,
            cache: Mutex::new(Vec::new()),
        }
    }

    /// The coordinator behind the HTTP client.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<TokenCoordinator> {
        self.client.coordinator()
    }

    /// The cached server cart.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        CartSnapshot::new(CartMode::Remote, self.cache().clone())
    }

    /// Fetch the server cart, replacing the cache.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if the request fails or a line cannot be
    /// normalised.
    #[instrument(skip(self))]
    pub async fn fetch(&self) -> Result<ApiResponse<CartSnapshot>, CartError> {
        let response = self
            .client
            .send_json::<Vec<RemoteCartLine>>(CARTS_PATH, Method::GET, None)
            .await?;

        response.try_map(|lines| {
            let lines = normalize_all(lines)?;
            debug!(lines = lines.len(), "fetched remote cart");
            *self.cache() = lines;
            Ok(self.snapshot())
        })
    }

    /// Add `quantity` units of `product` to the server cart.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` for a zero quantity, otherwise
    /// `CartError` if the request fails or the reply cannot be normalised.
    #[instrument(skip(self, product), fields(product = %product))]
    pub async fn add(
        &self,
        product: &ProductId,
        quantity: u32,
    ) -> Result<ApiResponse<CartSnapshot>, CartError> {
        validate_quantity(quantity)?;
        let body = json!({ "plant": product.as_str(), "quantity": quantity });

        let response = self
            .client
            .send_json::<RemoteLines>(CARTS_PATH, Method::POST, Some(&body))
            .await?;

        response.try_map(|reply| {
            match reply {
                RemoteLines::Many(lines) => *self.cache() = normalize_all(lines)?,
                RemoteLines::One(line) => {
                    let line = CartLine::try_from(*line)?;
                    let mut cache = self.cache();
                    match cache.iter_mut().find(|c| c.product_ref == line.product_ref) {
                        Some(existing) => *existing = line,
                        None => cache.push(line),
                    }
                }
            }
            Ok(self.snapshot())
        })
    }

    /// Set the quantity of server line `id`.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` for a zero quantity, otherwise
    /// `CartError` if the request fails or the reply cannot be normalised.
    #[instrument(skip(self, id), fields(line = %id))]
    pub async fn update_quantity(
        &self,
        id: &CartLineId,
        quantity: u32,
    ) -> Result<ApiResponse<CartSnapshot>, CartError> {
        validate_quantity(quantity)?;
        let body = json!({ "quantity": quantity });

        let response = self
            .client
            .send_json::<Option<RemoteCartLine>>(&line_path(id), Method::PATCH, Some(&body))
            .await?;

        response.try_map(|reply| {
            let updated = reply.map(CartLine::try_from).transpose()?;
            let mut cache = self.cache();
            if let Some(line) = cache.iter_mut().find(|c| &c.id == id) {
                match updated {
                    Some(updated) => *line = updated,
                    None => line.quantity = quantity,
                }
            }
            drop(cache);
            Ok(self.snapshot())
        })
    }

    /// Remove server line `id`.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if the request fails.
    #[instrument(skip(self, id), fields(line = %id))]
    pub async fn remove(&self, id: &CartLineId) -> Result<ApiResponse<CartSnapshot>, CartError> {
        let response = self.client.send(&line_path(id), Method::DELETE, None).await?;

        Ok(response.map(|_| {
            self.cache().retain(|line| &line.id != id);
            self.snapshot()
        }))
    }

    /// Drop cached lines for products that were just ordered.
    ///
    /// The backend empties those lines itself when the order is placed.
    pub fn discard_products(&self, products: &[ProductId]) -> CartSnapshot {
        self.cache()
            .retain(|line| !products.contains(&line.product_ref));
        self.snapshot()
    }

    /// Forget the cached server cart.
    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    fn cache(&self) -> MutexGuard<'_, Vec<CartLine>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn line_path(id: &CartLineId) -> String {
    format!("{CARTS_PATH}/{id}")
}

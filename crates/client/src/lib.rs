//! Plantorium client library.
//!
//! The client keeps a shopper's access credential valid across concurrent
//! requests and keeps the anonymous (device) cart and the authenticated
//! (server) cart numerically consistent.
//!
//! # Architecture
//!
//! Components, leaves first:
//!
//! - [`storage`] - `PersistenceAdapter` key-value capability (tokens, local cart)
//! - [`auth`] - `TokenCoordinator`, single-flight access token renewal
//! - [`http`] - `AuthenticatedHttpClient`, expiry detection and replay
//! - [`cart`] - `LocalCartStore`, `RemoteCart` and the `CartReconciler`
//!
//! Pricing is a pure function and lives in `plantorium-core`.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ClientConfig::from_env()?;
//! let storage = Arc::new(FileStore::new(&config.store_path));
//! let cart = plantorium_client::connect(&config, storage)?;
//!
//! cart.add(&product, 2).await?;
//! cart.sign_in(&CredentialPair::new(access, refresh)?).await?;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

pub mod auth;
pub mod cart;
pub mod config;
pub mod http;
pub mod storage;

pub use auth::{AuthError, HttpRefresher, RefreshTransport, TokenCoordinator};
pub use cart::{CartError, CartOutcome, CartReconciler, LocalCartStore, MigrationReport, RemoteCart};
pub use config::{ClientConfig, ConfigError};
pub use http::{ApiResponse, AuthenticatedHttpClient, ClientError, DomainError};
pub use storage::{FileStore, MemoryStore, PersistenceAdapter, StorageError};

/// Wire up the full client stack over `storage`.
///
/// One `reqwest::Client` is shared by the renewal transport and the
/// authenticated client so both honor the configured request timeout.
///
/// # Errors
///
/// Returns `ClientError::Http` if the HTTP client cannot be built.
pub fn connect(
    config: &ClientConfig,
    storage: Arc<dyn PersistenceAdapter>,
) -> Result<CartReconciler, ClientError> {
    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()?;

    let refresher = HttpRefresher::new(http.clone(), &config.api_url)?;
    let coordinator = Arc::new(TokenCoordinator::new(
        Arc::clone(&storage),
        Arc::new(refresher),
        config.refresh_timeout,
    ));
    let client = AuthenticatedHttpClient::new(http, config.api_url.clone(), Arc::clone(&coordinator));

    Ok(CartReconciler::new(
        LocalCartStore::new(storage),
        RemoteCart::new(client),
        coordinator,
    ))
}

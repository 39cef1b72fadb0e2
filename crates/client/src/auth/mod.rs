//! Session credential management.
//!
//! # Architecture
//!
//! - [`TokenCoordinator`] owns the stored credential pair and the
//!   single-flight renewal protocol (`Idle` / `Refreshing`)
//! - [`RefreshTransport`] is the renewal network call; [`HttpRefresher`] is
//!   the production implementation against `/api/v2/auth/refresh-token`
//!
//! Every renewal failure clears the whole credential pair, so no later
//! request can present a stale credential.

pub mod coordinator;
pub mod refresh;

use std::time::Duration;

use plantorium_core::CredentialError;
use thiserror::Error;

pub use coordinator::TokenCoordinator;
pub use refresh::{HttpRefresher, REFRESH_PATH, RefreshTransport};

use crate::storage::StorageError;

/// Errors raised while keeping the access credential valid.
///
/// `Clone` so that one renewal outcome can be handed to every queued caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No refresh credential is stored; the user must sign in again.
    #[error("session expired, please sign in again")]
    AuthExpired,

    /// The renewal call was rejected or errored.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The renewal call did not settle in time.
    #[error("token refresh timed out after {0:?}")]
    RefreshTimedOut(Duration),

    /// The caller that owned the renewal went away before it settled.
    #[error("token refresh was cancelled")]
    Cancelled,

    /// A credential pair failed validation.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(#[from] CredentialError),

    /// Reading or writing stored credentials failed.
    #[error("credential storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// Whether the user has to sign in again.
    #[must_use]
    pub const fn is_session_expired(&self) -> bool {
        matches!(
            self,
            Self::AuthExpired | Self::RefreshFailed(_) | Self::RefreshTimedOut(_)
        )
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

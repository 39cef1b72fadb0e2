//! Session credential types.
//!
//! Access and refresh tokens are wrapped in [`SecretString`] so they never
//! show up in `Debug` output or logs.

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Errors that can occur when building a [`CredentialPair`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// The access token is empty or whitespace.
    #[error("access token cannot be empty")]
    EmptyAccessToken,
    /// The refresh token is empty or whitespace.
    #[error("refresh token cannot be empty")]
    EmptyRefreshToken,
}

/// The access/refresh token pair that makes up a signed-in session.
///
/// Both tokens are guaranteed non-empty; a missing token means "no session".
#[derive(Debug, Clone)]
pub struct CredentialPair {
    access_token: SecretString,
    refresh_token: SecretString,
}

impl CredentialPair {
    /// Build a credential pair, rejecting blank tokens.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError` if either token is empty after trimming.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let access_token = access_token.into();
        let refresh_token = refresh_token.into();

        if access_token.trim().is_empty() {
            return Err(CredentialError::EmptyAccessToken);
        }
        if refresh_token.trim().is_empty() {
            return Err(CredentialError::EmptyRefreshToken);
        }

        Ok(Self {
            access_token: SecretString::from(access_token),
            refresh_token: SecretString::from(refresh_token),
        })
    }

    /// The short-lived access token.
    #[must_use]
    pub const fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    /// The long-lived refresh token.
    #[must_use]
    pub const fn refresh_token(&self) -> &SecretString {
        &self.refresh_token
    }

    /// Whether `token` is the access token of this pair.
    #[must_use]
    pub fn has_access_token(&self, token: &SecretString) -> bool {
        self.access_token.expose_secret() == token.expose_secret()
    }
}

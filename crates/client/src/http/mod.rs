//! Authenticated HTTP access to the Plantorium backend.
//!
//! # Response envelope
//!
//! Every backend response is a JSON envelope:
//!
//! ```json
//! { "status": true, "message": "...", "code": "OUT_OF_STOCK", "result": { } }
//! ```
//!
//! - `code == "TOKEN_EXPIRED"` or HTTP 401: the access token expired
//! - any other `code`: a business-rule rejection, returned as data
//! - `status == true`: success
//! - anything else: a request failure carrying the server message

pub mod client;

use core::fmt;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub use client::{AuthenticatedHttpClient, CHECKOUT_PREFIX, authorization_header};

use crate::auth::AuthError;

/// Envelope code the backend uses for an expired access token.
pub const TOKEN_EXPIRED_CODE: &str = "TOKEN_EXPIRED";

/// Errors that can occur when talking to the backend.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Keeping the access credential valid failed.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// The backend answered with a non-success response.
    #[error("request failed ({status}): {message}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Server-provided message.
        message: String,
    },

    /// HTTP transport failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The response body did not have the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// A request URL could not be built.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A header value contained characters HTTP does not allow.
    #[error("invalid header value: {0}")]
    InvalidHeader(String),
}

impl ClientError {
    /// Whether the user has to sign in again.
    ///
    /// Every credential failure collapses into this one condition.
    #[must_use]
    pub const fn is_session_expired(&self) -> bool {
        match self {
            Self::Auth(err) => err.is_session_expired(),
            _ => false,
        }
    }

    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }
}

/// A business-rule rejection signalled by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainError {
    /// Machine-readable code (e.g. `OUT_OF_STOCK`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for DomainError {}

/// Outcome of a request the backend processed.
///
/// Business-rule rejections are data, not errors, so callers can tell
/// "operation rejected" apart from transport or credential failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiResponse<T> {
    /// The backend accepted the request.
    Accepted(T),
    /// The backend rejected the request on a business rule.
    Rejected(DomainError),
}

impl<T> ApiResponse<T> {
    /// Transform the accepted value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        match self {
            Self::Accepted(value) => ApiResponse::Accepted(f(value)),
            Self::Rejected(err) => ApiResponse::Rejected(err),
        }
    }

    /// Transform the accepted value with a fallible function.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<ApiResponse<U>, E> {
        match self {
            Self::Accepted(value) => f(value).map(ApiResponse::Accepted),
            Self::Rejected(err) => Ok(ApiResponse::Rejected(err)),
        }
    }

    /// The accepted value, if any.
    pub fn accepted(self) -> Option<T> {
        match self {
            Self::Accepted(value) => Some(value),
            Self::Rejected(_) => None,
        }
    }

    /// Whether the backend accepted the request.
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// The envelope fields the client classifies on.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// Append `path` to the base URL, keeping any path prefix the base carries.
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let base = base.as_str().trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Url::parse(&format!("{base}/{path}"))
}

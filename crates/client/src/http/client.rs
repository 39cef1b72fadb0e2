//! Backend HTTP client with transparent access token renewal.
//!
//! A request that comes back with an expiry signal drives the
//! [`TokenCoordinator`] and is replayed exactly once with the renewed token.
//! No request ever triggers more than one renewal or more than one replay.

use std::sync::Arc;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{ApiResponse, ClientError, DomainError, Envelope, TOKEN_EXPIRED_CODE, endpoint};
use crate::auth::TokenCoordinator;

/// Paths under this prefix always carry the order-scoped token.
pub const CHECKOUT_PREFIX: &str = "/api/v2/checkout";

/// Build the `Authorization` header value for a request to `path`.
///
/// Checkout paths, and any request made while an order token is stored, use
/// the composite form `Bearer <access> orderToken <order>`. Returns `None`
/// when there is nothing to present.
#[must_use]
pub fn authorization_header(
    path: &str,
    access_token: Option<&SecretString>,
    order_token: Option<&SecretString>,
) -> Option<String> {
    let access = access_token.map_or("", |token| token.expose_secret());

    if path.starts_with(CHECKOUT_PREFIX) || order_token.is_some() {
        let order = order_token.map_or("", |token| token.expose_secret());
        return Some(format!("Bearer {access} orderToken {order}"));
    }

    (!access.is_empty()).then(|| format!("Bearer {access}"))
}

/// Backend HTTP client that keeps the caller's access token valid.
#[derive(Clone)]
pub struct AuthenticatedHttpClient {
    inner: Arc<AuthenticatedHttpClientInner>,
}

struct AuthenticatedHttpClientInner {
    client: reqwest::Client,
    base_url: Url,
    coordinator: Arc<TokenCoordinator>,
}

/// A response body together with the status it arrived with.
struct Reply {
    status: StatusCode,
    body: Value,
    envelope: Envelope,
    raw: String,
}

impl Reply {
    fn signals_expiry(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
            || self.envelope.code.as_deref() == Some(TOKEN_EXPIRED_CODE)
    }

    fn failure_message(&self) -> String {
        self.envelope
            .message
            .clone()
            .filter(|message| !message.is_empty())
            .or_else(|| (!self.raw.trim().is_empty()).then(|| self.raw.trim().to_string()))
            .unwrap_or_else(|| {
                self.status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            })
    }

    fn into_response(self) -> Result<ApiResponse<Value>, ClientError> {
        if let Some(code) = self.envelope.code.clone() {
            return Ok(ApiResponse::Rejected(DomainError {
                code,
                message: self.envelope.message.clone().unwrap_or_default(),
            }));
        }

        if self.envelope.status {
            return Ok(ApiResponse::Accepted(self.body));
        }

        Err(ClientError::RequestFailed {
            status: self.status.as_u16(),
            message: self.failure_message(),
        })
    }
}

impl AuthenticatedHttpClient {
    /// Create a client for the backend at `base_url`.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: Url, coordinator: Arc<TokenCoordinator>) -> Self {
        Self {
            inner: Arc::new(AuthenticatedHttpClientInner {
                client,
                base_url,
                coordinator,
            }),
        }
    }

    /// The coordinator that owns this client's credentials.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<TokenCoordinator> {
        &self.inner.coordinator
    }

    /// Send a request and classify the response envelope.
    ///
    /// On an expiry signal the access token is renewed (sharing any renewal
    /// already in flight) and the identical request is replayed once.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Auth` if renewal fails; the original request is
    /// not retried again. Returns `ClientError::RequestFailed` for other
    /// non-success responses, including a replay that still signals expiry.
    #[instrument(skip(self, method, body), fields(method = %method))]
    pub async fn send(
        &self,
        path: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<ApiResponse<Value>, ClientError> {
        let url = endpoint(&self.inner.base_url, path)?;
        let coordinator = self.coordinator();

        let access_token = coordinator.access_token()?;
        let order_token = coordinator.order_token()?;
        let reply = self
            .execute(&url, path, &method, body, access_token.as_ref(), order_token.as_ref())
            .await?;

        if !reply.signals_expiry() {
            return reply.into_response();
        }

        warn!(status = %reply.status, "access token expired, renewing");
        let fresh = coordinator
            .ensure_fresh_token(access_token.as_ref())
            .await?;

        debug!("replaying request with renewed token");
        let order_token = coordinator.order_token()?;
        let replay = self
            .execute(&url, path, &method, body, Some(&fresh), order_token.as_ref())
            .await?;

        if replay.signals_expiry() {
            return Err(ClientError::RequestFailed {
                status: StatusCode::UNAUTHORIZED.as_u16(),
                message: replay.failure_message(),
            });
        }

        replay.into_response()
    }

    /// Send a request and decode the envelope's `result` field.
    ///
    /// # Errors
    ///
    /// Same as [`Self::send`], plus `ClientError::Decode` if `result` does
    /// not match `T`.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        path: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<ApiResponse<T>, ClientError> {
        self.send(path, method, body).await?.try_map(|mut body| {
            let result = body.get_mut("result").map(Value::take).unwrap_or(Value::Null);
            serde_json::from_value(result).map_err(|e| ClientError::Decode(e.to_string()))
        })
    }

    async fn execute(
        &self,
        url: &Url,
        path: &str,
        method: &Method,
        body: Option<&Value>,
        access_token: Option<&SecretString>,
        order_token: Option<&SecretString>,
    ) -> Result<Reply, ClientError> {
        let mut request = self
            .inner
            .client
            .request(method.clone(), url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");

        if let Some(value) = authorization_header(path, access_token, order_token) {
            let mut value = HeaderValue::from_str(&value)
                .map_err(|e| ClientError::InvalidHeader(e.to_string()))?;
            value.set_sensitive(true);
            request = request.header(AUTHORIZATION, value);
        }

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(ClientError::from_transport)?;
        let status = response.status();
        let raw = response.text().await.map_err(ClientError::from_transport)?;

        let body: Value = if raw.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&raw).unwrap_or(Value::Null)
        };
        let envelope = Envelope::deserialize(&body).unwrap_or_default();

        debug!(status = %status, "response received");
        Ok(Reply {
            status,
            body,
            envelope,
            raw,
        })
    }
}

impl std::fmt::Debug for AuthenticatedHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedHttpClient")
            .field("base_url", &self.inner.base_url.as_str())
            .finish_non_exhaustive()
    }
}

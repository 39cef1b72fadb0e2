//! Token renewal transport.
//!
//! Exchanges a refresh token for a new credential pair.

use futures::future::BoxFuture;
use plantorium_core::CredentialPair;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use url::Url;

use super::AuthError;

/// Renewal endpoint, relative to the API base URL.
pub const REFRESH_PATH: &str = "/api/v2/auth/refresh-token";

/// The network call that renews a credential pair.
///
/// Implementations must not touch stored credentials; persisting or clearing
/// them is the coordinator's job.
pub trait RefreshTransport: Send + Sync {
    /// Exchange `refresh_token` for a fresh credential pair.
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a SecretString,
    ) -> BoxFuture<'a, Result<CredentialPair, AuthError>>;
}

/// Request body for the renewal endpoint.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Response from the renewal endpoint.
#[derive(Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    token: Option<TokenPayload>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPayload {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
}

/// Renewal over HTTP against the backend's refresh endpoint.
#[derive(Debug, Clone)]
pub struct HttpRefresher {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpRefresher {
    /// Create a refresher for the backend at `api_url`.
    ///
    /// # Errors
    ///
    /// Returns `url::ParseError` if the endpoint URL cannot be built.
    pub fn new(client: reqwest::Client, api_url: &Url) -> Result<Self, url::ParseError> {
        let endpoint = crate::http::endpoint(api_url, REFRESH_PATH)?;
        Ok(Self { client, endpoint })
    }

    #[instrument(skip(self, refresh_token), fields(endpoint = %self.endpoint))]
    async fn request(&self, refresh_token: &SecretString) -> Result<CredentialPair, AuthError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&RefreshRequest {
                refresh_token: refresh_token.expose_secret(),
            })
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        let status = response.status();
        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AuthError::RefreshFailed(format!("HTTP {status}: {e}")))?;

        if status == reqwest::StatusCode::FORBIDDEN || !body.status {
            return Err(AuthError::RefreshFailed(
                body.message
                    .unwrap_or_else(|| "Authentication Failed!".to_string()),
            ));
        }

        if !status.is_success() {
            return Err(AuthError::RefreshFailed(body.message.unwrap_or_else(|| {
                format!("HTTP {status}: server error during token refresh")
            })));
        }

        let token = body.token.ok_or_else(|| {
            AuthError::RefreshFailed("token data missing from server response".to_string())
        })?;

        CredentialPair::new(token.access_token, token.refresh_token)
            .map_err(|e| AuthError::RefreshFailed(format!("invalid token in server response: {e}")))
    }
}

impl RefreshTransport for HttpRefresher {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a SecretString,
    ) -> BoxFuture<'a, Result<CredentialPair, AuthError>> {
        Box::pin(self.request(refresh_token))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_request_body() {
        let body = serde_json::to_value(RefreshRequest {
            refresh_token: "r1",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "refreshToken": "r1" }));
    }

    #[test]
    fn test_refresh_response_parsing() {
        let json = r#"{
            "status": true,
            "message": "Token refreshed",
            "token": { "accessToken": "a2", "refreshToken": "r2" }
        }"#;
        let body: RefreshResponse = serde_json::from_str(json).unwrap();
        assert!(body.status);
        let token = body.token.unwrap();
        assert_eq!(token.access_token, "a2");
        assert_eq!(token.refresh_token, "r2");
    }

    #[test]
    fn test_refresh_rejection_parsing() {
        let json = r#"{ "status": false, "message": "Invalid refresh token" }"#;
        let body: RefreshResponse = serde_json::from_str(json).unwrap();
        assert!(!body.status);
        assert!(body.token.is_none());
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let base = Url::parse("https://api.example.com/backend/").unwrap();
        let refresher = HttpRefresher::new(reqwest::Client::new(), &base).unwrap();
        assert_eq!(
            refresher.endpoint.as_str(),
            "https://api.example.com/backend/api/v2/auth/refresh-token"
        );
    }
}

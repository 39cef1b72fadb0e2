//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `PLANTORIUM_API_URL` - Backend base URL (e.g., `https://api.plantorium.in`)
//!
//! ## Optional
//! - `PLANTORIUM_REQUEST_TIMEOUT_SECS` - Per-request HTTP timeout (default: 30)
//! - `PLANTORIUM_REFRESH_TIMEOUT_SECS` - Bound on a token renewal call (default: 15)
//! - `PLANTORIUM_STORE_PATH` - File backing the persistent store (default: `plantorium-store.json`)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 15;
const DEFAULT_STORE_PATH: &str = "plantorium-store.json";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL; API paths are appended verbatim.
    pub api_url: Url,
    /// Timeout applied to every HTTP request.
    pub request_timeout: Duration,
    /// Upper bound on a single token renewal, including queued waiters.
    pub refresh_timeout: Duration,
    /// File used by the file-backed persistent store.
    pub store_path: PathBuf,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

impl ClientConfig {
    /// Configuration with default timeouts for the given backend.
    #[must_use]
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            refresh_timeout: Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            sentry_dsn: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_url = get_required_env("PLANTORIUM_API_URL")?;
        let api_url = Url::parse(&api_url).map_err(|e| {
            ConfigError::InvalidEnvVar("PLANTORIUM_API_URL".to_string(), e.to_string())
        })?;
        let request_timeout =
            get_secs("PLANTORIUM_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        let refresh_timeout =
            get_secs("PLANTORIUM_REFRESH_TIMEOUT_SECS", DEFAULT_REFRESH_TIMEOUT_SECS)?;
        let store_path = PathBuf::from(get_env_or_default("PLANTORIUM_STORE_PATH", DEFAULT_STORE_PATH));
        let sentry_dsn = get_optional_env("SENTRY_DSN");

        Ok(Self {
            api_url,
            request_timeout,
            refresh_timeout,
            store_path,
            sentry_dsn,
        })
    }

    /// Override the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the renewal timeout.
    #[must_use]
    pub const fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Override the persistent store location.
    #[must_use]
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable; empty counts as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get a whole-second duration, falling back to `default` when unset.
fn get_secs(key: &str, default: u64) -> Result<Duration, ConfigError> {
    std::env::var(key).map_or(Ok(Duration::from_secs(default)), |value| {
        parse_secs(key, &value)
    })
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let secs = value
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if secs == 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

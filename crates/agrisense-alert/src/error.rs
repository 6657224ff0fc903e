//! Error types for metadata lookup and alert delivery.

use std::time::Duration;

/// Errors from building clients or talking to the farm registry.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// A configured URL could not be parsed or cannot carry a path.
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The HTTP client could not be built or the request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The registry answered with something other than `200 OK`.
    #[error("registry returned status {status}: {body}")]
    RegistryStatus { status: u16, body: String },

    /// The registry did not answer in time.
    #[error("registry lookup timed out after {0:?}")]
    RegistryTimeout(Duration),
}

/// Why a single delivery attempt failed. Every variant is retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection, TLS, or body encoding failure.
    #[error("request failed: {0}")]
    Request(String),

    /// The endpoint answered with a non-2xx status.
    #[error("endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The attempt exceeded its timeout.
    #[error("attempt timed out")]
    Timeout,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Errors from reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// A variable is set but its value cannot be used.
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

//! Asset provider errors.

use std::path::PathBuf;
use thiserror::Error;

use crate::monitor::WatchError;
use crate::sources::ConfigError;

/// Errors raised while constructing or running a provider stream.
///
/// A failure for one source never affects the others: the loader logs it and
/// skips that source until the next reload.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("Failed to read catalog file '{path}': {source}")]
    ReadCatalog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog file '{path}': {message}")]
    ParseCatalog { path: PathBuf, message: String },

    #[error("Environment variable '{0}' holding the API key is not set")]
    MissingApiKey(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} returned {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("GraphQL query to {url} failed: {message}")]
    GraphQl { url: String, message: String },

    #[error("Unexpected response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("Source '{source_id}' cannot be ingested: {reason}")]
    Unsupported { source_id: String, reason: String },

    #[error("Provider cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ProviderError {
        ProviderError::Status {
            url: "http://localhost/api".to_string(),
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn test_status_transience() {
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(404).is_transient());
        assert!(!status(401).is_transient());
    }

    #[test]
    fn test_config_errors_are_not_transient() {
        let err = ProviderError::MissingApiKey("HF_TOKEN".to_string());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("HF_TOKEN"));
        assert!(!ProviderError::Cancelled.is_transient());
    }
}

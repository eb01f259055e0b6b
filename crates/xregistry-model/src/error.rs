//! Error types for the model aggregator

use thiserror::Error;

/// Outcome of a failed endpoint fetch.
///
/// These never reach callers of the aggregation operations; they are
/// recorded as the terminal status of the endpoint in the
/// [`EndpointCache`](crate::cache::EndpointCache).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Empty model")]
    EmptyModel,

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("HTTP {status}: {status_text}")]
    Http { status: u16, status_text: String },

    #[error("Invalid model document: {0}")]
    InvalidModel(String),
}

impl FetchError {
    /// Create an HTTP error
    pub fn http(status: u16, status_text: impl Into<String>) -> Self {
        FetchError::Http {
            status,
            status_text: status_text.into(),
        }
    }

    /// Network failure with no response; reported as status 0
    pub fn network(msg: impl Into<String>) -> Self {
        FetchError::http(0, msg)
    }
}

/// Main error type for configuration and service setup
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Config(format!("{:#}", err))
    }
}

//! Error types for the OKX DEX client

use thiserror::Error;

/// Error type for OKX DEX API operations
#[derive(Debug, Error, Clone)]
pub enum OkxClientError {
    /// Setup error
    #[error("Setup error: {0}")]
    Setup(String),

    /// An error signing a request
    #[error("Signing error: {0}")]
    Signing(String),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(String),

    /// The API kept answering with HTTP 429 after every retry
    #[error("rate limited after {attempts} attempts")]
    RateLimited {
        /// The number of requests sent before giving up
        attempts: usize,
    },

    /// The API answered with a non-zero business code
    #[error("API error (code {code}): {msg}")]
    Api {
        /// The OKX response code
        code: String,
        /// The OKX response message
        msg: String,
    },

    /// The API answered successfully but returned no data rows
    #[error("empty response from {0}")]
    EmptyResponse(String),

    /// Parsing error
    #[error("Parsing error: {0}")]
    Parsing(String),
}

impl OkxClientError {
    /// Create a new setup error
    #[allow(clippy::needless_pass_by_value)]
    pub fn setup<T: ToString>(msg: T) -> Self {
        Self::Setup(msg.to_string())
    }

    /// Create a new signing error
    #[allow(clippy::needless_pass_by_value)]
    pub fn signing<T: ToString>(msg: T) -> Self {
        Self::Signing(msg.to_string())
    }

    /// Create a new HTTP error
    #[allow(clippy::needless_pass_by_value)]
    pub fn http<T: ToString>(msg: T) -> Self {
        Self::Http(msg.to_string())
    }

    /// Create a new empty response error for the given endpoint
    #[allow(clippy::needless_pass_by_value)]
    pub fn empty_response<T: ToString>(endpoint: T) -> Self {
        Self::EmptyResponse(endpoint.to_string())
    }

    /// Create a new parsing error
    #[allow(clippy::needless_pass_by_value)]
    pub fn parsing<T: ToString>(msg: T) -> Self {
        Self::Parsing(msg.to_string())
    }

    /// Whether the error was caused by the API's rate limiter
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

impl From<reqwest::Error> for OkxClientError {
    fn from(e: reqwest::Error) -> Self {
        Self::http(e)
    }
}

//! Error types for the execution client

use okx_dex_client::error::OkxClientError;

use crate::chain_client::error::ChainClientError;

/// Why a swap or approval attempt failed, as far as the retry policy cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// The spender's allowance does not cover the amount
    AllowanceTooLow,
    /// The transaction was mined but reverted
    Reverted,
    /// The transaction was not mined within the receipt timeout
    Timeout,
    /// The aggregator kept rate limiting the request
    RateLimited,
    /// Anything else
    Unknown,
}

/// An error returned by the execution client
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionClientError {
    /// The aggregator returned no data for a request
    #[error("empty response from {0}")]
    EmptyResponse(String),
    /// Any other aggregator error
    #[error("aggregator error: {0}")]
    Aggregator(OkxClientError),
    /// A mined transaction reverted
    #[error("transaction reverted: {0}")]
    TransactionReverted(String),
    /// A transaction was not mined in time
    #[error("timed out waiting for receipt of {0}")]
    Timeout(String),
    /// Gas estimation reported an insufficient allowance
    #[error("allowance too low: {0}")]
    AllowanceTooLow(String),
    /// No RPC endpoint is reachable
    #[error("all {tried} RPC endpoints failed to respond")]
    AllEndpointsDown {
        /// The number of endpoints tried
        tried: usize,
    },
    /// Every attempt of a swap failed
    #[error("swap failed after {attempts} attempts: {last}")]
    SwapExhausted {
        /// The number of attempts made
        attempts: usize,
        /// The error of the final attempt
        last: Box<ExecutionClientError>,
    },
    /// Resetting an allowance to zero and re-approving failed
    #[error("allowance reset failed: {0}")]
    AllowanceResetFailed(String),
    /// An error interacting with the chain
    #[error("on-chain error: {0}")]
    OnChain(String),
    /// An error signing a transaction
    #[error("signing error: {0}")]
    Signing(String),
}

impl ExecutionClientError {
    /// Create a new onchain error
    #[allow(clippy::needless_pass_by_value)]
    pub fn onchain<T: ToString>(e: T) -> Self {
        ExecutionClientError::OnChain(e.to_string())
    }

    /// Create a new signing error
    #[allow(clippy::needless_pass_by_value)]
    pub fn signing<T: ToString>(e: T) -> Self {
        ExecutionClientError::Signing(e.to_string())
    }

    /// Create a new reverted transaction error
    #[allow(clippy::needless_pass_by_value)]
    pub fn reverted<T: ToString>(tx: T) -> Self {
        ExecutionClientError::TransactionReverted(tx.to_string())
    }

    /// Create a new allowance reset error
    #[allow(clippy::needless_pass_by_value)]
    pub fn allowance_reset_failed<T: ToString>(e: T) -> Self {
        ExecutionClientError::AllowanceResetFailed(e.to_string())
    }

    /// Whether the error leaves no RPC endpoint to retry on
    pub fn is_endpoints_down(&self) -> bool {
        matches!(self, ExecutionClientError::AllEndpointsDown { .. })
    }

    /// Classify the failure
    ///
    /// Typed causes win; otherwise the lowercased message is matched against
    /// the configured allowance phrases.
    pub fn cause(&self, allowance_phrases: &[String]) -> FailureCause {
        match self {
            ExecutionClientError::AllowanceTooLow(_) => FailureCause::AllowanceTooLow,
            ExecutionClientError::TransactionReverted(_) => FailureCause::Reverted,
            ExecutionClientError::Timeout(_) => FailureCause::Timeout,
            ExecutionClientError::Aggregator(e) if e.is_rate_limited() => {
                FailureCause::RateLimited
            },
            ExecutionClientError::SwapExhausted { last, .. } => last.cause(allowance_phrases),
            other => classify_message(&other.to_string(), allowance_phrases),
        }
    }
}

/// Classify an error message by the allowance phrases it contains
pub fn classify_message(msg: &str, allowance_phrases: &[String]) -> FailureCause {
    let msg = msg.to_lowercase();
    if allowance_phrases.iter().any(|phrase| msg.contains(&phrase.to_lowercase())) {
        FailureCause::AllowanceTooLow
    } else {
        FailureCause::Unknown
    }
}

impl From<OkxClientError> for ExecutionClientError {
    fn from(e: OkxClientError) -> Self {
        match e {
            OkxClientError::EmptyResponse(endpoint) => ExecutionClientError::EmptyResponse(endpoint),
            e => ExecutionClientError::Aggregator(e),
        }
    }
}

impl From<ChainClientError> for ExecutionClientError {
    fn from(e: ChainClientError) -> Self {
        match e {
            ChainClientError::AllEndpointsDown { tried } => {
                ExecutionClientError::AllEndpointsDown { tried }
            },
            e => ExecutionClientError::onchain(e),
        }
    }
}

//! Top level error type for the volume bot

use std::{error::Error, fmt::Display};

use okx_dex_client::error::OkxClientError;

use crate::{chain_client::error::ChainClientError, execution_client::error::ExecutionClientError};

/// The error type emitted by the volume bot
#[derive(Debug, Clone)]
pub enum VolumeBotError {
    /// An invalid configuration value
    Config(String),
    /// An error parsing a value
    Parse(String),
    /// An error reading or writing a file
    Io(String),
    /// An error with the OKX aggregator
    Okx(OkxClientError),
    /// An error with the chain connection
    Chain(ChainClientError),
    /// An error executing a swap
    Execution(ExecutionClientError),
    /// An error writing the trade log
    TradeLog(String),
}

#[allow(clippy::needless_pass_by_value)]
impl VolumeBotError {
    /// Create a config error
    pub fn config<T: ToString>(msg: T) -> VolumeBotError {
        VolumeBotError::Config(msg.to_string())
    }

    /// Create a parse error
    pub fn parse<T: ToString>(msg: T) -> VolumeBotError {
        VolumeBotError::Parse(msg.to_string())
    }

    /// Create an IO error
    pub fn io<T: ToString>(msg: T) -> VolumeBotError {
        VolumeBotError::Io(msg.to_string())
    }

    /// Create a trade log error
    pub fn trade_log<T: ToString>(msg: T) -> VolumeBotError {
        VolumeBotError::TradeLog(msg.to_string())
    }
}

impl Display for VolumeBotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeBotError::Config(e) => write!(f, "Config error: {e}"),
            VolumeBotError::Parse(e) => write!(f, "Parse error: {e}"),
            VolumeBotError::Io(e) => write!(f, "IO error: {e}"),
            VolumeBotError::Okx(e) => write!(f, "OKX error: {e}"),
            VolumeBotError::Chain(e) => write!(f, "Chain error: {e}"),
            VolumeBotError::Execution(e) => write!(f, "Execution error: {e}"),
            VolumeBotError::TradeLog(e) => write!(f, "Trade log error: {e}"),
        }
    }
}
impl Error for VolumeBotError {}

impl From<OkxClientError> for VolumeBotError {
    fn from(error: OkxClientError) -> Self {
        VolumeBotError::Okx(error)
    }
}

impl From<ChainClientError> for VolumeBotError {
    fn from(error: ChainClientError) -> Self {
        VolumeBotError::Chain(error)
    }
}

impl From<ExecutionClientError> for VolumeBotError {
    fn from(error: ExecutionClientError) -> Self {
        VolumeBotError::Execution(error)
    }
}

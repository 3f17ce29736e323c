//! Error types for chain connections

/// An error returned by a chain connection or the endpoint rotator
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainClientError {
    /// No endpoint accepted a connection and answered a block height
    #[error("all {tried} RPC endpoints failed to respond")]
    AllEndpointsDown {
        /// The number of endpoints tried
        tried: usize,
    },
    /// The endpoint list was empty after normalization
    #[error("no RPC URLs provided")]
    NoEndpoints,
    /// An error establishing a transport
    #[error("connection error: {0}")]
    Connection(String),
    /// An error returned by the RPC node
    #[error("rpc error: {0}")]
    Rpc(String),
    /// An error calling a contract
    #[error("contract call error: {0}")]
    Contract(String),
}

impl ChainClientError {
    /// Create a new connection error
    #[allow(clippy::needless_pass_by_value)]
    pub fn connection<T: ToString>(e: T) -> Self {
        ChainClientError::Connection(e.to_string())
    }

    /// Create a new rpc error
    #[allow(clippy::needless_pass_by_value)]
    pub fn rpc<T: ToString>(e: T) -> Self {
        ChainClientError::Rpc(e.to_string())
    }

    /// Create a new contract call error
    #[allow(clippy::needless_pass_by_value)]
    pub fn contract<T: ToString>(e: T) -> Self {
        ChainClientError::Contract(e.to_string())
    }
}

impl From<alloy_contract::Error> for ChainClientError {
    fn from(e: alloy_contract::Error) -> Self {
        ChainClientError::contract(e)
    }
}

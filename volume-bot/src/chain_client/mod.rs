//! Chain RPC connections with prioritized endpoint failover
//!
//! A [`Connector`] opens a [`ChainConnection`] to a single endpoint. The
//! [`RpcRotator`] owns the endpoint list and a cursor, and hands out a fresh
//! live connection on every `connect`/`rotate`; callers replace their handle
//! with the returned one.

use alloy_primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use itertools::Itertools;
use tracing::{info, instrument, warn};

use self::error::ChainClientError;

pub mod error;
pub mod rpc;

// ---------
// | Types |
// ---------

/// A call used for gas estimation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// The sender
    pub from: Address,
    /// The callee
    pub to: Address,
    /// The calldata
    pub data: Bytes,
    /// The native value attached
    pub value: U256,
}

/// The outcome of a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptSummary {
    /// Whether the transaction succeeded
    pub success: bool,
    /// The gas consumed
    pub gas_used: u64,
    /// The price paid per unit of gas, in wei
    pub effective_gas_price: u128,
}

/// A live connection to a chain RPC endpoint
#[async_trait]
pub trait ChainConnection: Send + Sync {
    /// The current block height
    async fn block_number(&self) -> Result<u64, ChainClientError>;
    /// The next nonce for `address`, including pending transactions
    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainClientError>;
    /// The node's current gas price, in wei
    async fn gas_price(&self) -> Result<u128, ChainClientError>;
    /// Estimate the gas a call consumes
    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, ChainClientError>;
    /// The ERC-20 allowance `owner` granted `spender` on `token`
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainClientError>;
    /// Broadcast a signed, encoded transaction
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, ChainClientError>;
    /// The receipt of a transaction, `None` while it is not yet mined
    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<ReceiptSummary>, ChainClientError>;
}

/// Opens connections to chain RPC endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    /// The connection type produced
    type Conn: ChainConnection;

    /// Open a transport to the given endpoint
    async fn open(&self, url: &str) -> Result<Self::Conn, ChainClientError>;

    /// Whether connections are routed through a proxy; streaming socket
    /// endpoints cannot be and are skipped
    fn proxied(&self) -> bool;
}

// ----------------
// | Endpoint Set |
// ----------------

/// Whether the URL is a streaming socket endpoint
pub fn is_ws_url(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}

/// Trim a URL and prefix it with `https://` when it has no known scheme
fn normalize_url(url: &str) -> Option<String> {
    const SCHEMES: [&str; 4] = ["http://", "https://", "ws://", "wss://"];

    let url = url.trim();
    if url.is_empty() {
        return None;
    }

    if SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
        Some(url.to_string())
    } else {
        Some(format!("https://{url}"))
    }
}

/// An ordered, de-duplicated, non-empty list of RPC endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSet {
    /// The normalized URLs, in priority order
    urls: Vec<String>,
}

impl EndpointSet {
    /// Normalize a list of URLs, dropping blanks and later duplicates
    pub fn new<I, S>(urls: I) -> Result<Self, ChainClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls: Vec<String> =
            urls.into_iter().filter_map(|u| normalize_url(u.as_ref())).unique().collect();
        if urls.is_empty() {
            return Err(ChainClientError::NoEndpoints);
        }

        Ok(Self { urls })
    }

    /// The number of endpoints
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// The endpoint at position `idx`, wrapping around
    fn at(&self, idx: usize) -> &str {
        &self.urls[idx % self.urls.len()]
    }

    /// The endpoints in priority order
    pub fn urls(&self) -> &[String] {
        &self.urls
    }
}

// -----------
// | Rotator |
// -----------

/// Walks an endpoint set from a persistent cursor, handing out live
/// connections
pub struct RpcRotator<C: Connector> {
    /// Opens connections to endpoints
    connector: C,
    /// The endpoints to rotate through
    endpoints: EndpointSet,
    /// The index of the next endpoint to try; advances once per tried endpoint
    cursor: usize,
}

impl<C: Connector> RpcRotator<C> {
    /// Create a rotator starting at the highest priority endpoint
    pub fn new(connector: C, endpoints: EndpointSet) -> Self {
        Self { connector, endpoints, cursor: 0 }
    }

    /// The number of endpoints in rotation
    pub fn num_endpoints(&self) -> usize {
        self.endpoints.len()
    }

    /// Connect to the first live endpoint at or after the cursor, trying at
    /// most `max_tries` endpoints (default: all of them)
    ///
    /// An endpoint is live when its transport opens and it answers the current
    /// block height.
    #[instrument(skip_all)]
    pub async fn connect(
        &mut self,
        max_tries: Option<usize>,
    ) -> Result<(C::Conn, String), ChainClientError> {
        let tries = max_tries.unwrap_or_else(|| self.endpoints.len());
        for attempt in 1..=tries {
            let url = self.endpoints.at(self.cursor).to_string();
            self.cursor = (self.cursor + 1) % self.endpoints.len();

            if is_ws_url(&url) && self.connector.proxied() {
                warn!(url, "skipping websocket RPC behind a proxy");
                continue;
            }

            match self.try_endpoint(&url).await {
                Ok(conn) => {
                    if attempt > 1 {
                        info!(url, "switched RPC");
                    }
                    return Ok((conn, url));
                },
                Err(e) => warn!(url, "RPC endpoint unavailable: {e}"),
            }
        }

        Err(ChainClientError::AllEndpointsDown { tried: tries })
    }

    /// Move to the next live endpoint, trying every endpoint at most once
    pub async fn rotate(&mut self) -> Result<(C::Conn, String), ChainClientError> {
        self.connect(Some(self.endpoints.len())).await
    }

    /// Open a connection and check it answers a block height
    async fn try_endpoint(&self, url: &str) -> Result<C::Conn, ChainClientError> {
        let conn = self.connector.open(url).await?;
        conn.block_number().await?;
        Ok(conn)
    }
}

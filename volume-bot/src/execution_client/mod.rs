//! The execution client: swaps, approvals and sells for a single wallet
//!
//! All methods take `&mut self`; a wallet's transactions are submitted one at
//! a time so its nonce sequence is never contended.

use std::sync::Arc;

use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use okx_dex_client::{
    error::OkxClientError,
    types::{ApproveTransaction, Quote, SwapParams, SwapTransaction},
    OkxClient,
};
use tracing::info;

use crate::{
    chain_client::{ChainConnection, Connector, RpcRotator},
    config::StrategyConfig,
};

use self::error::ExecutionClientError;

pub mod allowance;
pub mod error;
pub mod sell;
pub mod submit;
pub mod swap;

// --------------
// | Aggregator |
// --------------

/// A DEX aggregator that quotes and builds swaps
#[async_trait]
pub trait DexAggregator: Send + Sync {
    /// Get a quote for an exact-input swap
    async fn quote(&self, params: &SwapParams) -> Result<Quote, OkxClientError>;
    /// Build an unsigned swap transaction
    async fn build_swap(&self, params: &SwapParams) -> Result<SwapTransaction, OkxClientError>;
    /// Build an approval for the aggregator's spender
    async fn build_approve(
        &self,
        token: Address,
        amount: U256,
    ) -> Result<ApproveTransaction, OkxClientError>;
}

#[async_trait]
impl DexAggregator for OkxClient {
    async fn quote(&self, params: &SwapParams) -> Result<Quote, OkxClientError> {
        OkxClient::quote(self, params).await
    }

    async fn build_swap(&self, params: &SwapParams) -> Result<SwapTransaction, OkxClientError> {
        OkxClient::build_swap(self, params).await
    }

    async fn build_approve(
        &self,
        token: Address,
        amount: U256,
    ) -> Result<ApproveTransaction, OkxClientError> {
        OkxClient::build_approve(self, token, amount).await
    }
}

// ----------
// | Client |
// ----------

/// Executes swaps for one wallet against an aggregator, failing over between
/// RPC endpoints
pub struct ExecutionClient<A: DexAggregator, C: Connector> {
    /// The aggregator quotes and transactions come from
    aggregator: A,
    /// The RPC endpoint rotation
    rotator: RpcRotator<C>,
    /// The current live connection; replaced on every rotation
    conn: C::Conn,
    /// The URL of the current connection
    rpc_url: String,
    /// The wallet's signer
    signer: PrivateKeySigner,
    /// The strategy and retry configuration
    config: Arc<StrategyConfig>,
    /// The gas paid by confirmed transactions, in wei
    gas_spent_wei: u128,
}

impl<A: DexAggregator, C: Connector> ExecutionClient<A, C> {
    /// Connect to the first live endpoint and create a client
    pub async fn connect(
        aggregator: A,
        mut rotator: RpcRotator<C>,
        signer: PrivateKeySigner,
        config: Arc<StrategyConfig>,
    ) -> Result<Self, ExecutionClientError> {
        let (conn, rpc_url) = rotator.connect(None).await?;
        info!(rpc_url, "using RPC");

        Ok(Self { aggregator, rotator, conn, rpc_url, signer, config, gas_spent_wei: 0 })
    }

    /// The wallet's address
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// The aggregator client
    pub fn aggregator(&self) -> &A {
        &self.aggregator
    }

    /// The strategy configuration
    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// The gas paid by transactions this client confirmed, in wei
    pub fn gas_spent_wei(&self) -> u128 {
        self.gas_spent_wei
    }

    /// Replace the connection with one to the next live endpoint
    pub async fn rotate(&mut self) -> Result<(), ExecutionClientError> {
        let (conn, rpc_url) = self.rotator.rotate().await?;
        if rpc_url != self.rpc_url {
            info!(from = %self.rpc_url, to = %rpc_url, "rotated RPC");
        }

        self.conn = conn;
        self.rpc_url = rpc_url;
        Ok(())
    }

    /// The current connection
    fn conn(&self) -> &C::Conn {
        &self.conn
    }

    /// The node's gas price, `None` when the node cannot answer
    async fn live_gas_price(&self) -> Option<u128> {
        self.conn().gas_price().await.ok().filter(|p| *p > 0)
    }
}

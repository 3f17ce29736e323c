//! Alloy backed chain connections

use std::time::Duration;

use alloy::{
    providers::{DynProvider, Provider, ProviderBuilder, RootProvider, WsConnect},
    rpc::{client::RpcClient, types::TransactionRequest},
    transports::http::{
        reqwest::{Client, Proxy, Url},
        Http,
    },
};
use alloy_primitives::{Address, TxHash, U256};
use async_trait::async_trait;

use super::{
    error::ChainClientError, is_ws_url, CallRequest, ChainConnection, Connector, ReceiptSummary,
};
use crate::helpers::IERC20;

/// The timeout applied to HTTP RPC requests
const RPC_TIMEOUT: Duration = Duration::from_secs(20);
/// The timeout applied to establishing an HTTP RPC connection
const RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connection to a JSON-RPC node over HTTP or websocket
#[derive(Clone)]
pub struct RpcConnection {
    /// The underlying provider
    provider: DynProvider,
}

#[async_trait]
impl ChainConnection for RpcConnection {
    async fn block_number(&self) -> Result<u64, ChainClientError> {
        self.provider.get_block_number().await.map_err(ChainClientError::rpc)
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainClientError> {
        self.provider.get_transaction_count(address).pending().await.map_err(ChainClientError::rpc)
    }

    async fn gas_price(&self) -> Result<u128, ChainClientError> {
        self.provider.get_gas_price().await.map_err(ChainClientError::rpc)
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, ChainClientError> {
        let tx = TransactionRequest::default()
            .from(call.from)
            .to(call.to)
            .input(call.data.clone().into())
            .value(call.value);

        self.provider.estimate_gas(tx).await.map_err(ChainClientError::rpc)
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainClientError> {
        let erc20 = IERC20::new(token, self.provider.clone());
        let allowance = erc20.allowance(owner, spender).call().await?;
        Ok(allowance)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, ChainClientError> {
        let pending =
            self.provider.send_raw_transaction(raw).await.map_err(ChainClientError::rpc)?;
        Ok(*pending.tx_hash())
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<ReceiptSummary>, ChainClientError> {
        let receipt =
            self.provider.get_transaction_receipt(tx_hash).await.map_err(ChainClientError::rpc)?;

        Ok(receipt.map(|r| ReceiptSummary {
            success: r.status(),
            gas_used: r.gas_used,
            effective_gas_price: r.effective_gas_price,
        }))
    }
}

/// Opens alloy connections, optionally through an HTTP proxy
#[derive(Clone, Debug)]
pub struct RpcConnector {
    /// The proxy HTTP endpoints are reached through
    proxy: Option<String>,
}

impl RpcConnector {
    /// Create a connector
    pub fn new(proxy: Option<String>) -> Self {
        Self { proxy }
    }

    /// Build an HTTP client for the RPC transport
    fn http_client(&self) -> Result<Client, ChainClientError> {
        let mut builder = Client::builder().timeout(RPC_TIMEOUT).connect_timeout(RPC_CONNECT_TIMEOUT);
        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(Proxy::all(proxy).map_err(ChainClientError::connection)?);
        }

        builder.build().map_err(ChainClientError::connection)
    }
}

#[async_trait]
impl Connector for RpcConnector {
    type Conn = RpcConnection;

    async fn open(&self, url: &str) -> Result<RpcConnection, ChainClientError> {
        if is_ws_url(url) {
            let provider = ProviderBuilder::new()
                .connect_ws(WsConnect::new(url))
                .await
                .map_err(ChainClientError::connection)?;
            return Ok(RpcConnection { provider: DynProvider::new(provider) });
        }

        let parsed: Url = url.parse().map_err(ChainClientError::connection)?;
        let http = Http::with_client(self.http_client()?, parsed);
        let provider = RootProvider::new(RpcClient::new(http, false /* is_local */));
        Ok(RpcConnection { provider: DynProvider::new(provider) })
    }

    fn proxied(&self) -> bool {
        self.proxy.is_some()
    }
}

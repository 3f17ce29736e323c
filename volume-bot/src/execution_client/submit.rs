//! Signing, broadcasting and confirming transactions

use std::time::Duration;

use alloy::{
    consensus::{SignableTransaction, TxEnvelope, TxLegacy},
    eips::eip2718::Encodable2718,
    signers::{local::PrivateKeySigner, SignerSync},
};
use alloy_primitives::{Address, Bytes, TxHash, TxKind, U256};
use tracing::{debug, info, instrument, warn};

use super::{
    error::{classify_message, ExecutionClientError, FailureCause},
    DexAggregator, ExecutionClient,
};
use crate::chain_client::{CallRequest, ChainConnection, Connector, ReceiptSummary};

// -------------
// | Constants |
// -------------

/// The gas price used when neither the aggregator nor the node offers one
pub(crate) const FLOOR_GAS_PRICE_WEI: u128 = 3_000_000_000;
/// The time to wait for a transaction to be mined
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(180);
/// The interval between receipt polls
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Scale a gas quantity by `num / den`
pub(crate) fn scale_gas(value: u128, num: u128, den: u128) -> u128 {
    value.saturating_mul(num) / den
}

/// A transaction ready to be signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingTransaction {
    /// The callee
    pub to: Address,
    /// The calldata
    pub data: Bytes,
    /// The native value attached
    pub value: U256,
    /// The gas limit
    pub gas_limit: u64,
    /// The gas price, in wei
    pub gas_price: u128,
    /// The sender's nonce
    pub nonce: u64,
}

/// Sign a legacy transaction and encode it for broadcast
pub(crate) fn sign_legacy(
    signer: &PrivateKeySigner,
    chain_id: u64,
    tx: &PendingTransaction,
) -> Result<Vec<u8>, ExecutionClientError> {
    let legacy = TxLegacy {
        chain_id: Some(chain_id),
        nonce: tx.nonce,
        gas_price: tx.gas_price,
        gas_limit: tx.gas_limit,
        to: TxKind::Call(tx.to),
        value: tx.value,
        input: tx.data.clone(),
    };

    let sig = signer.sign_hash_sync(&legacy.signature_hash()).map_err(ExecutionClientError::signing)?;
    let envelope = TxEnvelope::Legacy(legacy.into_signed(sig));
    Ok(envelope.encoded_2718())
}

impl<A: DexAggregator, C: Connector> ExecutionClient<A, C> {
    /// The gas price to send with: the known price if any, else the node's,
    /// else the floor
    pub(crate) async fn resolve_gas_price(&self, known: Option<u128>) -> u128 {
        match known.filter(|p| *p > 0) {
            Some(price) => price,
            None => self.live_gas_price().await.unwrap_or(FLOOR_GAS_PRICE_WEI),
        }
    }

    /// The gas limit to send with: the hint if any, else the estimate plus
    /// 20%, else the fallback
    pub(crate) async fn resolve_gas_limit(
        &self,
        call: &CallRequest,
        hint: Option<u64>,
        fallback: u64,
    ) -> Result<u64, ExecutionClientError> {
        if let Some(limit) = hint.filter(|l| *l > 0) {
            return Ok(limit);
        }

        match self.conn().estimate_gas(call).await {
            Ok(estimate) => Ok(estimate.saturating_mul(6) / 5),
            Err(e) => {
                let cause = classify_message(&e.to_string(), &self.config.allowance_reset_phrases);
                if cause == FailureCause::AllowanceTooLow {
                    return Err(ExecutionClientError::AllowanceTooLow(e.to_string()));
                }

                debug!(fallback, "gas estimation failed, using fallback: {e}");
                Ok(fallback)
            },
        }
    }

    /// Sign and broadcast a call from the wallet, then wait for it to be mined
    ///
    /// A mined but failed transaction is an error.
    #[instrument(skip_all, fields(to = %to))]
    pub(crate) async fn send_and_confirm(
        &mut self,
        to: Address,
        data: Bytes,
        value: U256,
        gas_limit: u64,
        gas_price: u128,
    ) -> Result<TxHash, ExecutionClientError> {
        let nonce = self.conn().pending_nonce(self.address()).await?;
        let tx = PendingTransaction { to, data, value, gas_limit, gas_price, nonce };
        let raw = sign_legacy(&self.signer, self.config.chain_id, &tx)?;

        let tx_hash = self.conn().send_raw_transaction(&raw).await?;
        info!(%tx_hash, nonce, gas_limit, gas_price, "sent transaction");

        let receipt = self.wait_for_receipt(tx_hash).await?;
        self.gas_spent_wei = self
            .gas_spent_wei
            .saturating_add(u128::from(receipt.gas_used).saturating_mul(receipt.effective_gas_price));
        if !receipt.success {
            return Err(ExecutionClientError::reverted(tx_hash));
        }

        Ok(tx_hash)
    }

    /// Send a call, resolving its gas price and limit first
    pub(crate) async fn send_call(
        &mut self,
        to: Address,
        data: Bytes,
        gas_limit_hint: Option<u64>,
        gas_price: Option<u128>,
        fallback_gas_limit: u64,
    ) -> Result<TxHash, ExecutionClientError> {
        let gas_price = self.resolve_gas_price(gas_price).await;
        let call = CallRequest { from: self.address(), to, data: data.clone(), value: U256::ZERO };
        let gas_limit = self.resolve_gas_limit(&call, gas_limit_hint, fallback_gas_limit).await?;

        self.send_and_confirm(to, data, U256::ZERO, gas_limit, gas_price).await
    }

    /// Poll for a transaction's receipt until it is mined or the timeout
    /// elapses
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<ReceiptSummary, ExecutionClientError> {
        let poll = async {
            loop {
                match self.conn().receipt(tx_hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {},
                    Err(e) => warn!(%tx_hash, "error polling receipt: {e}"),
                }
                tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(RECEIPT_TIMEOUT, poll)
            .await
            .map_err(|_| ExecutionClientError::Timeout(tx_hash.to_string()))
    }
}

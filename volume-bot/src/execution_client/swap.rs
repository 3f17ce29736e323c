//! Swap execution with gas escalation and endpoint failover

use std::time::Duration;

use alloy_primitives::{Address, TxHash, U256};
use bigdecimal::BigDecimal;
use okx_dex_client::{
    types::{is_native_token, SwapParams},
    units::from_base_units,
};
use tracing::{info, instrument, warn};

use super::{
    error::ExecutionClientError,
    submit::{scale_gas, FLOOR_GAS_PRICE_WEI},
    DexAggregator, ExecutionClient,
};
use crate::chain_client::{CallRequest, Connector};

// -------------
// | Constants |
// -------------

/// The gas limit of a swap when the aggregator gives none and estimation fails
const SWAP_GAS_LIMIT: u64 = 300_000;
/// The pause between swap attempts
const SWAP_RETRY_DELAY: Duration = Duration::from_millis(700);
/// The decimals assumed when neither the build nor the quote report them
const DEFAULT_DECIMALS: u8 = 18;

// ---------
// | Types |
// ---------

/// The result of a confirmed swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOutcome {
    /// The swap transaction
    pub tx_hash: TxHash,
    /// The output received, in whole units
    pub amount_out: BigDecimal,
    /// The output received, in base units
    pub amount_out_base: U256,
}

impl<A: DexAggregator, C: Connector> ExecutionClient<A, C> {
    /// Swap `amount_in` of `from` into `to`, retrying up to `max_attempts`
    /// times
    ///
    /// Every attempt re-quotes. After a failed attempt the gas price is bumped
    /// 15% (or set to the node's price plus 20% when none was known), the RPC
    /// endpoint rotates and the swap is retried after a short pause.
    #[instrument(skip_all, fields(from = %from, to = %to, amount = %amount_in))]
    pub async fn swap(
        &mut self,
        from: Address,
        to: Address,
        amount_in: &BigDecimal,
        decimals_in: u8,
        slippage: Option<BigDecimal>,
        max_attempts: usize,
    ) -> Result<SwapOutcome, ExecutionClientError> {
        let slippage = slippage.unwrap_or_else(|| self.config.slippage.clone());
        let params =
            SwapParams::new(from, to, amount_in, decimals_in, self.address(), slippage)?;

        let mut gas_price = None;
        let mut last_err = None;
        for attempt in 1..=max_attempts {
            match self.try_swap(&params, &mut gas_price).await {
                Ok(outcome) => {
                    info!(tx_hash = %outcome.tx_hash, amount_out = %outcome.amount_out, "swap confirmed");
                    return Ok(outcome);
                },
                Err(e) => {
                    warn!(attempt, max_attempts, "swap attempt failed: {e}");
                    last_err = Some(e);
                    if attempt == max_attempts {
                        break;
                    }

                    gas_price = Some(match gas_price {
                        Some(price) => scale_gas(price, 115, 100),
                        None => scale_gas(
                            self.live_gas_price().await.unwrap_or(FLOOR_GAS_PRICE_WEI),
                            12,
                            10,
                        ),
                    });
                    self.rotate().await?;
                    tokio::time::sleep(SWAP_RETRY_DELAY).await;
                },
            }
        }

        let last = last_err.unwrap_or_else(|| ExecutionClientError::onchain("no swap attempts made"));
        Err(ExecutionClientError::SwapExhausted { attempts: max_attempts, last: Box::new(last) })
    }

    /// Make a single swap attempt
    ///
    /// `gas_price` carries the escalated price between attempts and is set to
    /// the price this attempt sends with.
    async fn try_swap(
        &mut self,
        params: &SwapParams,
        gas_price: &mut Option<u128>,
    ) -> Result<SwapOutcome, ExecutionClientError> {
        let quote = self.aggregator.quote(params).await?;
        if !is_native_token(params.from_token) {
            self.ensure_allowance(params.from_token, params.amount).await?;
        }

        let tx = self.aggregator.build_swap(params).await?;
        let price = match (*gas_price, tx.gas_price) {
            (Some(escalated), Some(hint)) => escalated.max(hint),
            (Some(escalated), None) => escalated,
            (None, hint) => self.resolve_gas_price(hint).await,
        };
        *gas_price = Some(price);

        let call =
            CallRequest { from: self.address(), to: tx.to, data: tx.data.clone(), value: tx.value };
        let gas_limit = self.resolve_gas_limit(&call, tx.gas_limit, SWAP_GAS_LIMIT).await?;

        let tx_hash = self.send_and_confirm(tx.to, tx.data, tx.value, gas_limit, price).await?;

        let amount_out_base = tx.min_receive.or(tx.to_amount).unwrap_or(quote.to_amount);
        let decimals = tx.to_decimals.or(quote.to_decimals).unwrap_or(DEFAULT_DECIMALS);
        Ok(SwapOutcome {
            tx_hash,
            amount_out: from_base_units(amount_out_base, decimals),
            amount_out_base,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{str::FromStr, sync::Arc};

    use alloy::{
        consensus::{Transaction, TxEnvelope},
        eips::eip2718::Decodable2718,
        signers::local::PrivateKeySigner,
    };
    use alloy_primitives::address;
    use bigdecimal::num_bigint::BigInt;
    use okx_dex_client::{error::OkxClientError, types::NATIVE_TOKEN_ADDRESS};

    use super::*;
    use crate::{
        chain_client::{mock::MockConnector, EndpointSet, RpcRotator},
        config::StrategyConfig,
        execution_client::mock::MockAggregator,
    };

    const TOKEN: Address = address!("e6DF05CE8C8301223373CF5B969AFCb1498c5528");
    const USDT: Address = address!("55d398326f99059fF775485246999027B3197955");

    async fn client(
        aggregator: MockAggregator,
        connector: MockConnector,
    ) -> ExecutionClient<MockAggregator, MockConnector> {
        let endpoints = EndpointSet::new(["https://a", "https://b"]).unwrap();
        ExecutionClient::connect(
            aggregator,
            RpcRotator::new(connector, endpoints),
            PrivateKeySigner::random(),
            Arc::new(StrategyConfig::default()),
        )
        .await
        .unwrap()
    }

    fn one() -> BigDecimal {
        BigDecimal::from_str("1").unwrap()
    }

    /// Tests that a token swap approves the router before swapping
    #[tokio::test(start_paused = true)]
    async fn test_swap_approves_token() {
        let connector = MockConnector::new();
        let mut client = client(MockAggregator::new(1_000), connector.clone()).await;

        let outcome = client.swap(TOKEN, USDT, &one(), 18, None, 5).await.unwrap();
        assert_eq!(outcome.amount_out_base, U256::from(1_000u64));
        assert_eq!(connector.num_sent(), 2);
    }

    /// Tests that a native swap skips the allowance and retries a reverted
    /// attempt on the next endpoint
    #[tokio::test(start_paused = true)]
    async fn test_swap_retries_after_revert() {
        let connector = MockConnector::new();
        connector.state.lock().unwrap().outcomes.push_back(false);
        let opened = connector.opened.clone();
        let mut client = client(MockAggregator::new(1_000), connector.clone()).await;

        client.swap(NATIVE_TOKEN_ADDRESS, USDT, &one(), 18, None, 5).await.unwrap();
        assert_eq!(connector.num_sent(), 2);
        assert_eq!(*opened.lock().unwrap(), vec!["https://a", "https://b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_swap_exhausted() {
        let connector = MockConnector::new();
        connector.state.lock().unwrap().outcomes.extend([false, false, false]);
        let mut client = client(MockAggregator::new(1_000), connector.clone()).await;

        let err = client.swap(NATIVE_TOKEN_ADDRESS, USDT, &one(), 18, None, 3).await.unwrap_err();
        match err {
            ExecutionClientError::SwapExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ExecutionClientError::TransactionReverted(_)));
            },
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(connector.num_sent(), 3);
    }

    /// Tests that a failed quote escalates to the node's gas price plus 20%
    #[tokio::test(start_paused = true)]
    async fn test_swap_gas_escalation_without_known_price() {
        let aggregator = MockAggregator::new(1_000);
        aggregator.quote_errors.lock().unwrap().push_back(OkxClientError::empty_response("/quote"));
        let connector = MockConnector::new();
        let mut client = client(aggregator, connector.clone()).await;

        client.swap(NATIVE_TOKEN_ADDRESS, USDT, &one(), 18, None, 5).await.unwrap();

        let state = connector.state.lock().unwrap();
        assert_eq!(state.sent.len(), 1);
        let tx = TxEnvelope::decode_2718(&mut state.sent[0].as_slice()).unwrap();
        assert_eq!(tx.gas_price(), Some(1_200_000_000));
    }

    /// Tests that a known gas price is bumped 15% per failed attempt
    #[tokio::test(start_paused = true)]
    async fn test_swap_gas_escalation_from_hint() {
        let mut aggregator = MockAggregator::new(1_000);
        aggregator.gas_price_hint = Some(2_000_000_000);
        let connector = MockConnector::new();
        connector.state.lock().unwrap().outcomes.push_back(false);
        let mut client = client(aggregator, connector.clone()).await;

        client.swap(NATIVE_TOKEN_ADDRESS, USDT, &one(), 18, None, 5).await.unwrap();

        let state = connector.state.lock().unwrap();
        let prices: Vec<Option<u128>> = state
            .sent
            .iter()
            .map(|raw| TxEnvelope::decode_2718(&mut raw.as_slice()).unwrap().gas_price())
            .collect();
        assert_eq!(prices, vec![Some(2_000_000_000), Some(2_300_000_000)]);
    }

    /// Tests that the output falls back to the quote's decimals
    #[tokio::test(start_paused = true)]
    async fn test_swap_output_decimals() {
        let mut aggregator = MockAggregator::new(1_500_000);
        aggregator.to_decimals = None;
        let mut client = client(aggregator, MockConnector::new()).await;
        let outcome = client.swap(NATIVE_TOKEN_ADDRESS, USDT, &one(), 18, None, 1).await.unwrap();
        assert_eq!(outcome.amount_out, BigDecimal::new(BigInt::from(1_500_000), 18));

        let mut aggregator = MockAggregator::new(1_500_000);
        aggregator.to_decimals = Some(6);
        let mut client = self::client(aggregator, MockConnector::new()).await;
        let outcome = client.swap(NATIVE_TOKEN_ADDRESS, USDT, &one(), 18, None, 1).await.unwrap();
        assert_eq!(outcome.amount_out, BigDecimal::from_str("1.5").unwrap());
    }
}

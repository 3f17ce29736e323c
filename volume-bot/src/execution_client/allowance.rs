//! ERC-20 allowance management for the aggregator's spender

use std::time::Duration;

use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_sol_types::SolCall;
use tracing::{info, instrument, warn};

use super::{
    error::ExecutionClientError,
    submit::{scale_gas, FLOOR_GAS_PRICE_WEI},
    DexAggregator, ExecutionClient,
};
use crate::{
    chain_client::{ChainConnection, Connector},
    helpers::IERC20,
};

/// The gas limit of a zeroing approval in `ensure_allowance` when estimation
/// fails
const APPROVE_ZERO_GAS_LIMIT: u64 = 90_000;
/// The gas limit of a zeroing approval in `force_reset` when estimation fails
const RESET_APPROVE_ZERO_GAS_LIMIT: u64 = 120_000;
/// The gas limit of an approval in `ensure_allowance` when estimation fails
const APPROVE_GAS_LIMIT: u64 = 100_000;
/// The gas limit of a re-approval in `force_reset` when estimation fails
const RESET_APPROVE_GAS_LIMIT: u64 = 150_000;
/// The pause after an approval so every RPC node sees the new allowance
const POST_APPROVE_DELAY: Duration = Duration::from_millis(600);
/// The pause between approval attempts
const APPROVE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// The calldata of `approve(spender, 0)`
fn approve_zero_calldata(spender: Address) -> Bytes {
    IERC20::approveCall { spender, value: U256::ZERO }.abi_encode().into()
}

impl<A: DexAggregator, C: Connector> ExecutionClient<A, C> {
    /// Make sure the aggregator may spend `amount` base units of `token`
    ///
    /// Returns the approval transaction, or `None` when the current allowance
    /// already covers the amount. A nonzero, insufficient allowance is zeroed
    /// first; a failure to zero it aborts.
    #[instrument(skip_all, fields(token = %token))]
    pub async fn ensure_allowance(
        &mut self,
        token: Address,
        amount: U256,
    ) -> Result<Option<TxHash>, ExecutionClientError> {
        let approve = self.aggregator.build_approve(token, amount).await?;
        let current = self.conn().allowance(token, self.address(), approve.spender).await?;
        info!(%current, need = %amount, spender = %approve.spender, "checked allowance");

        if current >= amount {
            return Ok(None);
        }

        if current > U256::ZERO {
            info!("zeroing allowance");
            self.send_call(
                token,
                approve_zero_calldata(approve.spender),
                None,
                None,
                APPROVE_ZERO_GAS_LIMIT,
            )
            .await?;
        }

        let tx_hash = self
            .send_with_escalation(
                token,
                approve.data,
                approve.gas_limit,
                approve.gas_price,
                self.config.approve_max_attempts,
                APPROVE_GAS_LIMIT,
            )
            .await?;
        tokio::time::sleep(POST_APPROVE_DELAY).await;

        Ok(Some(tx_hash))
    }

    /// Reset the aggregator's allowance on `token` to zero, then approve
    /// `amount` base units
    ///
    /// A failure to zero the allowance is logged and the re-approval proceeds.
    #[instrument(skip_all, fields(token = %token))]
    pub async fn force_reset(
        &mut self,
        token: Address,
        amount: U256,
    ) -> Result<TxHash, ExecutionClientError> {
        let approve = self
            .aggregator
            .build_approve(token, amount)
            .await
            .map_err(ExecutionClientError::allowance_reset_failed)?;

        info!(spender = %approve.spender, "approve(0)");
        let zeroed = self
            .send_call(
                token,
                approve_zero_calldata(approve.spender),
                None,
                None,
                RESET_APPROVE_ZERO_GAS_LIMIT,
            )
            .await;
        if let Err(e) = zeroed {
            warn!("approve(0) failed, re-approving anyway: {e}");
        }

        tokio::time::sleep(POST_APPROVE_DELAY).await;

        self.send_with_escalation(
            token,
            approve.data,
            approve.gas_limit,
            approve.gas_price,
            self.config.swap_send_max_attempts,
            RESET_APPROVE_GAS_LIMIT,
        )
        .await
        .map_err(|e| match e {
            e @ ExecutionClientError::AllEndpointsDown { .. } => e,
            e => ExecutionClientError::allowance_reset_failed(e),
        })
    }

    /// Send an approval, bumping the gas price 15% and rotating the endpoint
    /// between failed attempts
    async fn send_with_escalation(
        &mut self,
        token: Address,
        data: Bytes,
        gas_limit: Option<u64>,
        gas_price: Option<u128>,
        max_attempts: usize,
        fallback_gas_limit: u64,
    ) -> Result<TxHash, ExecutionClientError> {
        let mut gas_price = gas_price;
        let mut last_err = None;

        for attempt in 1..=max_attempts {
            match self.send_call(token, data.clone(), gas_limit, gas_price, fallback_gas_limit).await
            {
                Ok(tx_hash) => {
                    info!(%tx_hash, "approve ok");
                    return Ok(tx_hash);
                },
                Err(e) => {
                    warn!(attempt, "approve attempt failed: {e}");
                    last_err = Some(e);
                    if attempt == max_attempts {
                        break;
                    }

                    let base = match gas_price {
                        Some(price) => price,
                        None => self.live_gas_price().await.unwrap_or(FLOOR_GAS_PRICE_WEI),
                    };
                    gas_price = Some(scale_gas(base, 115, 100));
                    self.rotate().await?;
                    tokio::time::sleep(APPROVE_RETRY_DELAY).await;
                },
            }
        }

        Err(last_err.unwrap_or_else(|| ExecutionClientError::onchain("no approval attempts made")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy::signers::local::PrivateKeySigner;

    use super::*;
    use crate::{
        chain_client::{mock::MockConnector, EndpointSet, RpcRotator},
        config::StrategyConfig,
        execution_client::mock::{MockAggregator, MOCK_SPENDER},
    };

    const TOKEN: Address = alloy_primitives::address!("e6DF05CE8C8301223373CF5B969AFCb1498c5528");

    async fn client(
        connector: MockConnector,
    ) -> ExecutionClient<MockAggregator, MockConnector> {
        let endpoints = EndpointSet::new(["https://a", "https://b"]).unwrap();
        ExecutionClient::connect(
            MockAggregator::new(1_000),
            RpcRotator::new(connector, endpoints),
            PrivateKeySigner::random(),
            Arc::new(StrategyConfig::default()),
        )
        .await
        .unwrap()
    }

    /// Tests that a sufficient allowance issues no transactions
    #[tokio::test(start_paused = true)]
    async fn test_allowance_sufficient() {
        let connector = MockConnector::new();
        connector.state.lock().unwrap().allowance = U256::from(500u64);
        let mut client = client(connector.clone()).await;

        let res = client.ensure_allowance(TOKEN, U256::from(500u64)).await.unwrap();
        assert!(res.is_none());
        assert_eq!(connector.num_sent(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_allowance_from_zero() {
        let connector = MockConnector::new();
        let mut client = client(connector.clone()).await;

        let res = client.ensure_allowance(TOKEN, U256::from(500u64)).await.unwrap();
        assert!(res.is_some());
        assert_eq!(connector.num_sent(), 1);
    }

    /// Tests that a nonzero insufficient allowance is zeroed before approving
    #[tokio::test(start_paused = true)]
    async fn test_allowance_zeroed_first() {
        let connector = MockConnector::new();
        connector.state.lock().unwrap().allowance = U256::from(1u64);
        let mut client = client(connector.clone()).await;

        client.ensure_allowance(TOKEN, U256::from(500u64)).await.unwrap();
        let state = connector.state.lock().unwrap();
        assert_eq!(state.sent.len(), 2);
        assert!(contains(&state.sent[0], &approve_zero_calldata(MOCK_SPENDER)));
    }

    /// Tests that a reverted zeroing approval aborts `ensure_allowance`
    #[tokio::test(start_paused = true)]
    async fn test_allowance_zeroing_revert_is_fatal() {
        let connector = MockConnector::new();
        {
            let mut state = connector.state.lock().unwrap();
            state.allowance = U256::from(1u64);
            state.outcomes.push_back(false);
        }
        let mut client = client(connector.clone()).await;

        let err = client.ensure_allowance(TOKEN, U256::from(500u64)).await.unwrap_err();
        assert!(matches!(err, ExecutionClientError::TransactionReverted(_)));
        assert_eq!(connector.num_sent(), 1);
    }

    /// Tests that `force_reset` re-approves even when zeroing reverts, with a
    /// rotation between failed re-approvals
    #[tokio::test(start_paused = true)]
    async fn test_force_reset_continues_after_zero_failure() {
        let connector = MockConnector::new();
        connector.state.lock().unwrap().outcomes.extend([false, false, true]);
        let opened = connector.opened.clone();
        let mut client = client(connector.clone()).await;

        client.force_reset(TOKEN, U256::from(500u64)).await.unwrap();
        assert_eq!(connector.num_sent(), 3);
        // initial connect plus one rotation
        assert_eq!(opened.lock().unwrap().len(), 2);
    }

    /// Tests that an exhausted re-approval rotates only between attempts
    #[tokio::test(start_paused = true)]
    async fn test_force_reset_exhausted() {
        let connector = MockConnector::new();
        connector.state.lock().unwrap().outcomes.extend([true, false, false, false]);
        let opened = connector.opened.clone();
        let mut client = client(connector.clone()).await;

        let err = client.force_reset(TOKEN, U256::from(500u64)).await.unwrap_err();
        assert!(matches!(err, ExecutionClientError::AllowanceResetFailed(_)));
        assert_eq!(connector.num_sent(), 4);
        // initial connect plus two rotations for three attempts
        assert_eq!(opened.lock().unwrap().len(), 3);
    }

    /// Whether `haystack` contains `needle` as a contiguous subslice
    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }
}

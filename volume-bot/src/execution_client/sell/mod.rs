//! Adaptive selling into the stablecoin
//!
//! A sell first tries the whole amount in one swap. When that fails the amount
//! is split into primary chunks, each retried a few times; a primary chunk
//! that never sells is split once more into secondary sub-chunks. Partial
//! sales are a valid result.

use std::time::Duration;

use alloy_primitives::{Address, TxHash};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use okx_dex_client::units::to_base_units;
use rand::Rng;
use tracing::{info, instrument, warn};

use super::{error::ExecutionClientError, swap::SwapOutcome, DexAggregator, ExecutionClient};
use crate::{
    chain_client::Connector,
    config::{StrategyConfig, TokenConfig},
    trade_log::{TradeLog, TradeRecord, TradeSide},
};

pub mod chunks;
pub mod reset_policy;

use self::{chunks::chunk_plan, reset_policy::ResetPolicy};

// ---------
// | Venue |
// ---------

/// Where the sell controller sells
#[async_trait]
pub trait SellVenue: Send {
    /// Swap `amount` of `token` into the stablecoin
    async fn sell(
        &mut self,
        token: &TokenConfig,
        amount: &BigDecimal,
        slippage: BigDecimal,
    ) -> Result<SwapOutcome, ExecutionClientError>;
    /// Reset the router's allowance on `token` and re-approve `amount`
    async fn force_reset(
        &mut self,
        token: &TokenConfig,
        amount: &BigDecimal,
    ) -> Result<TxHash, ExecutionClientError>;
    /// Move to the next live RPC endpoint
    async fn rotate_endpoint(&mut self) -> Result<(), ExecutionClientError>;
    /// The selling wallet
    fn wallet(&self) -> Address;
}

#[async_trait]
impl<A: DexAggregator, C: Connector> SellVenue for ExecutionClient<A, C> {
    async fn sell(
        &mut self,
        token: &TokenConfig,
        amount: &BigDecimal,
        slippage: BigDecimal,
    ) -> Result<SwapOutcome, ExecutionClientError> {
        let stable = self.config.stable.address;
        let attempts = self.config.swap_max_attempts;
        self.swap(token.address, stable, amount, token.decimals, Some(slippage), attempts).await
    }

    async fn force_reset(
        &mut self,
        token: &TokenConfig,
        amount: &BigDecimal,
    ) -> Result<TxHash, ExecutionClientError> {
        let amount_base = to_base_units(amount, token.decimals)?;
        ExecutionClient::force_reset(self, token.address, amount_base).await
    }

    async fn rotate_endpoint(&mut self) -> Result<(), ExecutionClientError> {
        self.rotate().await
    }

    fn wallet(&self) -> Address {
        self.address()
    }
}

// --------------
// | Controller |
// --------------

/// The outcome of a sell, possibly partial
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SellResult {
    /// The last confirmed sell transaction, if any sold
    pub last_tx: Option<TxHash>,
    /// The stablecoin received across all confirmed swaps
    pub usdt_received: BigDecimal,
    /// The number of swaps attempted
    pub swaps_attempted: usize,
}

impl SellResult {
    /// Whether nothing sold
    pub fn is_empty(&self) -> bool {
        self.last_tx.is_none()
    }

    /// Accumulate a confirmed swap
    fn add(&mut self, outcome: &SwapOutcome) {
        self.last_tx = Some(outcome.tx_hash);
        self.usdt_received += &outcome.amount_out;
    }
}

/// Sells tokens through a venue, escalating from one swap to chunked swaps
pub struct SellController<'a, V: SellVenue> {
    /// The venue sold on
    venue: &'a mut V,
    /// Where confirmed sells are recorded
    trade_log: &'a dyn TradeLog,
    /// The strategy configuration
    config: &'a StrategyConfig,
    /// When failures reset the allowance
    policy: ResetPolicy,
    /// Swaps attempted in the current sell
    swaps_attempted: usize,
    /// Swaps failed in the current sell
    failures: usize,
}

impl<'a, V: SellVenue> SellController<'a, V> {
    /// Create a controller
    pub fn new(venue: &'a mut V, trade_log: &'a dyn TradeLog, config: &'a StrategyConfig) -> Self {
        let policy = ResetPolicy::from_config(config);
        Self { venue, trade_log, config, policy, swaps_attempted: 0, failures: 0 }
    }

    /// Sell `amount` of `token`
    ///
    /// Only a dead RPC rotation is an error; exhausting every tier returns
    /// whatever sold.
    #[instrument(skip_all, fields(token = %token.symbol, amount = %amount))]
    pub async fn sell_with_retry(
        &mut self,
        token: &TokenConfig,
        amount: &BigDecimal,
    ) -> Result<SellResult, ExecutionClientError> {
        self.swaps_attempted = 0;
        self.failures = 0;

        let mut result = SellResult::default();
        if let Some(outcome) = self.attempt_sell(token, amount).await? {
            result.add(&outcome);
            return Ok(self.finish(result));
        }

        let primary = chunk_plan(amount, self.config.primary_ratios_for(&token.symbol), token.decimals);
        warn!(parts = primary.len(), "direct sell failed, selling in chunks");

        let num_primary = primary.len();
        for (i, chunk) in primary.iter().enumerate() {
            let label = format!("chunk {}/{num_primary}", i + 1);
            if let Some(outcome) = self.sell_chunk(token, chunk, &label).await? {
                result.add(&outcome);
                continue;
            }

            let secondary = chunk_plan(chunk, &self.config.secondary_ratios, token.decimals);
            warn!(parts = secondary.len(), "{label} unsold, splitting it again");

            let mut sold = 0;
            let num_secondary = secondary.len();
            for (j, sub) in secondary.iter().enumerate() {
                let sub_label = format!("sub-chunk {}/{num_secondary} of {label}", j + 1);
                match self.sell_chunk(token, sub, &sub_label).await? {
                    Some(outcome) => {
                        result.add(&outcome);
                        sold += 1;
                        if sold >= self.config.secondary_early_exit_sold {
                            info!(sold, "enough sub-chunks sold, stopping");
                            return Ok(self.finish(result));
                        }
                    },
                    None => {
                        warn!("{sub_label} unsold, giving up on this sell");
                        return Ok(self.finish(result));
                    },
                }
            }
        }

        Ok(self.finish(result))
    }

    /// Sell a chunk, retrying with endpoint rotation and exponential backoff
    async fn sell_chunk(
        &mut self,
        token: &TokenConfig,
        amount: &BigDecimal,
        label: &str,
    ) -> Result<Option<SwapOutcome>, ExecutionClientError> {
        let max_attempts = self.config.chunk_max_attempts;
        for attempt in 1..=max_attempts {
            info!(attempt, max_attempts, "{label}: selling {amount}");
            if let Some(outcome) = self.attempt_sell(token, amount).await? {
                return Ok(Some(outcome));
            }
            if attempt == max_attempts {
                break;
            }

            self.venue.rotate_endpoint().await?;
            let delay = self.backoff(attempt);
            warn!("{label} failed, retrying in {:.2}s", delay.as_secs_f64());
            tokio::time::sleep(delay).await;
        }

        Ok(None)
    }

    /// Make one sell swap, recording it on success and resetting the
    /// allowance on failure when the policy says so
    ///
    /// Returns `None` when the swap failed for a reason a retry may fix.
    async fn attempt_sell(
        &mut self,
        token: &TokenConfig,
        amount: &BigDecimal,
    ) -> Result<Option<SwapOutcome>, ExecutionClientError> {
        let slippage = self.config.sell_slippage(self.swaps_attempted);
        self.swaps_attempted += 1;

        let err = match self.venue.sell(token, amount, slippage).await {
            Ok(outcome) => {
                self.record(token, amount, &outcome);
                return Ok(Some(outcome));
            },
            Err(e) if e.is_endpoints_down() => return Err(e),
            Err(e) => e,
        };

        self.failures += 1;
        let cause = err.cause(&self.config.allowance_reset_phrases);
        warn!(?cause, failures = self.failures, "sell failed: {err}");

        if self.policy.should_reset(cause, self.failures) {
            info!("resetting allowance before the next sell");
            match self.venue.force_reset(token, amount).await {
                Ok(tx_hash) => info!(%tx_hash, "allowance reset"),
                Err(e) if e.is_endpoints_down() => return Err(e),
                Err(e) => warn!("{}", ExecutionClientError::allowance_reset_failed(e)),
            }
        }

        Ok(None)
    }

    /// Append a confirmed sell to the trade log
    fn record(&self, token: &TokenConfig, amount: &BigDecimal, outcome: &SwapOutcome) {
        let record = TradeRecord::now(
            self.venue.wallet(),
            &token.symbol,
            TradeSide::Sell,
            outcome.amount_out.clone(),
            amount.clone(),
            outcome.tx_hash,
        );
        if let Err(e) = self.trade_log.record(&record) {
            warn!("failed to record sell: {e}");
        }
    }

    /// The pause before the next attempt of a chunk
    fn backoff(&self, attempt: usize) -> Duration {
        let exp = 1u64.checked_shl(attempt.saturating_sub(1) as u32).unwrap_or(u64::MAX);
        let base = exp.min(self.config.chunk_max_sleep_secs);
        let jitter = rand::thread_rng().gen_range(0.2..0.6);
        Duration::from_secs(base) + Duration::from_secs_f64(jitter)
    }

    /// Stamp the attempt count on a result
    fn finish(&self, mut result: SellResult) -> SellResult {
        result.swaps_attempted = self.swaps_attempted;
        result
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, str::FromStr, sync::Arc};

    use alloy::signers::local::PrivateKeySigner;
    use alloy_primitives::{address, B256, U256};
    use bigdecimal::Zero;

    use super::*;
    use crate::{
        chain_client::{mock::MockConnector, EndpointSet, RpcRotator},
        execution_client::mock::MockAggregator,
        trade_log::MemoryTradeLog,
    };

    /// A venue with scripted sell outcomes; sells convert 1:1
    #[derive(Default)]
    struct MockSellVenue {
        /// Errors of the next sells; success once exhausted
        outcomes: VecDeque<Option<ExecutionClientError>>,
        /// Whether allowance resets fail
        reset_fails: bool,
        /// Whether rotation finds no live endpoint
        endpoints_down: bool,
        /// The amount and slippage of every sell attempted
        sells: Vec<(BigDecimal, BigDecimal)>,
        /// The amount of every reset attempted
        resets: Vec<BigDecimal>,
        /// The number of rotations
        rotations: usize,
    }

    impl MockSellVenue {
        fn failing(errors: impl IntoIterator<Item = Option<ExecutionClientError>>) -> Self {
            Self { outcomes: errors.into_iter().collect(), ..Default::default() }
        }

        fn amounts(&self) -> Vec<BigDecimal> {
            self.sells.iter().map(|(amount, _)| amount.clone()).collect()
        }
    }

    #[async_trait]
    impl SellVenue for MockSellVenue {
        async fn sell(
            &mut self,
            _token: &TokenConfig,
            amount: &BigDecimal,
            slippage: BigDecimal,
        ) -> Result<SwapOutcome, ExecutionClientError> {
            self.sells.push((amount.clone(), slippage));
            if let Some(Some(e)) = self.outcomes.pop_front() {
                return Err(e);
            }

            Ok(SwapOutcome {
                tx_hash: B256::with_last_byte(self.sells.len() as u8),
                amount_out: amount.clone(),
                amount_out_base: U256::ZERO,
            })
        }

        async fn force_reset(
            &mut self,
            _token: &TokenConfig,
            amount: &BigDecimal,
        ) -> Result<TxHash, ExecutionClientError> {
            self.resets.push(amount.clone());
            if self.reset_fails {
                return Err(ExecutionClientError::onchain("approve reverted"));
            }
            Ok(TxHash::ZERO)
        }

        async fn rotate_endpoint(&mut self) -> Result<(), ExecutionClientError> {
            self.rotations += 1;
            if self.endpoints_down {
                return Err(ExecutionClientError::AllEndpointsDown { tried: 2 });
            }
            Ok(())
        }

        fn wallet(&self) -> Address {
            Address::ZERO
        }
    }

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn token() -> TokenConfig {
        TokenConfig {
            symbol: "TEST".to_string(),
            address: address!("e6DF05CE8C8301223373CF5B969AFCb1498c5528"),
            decimals: 18,
            weight: 1.0,
        }
    }

    fn reverted() -> Option<ExecutionClientError> {
        Some(ExecutionClientError::reverted("0xdead"))
    }

    /// A config without periodic resets
    fn config() -> StrategyConfig {
        StrategyConfig { reapprove_every_n_failures: 0, ..Default::default() }
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_sell() {
        let mut venue = MockSellVenue::default();
        let log = MemoryTradeLog::default();
        let config = config();

        let res =
            SellController::new(&mut venue, &log, &config).sell_with_retry(&token(), &dec("100")).await.unwrap();

        assert_eq!(res.usdt_received, dec("100"));
        assert_eq!(res.swaps_attempted, 1);
        assert_eq!(log.records.lock().unwrap().len(), 1);
    }

    /// Tests that a failed direct sell falls back to 60/30/10 chunks
    #[tokio::test(start_paused = true)]
    async fn test_primary_chunks() {
        let mut venue = MockSellVenue::failing([reverted()]);
        let log = MemoryTradeLog::default();
        let config = config();

        let res =
            SellController::new(&mut venue, &log, &config).sell_with_retry(&token(), &dec("100")).await.unwrap();

        assert_eq!(venue.amounts(), vec![dec("100"), dec("60"), dec("30"), dec("10")]);
        assert_eq!(res.usdt_received, dec("100"));
        assert_eq!(res.last_tx, Some(B256::with_last_byte(4)));
        assert!(venue.resets.is_empty());

        let records = log.records.lock().unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.side == TradeSide::Sell));
    }

    /// Tests that an allowance failure resets the allowance and chunking
    /// proceeds even though the reset fails
    #[tokio::test(start_paused = true)]
    async fn test_allowance_failure_resets() {
        let mut venue = MockSellVenue::failing([Some(ExecutionClientError::onchain(
            "execution reverted: ERC20: insufficient allowance",
        ))]);
        venue.reset_fails = true;
        let log = MemoryTradeLog::default();
        let config = config();

        let res =
            SellController::new(&mut venue, &log, &config).sell_with_retry(&token(), &dec("100")).await.unwrap();

        assert_eq!(venue.resets, vec![dec("100")]);
        assert_eq!(venue.sells.len(), 4);
        assert_eq!(res.usdt_received, dec("100"));
    }

    /// Tests that an unsold primary chunk is split again and the sell stops
    /// once two sub-chunks sold
    #[tokio::test(start_paused = true)]
    async fn test_secondary_split_early_exit() {
        // direct, chunk 1 ok, chunk 2 twice, then sub-chunks
        let mut venue = MockSellVenue::failing([reverted(), None, reverted(), reverted()]);
        let log = MemoryTradeLog::default();
        let config = config();

        let res =
            SellController::new(&mut venue, &log, &config).sell_with_retry(&token(), &dec("100")).await.unwrap();

        assert_eq!(
            venue.amounts(),
            vec![dec("100"), dec("60"), dec("30"), dec("30"), dec("15"), dec("9")]
        );
        assert_eq!(res.usdt_received, dec("84"));
        assert_eq!(res.swaps_attempted, 6);
        assert_eq!(venue.rotations, 1);
    }

    /// Tests that an unsold sub-chunk ends the sell with a partial result
    #[tokio::test(start_paused = true)]
    async fn test_unsold_sub_chunk_gives_up() {
        let mut venue = MockSellVenue::failing([
            reverted(),
            reverted(),
            reverted(),
            reverted(),
            reverted(),
        ]);
        let log = MemoryTradeLog::default();
        let config = config();

        let res =
            SellController::new(&mut venue, &log, &config).sell_with_retry(&token(), &dec("100")).await.unwrap();

        // direct, chunk 1 twice, sub-chunk 1 twice
        assert_eq!(venue.sells.len(), 5);
        assert!(res.is_empty());
        assert_eq!(res.usdt_received, BigDecimal::zero());
    }

    /// Tests the periodic reset on every second failure
    #[tokio::test(start_paused = true)]
    async fn test_periodic_reset() {
        let mut venue = MockSellVenue::failing([reverted(), reverted()]);
        let log = MemoryTradeLog::default();
        let config = StrategyConfig::default();

        SellController::new(&mut venue, &log, &config).sell_with_retry(&token(), &dec("100")).await.unwrap();
        assert_eq!(venue.resets, vec![dec("60")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoints_down_propagates() {
        let mut venue = MockSellVenue::failing([reverted(), reverted()]);
        venue.endpoints_down = true;
        let log = MemoryTradeLog::default();
        let config = config();

        let err = SellController::new(&mut venue, &log, &config)
            .sell_with_retry(&token(), &dec("100"))
            .await
            .unwrap_err();
        assert!(err.is_endpoints_down());
    }

    /// Tests that each successive swap of a sell uses the next slippage step
    #[tokio::test(start_paused = true)]
    async fn test_slippage_steps() {
        let mut venue = MockSellVenue::failing([reverted(), reverted()]);
        let log = MemoryTradeLog::default();
        let config = config();

        SellController::new(&mut venue, &log, &config).sell_with_retry(&token(), &dec("100")).await.unwrap();

        let slippages: Vec<BigDecimal> = venue.sells.iter().map(|(_, s)| s.clone()).collect();
        assert_eq!(slippages[..3], [dec("0.010"), dec("0.011"), dec("0.012")]);
    }

    /// Tests that a chunk sold through the execution client stops after the
    /// configured number of swap attempts
    #[tokio::test(start_paused = true)]
    async fn test_chunk_attempt_send_bound() {
        let connector = MockConnector::new();
        {
            let mut state = connector.state.lock().unwrap();
            state.allowance = U256::MAX;
            state.outcomes.extend([false, false, false, false]);
        }
        let config = Arc::new(StrategyConfig::default());
        let mut client = ExecutionClient::connect(
            MockAggregator::new(1_000),
            RpcRotator::new(connector.clone(), EndpointSet::new(["https://a", "https://b"]).unwrap()),
            PrivateKeySigner::random(),
            config.clone(),
        )
        .await
        .unwrap();

        let err = client.sell(&token(), &dec("10"), config.sell_slippage(0)).await.unwrap_err();
        assert!(matches!(err, ExecutionClientError::SwapExhausted { attempts: 2, .. }));
        assert_eq!(connector.num_sent(), 2);
    }

    #[test]
    fn test_backoff_bounds() {
        let mut venue = MockSellVenue::default();
        let log = MemoryTradeLog::default();
        let config = StrategyConfig { chunk_max_sleep_secs: 3, ..Default::default() };
        let controller = SellController::new(&mut venue, &log, &config);

        let first = controller.backoff(1);
        assert!(first >= Duration::from_millis(1_200) && first < Duration::from_millis(1_600));
        let capped = controller.backoff(10);
        assert!(capped >= Duration::from_millis(3_200) && capped < Duration::from_millis(3_600));
    }
}

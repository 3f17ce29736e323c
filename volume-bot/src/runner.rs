//! Per-wallet orchestration of the `run`, `sell-leftovers` and `stats`
//! commands
//!
//! Wallets are processed one after another in file order; a failing wallet is
//! logged and skipped.

use std::{collections::BTreeMap, path::Path, sync::Arc, time::Duration};

use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, U256};
use bigdecimal::{BigDecimal, RoundingMode, Zero};
use chrono::Utc;
use itertools::Itertools;
use okx_dex_client::{units::from_base_units, OkxApiCredentials, OkxClient};
use rand::{distributions::WeightedIndex, prelude::Distribution, Rng};
use tracing::{error, field, info, info_span, warn, Instrument, Span};

use crate::{
    balances::{fetch_balances, usdt_value, WalletBalances},
    chain_client::{rpc::RpcConnector, Connector, EndpointSet, RpcRotator},
    cli::WalletEntry,
    config::{StrategyConfig, TokenConfig},
    error::VolumeBotError,
    execution_client::{
        error::ExecutionClientError,
        sell::{SellController, SellResult},
        DexAggregator, ExecutionClient,
    },
    helpers::short_addr,
    stats::{read_trade_log, LoggedTrade, StatsWindows, WalletStats},
    trade_log::{TradeLog, TradeRecord, TradeSide},
};

// -------------
// | Constants |
// -------------

/// The decimals of the native gas token
const NATIVE_DECIMALS: u8 = 18;
/// The decimal places volumes are reported at
const VOLUME_REPORT_SCALE: i64 = 6;
/// The decimal places gas spend is reported at
const GAS_REPORT_SCALE: i64 = 8;

/// The execution client used against live services
type WalletClient = ExecutionClient<OkxClient, RpcConnector>;

// ---------
// | Types |
// ---------

/// The volumes of a completed buy/sell cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    /// The stablecoin spent on the buy
    pub buy_usdt: BigDecimal,
    /// The stablecoin received from the sell
    pub sell: SellResult,
}

/// What a wallet did during a `run`
#[derive(Debug, Clone)]
pub struct WalletSummary {
    /// The wallet's position in the wallets file
    pub idx: usize,
    /// The wallet's address
    pub address: Address,
    /// The number of cycles configured
    pub num_cycles: usize,
    /// The number of cycles completed
    pub cycles_done: usize,
    /// The stablecoin spent on cycle buys
    pub buy_volume: BigDecimal,
    /// The stablecoin received from cycle sells
    pub sell_volume: BigDecimal,
    /// The stablecoin received from pre-selling held tokens
    pub presell_usdt: BigDecimal,
    /// The native token paid for gas by confirmed transactions
    pub gas_spent: BigDecimal,
    /// Completed cycles per token symbol
    pub token_cycles: BTreeMap<String, usize>,
    /// Pre-sells per token symbol
    pub presold: BTreeMap<String, usize>,
}

impl WalletSummary {
    /// An empty summary for a wallet
    fn new(idx: usize, address: Address, num_cycles: usize) -> Self {
        Self {
            idx,
            address,
            num_cycles,
            cycles_done: 0,
            buy_volume: BigDecimal::zero(),
            sell_volume: BigDecimal::zero(),
            presell_usdt: BigDecimal::zero(),
            gas_spent: BigDecimal::zero(),
            token_cycles: BTreeMap::new(),
            presold: BTreeMap::new(),
        }
    }

    /// Add a completed cycle
    fn record_cycle(&mut self, symbol: &str, outcome: &CycleOutcome) {
        self.cycles_done += 1;
        self.buy_volume += &outcome.buy_usdt;
        self.sell_volume += &outcome.sell.usdt_received;
        *self.token_cycles.entry(symbol.to_string()).or_default() += 1;
    }

    /// The stablecoin volume bought and sold in cycles
    pub fn executed_volume(&self) -> BigDecimal {
        (&self.buy_volume + &self.sell_volume)
            .with_scale_round(VOLUME_REPORT_SCALE, RoundingMode::HalfEven)
    }

    /// The stablecoin lost to cycles; negative is a profit
    pub fn net_usdt(&self) -> BigDecimal {
        (&self.buy_volume - &self.sell_volume)
            .with_scale_round(VOLUME_REPORT_SCALE, RoundingMode::HalfEven)
    }

    /// Log the wallet's summary
    fn log(&self) {
        info!(
            idx = self.idx,
            address = %short_addr(&self.address.to_string()),
            cycles = %format!("{}/{}", self.cycles_done, self.num_cycles),
            buy_volume = %self.buy_volume,
            sell_volume = %self.sell_volume,
            executed_volume = %self.executed_volume(),
            net_usdt = %self.net_usdt(),
            gas_spent = %self.gas_spent.with_scale_round(GAS_REPORT_SCALE, RoundingMode::HalfEven),
            tokens = %format_token_counts(&self.token_cycles),
            presell_usdt = %self.presell_usdt,
            presold = %format_token_counts(&self.presold),
            "wallet summary"
        );
    }
}

/// Format per-symbol counts, most frequent first, e.g. `KOGE×3, MTP×1`
pub fn format_token_counts(counts: &BTreeMap<String, usize>) -> String {
    let items = counts
        .iter()
        .filter(|(_, n)| **n > 0)
        .sorted_by(|(sym_a, a), (sym_b, b)| b.cmp(a).then_with(|| sym_a.cmp(sym_b)))
        .map(|(sym, n)| format!("{sym}×{n}"))
        .join(", ");

    if items.is_empty() {
        "-".to_string()
    } else {
        items
    }
}

/// Pick a token at random, weighted by its configured weight
pub fn choose_token<'a, R: Rng>(tokens: &'a [TokenConfig], rng: &mut R) -> Option<&'a TokenConfig> {
    let dist = WeightedIndex::new(tokens.iter().map(|t| t.weight)).ok()?;
    tokens.get(dist.sample(rng))
}

/// Sleep for a random pacing delay within the configured bounds
async fn pace(config: &StrategyConfig, what: &str) {
    let secs = if config.delay_max_secs > config.delay_min_secs {
        rand::thread_rng().gen_range(config.delay_min_secs..=config.delay_max_secs)
    } else {
        config.delay_min_secs
    };

    info!("{what}: sleeping {secs:.2}s");
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

// -----------
// | Cycling |
// -----------

/// Buy a token with the stablecoin, then sell everything bought
pub async fn run_cycle<A: DexAggregator, C: Connector>(
    client: &mut ExecutionClient<A, C>,
    token: &TokenConfig,
    trade_log: &dyn TradeLog,
    config: &StrategyConfig,
) -> Result<CycleOutcome, ExecutionClientError> {
    pace(config, "pre-buy").await;
    info!(token = %token.symbol, usdt = %config.buy_part_usdt, "buying");
    let bought = client
        .swap(
            config.stable.address,
            token.address,
            &config.buy_part_usdt,
            config.stable.decimals,
            None,
            config.swap_max_attempts,
        )
        .await?;

    let record = TradeRecord::now(
        client.address(),
        &token.symbol,
        TradeSide::Buy,
        config.buy_part_usdt.clone(),
        bought.amount_out.clone(),
        bought.tx_hash,
    );
    if let Err(e) = trade_log.record(&record) {
        warn!("failed to record buy: {e}");
    }

    pace(config, "pre-sell").await;
    let sell = SellController::new(client, trade_log, config)
        .sell_with_retry(token, &bought.amount_out)
        .await?;

    Ok(CycleOutcome { buy_usdt: config.buy_part_usdt.clone(), sell })
}

/// Sell a whole balance with single-attempt swaps, rotating the RPC between
/// attempts
///
/// Returns the stablecoin received, `None` when every attempt failed.
pub async fn sell_leftover<A: DexAggregator, C: Connector>(
    client: &mut ExecutionClient<A, C>,
    token: &TokenConfig,
    amount: &BigDecimal,
    trade_log: &dyn TradeLog,
    config: &StrategyConfig,
) -> Result<Option<BigDecimal>, ExecutionClientError> {
    let attempts = config.leftover_sell_attempts;
    for attempt in 1..=attempts {
        let res =
            client.swap(token.address, config.stable.address, amount, token.decimals, None, 1).await;
        match res {
            Ok(outcome) => {
                let record = TradeRecord::now(
                    client.address(),
                    &token.symbol,
                    TradeSide::Sell,
                    outcome.amount_out.clone(),
                    amount.clone(),
                    outcome.tx_hash,
                );
                if let Err(e) = trade_log.record(&record) {
                    warn!("failed to record sell: {e}");
                }
                return Ok(Some(outcome.amount_out));
            },
            Err(e) => {
                warn!(token = %token.symbol, attempt, attempts, "leftover sell failed: {e}");
                if attempt < attempts {
                    client.rotate().await?;
                    let pause = 0.6 + rand::thread_rng().gen_range(0.2..0.8);
                    tokio::time::sleep(Duration::from_secs_f64(pause)).await;
                }
            },
        }
    }

    Ok(None)
}

// ----------
// | Runner |
// ----------

/// Runs the bot's commands over a list of wallets
pub struct Runner {
    /// The OKX API credentials shared by every wallet
    credentials: OkxApiCredentials,
    /// The chain RPC endpoints
    endpoints: EndpointSet,
    /// The strategy configuration
    config: Arc<StrategyConfig>,
    /// Where confirmed swaps are recorded
    trade_log: Arc<dyn TradeLog>,
}

impl Runner {
    /// Create a runner
    pub fn new(
        credentials: OkxApiCredentials,
        endpoints: EndpointSet,
        config: Arc<StrategyConfig>,
        trade_log: Arc<dyn TradeLog>,
    ) -> Self {
        Self { credentials, endpoints, config, trade_log }
    }

    /// Run trading cycles for every wallet, returning the summaries of the
    /// wallets that were processed
    pub async fn run(&self, wallets: &[WalletEntry]) -> Vec<WalletSummary> {
        let mut summaries = Vec::new();
        for wallet in wallets {
            let span = info_span!("wallet", idx = wallet.idx, address = field::Empty);
            match self.run_wallet(wallet).instrument(span).await {
                Ok(Some(summary)) => summaries.push(summary),
                Ok(None) => {},
                Err(e) => error!(idx = wallet.idx, "wallet failed: {e}"),
            }
        }

        if summaries.is_empty() {
            warn!("no wallets processed successfully");
        }
        for summary in &summaries {
            summary.log();
        }

        summaries
    }

    /// Sell every wallet's whole balance of each configured token
    pub async fn sell_leftovers(&self, wallets: &[WalletEntry]) {
        for wallet in wallets {
            let span = info_span!("wallet", idx = wallet.idx, address = field::Empty);
            if let Err(e) = self.sell_wallet_leftovers(wallet).instrument(span).await {
                error!(idx = wallet.idx, "wallet failed: {e}");
            }
        }
    }

    /// Report every wallet's balances and the volume it traded today and over
    /// the trailing window, as recorded in the trade log
    pub async fn stats(
        &self,
        wallets: &[WalletEntry],
        trade_log_path: &Path,
    ) -> Result<Vec<WalletStats>, VolumeBotError> {
        let trades = read_trade_log(trade_log_path)?;
        let windows = StatsWindows::at(Utc::now());
        info!(trades = trades.len(), "read trade log");

        let mut all = Vec::new();
        for wallet in wallets {
            let span = info_span!("wallet", idx = wallet.idx, address = field::Empty);
            match self.wallet_stats(wallet, &trades, &windows).instrument(span).await {
                Ok(stats) => all.push(stats),
                Err(e) => error!(idx = wallet.idx, "wallet failed: {e}"),
            }
        }

        for stats in &all {
            stats.log(&self.config);
        }
        Ok(all)
    }

    // -----------
    // | Helpers |
    // -----------

    /// Parse a wallet's key and record its address on the current span
    fn wallet_signer(&self, wallet: &WalletEntry) -> Result<PrivateKeySigner, VolumeBotError> {
        let signer: PrivateKeySigner = wallet
            .private_key
            .parse()
            .map_err(|e| VolumeBotError::config(format!("invalid private key: {e}")))?;
        Span::current().record("address", field::display(signer.address()));
        Ok(signer)
    }

    /// Create a wallet's aggregator client, routed through its proxy
    fn wallet_okx_client(&self, wallet: &WalletEntry) -> Result<OkxClient, VolumeBotError> {
        Ok(OkxClient::new(self.credentials.clone(), &self.config.chain_index, Some(&wallet.proxy))?)
    }

    /// Create a wallet's execution client and check the aggregator accepts
    /// our credentials
    async fn connect_wallet(&self, wallet: &WalletEntry) -> Result<WalletClient, VolumeBotError> {
        let signer = self.wallet_signer(wallet)?;
        info!(proxy = %wallet.proxy, "processing wallet");

        let okx = self.wallet_okx_client(wallet)?;
        let connector = RpcConnector::new(Some(wallet.proxy.clone()));
        let rotator = RpcRotator::new(connector, self.endpoints.clone());
        let client = ExecutionClient::connect(okx, rotator, signer, self.config.clone()).await?;

        let chains = client.aggregator().supported_chains().await?;
        info!(chains = chains.len(), "aggregator auth ok");
        Ok(client)
    }

    /// Run pre-sells and trading cycles for a single wallet
    ///
    /// Returns `None` when the wallet is skipped for lack of funds.
    async fn run_wallet(
        &self,
        wallet: &WalletEntry,
    ) -> Result<Option<WalletSummary>, VolumeBotError> {
        let config = self.config.clone();
        let mut client = self.connect_wallet(wallet).await?;
        let address = client.address();

        let start = fetch_balances(client.aggregator(), address, &config).await?;
        info!(
            native = %start.native(&config),
            stable = %start.stable(&config),
            "start balances"
        );

        if start.native(&config) < config.min_native_for_gas {
            warn!(need = %config.min_native_for_gas, "skipping: not enough native token for gas");
            return Ok(None);
        }
        let held = start.held_tokens(&config);
        if start.stable(&config) < config.buy_part_usdt && held.is_empty() {
            warn!(need = %config.buy_part_usdt, "skipping: not enough stablecoin and no tokens to sell");
            return Ok(None);
        }

        let mut summary = WalletSummary::new(wallet.idx, address, config.num_cycles);
        for (token, balance) in held {
            self.presell(&mut client, token, &balance, &mut summary).await;
        }

        for cycle in 1..=config.num_cycles {
            info!(cycle, num_cycles = config.num_cycles, "starting cycle");
            pace(&config, "balance check").await;

            let balances = match fetch_balances(client.aggregator(), address, &config).await {
                Ok(balances) => balances,
                Err(e) => {
                    error!("failed to fetch balances: {e}");
                    break;
                },
            };
            if balances.stable(&config) < config.buy_part_usdt {
                warn!(have = %balances.stable(&config), "stopping: not enough stablecoin for the next buy");
                break;
            }

            let Some(token) = choose_token(&config.tokens, &mut rand::thread_rng()) else {
                error!("no token to trade");
                break;
            };
            info!(token = %token.symbol, "chosen token");

            match run_cycle(&mut client, token, self.trade_log.as_ref(), &config).await {
                Ok(outcome) => summary.record_cycle(&token.symbol, &outcome),
                Err(e) => {
                    error!(token = %token.symbol, "cycle failed: {e}");
                    break;
                },
            }

            let pause = 1.0 + rand::thread_rng().gen_range(0.0..0.8);
            tokio::time::sleep(Duration::from_secs_f64(pause)).await;
        }

        summary.gas_spent = from_base_units(U256::from(client.gas_spent_wei()), NATIVE_DECIMALS);
        match fetch_balances(client.aggregator(), address, &config).await {
            Ok(end) => info!(
                native = %end.native(&config),
                stable = %end.stable(&config),
                native_change = %(end.native(&config) - start.native(&config)),
                "end balances"
            ),
            Err(e) => warn!("failed to fetch end balances: {e}"),
        }

        Ok(Some(summary))
    }

    /// Sell a held token before cycling when it is worth enough
    async fn presell(
        &self,
        client: &mut WalletClient,
        token: &TokenConfig,
        balance: &BigDecimal,
        summary: &mut WalletSummary,
    ) {
        let config = &self.config;
        let value = match usdt_value(client.aggregator(), token, balance, client.address(), config).await {
            Ok(value) => value,
            Err(e) => {
                warn!(token = %token.symbol, "valuation failed: {e}");
                return;
            },
        };

        info!(token = %token.symbol, %balance, usdt = %value, "initial holding");
        if value <= config.presell_min_usdt {
            info!(token = %token.symbol, "holding too small to pre-sell");
            return;
        }

        pace(config, "pre-sell").await;
        let res = SellController::new(client, self.trade_log.as_ref(), config)
            .sell_with_retry(token, balance)
            .await;
        match res {
            Ok(res) => {
                summary.presell_usdt += &res.usdt_received;
                *summary.presold.entry(token.symbol.clone()).or_default() += 1;
                info!(usdt = %res.usdt_received, "pre-sell done, excluded from cycle volume");
            },
            Err(e) => warn!(token = %token.symbol, "pre-sell failed: {e}"),
        }
    }

    /// Fetch a single wallet's balances and compute its volumes
    ///
    /// Balances read as zero when they cannot be fetched.
    async fn wallet_stats(
        &self,
        wallet: &WalletEntry,
        trades: &[LoggedTrade],
        windows: &StatsWindows,
    ) -> Result<WalletStats, VolumeBotError> {
        let address = self.wallet_signer(wallet)?.address();
        let okx = self.wallet_okx_client(wallet)?;

        let balances = match fetch_balances(&okx, address, &self.config).await {
            Ok(balances) => balances,
            Err(e) => {
                warn!("failed to fetch balances: {e}");
                WalletBalances::default()
            },
        };

        Ok(WalletStats::new(wallet.idx, address, balances, trades, windows, &self.config))
    }

    /// Sell the leftovers of a single wallet
    async fn sell_wallet_leftovers(&self, wallet: &WalletEntry) -> Result<(), VolumeBotError> {
        let config = self.config.clone();
        let mut client = self.connect_wallet(wallet).await?;
        let balances = fetch_balances(client.aggregator(), client.address(), &config).await?;

        let mut sold = BTreeMap::new();
        for (token, balance) in balances.held_tokens(&config) {
            info!(token = %token.symbol, %balance, "selling leftover");
            match sell_leftover(&mut client, token, &balance, self.trade_log.as_ref(), &config).await? {
                Some(usdt) => {
                    sold.insert(token.symbol.clone(), usdt);
                },
                None => error!(token = %token.symbol, "failed to sell leftover"),
            }
        }

        let total: BigDecimal = sold.values().sum();
        let detail = sold.iter().map(|(sym, usdt)| format!("{sym}: {usdt}")).join(", ");
        info!(%total, "sold leftovers ({detail})");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{
        chain_client::mock::MockConnector,
        execution_client::mock::MockAggregator,
        trade_log::MemoryTradeLog,
    };

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    async fn client(connector: MockConnector) -> ExecutionClient<MockAggregator, MockConnector> {
        let endpoints = EndpointSet::new(["https://a", "https://b"]).unwrap();
        ExecutionClient::connect(
            MockAggregator::new(1_000_000_000_000_000_000),
            RpcRotator::new(connector, endpoints),
            PrivateKeySigner::random(),
            Arc::new(StrategyConfig::default()),
        )
        .await
        .unwrap()
    }

    /// Tests a full cycle: the buy and the sell are both logged
    #[tokio::test(start_paused = true)]
    async fn test_run_cycle() {
        let config = StrategyConfig::default();
        let connector = MockConnector::new();
        let mut client = client(connector.clone()).await;
        let log = MemoryTradeLog::default();

        let outcome = run_cycle(&mut client, &config.tokens[0], &log, &config).await.unwrap();
        assert_eq!(outcome.buy_usdt, dec("70"));
        assert_eq!(outcome.sell.usdt_received, dec("1"));

        let records = log.records.lock().unwrap();
        let sides: Vec<TradeSide> = records.iter().map(|r| r.side).collect();
        assert_eq!(sides, vec![TradeSide::Buy, TradeSide::Sell]);
        assert_eq!(records[0].token_amount, dec("1"));
        // approve and swap for each side
        assert_eq!(connector.num_sent(), 4);
    }

    /// Tests that a leftover sell retries single attempts after rotating
    #[tokio::test(start_paused = true)]
    async fn test_sell_leftover_retries() {
        let config = StrategyConfig::default();
        let connector = MockConnector::new();
        connector.state.lock().unwrap().outcomes.extend([true, false]);
        let opened = connector.opened.clone();
        let mut client = client(connector.clone()).await;
        let log = MemoryTradeLog::default();

        let usdt = sell_leftover(&mut client, &config.tokens[1], &dec("5"), &log, &config)
            .await
            .unwrap();
        assert_eq!(usdt, Some(dec("1")));
        assert_eq!(opened.lock().unwrap().len(), 2);
        assert_eq!(log.records.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sell_leftover_gives_up() {
        let config = StrategyConfig { leftover_sell_attempts: 2, ..Default::default() };
        let connector = MockConnector::new();
        connector.state.lock().unwrap().outcomes.extend([true, false, true, false]);
        let mut client = client(connector.clone()).await;
        let log = MemoryTradeLog::default();

        let usdt = sell_leftover(&mut client, &config.tokens[1], &dec("5"), &log, &config)
            .await
            .unwrap();
        assert!(usdt.is_none());
        assert!(log.records.lock().unwrap().is_empty());
    }

    #[test]
    fn test_format_token_counts() {
        let counts = BTreeMap::from([
            ("MTP".to_string(), 1),
            ("AICELL".to_string(), 3),
            ("KOGE".to_string(), 3),
            ("ZERO".to_string(), 0),
        ]);
        assert_eq!(format_token_counts(&counts), "AICELL×3, KOGE×3, MTP×1");
        assert_eq!(format_token_counts(&BTreeMap::new()), "-");
    }

    /// Tests the weighted choice favours heavier tokens
    #[test]
    fn test_choose_token_weighted() {
        let mut config = StrategyConfig::default();
        config.tokens[0].weight = 100.0;
        config.tokens[1].weight = 1.0;
        config.tokens.truncate(2);

        let mut rng = StdRng::seed_from_u64(7);
        let heavy = (0..1_000)
            .filter_map(|_| choose_token(&config.tokens, &mut rng))
            .filter(|t| t.symbol == "KOGE")
            .count();
        assert!(heavy > 900);
        assert!(choose_token(&[], &mut rng).is_none());
    }

    #[test]
    fn test_summary_volumes() {
        let mut summary = WalletSummary::new(1, Address::ZERO, 8);
        let outcome = CycleOutcome {
            buy_usdt: dec("70"),
            sell: SellResult {
                last_tx: None,
                usdt_received: dec("69.8123456"),
                swaps_attempted: 1,
            },
        };
        summary.record_cycle("KOGE", &outcome);
        summary.record_cycle("KOGE", &outcome);

        assert_eq!(summary.cycles_done, 2);
        assert_eq!(summary.executed_volume(), dec("279.624691"));
        assert_eq!(summary.net_usdt(), dec("0.375309"));
        assert_eq!(summary.token_cycles["KOGE"], 2);
    }
}

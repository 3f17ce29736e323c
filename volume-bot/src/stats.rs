//! Per-wallet volume statistics read back from the trade log

use std::{collections::BTreeMap, fs::File, io::ErrorKind, path::Path, str::FromStr};

use alloy_primitives::Address;
use bigdecimal::{BigDecimal, RoundingMode, Zero};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use itertools::Itertools;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    balances::WalletBalances,
    config::{StrategyConfig, TokenConfig},
    error::VolumeBotError,
    helpers::short_addr,
};

// -------------
// | Constants |
// -------------

/// The length of the trailing volume window, in days
const TRAILING_WINDOW_DAYS: i64 = 15;
/// The decimal places volumes are reported at
const STATS_REPORT_SCALE: i64 = 3;
/// The naive timestamp formats accepted besides RFC 3339, read as UTC
const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

// --------------
// | Trade Rows |
// --------------

/// A trade log row as written, every column optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTradeRow {
    /// The timestamp column
    timestamp_iso: String,
    /// The timestamp column of older logs
    timestamp: String,
    /// The wallet column
    wallet: String,
    /// The token symbol column
    token: String,
    /// The stablecoin amount column
    usdt_amount: String,
    /// The token amount column
    token_amount: String,
}

/// A trade read back from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedTrade {
    /// When the swap was confirmed
    pub timestamp: DateTime<Utc>,
    /// The wallet that swapped, as written
    pub wallet: String,
    /// The traded token's symbol
    pub token: String,
    /// The stablecoin amount paid or received
    pub usdt_amount: BigDecimal,
    /// The token amount received or sold
    pub token_amount: BigDecimal,
}

impl LoggedTrade {
    /// Validate a raw row, `None` when a field does not parse
    fn from_raw(raw: RawTradeRow) -> Option<Self> {
        let ts = if raw.timestamp_iso.trim().is_empty() { &raw.timestamp } else { &raw.timestamp_iso };

        Some(Self {
            timestamp: parse_timestamp(ts)?,
            wallet: raw.wallet.trim().to_string(),
            token: raw.token.trim().to_string(),
            usdt_amount: parse_amount(&raw.usdt_amount)?,
            token_amount: parse_amount(&raw.token_amount)?,
        })
    }

    /// Whether the trade was made by `wallet`
    fn is_by(&self, wallet: Address) -> bool {
        self.wallet.eq_ignore_ascii_case(&wallet.to_string())
    }
}

/// Parse an ISO 8601 timestamp; naive timestamps are taken as UTC
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }

    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Parse a decimal column, blank reading as zero
fn parse_amount(s: &str) -> Option<BigDecimal> {
    match s.trim() {
        "" => Some(BigDecimal::zero()),
        s => BigDecimal::from_str(s).ok(),
    }
}

/// Read every well-formed trade from the CSV trade log
///
/// A missing log reads as empty; malformed rows are skipped.
pub fn read_trade_log(path: &Path) -> Result<Vec<LoggedTrade>, VolumeBotError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "trade log not found, volumes will be zero");
            return Ok(Vec::new());
        },
        Err(e) => return Err(VolumeBotError::io(format!("{}: {e}", path.display()))),
    };

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let mut trades = Vec::new();
    for (i, row) in reader.deserialize::<RawTradeRow>().enumerate() {
        match row.ok().and_then(LoggedTrade::from_raw) {
            Some(trade) => trades.push(trade),
            None => debug!(row = i + 1, "skipping malformed trade log row"),
        }
    }

    Ok(trades)
}

// -----------
// | Windows |
// -----------

/// The reporting windows, both ending now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsWindows {
    /// The end of both windows
    pub now: DateTime<Utc>,
    /// Midnight UTC of the current day
    pub today_start: DateTime<Utc>,
    /// The start of the trailing window
    pub trailing_start: DateTime<Utc>,
}

impl StatsWindows {
    /// The windows ending at `now`
    pub fn at(now: DateTime<Utc>) -> Self {
        let today_start =
            now.date_naive().and_hms_opt(0, 0, 0).map(|midnight| midnight.and_utc()).unwrap_or(now);
        let trailing_start = now - Duration::days(TRAILING_WINDOW_DAYS);
        Self { now, today_start, trailing_start }
    }
}

/// The stablecoin volume traded in a window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowVolume {
    /// Buys plus sells
    pub total: BigDecimal,
    /// Buys plus sells, per token symbol
    pub per_token: BTreeMap<String, BigDecimal>,
}

/// Sum the stablecoin side of `wallet`'s trades of the configured tokens in
/// `[start, end]`
pub fn window_volume(
    trades: &[LoggedTrade],
    wallet: Address,
    tokens: &[TokenConfig],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> WindowVolume {
    let mut volume = WindowVolume::default();
    let in_window = |t: &&LoggedTrade| start <= t.timestamp && t.timestamp <= end;
    let configured = |t: &&LoggedTrade| tokens.iter().any(|tok| tok.symbol == t.token);

    for trade in trades.iter().filter(|t| t.is_by(wallet)).filter(configured).filter(in_window) {
        volume.total += &trade.usdt_amount;
        *volume.per_token.entry(trade.token.clone()).or_default() += &trade.usdt_amount;
    }

    volume
}

/// Format per-symbol volumes, largest first, e.g. `KOGE 140.000, MTP 70.000`
pub fn format_usdt_map(volumes: &BTreeMap<String, BigDecimal>) -> String {
    let items = volumes
        .iter()
        .filter(|(_, v)| **v > BigDecimal::zero())
        .sorted_by(|(sym_a, a), (sym_b, b)| b.cmp(a).then_with(|| sym_a.cmp(sym_b)))
        .map(|(sym, v)| format!("{sym} {}", v.with_scale_round(STATS_REPORT_SCALE, RoundingMode::HalfEven)))
        .join(", ");

    if items.is_empty() {
        "-".to_string()
    } else {
        items
    }
}

// ---------
// | Stats |
// ---------

/// A wallet's balances and traded volume
#[derive(Debug, Clone)]
pub struct WalletStats {
    /// The wallet's position in the wallets file
    pub idx: usize,
    /// The wallet's address
    pub address: Address,
    /// The current balances, zero when they could not be fetched
    pub balances: WalletBalances,
    /// The volume traded since midnight UTC
    pub today: WindowVolume,
    /// The volume traded over the trailing window
    pub trailing: WindowVolume,
}

impl WalletStats {
    /// Compute a wallet's stats from the logged trades
    pub fn new(
        idx: usize,
        address: Address,
        balances: WalletBalances,
        trades: &[LoggedTrade],
        windows: &StatsWindows,
        config: &StrategyConfig,
    ) -> Self {
        let today = window_volume(trades, address, &config.tokens, windows.today_start, windows.now);
        let trailing =
            window_volume(trades, address, &config.tokens, windows.trailing_start, windows.now);
        Self { idx, address, balances, today, trailing }
    }

    /// Log the wallet's stats
    pub fn log(&self, config: &StrategyConfig) {
        let held = self
            .balances
            .held_tokens(config)
            .into_iter()
            .map(|(token, balance)| format!("{}: {}", token.symbol, balance.normalized()))
            .join(", ");
        let held = if held.is_empty() { "-".to_string() } else { held };

        info!(
            idx = self.idx,
            address = %short_addr(&self.address.to_string()),
            native = %self.balances.native(config),
            stable = %self.balances.stable(config),
            tokens = %held,
            today_usdt = %self.today.total.with_scale_round(STATS_REPORT_SCALE, RoundingMode::HalfEven),
            today_by_token = %format_usdt_map(&self.today.per_token),
            trailing_usdt = %self.trailing.total.with_scale_round(STATS_REPORT_SCALE, RoundingMode::HalfEven),
            trailing_by_token = %format_usdt_map(&self.trailing.per_token),
            trailing_days = TRAILING_WINDOW_DAYS,
            "wallet stats"
        );
    }
}

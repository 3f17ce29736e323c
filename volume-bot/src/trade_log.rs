//! Append-only log of confirmed swaps

use std::{
    fmt::Display,
    fs::OpenOptions,
    path::{Path, PathBuf},
    sync::Mutex,
};

use alloy_primitives::{Address, TxHash};
use bigdecimal::BigDecimal;
use chrono::{DateTime, SecondsFormat, Utc};
use csv::WriterBuilder;

use crate::error::VolumeBotError;

/// The header row of the CSV trade log
const TRADE_LOG_HEADERS: [&str; 7] =
    ["timestamp_iso", "wallet", "token", "side", "usdt_amount", "token_amount", "tx_hash"];

/// The direction of a trade, relative to the traded token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    /// Stablecoin in, token out
    Buy,
    /// Token in, stablecoin out
    Sell,
}

impl Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

/// A confirmed swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeRecord {
    /// When the swap was confirmed
    pub timestamp: DateTime<Utc>,
    /// The wallet that swapped
    pub wallet: Address,
    /// The traded token's symbol
    pub token: String,
    /// The side of the trade
    pub side: TradeSide,
    /// The stablecoin amount paid or received
    pub usdt_amount: BigDecimal,
    /// The token amount received or sold
    pub token_amount: BigDecimal,
    /// The swap transaction
    pub tx_hash: TxHash,
}

impl TradeRecord {
    /// A record of a swap confirmed now
    pub fn now(
        wallet: Address,
        token: &str,
        side: TradeSide,
        usdt_amount: BigDecimal,
        token_amount: BigDecimal,
        tx_hash: TxHash,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            wallet,
            token: token.to_string(),
            side,
            usdt_amount,
            token_amount,
            tx_hash,
        }
    }

    /// The record as a CSV row, in header order
    fn to_row(&self) -> [String; 7] {
        [
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false /* use_z */),
            self.wallet.to_string(),
            self.token.clone(),
            self.side.to_string(),
            self.usdt_amount.to_string(),
            self.token_amount.to_string(),
            self.tx_hash.to_string(),
        ]
    }
}

/// A sink for confirmed swaps
pub trait TradeLog: Send + Sync {
    /// Append a trade
    fn record(&self, trade: &TradeRecord) -> Result<(), VolumeBotError>;
}

/// A trade log appending to a CSV file
#[derive(Debug)]
pub struct CsvTradeLog {
    /// The path of the CSV file
    path: PathBuf,
    /// Serializes appends
    lock: Mutex<()>,
}

impl CsvTradeLog {
    /// Create a trade log at the given path, creating parent directories
    pub fn new(path: &Path) -> Result<Self, VolumeBotError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(VolumeBotError::io)?;
        }

        Ok(Self { path: path.to_path_buf(), lock: Mutex::new(()) })
    }
}

impl TradeLog for CsvTradeLog {
    fn record(&self, trade: &TradeRecord) -> Result<(), VolumeBotError> {
        let _guard = self.lock.lock().map_err(VolumeBotError::trade_log)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(VolumeBotError::trade_log)?;
        let need_header = file.metadata().map(|m| m.len() == 0).unwrap_or(true);

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if need_header {
            writer.write_record(TRADE_LOG_HEADERS).map_err(VolumeBotError::trade_log)?;
        }
        writer.write_record(trade.to_row()).map_err(VolumeBotError::trade_log)?;
        writer.flush().map_err(VolumeBotError::trade_log)
    }
}

/// A trade log that keeps records in memory
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryTradeLog {
    /// The recorded trades
    pub records: Mutex<Vec<TradeRecord>>,
}

#[cfg(test)]
impl TradeLog for MemoryTradeLog {
    fn record(&self, trade: &TradeRecord) -> Result<(), VolumeBotError> {
        self.records.lock().unwrap().push(trade.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn trade(side: TradeSide) -> TradeRecord {
        TradeRecord::now(
            Address::ZERO,
            "KOGE",
            side,
            BigDecimal::from_str("70").unwrap(),
            BigDecimal::from_str("1.5").unwrap(),
            TxHash::ZERO,
        )
    }

    /// Tests the header is written once, when the file is created
    #[test]
    fn test_csv_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("trades.csv");

        let log = CsvTradeLog::new(&path).unwrap();
        log.record(&trade(TradeSide::Buy)).unwrap();
        log.record(&trade(TradeSide::Sell)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], TRADE_LOG_HEADERS.join(","));
        assert!(lines[1].contains(",KOGE,BUY,70,1.5,"));
        assert!(lines[2].contains(",SELL,"));
    }

    /// Tests that timestamps are written with microseconds and a UTC offset
    #[test]
    fn test_timestamp_format() {
        let mut record = trade(TradeSide::Buy);
        record.timestamp = DateTime::parse_from_rfc3339("2025-03-04T05:06:07.123456Z")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(record.to_row()[0], "2025-03-04T05:06:07.123456+00:00");
    }

    /// Tests that reopening an existing log appends without a second header
    #[test]
    fn test_csv_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.csv");

        CsvTradeLog::new(&path).unwrap().record(&trade(TradeSide::Buy)).unwrap();
        CsvTradeLog::new(&path).unwrap().record(&trade(TradeSide::Sell)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("timestamp_iso").count(), 1);
        assert_eq!(contents.lines().count(), 3);
    }
}

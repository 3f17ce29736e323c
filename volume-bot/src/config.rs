//! Strategy configuration
//!
//! Every field has a default, so a config file only needs to list the values
//! it overrides.

use std::{collections::HashMap, path::Path};

use alloy_primitives::{address, Address};
use bigdecimal::{num_bigint::BigInt, BigDecimal, Zero};
use okx_dex_client::BSC_CHAIN_INDEX;
use serde::Deserialize;

use crate::error::VolumeBotError;

/// Build a decimal from its digits and scale, e.g. `dec(15, 3) == 0.015`
fn dec(digits: i64, scale: i64) -> BigDecimal {
    BigDecimal::new(BigInt::from(digits), scale)
}

/// A token the bot trades or quotes against
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenConfig {
    /// The token's symbol
    pub symbol: String,
    /// The token's contract address
    pub address: Address,
    /// The token's decimals
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    /// The relative weight with which the token is picked for a cycle
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// The default token decimals
fn default_decimals() -> u8 {
    18
}

/// The default token weight
fn default_weight() -> f64 {
    1.0
}

impl TokenConfig {
    /// Create a token config
    fn new(symbol: &str, address: Address, weight: f64) -> Self {
        Self { symbol: symbol.to_string(), address, decimals: 18, weight }
    }
}

/// The bot's trading strategy and retry policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    // --- Chain --- //
    /// The OKX chain index traded on
    pub chain_index: String,
    /// The EIP-155 chain id transactions are signed for
    pub chain_id: u64,
    /// The symbol of the native gas token
    pub native_symbol: String,
    /// The stablecoin cycles buy with and sell into
    pub stable: TokenConfig,
    /// The tokens traded
    pub tokens: Vec<TokenConfig>,

    // --- Cycles --- //
    /// The stablecoin amount spent per buy
    pub buy_part_usdt: BigDecimal,
    /// The minimum native balance a wallet needs to be traded
    pub min_native_for_gas: BigDecimal,
    /// The number of buy/sell cycles per wallet
    pub num_cycles: usize,
    /// The lower bound of the random pacing delay, in seconds
    pub delay_min_secs: f64,
    /// The upper bound of the random pacing delay, in seconds
    pub delay_max_secs: f64,
    /// Held tokens worth more than this are sold before cycling
    pub presell_min_usdt: BigDecimal,

    // --- Swaps --- //
    /// The default slippage tolerance
    pub slippage: BigDecimal,
    /// The slippage used by the n-th swap of a sell, clamped to the last step
    pub sell_slippage_steps: Vec<BigDecimal>,
    /// The attempts a single swap makes before giving up
    pub swap_max_attempts: usize,
    /// The attempts an approval makes when topping up an allowance
    pub approve_max_attempts: usize,
    /// The attempts the re-approval of an allowance reset makes
    pub swap_send_max_attempts: usize,

    // --- Selling --- //
    /// The chunk ratios of the primary split
    pub primary_ratios: Vec<BigDecimal>,
    /// The chunk ratios a failed primary chunk is re-split with
    pub secondary_ratios: Vec<BigDecimal>,
    /// Per-symbol overrides of the primary ratios
    pub token_chunking: HashMap<String, Vec<BigDecimal>>,
    /// The swaps attempted per chunk before moving on
    pub chunk_max_attempts: usize,
    /// The cap on the exponential backoff between chunk attempts, in seconds
    pub chunk_max_sleep_secs: u64,
    /// Return once this many secondary sub-chunks sold
    pub secondary_early_exit_sold: usize,
    /// Single-attempt swaps per token when selling leftovers
    pub leftover_sell_attempts: usize,

    // --- Allowance Reset --- //
    /// Whether failed sells may reset the allowance
    pub reset_allowance_on_fail: bool,
    /// Reset the allowance on every n-th failure of a sell
    pub reapprove_every_n_failures: usize,
    /// Error phrases that indicate an exhausted allowance
    pub allowance_reset_phrases: Vec<String>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            chain_index: BSC_CHAIN_INDEX.to_string(),
            chain_id: 56,
            native_symbol: "BNB".to_string(),
            stable: TokenConfig::new(
                "USDT",
                address!("55d398326f99059fF775485246999027B3197955"),
                1.0,
            ),
            tokens: vec![
                TokenConfig::new("KOGE", address!("e6DF05CE8C8301223373CF5B969AFCb1498c5528"), 1.0),
                TokenConfig::new(
                    "AICELL",
                    address!("de04da55b74435d7b9f2c5c62d9f1b53929b09aa"),
                    0.85,
                ),
                TokenConfig::new("MTP", address!("bcba33bf0b3cd8d626b7a3732a3ee18a0af51bd0"), 0.6),
            ],
            buy_part_usdt: dec(70, 0),
            min_native_for_gas: dec(5, 4),
            num_cycles: 8,
            delay_min_secs: 4.0,
            delay_max_secs: 8.0,
            presell_min_usdt: dec(1, 0),
            slippage: dec(10, 3),
            sell_slippage_steps: (10..=15).map(|d| dec(d, 3)).collect(),
            swap_max_attempts: 2,
            approve_max_attempts: 4,
            swap_send_max_attempts: 3,
            primary_ratios: vec![dec(60, 2), dec(30, 2), dec(10, 2)],
            secondary_ratios: vec![dec(50, 2), dec(30, 2), dec(20, 2)],
            token_chunking: HashMap::from([
                ("MTP".to_string(), vec![dec(5, 1), dec(3, 1), dec(1, 1)]),
                ("AICELL".to_string(), vec![dec(5, 1), dec(25, 2), dec(1, 1)]),
                ("KOGE".to_string(), vec![dec(5, 1), dec(25, 2), dec(1, 1)]),
            ]),
            chunk_max_attempts: 2,
            chunk_max_sleep_secs: 60,
            secondary_early_exit_sold: 2,
            leftover_sell_attempts: 3,
            reset_allowance_on_fail: true,
            reapprove_every_n_failures: 2,
            allowance_reset_phrases: [
                "insufficient allowance",
                "transfer amount exceeds allowance",
                "spender",
                "ERC20: insufficient allowance",
                "ERC20: transfer amount exceeds allowance",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl StrategyConfig {
    /// Load the config from a JSON file, or the defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, VolumeBotError> {
        let config: Self = match path {
            Some(path) => {
                let json_str = std::fs::read_to_string(path)
                    .map_err(|e| VolumeBotError::io(format!("{}: {e}", path.display())))?;
                serde_json::from_str(&json_str).map_err(VolumeBotError::parse)?
            },
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the config for values the bot cannot run with
    pub fn validate(&self) -> Result<(), VolumeBotError> {
        if self.tokens.is_empty() {
            return Err(VolumeBotError::config("no trading tokens configured"));
        }
        if self.tokens.iter().any(|t| t.weight.is_nan() || t.weight <= 0.0) {
            return Err(VolumeBotError::config("token weights must be positive"));
        }

        let one = dec(1, 0);
        let slippages = std::iter::once(&self.slippage).chain(self.sell_slippage_steps.iter());
        for s in slippages {
            if *s <= BigDecimal::zero() || *s >= one {
                return Err(VolumeBotError::config(format!("slippage {s} outside (0, 1)")));
            }
        }

        let ratio_lists = [&self.primary_ratios, &self.secondary_ratios]
            .into_iter()
            .chain(self.token_chunking.values());
        for ratios in ratio_lists {
            if ratios.is_empty() || ratios.iter().any(|r| *r <= BigDecimal::zero()) {
                return Err(VolumeBotError::config("chunk ratios must be non-empty and positive"));
            }
        }

        let attempts = [
            ("swap_max_attempts", self.swap_max_attempts),
            ("approve_max_attempts", self.approve_max_attempts),
            ("swap_send_max_attempts", self.swap_send_max_attempts),
            ("chunk_max_attempts", self.chunk_max_attempts),
            ("leftover_sell_attempts", self.leftover_sell_attempts),
        ];
        if let Some((name, _)) = attempts.iter().find(|(_, n)| *n == 0) {
            return Err(VolumeBotError::config(format!("{name} must be at least 1")));
        }

        if self.delay_min_secs < 0.0 || self.delay_min_secs > self.delay_max_secs {
            return Err(VolumeBotError::config("delay bounds must satisfy 0 <= min <= max"));
        }
        if self.buy_part_usdt <= BigDecimal::zero() {
            return Err(VolumeBotError::config("buy_part_usdt must be positive"));
        }

        Ok(())
    }

    /// The primary chunk ratios for a token, honoring per-symbol overrides
    pub fn primary_ratios_for(&self, symbol: &str) -> &[BigDecimal] {
        self.token_chunking.get(symbol).unwrap_or(&self.primary_ratios)
    }

    /// The slippage of the `n`-th (0-based) swap of a sell
    pub fn sell_slippage(&self, n: usize) -> BigDecimal {
        match self.sell_slippage_steps.len() {
            0 => self.slippage.clone(),
            len => self.sell_slippage_steps[n.min(len - 1)].clone(),
        }
    }
}

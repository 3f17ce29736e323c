//! Wallet balances and token valuation

use std::collections::HashMap;

use alloy_primitives::Address;
use bigdecimal::{BigDecimal, Zero};
use okx_dex_client::{
    types::{SwapParams, TokenBalance},
    units::from_base_units,
    OkxClient,
};
use tracing::debug;

use crate::{
    config::{StrategyConfig, TokenConfig},
    error::VolumeBotError,
    execution_client::DexAggregator,
};

/// The decimals a stablecoin quote is read at
const STABLE_QUOTE_DECIMALS: u8 = 18;

/// A wallet's balances by symbol
///
/// Always holds the native token, the stablecoin and every configured token,
/// zero when the wallet holds none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletBalances {
    /// The balances, keyed by configured symbol
    balances: HashMap<String, BigDecimal>,
}

impl WalletBalances {
    /// Map the API's balance rows onto the configured symbols
    ///
    /// Rows are matched by contract address; rows for unconfigured tokens are
    /// ignored.
    pub fn from_rows(rows: &[TokenBalance], config: &StrategyConfig) -> Self {
        let mut balances: HashMap<String, BigDecimal> = std::iter::once(&config.native_symbol)
            .chain(std::iter::once(&config.stable.symbol))
            .chain(config.tokens.iter().map(|t| &t.symbol))
            .map(|symbol| (symbol.clone(), BigDecimal::zero()))
            .collect();

        for row in rows {
            let symbol = match row.token {
                None => Some(&config.native_symbol),
                Some(addr) => symbol_for(addr, config),
            };

            match symbol {
                Some(symbol) => {
                    balances.insert(symbol.clone(), row.balance.clone());
                },
                None => debug!(symbol = %row.symbol, "ignoring unconfigured token balance"),
            }
        }

        Self { balances }
    }

    /// The balance of a symbol, zero when unknown
    pub fn get(&self, symbol: &str) -> BigDecimal {
        self.balances.get(symbol).cloned().unwrap_or_default()
    }

    /// The native gas token balance
    pub fn native(&self, config: &StrategyConfig) -> BigDecimal {
        self.get(&config.native_symbol)
    }

    /// The stablecoin balance
    pub fn stable(&self, config: &StrategyConfig) -> BigDecimal {
        self.get(&config.stable.symbol)
    }

    /// The configured tokens the wallet holds a positive balance of
    pub fn held_tokens<'a>(&self, config: &'a StrategyConfig) -> Vec<(&'a TokenConfig, BigDecimal)> {
        config
            .tokens
            .iter()
            .map(|token| (token, self.get(&token.symbol)))
            .filter(|(_, balance)| *balance > BigDecimal::zero())
            .collect()
    }
}

/// The configured symbol of a contract address
fn symbol_for(addr: Address, config: &StrategyConfig) -> Option<&String> {
    std::iter::once(&config.stable)
        .chain(config.tokens.iter())
        .find(|t| t.address == addr)
        .map(|t| &t.symbol)
}

/// Fetch a wallet's balances of the native token, the stablecoin and every
/// configured token
pub async fn fetch_balances(
    client: &OkxClient,
    address: Address,
    config: &StrategyConfig,
) -> Result<WalletBalances, VolumeBotError> {
    let tokens: Vec<Address> = std::iter::once(config.stable.address)
        .chain(config.tokens.iter().map(|t| t.address))
        .collect();

    let rows = client.token_balances(address, &tokens).await?;
    Ok(WalletBalances::from_rows(&rows, config))
}

/// The stablecoin value of `amount` of `token`, as quoted by the aggregator
pub async fn usdt_value<A: DexAggregator>(
    aggregator: &A,
    token: &TokenConfig,
    amount: &BigDecimal,
    user: Address,
    config: &StrategyConfig,
) -> Result<BigDecimal, VolumeBotError> {
    if *amount <= BigDecimal::zero() {
        return Ok(BigDecimal::zero());
    }

    let params = SwapParams::new(
        token.address,
        config.stable.address,
        amount,
        token.decimals,
        user,
        config.slippage.clone(),
    )?;
    let quote = aggregator.quote(&params).await?;
    Ok(from_base_units(quote.to_amount, STABLE_QUOTE_DECIMALS))
}

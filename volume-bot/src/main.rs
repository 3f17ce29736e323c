//! The volume bot: runs buy/sell swap cycles through the OKX DEX aggregator
//! for a list of wallets, sells their leftover tokens on demand and reports
//! the volume each wallet traded
#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(unsafe_code)]
#![deny(clippy::needless_pass_by_ref_mut)]

pub mod balances;
pub mod chain_client;
pub mod cli;
pub mod config;
pub mod error;
pub mod execution_client;
pub mod helpers;
pub mod runner;
pub mod stats;
pub mod trade_log;

use std::{error::Error, sync::Arc};

use chain_client::EndpointSet;
use clap::Parser;
use cli::{Cli, Command};
use config::StrategyConfig;
use helpers::setup_logging;
use runner::Runner;
use tracing::info;
use trade_log::CsvTradeLog;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    setup_logging(cli.json_logs);

    let config = StrategyConfig::load(cli.strategy_config_path.as_deref())?;
    let wallets = cli.load_wallets()?;
    let endpoints = EndpointSet::new(&cli.rpc_urls)?;
    let trade_log = CsvTradeLog::new(&cli.trade_log_path)?;
    info!(wallets = wallets.len(), rpcs = endpoints.len(), "starting volume bot");

    let runner = Runner::new(cli.credentials(), endpoints, Arc::new(config), Arc::new(trade_log));
    match cli.command {
        Command::Run => {
            runner.run(&wallets).await;
        },
        Command::SellLeftovers => runner.sell_leftovers(&wallets).await,
        Command::Stats => {
            runner.stats(&wallets, &cli.trade_log_path).await?;
        },
    }

    Ok(())
}

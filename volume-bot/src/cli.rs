//! CLI argument definition & parsing for the volume bot

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use okx_dex_client::OkxApiCredentials;

use crate::{
    error::VolumeBotError,
    helpers::{load_lines, normalize_private_key, normalize_proxy},
};

/// A wallet to trade with and the proxy its traffic goes through
#[derive(Clone)]
pub struct WalletEntry {
    /// The wallet's position in the wallets file, 1-based
    pub idx: usize,
    /// The `0x`-prefixed private key
    pub private_key: String,
    /// The proxy URL
    pub proxy: String,
}

/// The cli for the volume bot
#[rustfmt::skip]
#[derive(Parser)]
#[clap(about = "OKX DEX volume bot")]
pub struct Cli {
    /// The command to run
    #[command(subcommand)]
    pub command: Command,

    // --- OKX Credentials --- //

    /// The OKX API key
    #[clap(long, env = "OKX_API_KEY", hide_env_values = true)]
    pub okx_api_key: String,
    /// The OKX API secret
    #[clap(long, env = "OKX_API_SECRET", hide_env_values = true)]
    pub okx_api_secret: String,
    /// The OKX API passphrase
    #[clap(long, env = "OKX_API_PASSPHRASE", hide_env_values = true)]
    pub okx_api_passphrase: String,
    /// The OKX project id, sent when set
    #[clap(long, env = "OKX_PROJECT_ID")]
    pub okx_project_id: Option<String>,

    // --- Chain --- //

    /// The chain RPC URLs, in priority order
    #[clap(long, env = "BSC_RPC_URLS", value_delimiter = ',', required = true)]
    pub rpc_urls: Vec<String>,

    // --- Files --- //

    /// The file of private keys, one per line
    #[clap(long, env = "WALLETS_PATH", default_value = "wallets.txt")]
    pub wallets_path: PathBuf,
    /// The file of proxies, one per line, paired with the wallets by position
    #[clap(long, env = "PROXIES_PATH", default_value = "proxies.txt")]
    pub proxies_path: PathBuf,
    /// A JSON file overriding the default strategy
    #[clap(long, env = "STRATEGY_CONFIG_PATH")]
    pub strategy_config_path: Option<PathBuf>,
    /// The CSV file confirmed swaps are appended to
    #[clap(long, env = "TRADE_LOG_PATH", default_value = "data/trades.csv")]
    pub trade_log_path: PathBuf,

    // --- Telemetry --- //

    /// Whether to emit JSON formatted logs
    #[clap(long, default_value = "false")]
    pub json_logs: bool,
}

/// The bot's commands
#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run buy/sell cycles for every wallet
    Run,
    /// Sell every wallet's whole balance of each configured token
    SellLeftovers,
    /// Report every wallet's balances and its traded volume from the trade log
    Stats,
}

impl Cli {
    /// The OKX API credentials
    pub fn credentials(&self) -> OkxApiCredentials {
        OkxApiCredentials {
            api_key: self.okx_api_key.clone(),
            api_secret: self.okx_api_secret.clone(),
            passphrase: self.okx_api_passphrase.clone(),
            project_id: self.okx_project_id.clone().filter(|id| !id.trim().is_empty()),
        }
    }

    /// Load the wallets and pair each with its proxy
    pub fn load_wallets(&self) -> Result<Vec<WalletEntry>, VolumeBotError> {
        let keys = load_lines(&self.wallets_path)?;
        let proxies = load_lines(&self.proxies_path)?;
        pair_wallets(keys, proxies)
    }
}

/// Pair private keys with proxies by position
fn pair_wallets(
    keys: Vec<String>,
    proxies: Vec<String>,
) -> Result<Vec<WalletEntry>, VolumeBotError> {
    if keys.len() != proxies.len() {
        return Err(VolumeBotError::config(format!(
            "{} wallets but {} proxies; each wallet needs exactly one proxy",
            keys.len(),
            proxies.len()
        )));
    }

    Ok(keys
        .iter()
        .zip(proxies.iter())
        .enumerate()
        .map(|(i, (key, proxy))| WalletEntry {
            idx: i + 1,
            private_key: normalize_private_key(key),
            proxy: normalize_proxy(proxy),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(ls: &[&str]) -> Vec<String> {
        ls.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_pair_wallets() {
        let wallets =
            pair_wallets(lines(&["abcd", "0xbeef"]), lines(&["1.2.3.4:8080", "socks5://h:1"]))
                .unwrap();

        assert_eq!(wallets[0].idx, 1);
        assert_eq!(wallets[0].private_key, "0xabcd");
        assert_eq!(wallets[0].proxy, "http://1.2.3.4:8080");
        assert_eq!(wallets[1].proxy, "socks5://h:1");
    }

    #[test]
    fn test_pair_wallets_mismatch() {
        assert!(pair_wallets(lines(&["a", "b"]), lines(&["p"])).is_err());
    }

    /// Tests parsing of a comma separated RPC list from the command line
    #[test]
    fn test_parse_cli() {
        let cli = Cli::try_parse_from([
            "volume-bot",
            "--okx-api-key",
            "k",
            "--okx-api-secret",
            "s",
            "--okx-api-passphrase",
            "p",
            "--rpc-urls",
            "https://a,https://b",
            "sell-leftovers",
        ])
        .unwrap();

        assert_eq!(cli.rpc_urls, vec!["https://a", "https://b"]);
        assert_eq!(cli.command, Command::SellLeftovers);
        assert!(cli.credentials().project_id.is_none());
        assert_eq!(cli.trade_log_path, PathBuf::from("data/trades.csv"));
    }

    #[test]
    fn test_parse_stats_command() {
        let cli = Cli::try_parse_from([
            "volume-bot",
            "--okx-api-key",
            "k",
            "--okx-api-secret",
            "s",
            "--okx-api-passphrase",
            "p",
            "--rpc-urls",
            "https://a",
            "--trade-log-path",
            "/tmp/trades.csv",
            "stats",
        ])
        .unwrap();

        assert_eq!(cli.command, Command::Stats);
        assert_eq!(cli.trade_log_path, PathBuf::from("/tmp/trades.csv"));
    }
}

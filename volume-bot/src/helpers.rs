//! Helpers for the volume bot
#![allow(missing_docs)]
#![allow(clippy::missing_docs_in_private_items)]

use std::path::Path;

use alloy::sol;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::error::VolumeBotError;

// ---------
// | ERC20 |
// ---------

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 value) external returns (bool);
    }
}

// -----------
// | Logging |
// -----------

/// Install the global tracing subscriber, filtered by `RUST_LOG` with an
/// `info` default
pub fn setup_logging(json: bool) {
    let filter =
        EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy();
    let layer = if json {
        fmt::layer().with_file(true).with_line_number(true).json().flatten_event(true).boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
}

// ---------
// | Files |
// ---------

/// Read the non-blank, non-comment lines of a file, trimmed
pub fn load_lines(path: &Path) -> Result<Vec<String>, VolumeBotError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| VolumeBotError::io(format!("{}: {e}", path.display())))?;

    Ok(parse_lines(&contents))
}

/// Split file contents into its non-blank, non-comment lines
fn parse_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Prefix a hex private key with `0x` when missing
pub fn normalize_private_key(key: &str) -> String {
    let key = key.trim();
    if key.starts_with("0x") || key.starts_with("0X") {
        key.to_string()
    } else {
        format!("0x{key}")
    }
}

/// Prefix a proxy with `http://` when it has no scheme
pub fn normalize_proxy(proxy: &str) -> String {
    let proxy = proxy.trim();
    if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("http://{proxy}")
    }
}

/// Shorten an address for display, e.g. `0x1234…abcd`
pub fn short_addr(addr: &str) -> String {
    if addr.len() <= 10 {
        return addr.to_string();
    }

    format!("{}…{}", &addr[..6], &addr[addr.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lines() {
        let contents = "# wallets\n\n  0xabc  \n#0xdead\nfff\n";
        assert_eq!(parse_lines(contents), vec!["0xabc", "fff"]);
    }

    #[test]
    fn test_normalize_private_key() {
        assert_eq!(normalize_private_key("abcd"), "0xabcd");
        assert_eq!(normalize_private_key(" 0xabcd "), "0xabcd");
    }

    #[test]
    fn test_normalize_proxy() {
        assert_eq!(normalize_proxy("user:pw@10.0.0.1:3128"), "http://user:pw@10.0.0.1:3128");
        assert_eq!(normalize_proxy("socks5h://10.0.0.1:1080"), "socks5h://10.0.0.1:1080");
    }

    #[test]
    fn test_short_addr() {
        assert_eq!(
            short_addr("0x55d398326f99059fF775485246999027B3197955"),
            "0x55d3…7955"
        );
        assert_eq!(short_addr("0xabc"), "0xabc");
    }
}

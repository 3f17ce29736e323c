//! Validated request and response types for the OKX DEX aggregator

use std::str::FromStr;

use alloy_primitives::{Address, Bytes, U256};
use bigdecimal::{BigDecimal, One};

use crate::{
    api_types::{
        first_present, OkxApproveResponse, OkxRouterResult, OkxSwapRequestParams, OkxSwapResponse,
        OkxTokenAsset,
    },
    error::OkxClientError,
    units::{parse_decimal, parse_uint, to_base_units},
};

/// The swap mode the bot trades with
const EXACT_IN_SWAP_MODE: &str = "exactIn";

/// The sentinel address OKX uses for a chain's native gas token
pub const NATIVE_TOKEN_ADDRESS: Address =
    alloy_primitives::address!("EeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE");

/// Whether the given address is the native gas token sentinel
pub fn is_native_token(token: Address) -> bool {
    token == NATIVE_TOKEN_ADDRESS
}

// -----------
// | Request |
// -----------

/// The parameters of a quote or swap-build request
#[derive(Debug, Clone)]
pub struct SwapParams {
    /// The token sold
    pub from_token: Address,
    /// The token bought
    pub to_token: Address,
    /// The amount sold, in base units of `from_token`
    pub amount: U256,
    /// The slippage tolerance as a fraction, e.g. `0.01` for 1%
    pub slippage: BigDecimal,
    /// The wallet that will submit the swap
    pub user: Address,
}

impl SwapParams {
    /// Build swap parameters from a human readable input amount, truncating it
    /// to the input token's decimals
    pub fn new(
        from_token: Address,
        to_token: Address,
        amount_in: &BigDecimal,
        decimals_in: u8,
        user: Address,
        slippage: BigDecimal,
    ) -> Result<Self, OkxClientError> {
        let amount = to_base_units(amount_in, decimals_in)?;
        Ok(Self { from_token, to_token, amount, slippage, user })
    }

    /// The query parameters for this request on the given chain
    pub(crate) fn to_query(&self, chain_index: &str) -> OkxSwapRequestParams {
        OkxSwapRequestParams {
            chain_index: chain_index.to_string(),
            from_token_address: self.from_token.to_string(),
            to_token_address: self.to_token.to_string(),
            amount: self.amount.to_string(),
            swap_mode: EXACT_IN_SWAP_MODE.to_string(),
            slippage: self.slippage.to_string(),
            user_wallet_address: self.user.to_string(),
        }
    }
}

// -------------
// | Responses |
// -------------

/// A quote from the aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    /// The token sold
    pub from_token: Address,
    /// The token bought
    pub to_token: Address,
    /// The expected output, in base units of `to_token`
    pub to_amount: U256,
    /// The decimals of `to_token`, when the aggregator reported them
    pub to_decimals: Option<u8>,
    /// The output after the slippage tolerance, in base units
    pub min_receive: U256,
    /// The slippage tolerance the quote was requested with
    pub slippage: BigDecimal,
}

impl Quote {
    /// Validate a quote response row
    pub(crate) fn from_router_result(
        params: &SwapParams,
        res: &OkxRouterResult,
    ) -> Result<Self, OkxClientError> {
        let to_amount = res
            .to_token_amount
            .as_deref()
            .ok_or_else(|| OkxClientError::parsing("quote missing toTokenAmount"))
            .and_then(parse_uint)?;
        let to_decimals = router_to_decimals(res)?;
        let min_receive = apply_slippage(to_amount, &params.slippage)?;

        Ok(Self {
            from_token: params.from_token,
            to_token: params.to_token,
            to_amount,
            to_decimals,
            min_receive,
            slippage: params.slippage.clone(),
        })
    }
}

/// A swap transaction built by the aggregator, validated at the boundary
///
/// Field fallbacks, in order:
/// - gas price: the first non-empty of `gasPrice`, `maxFeePerGas` and
///   `maxPriorityFeePerGas`
/// - value: `value`, then zero
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapTransaction {
    /// The aggregator router
    pub to: Address,
    /// The swap calldata
    pub data: Bytes,
    /// The native value sent with the swap
    pub value: U256,
    /// The aggregator's gas limit hint
    pub gas_limit: Option<u64>,
    /// The aggregator's gas price hint, in wei
    pub gas_price: Option<u128>,
    /// The minimum output after slippage, in base units
    pub min_receive: Option<U256>,
    /// The expected output, in base units
    pub to_amount: Option<U256>,
    /// The decimals of the output token
    pub to_decimals: Option<u8>,
}

impl TryFrom<OkxSwapResponse> for SwapTransaction {
    type Error = OkxClientError;

    fn try_from(resp: OkxSwapResponse) -> Result<Self, Self::Error> {
        let tx = resp.tx;
        let to = tx
            .resolved_to()
            .ok_or_else(|| OkxClientError::parsing("swap tx missing `to`"))
            .and_then(parse_address)?;
        let data = tx
            .resolved_data()
            .ok_or_else(|| OkxClientError::parsing("swap tx missing `data`"))
            .and_then(parse_bytes)?;

        let value = parse_opt_uint(tx.resolved_value())?.unwrap_or_default();
        let gas_limit = parse_opt_uint(tx.gas.as_deref())?.map(saturating_u64);
        let gas_price_hint =
            first_present([&tx.gas_price, &tx.max_fee_per_gas, &tx.max_priority_fee_per_gas]);
        let gas_price = parse_opt_uint(gas_price_hint)?.map(saturating_u128);
        let min_receive = parse_opt_uint(tx.min_receive_amount.as_deref())?;

        let (to_amount, to_decimals) = match resp.router_result.as_ref() {
            Some(res) => {
                (parse_opt_uint(res.to_token_amount.as_deref())?, router_to_decimals(res)?)
            },
            None => (None, None),
        };

        Ok(Self { to, data, value, gas_limit, gas_price, min_receive, to_amount, to_decimals })
    }
}

/// An approval transaction built by the aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApproveTransaction {
    /// The spender to approve, i.e. the aggregator's token approval contract
    pub spender: Address,
    /// The `approve` calldata, sent to the token
    pub data: Bytes,
    /// The aggregator's gas limit hint
    pub gas_limit: Option<u64>,
    /// The aggregator's gas price hint, in wei
    pub gas_price: Option<u128>,
}

impl TryFrom<OkxApproveResponse> for ApproveTransaction {
    type Error = OkxClientError;

    fn try_from(resp: OkxApproveResponse) -> Result<Self, Self::Error> {
        Ok(Self {
            spender: parse_address(&resp.dex_contract_address)?,
            data: parse_bytes(&resp.data)?,
            gas_limit: parse_opt_uint(resp.gas_limit.as_deref())?.map(saturating_u64),
            gas_price: parse_opt_uint(resp.gas_price.as_deref())?.map(saturating_u128),
        })
    }
}

/// A token balance held by a wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
    /// The token, `None` for the native gas token
    pub token: Option<Address>,
    /// The token's symbol as reported by the API
    pub symbol: String,
    /// The human readable balance
    pub balance: BigDecimal,
}

impl TryFrom<&OkxTokenAsset> for TokenBalance {
    type Error = OkxClientError;

    fn try_from(asset: &OkxTokenAsset) -> Result<Self, Self::Error> {
        let token = match asset.token_address.trim() {
            "" => None,
            addr => Some(parse_address(addr)?).filter(|a| !is_native_token(*a)),
        };

        Ok(Self { token, symbol: asset.symbol.clone(), balance: parse_decimal(&asset.balance)? })
    }
}

// -----------
// | Helpers |
// -----------

/// Deduct the slippage tolerance from an amount, truncating
fn apply_slippage(amount: U256, slippage: &BigDecimal) -> Result<U256, OkxClientError> {
    let keep = BigDecimal::one() - slippage;
    let min = crate::units::from_base_units(amount, 0) * keep;
    to_base_units(&min, 0)
}

/// Read the output token decimals from a router result
fn router_to_decimals(res: &OkxRouterResult) -> Result<Option<u8>, OkxClientError> {
    let Some(decimal) = res.to_token.as_ref().and_then(|t| t.decimal.as_deref()) else {
        return Ok(None);
    };

    decimal
        .trim()
        .parse()
        .map(Some)
        .map_err(|e| OkxClientError::parsing(format!("invalid decimals {decimal:?}: {e}")))
}

/// Parse an address field
fn parse_address(s: &str) -> Result<Address, OkxClientError> {
    Address::from_str(s.trim()).map_err(OkxClientError::parsing)
}

/// Parse a hex calldata field
fn parse_bytes(s: &str) -> Result<Bytes, OkxClientError> {
    Bytes::from_str(s.trim()).map_err(OkxClientError::parsing)
}

/// Parse an optional integer field, treating the empty string as absent
fn parse_opt_uint(s: Option<&str>) -> Result<Option<U256>, OkxClientError> {
    match s.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_uint(s).map(Some),
    }
}

/// Narrow a `U256` to a `u64`, saturating
fn saturating_u64(v: U256) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}

/// Narrow a `U256` to a `u128`, saturating
fn saturating_u128(v: U256) -> u128 {
    u128::try_from(v).unwrap_or(u128::MAX)
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;

    use super::*;

    const KOGE: Address = address!("e6DF05CE8C8301223373CF5B969AFCb1498c5528");
    const USDT: Address = address!("55d398326f99059fF775485246999027B3197955");

    fn params() -> SwapParams {
        SwapParams {
            from_token: KOGE,
            to_token: USDT,
            amount: U256::from(1000u64),
            slippage: BigDecimal::from_str("0.01").unwrap(),
            user: Address::ZERO,
        }
    }

    /// Tests the quote's minimum receive is derived from the slippage
    #[test]
    fn test_quote_min_receive() {
        let res: OkxRouterResult = serde_json::from_str(
            r#"{"toTokenAmount":"1999","toToken":{"decimal":"18","tokenSymbol":"USDT"}}"#,
        )
        .unwrap();
        let quote = Quote::from_router_result(&params(), &res).unwrap();

        assert_eq!(quote.to_amount, U256::from(1999u64));
        assert_eq!(quote.to_decimals, Some(18));
        // 1999 * 0.99 = 1979.01, truncated
        assert_eq!(quote.min_receive, U256::from(1979u64));
    }

    #[test]
    fn test_quote_missing_amount() {
        let res = OkxRouterResult::default();
        assert!(Quote::from_router_result(&params(), &res).is_err());
    }

    /// Tests the full swap response shape, including the gas price fallback
    #[test]
    fn test_swap_transaction_from_response() {
        let json = r#"{
            "routerResult": {
                "toTokenAmount": "5000",
                "toToken": {"decimal": "18"}
            },
            "tx": {
                "to": "0x9b9efa5Efa731EA9Bbb0369E91fA17Abf249CFD4",
                "data": "0x0d5f0e3b",
                "value": "0",
                "gas": "250000",
                "gasPrice": "",
                "maxPriorityFeePerGas": "1000000000",
                "minReceiveAmount": "4950"
            }
        }"#;
        let resp: OkxSwapResponse = serde_json::from_str(json).unwrap();
        let tx = SwapTransaction::try_from(resp).unwrap();

        assert_eq!(tx.data, Bytes::from(vec![0x0d, 0x5f, 0x0e, 0x3b]));
        assert_eq!(tx.value, U256::ZERO);
        assert_eq!(tx.gas_limit, Some(250_000));
        assert_eq!(tx.gas_price, Some(1_000_000_000));
        assert_eq!(tx.min_receive, Some(U256::from(4950u64)));
        assert_eq!(tx.to_amount, Some(U256::from(5000u64)));
        assert_eq!(tx.to_decimals, Some(18));
    }

    #[test]
    fn test_swap_gas_price_prefers_legacy_field() {
        let json = r#"{"tx":{"to":"0x9b9efa5Efa731EA9Bbb0369E91fA17Abf249CFD4","data":"0x",
            "gasPrice":"3000000000","maxPriorityFeePerGas":"1"}}"#;
        let resp: OkxSwapResponse = serde_json::from_str(json).unwrap();
        let tx = SwapTransaction::try_from(resp).unwrap();

        assert_eq!(tx.gas_price, Some(3_000_000_000));
        assert_eq!(tx.to_decimals, None);
    }

    #[test]
    fn test_swap_missing_calldata() {
        let json = r#"{"tx":{"to":"0x9b9efa5Efa731EA9Bbb0369E91fA17Abf249CFD4"}}"#;
        let resp: OkxSwapResponse = serde_json::from_str(json).unwrap();
        assert!(SwapTransaction::try_from(resp).is_err());
    }

    #[test]
    fn test_approve_transaction_from_response() {
        let json = r#"{
            "data": "0x095ea7b3",
            "dexContractAddress": "0x2c34A2Fb1d0b4f55de51E1d0bDEfaDDce6b7cDD6",
            "gasLimit": "50000",
            "gasPrice": "0xb2d05e00"
        }"#;
        let resp: OkxApproveResponse = serde_json::from_str(json).unwrap();
        let approve = ApproveTransaction::try_from(resp).unwrap();

        assert_eq!(approve.spender, address!("2c34A2Fb1d0b4f55de51E1d0bDEfaDDce6b7cDD6"));
        assert_eq!(approve.gas_limit, Some(50_000));
        assert_eq!(approve.gas_price, Some(3_000_000_000));
    }

    /// Tests that the empty token address maps to the native token
    #[test]
    fn test_token_balance_native() {
        let asset: OkxTokenAsset =
            serde_json::from_str(r#"{"tokenAddress":"","symbol":"BNB","balance":"0.0123"}"#)
                .unwrap();
        let balance = TokenBalance::try_from(&asset).unwrap();

        assert_eq!(balance.token, None);
        assert_eq!(balance.balance, BigDecimal::from_str("0.0123").unwrap());
    }

    #[test]
    fn test_native_sentinel() {
        let lower: Address = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee".parse().unwrap();
        assert!(is_native_token(lower));
        assert!(!is_native_token(USDT));
    }
}

//! OKX DEX API wire types
//!
//! See <https://web3.okx.com/build/dev-docs/dex-api/dex-api-reference> for the
//! upstream definitions. Numeric fields arrive as strings, sometimes hex
//! encoded; they are validated into the types in [`crate::types`] before use.

#![allow(missing_docs)]
#![allow(clippy::missing_docs_in_private_items)]

use serde::{Deserialize, Serialize};

use crate::error::OkxClientError;

/// The response code OKX uses to indicate success
const OKX_SUCCESS_CODE: &str = "0";

// ------------
// | Envelope |
// ------------

/// The envelope wrapping every OKX API response
#[derive(Debug, Deserialize)]
pub struct OkxApiResponse<T> {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> OkxApiResponse<T> {
    /// Check the business code and return the data rows
    pub fn into_data(self) -> Result<Vec<T>, OkxClientError> {
        if self.code != OKX_SUCCESS_CODE {
            return Err(OkxClientError::Api { code: self.code, msg: self.msg });
        }

        Ok(self.data)
    }

    /// Check the business code and return the first data row, failing with
    /// `EmptyResponse` if there is none
    pub fn into_first(self, endpoint: &str) -> Result<T, OkxClientError> {
        self.into_data()?
            .into_iter()
            .next()
            .ok_or_else(|| OkxClientError::empty_response(endpoint))
    }
}

// ------------
// | Requests |
// ------------

/// Query parameters shared by the quote and swap endpoints
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxSwapRequestParams {
    pub chain_index: String,
    pub from_token_address: String,
    pub to_token_address: String,
    pub amount: String,
    pub swap_mode: String,
    pub slippage: String,
    pub user_wallet_address: String,
}

/// Query parameters for the approve-transaction endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxApproveRequestParams {
    pub chain_index: String,
    pub token_contract_address: String,
    pub approve_amount: String,
}

/// A single token entry in a balance request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxBalanceTokenParam {
    pub chain_index: String,
    /// The empty string denotes the chain's native token
    pub token_address: String,
}

/// The body of a token-balances-by-address request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxBalanceRequest {
    pub address: String,
    pub token_addresses: Vec<OkxBalanceTokenParam>,
}

// -------------
// | Responses |
// -------------

/// Token metadata echoed in quote responses
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxTokenInfo {
    #[serde(default)]
    pub token_contract_address: String,
    #[serde(default)]
    pub token_symbol: String,
    /// The token's decimals, as a decimal string
    #[serde(default)]
    pub decimal: Option<String>,
}

/// A quote, as returned by the quote endpoint and echoed as `routerResult` in
/// the swap endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxRouterResult {
    #[serde(default)]
    pub from_token_amount: Option<String>,
    #[serde(default)]
    pub to_token_amount: Option<String>,
    #[serde(default)]
    pub from_token: Option<OkxTokenInfo>,
    #[serde(default)]
    pub to_token: Option<OkxTokenInfo>,
}

/// The transaction fields of a swap response
///
/// Alternate field names observed across API revisions are kept as separate
/// fields, so a response carrying more than one of them still parses; the
/// `resolved_*` accessors pick the first non-empty one.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxSwapTx {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub to_address: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub calldata: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub input_data: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub eth_value: Option<String>,
    #[serde(default)]
    pub gas: Option<String>,
    #[serde(default)]
    pub gas_price: Option<String>,
    #[serde(default)]
    pub max_fee_per_gas: Option<String>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(default)]
    pub min_receive_amount: Option<String>,
}

impl OkxSwapTx {
    /// The transaction target
    pub fn resolved_to(&self) -> Option<&str> {
        first_present([&self.to, &self.to_address])
    }

    /// The transaction calldata
    pub fn resolved_data(&self) -> Option<&str> {
        first_present([&self.data, &self.calldata, &self.input, &self.input_data])
    }

    /// The native value sent with the transaction
    pub fn resolved_value(&self) -> Option<&str> {
        first_present([&self.value, &self.eth_value])
    }
}

/// The first field that is set and not blank
pub(crate) fn first_present<'a, const N: usize>(
    fields: [&'a Option<String>; N],
) -> Option<&'a str> {
    fields.into_iter().filter_map(|f| f.as_deref()).find(|s| !s.trim().is_empty())
}

/// A swap-build response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxSwapResponse {
    #[serde(default)]
    pub router_result: Option<OkxRouterResult>,
    pub tx: OkxSwapTx,
}

/// An approve-transaction response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxApproveResponse {
    pub data: String,
    pub dex_contract_address: String,
    #[serde(default)]
    pub gas_limit: Option<String>,
    #[serde(default)]
    pub gas_price: Option<String>,
}

/// A single asset row of a balance response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxTokenAsset {
    #[serde(default)]
    pub token_address: String,
    #[serde(default)]
    pub symbol: String,
    /// The human readable balance, as a decimal string
    pub balance: String,
}

/// A balance response row
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxBalanceResponse {
    #[serde(default)]
    pub token_assets: Vec<OkxTokenAsset>,
}

/// A supported-chain response row
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxSupportedChain {
    #[serde(default)]
    pub chain_index: Option<String>,
    #[serde(default)]
    pub chain_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests that a non-zero business code surfaces as an API error
    #[test]
    fn test_business_error_code() {
        let json = r#"{"code":"50011","msg":"Too Many Requests","data":[]}"#;
        let resp: OkxApiResponse<OkxSupportedChain> = serde_json::from_str(json).unwrap();

        let err = resp.into_data().unwrap_err();
        assert!(matches!(err, OkxClientError::Api { ref code, .. } if code == "50011"));
    }

    /// Tests that an empty data array surfaces as an empty response
    #[test]
    fn test_empty_data() {
        let json = r#"{"code":"0","msg":"","data":[]}"#;
        let resp: OkxApiResponse<OkxApproveResponse> = serde_json::from_str(json).unwrap();

        let err = resp.into_first("approve-transaction").unwrap_err();
        assert!(matches!(err, OkxClientError::EmptyResponse(_)));
    }

    /// Tests that alternate tx field names are accepted
    #[test]
    fn test_swap_tx_aliases() {
        let json = r#"{
            "tx": {
                "toAddress": "0x9b9efa5Efa731EA9Bbb0369E91fA17Abf249CFD4",
                "calldata": "0xdeadbeef",
                "ethValue": "0"
            }
        }"#;
        let resp: OkxSwapResponse = serde_json::from_str(json).unwrap();

        assert_eq!(resp.tx.resolved_to(), Some("0x9b9efa5Efa731EA9Bbb0369E91fA17Abf249CFD4"));
        assert_eq!(resp.tx.resolved_data(), Some("0xdeadbeef"));
        assert_eq!(resp.tx.resolved_value(), Some("0"));
        assert!(resp.router_result.is_none());
    }

    /// Tests that a tx carrying both the canonical and the alternate names
    /// parses and prefers the canonical field
    #[test]
    fn test_swap_tx_both_names() {
        let json = r#"{
            "tx": {
                "to": "0x9b9efa5Efa731EA9Bbb0369E91fA17Abf249CFD4",
                "toAddress": "0x0000000000000000000000000000000000000001",
                "data": "",
                "input": "0xcafe",
                "value": "5",
                "ethValue": "7"
            }
        }"#;
        let resp: OkxSwapResponse = serde_json::from_str(json).unwrap();

        assert_eq!(resp.tx.resolved_to(), Some("0x9b9efa5Efa731EA9Bbb0369E91fA17Abf249CFD4"));
        assert_eq!(resp.tx.resolved_data(), Some("0xcafe"));
        assert_eq!(resp.tx.resolved_value(), Some("5"));
    }
}

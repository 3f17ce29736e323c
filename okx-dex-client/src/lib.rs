//! A client for the OKX DEX aggregator API
//!
//! Every request is signed with the account's API secret and retried with
//! exponential backoff when the API's rate limiter rejects it.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]
#![deny(unsafe_code)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::needless_pass_by_ref_mut)]

use alloy_primitives::{Address, U256};
use reqwest::{Client, Method, Proxy, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::{
    api_types::{
        OkxApiResponse, OkxApproveRequestParams, OkxApproveResponse, OkxBalanceRequest,
        OkxBalanceResponse, OkxBalanceTokenParam, OkxRouterResult, OkxSupportedChain,
        OkxSwapResponse,
    },
    auth::{
        iso_timestamp, sign_request, OKX_API_HMAC_HEADER, OKX_API_KEY_HEADER,
        OKX_PASSPHRASE_HEADER, OKX_PROJECT_HEADER, OKX_TIMESTAMP_HEADER,
    },
    error::OkxClientError,
    rate_limit::{jittered_backoff, parse_retry_after, MAX_RATE_LIMIT_ATTEMPTS},
    types::{ApproveTransaction, Quote, SwapParams, SwapTransaction, TokenBalance},
};

pub mod api_types;
pub mod auth;
pub mod error;
pub mod rate_limit;
pub mod types;
pub mod units;

pub use auth::OkxApiCredentials;

// -------------
// | Constants |
// -------------

/// The base URL for the OKX DEX aggregator API
pub const OKX_BASE_URL: &str = "https://web3.okx.com";
/// The OKX chain index of BNB Smart Chain
pub const BSC_CHAIN_INDEX: &str = "56";

/// The endpoint for getting a quote
const OKX_QUOTE_ENDPOINT: &str = "/api/v5/dex/aggregator/quote";
/// The endpoint for getting a swap payload
const OKX_SWAP_ENDPOINT: &str = "/api/v5/dex/aggregator/swap";
/// The endpoint for getting an approval target for a swap
const OKX_APPROVAL_ENDPOINT: &str = "/api/v5/dex/aggregator/approve-transaction";
/// The endpoint for listing the chains the aggregator supports
const OKX_SUPPORTED_CHAINS_ENDPOINT: &str = "/api/v5/dex/aggregator/supported/chain";
/// The endpoint for querying a wallet's token balances
const OKX_BALANCES_ENDPOINT: &str = "/api/v5/wallet/asset/token-balances-by-address";

/// The timeout applied to every HTTP request
const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

// ----------
// | Client |
// ----------

/// A client for the OKX DEX aggregator API
#[derive(Clone, Debug)]
pub struct OkxClient {
    /// The credentials required for authenticating with the OKX API
    credentials: OkxApiCredentials,
    /// The underlying HTTP client
    http_client: Client,
    /// The base URL of the API
    base_url: String,
    /// The OKX chain index requests are made against
    chain_index: String,
}

impl OkxClient {
    /// Create a new client, optionally routing all requests through a proxy
    pub fn new(
        credentials: OkxApiCredentials,
        chain_index: &str,
        proxy: Option<&str>,
    ) -> Result<Self, OkxClientError> {
        let mut builder = Client::builder().timeout(HTTP_TIMEOUT);
        if let Some(proxy_url) = proxy {
            builder = builder.proxy(Proxy::all(proxy_url).map_err(OkxClientError::setup)?);
        }
        let http_client = builder.build().map_err(OkxClientError::setup)?;

        Ok(Self {
            credentials,
            http_client,
            base_url: OKX_BASE_URL.to_string(),
            chain_index: chain_index.to_string(),
        })
    }

    /// Override the API base URL
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// The OKX chain index this client trades on
    pub fn chain_index(&self) -> &str {
        &self.chain_index
    }

    // ----------------------
    // | Aggregator Methods |
    // ----------------------

    /// Get a quote for an exact-input swap
    pub async fn quote(&self, params: &SwapParams) -> Result<Quote, OkxClientError> {
        let query = serde_qs::to_string(&params.to_query(&self.chain_index))
            .map_err(OkxClientError::parsing)?;
        let path = format!("{OKX_QUOTE_ENDPOINT}?{query}");

        let resp: OkxApiResponse<OkxRouterResult> = self.send_get_request(&path).await?;
        let res = resp.into_first(OKX_QUOTE_ENDPOINT)?;
        Quote::from_router_result(params, &res)
    }

    /// Build an unsigned swap transaction for an exact-input swap
    pub async fn build_swap(&self, params: &SwapParams) -> Result<SwapTransaction, OkxClientError> {
        let query = serde_qs::to_string(&params.to_query(&self.chain_index))
            .map_err(OkxClientError::parsing)?;
        let path = format!("{OKX_SWAP_ENDPOINT}?{query}");

        let resp: OkxApiResponse<OkxSwapResponse> = self.send_get_request(&path).await?;
        resp.into_first(OKX_SWAP_ENDPOINT)?.try_into()
    }

    /// Build an approval of `amount` base units of `token` for the
    /// aggregator's spender
    pub async fn build_approve(
        &self,
        token: Address,
        amount: U256,
    ) -> Result<ApproveTransaction, OkxClientError> {
        let params = OkxApproveRequestParams {
            chain_index: self.chain_index.clone(),
            token_contract_address: token.to_string(),
            approve_amount: amount.to_string(),
        };
        let query = serde_qs::to_string(&params).map_err(OkxClientError::parsing)?;
        let path = format!("{OKX_APPROVAL_ENDPOINT}?{query}");

        let resp: OkxApiResponse<OkxApproveResponse> = self.send_get_request(&path).await?;
        resp.into_first(OKX_APPROVAL_ENDPOINT)?.try_into()
    }

    /// List the chains the aggregator supports; used as a health check
    pub async fn supported_chains(&self) -> Result<Vec<OkxSupportedChain>, OkxClientError> {
        let path = format!("{OKX_SUPPORTED_CHAINS_ENDPOINT}?chainIndex={}", self.chain_index);
        let resp: OkxApiResponse<OkxSupportedChain> = self.send_get_request(&path).await?;
        resp.into_data()
    }

    /// Fetch the balances of the native token and the given tokens held by
    /// `address`
    pub async fn token_balances(
        &self,
        address: Address,
        tokens: &[Address],
    ) -> Result<Vec<TokenBalance>, OkxClientError> {
        let native = OkxBalanceTokenParam {
            chain_index: self.chain_index.clone(),
            token_address: String::new(),
        };
        let token_params = tokens.iter().map(|token| OkxBalanceTokenParam {
            chain_index: self.chain_index.clone(),
            token_address: token.to_string().to_lowercase(),
        });
        let body = OkxBalanceRequest {
            address: address.to_string(),
            token_addresses: std::iter::once(native).chain(token_params).collect(),
        };

        let resp: OkxApiResponse<OkxBalanceResponse> =
            self.send_post_request(OKX_BALANCES_ENDPOINT, &body).await?;
        let rows = resp.into_data()?;

        rows.iter()
            .flat_map(|row| row.token_assets.iter())
            .map(TokenBalance::try_from)
            .collect()
    }

    // -----------
    // | Helpers |
    // -----------

    /// Send a signed GET request to the OKX API
    async fn send_get_request<T: DeserializeOwned>(&self, path: &str) -> Result<T, OkxClientError> {
        self.send_signed_request(Method::GET, path, None).await
    }

    /// Send a signed POST request with a JSON body to the OKX API
    async fn send_post_request<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, OkxClientError> {
        let body = serde_json::to_string(body).map_err(OkxClientError::parsing)?;
        self.send_signed_request(Method::POST, path, Some(body)).await
    }

    /// Send a signed request, backing off and retrying on HTTP 429
    ///
    /// The request is re-signed on every attempt so the timestamp stays fresh.
    async fn send_signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> Result<T, OkxClientError> {
        let url = format!("{}{path}", self.base_url);

        for attempt in 1..=MAX_RATE_LIMIT_ATTEMPTS {
            let timestamp = iso_timestamp();
            let signature = sign_request(
                &self.credentials.api_secret,
                &timestamp,
                method.as_str(),
                path,
                body.as_deref().unwrap_or_default(),
            )?;

            let mut request = self
                .http_client
                .request(method.clone(), &url)
                .header(OKX_API_KEY_HEADER, &self.credentials.api_key)
                .header(OKX_API_HMAC_HEADER, signature)
                .header(OKX_PASSPHRASE_HEADER, &self.credentials.passphrase)
                .header(OKX_TIMESTAMP_HEADER, timestamp);
            if let Some(project_id) = &self.credentials.project_id {
                request = request.header(OKX_PROJECT_HEADER, project_id);
            }
            if let Some(body) = &body {
                request = request
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body.clone());
            }

            let response = request.send().await?;
            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt == MAX_RATE_LIMIT_ATTEMPTS {
                    break;
                }

                let delay = jittered_backoff(attempt, parse_retry_after(response.headers()));
                warn!(path, attempt, delay_ms = delay.as_millis() as u64, "OKX rate limited");
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(OkxClientError::http(format!("{status} from {path}: {text}")));
            }

            debug!(path, attempt, "OKX request succeeded");
            return response.json::<T>().await.map_err(OkxClientError::parsing);
        }

        Err(OkxClientError::RateLimited { attempts: MAX_RATE_LIMIT_ATTEMPTS })
    }
}

//! Request authentication for the OKX API

use base64::Engine;
use chrono::{SecondsFormat, Utc};
use hmac::Mac;
use serde::Deserialize;

use crate::error::OkxClientError;

/// The header name for the project ID
pub(crate) const OKX_PROJECT_HEADER: &str = "OK-ACCESS-PROJECT";
/// The header name for the API key
pub(crate) const OKX_API_KEY_HEADER: &str = "OK-ACCESS-KEY";
/// The header name for the API authentication HMAC
pub(crate) const OKX_API_HMAC_HEADER: &str = "OK-ACCESS-SIGN";
/// The header name for the passphrase
pub(crate) const OKX_PASSPHRASE_HEADER: &str = "OK-ACCESS-PASSPHRASE";
/// The header name for the request timestamp
pub(crate) const OKX_TIMESTAMP_HEADER: &str = "OK-ACCESS-TIMESTAMP";

/// The credentials required for authenticating with the OKX API
#[derive(Deserialize, Clone)]
pub struct OkxApiCredentials {
    /// The API key to use for requests
    pub api_key: String,
    /// The secret w/ which to compute request HMACs
    pub api_secret: String,
    /// The passphrase used to create the API key
    pub passphrase: String,
    /// The project ID under which the API key was created, if any
    pub project_id: Option<String>,
}

impl std::fmt::Debug for OkxApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxApiCredentials")
            .field("api_key", &self.api_key)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

/// The current time in the ISO-8601 format OKX expects, millisecond precision
/// with a `Z` suffix
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true /* use_z */)
}

/// Create the base64 HMAC-SHA256 signature for an OKX API request
///
/// The signed message is `timestamp || METHOD || path_with_query || body`,
/// where `body` is empty for GET requests.
pub fn sign_request(
    secret: &str,
    iso_timestamp: &str,
    method: &str,
    path_with_query: &str,
    body: &str,
) -> Result<String, OkxClientError> {
    let mut hmac = hmac::Hmac::<sha2::Sha256>::new_from_slice(secret.as_bytes())
        .map_err(OkxClientError::signing)?;

    let method = method.to_uppercase();
    let message = format!("{iso_timestamp}{method}{path_with_query}{body}");
    hmac.update(message.as_bytes());

    let hmac_bytes = hmac.finalize().into_bytes();
    Ok(base64::engine::general_purpose::STANDARD.encode(hmac_bytes))
}

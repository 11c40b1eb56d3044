//! CLOB L2 authentication (HMAC-SHA256 request signing)

use super::GatewayError;
use base64::{engine::general_purpose::URL_SAFE as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// API credentials, loaded from the environment only
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    /// Base64 (URL-safe) encoded secret
    pub secret: String,
    pub passphrase: String,
    /// Funder / proxy wallet address
    pub address: String,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl ApiCredentials {
    /// Read `POLY_API_KEY`, `POLY_API_SECRET`, `POLY_PASSPHRASE`, `POLY_ADDRESS`
    pub fn from_env() -> anyhow::Result<Self> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| anyhow::anyhow!("{name} is not set"))
        };
        Ok(Self {
            api_key: var("POLY_API_KEY")?,
            secret: var("POLY_API_SECRET")?,
            passphrase: var("POLY_PASSPHRASE")?,
            address: var("POLY_ADDRESS")?,
        })
    }

    /// Build signed headers for one request
    pub fn headers(
        &self,
        method: &str,
        request_path: &str,
        body: &str,
    ) -> Result<L2Headers, GatewayError> {
        let timestamp = chrono::Utc::now().timestamp();
        let signature = sign_request(&self.secret, timestamp, method, request_path, body)?;
        Ok(L2Headers {
            address: self.address.clone(),
            api_key: self.api_key.clone(),
            passphrase: self.passphrase.clone(),
            signature,
            timestamp,
        })
    }
}

/// HMAC-SHA256 over `timestamp + METHOD + path + body`, base64 encoded
pub fn sign_request(
    secret: &str,
    timestamp: i64,
    method: &str,
    request_path: &str,
    body: &str,
) -> Result<String, GatewayError> {
    let secret_bytes = BASE64
        .decode(secret)
        .map_err(|e| GatewayError::Auth(format!("Failed to decode secret: {e}")))?;

    let message = format!("{}{}{}{}", timestamp, method.to_uppercase(), request_path, body);

    let mut mac = HmacSha256::new_from_slice(&secret_bytes)
        .map_err(|e| GatewayError::Auth(format!("Failed to create HMAC: {e}")))?;
    mac.update(message.as_bytes());

    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Signed L2 headers
#[derive(Debug, Clone)]
pub struct L2Headers {
    pub address: String,
    pub api_key: String,
    pub passphrase: String,
    pub signature: String,
    pub timestamp: i64,
}

impl L2Headers {
    /// Attach to a request
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("POLY_ADDRESS", &self.address)
            .header("POLY_API_KEY", &self.api_key)
            .header("POLY_PASSPHRASE", &self.passphrase)
            .header("POLY_SIGNATURE", &self.signature)
            .header("POLY_TIMESTAMP", self.timestamp.to_string())
    }
}

//! Where JWKS documents come from.
//!
//! The cache only ever talks to a [`KeySource`]; production wires in
//! [`HttpKeySource`], tests wire in an in-memory fake.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::auth::jwks::JwksCacheError;

/// A single JSON Web Key from a JWKS document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA", "EC" or "OKP")
    pub kty: String,
    /// Key ID, matched against the JWT header `kid`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Algorithm pinned to this key (e.g., "RS256")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Key use ("sig" or "enc")
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// Curve for EC and OKP keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x coordinate or OKP public key (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// A JWKS document containing multiple keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

/// Future returned by [`KeySource::fetch`].
pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<JwksDocument, JwksCacheError>> + Send + 'a>>;

/// Supplier of the identity provider's current key set.
pub trait KeySource: Send + Sync {
    /// Fetch the full key set.
    fn fetch(&self) -> FetchFuture<'_>;

    /// Short description used in log lines.
    fn describe(&self) -> String;
}

/// Fetches the key set with `GET <jwks_uri>`.
pub struct HttpKeySource {
    jwks_url: Url,
    client: reqwest::Client,
}

impl HttpKeySource {
    /// Create a source for `jwks_url` whose requests give up after `timeout`.
    pub fn new(jwks_url: Url, timeout: Duration) -> Result<Self, JwksCacheError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JwksCacheError::FetchError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { jwks_url, client })
    }
}

impl KeySource for HttpKeySource {
    fn fetch(&self) -> FetchFuture<'_> {
        Box::pin(async move {
            debug!("Fetching JWKS from {}", self.jwks_url);

            let response = self
                .client
                .get(self.jwks_url.clone())
                .send()
                .await
                .map_err(|e| JwksCacheError::FetchError(e.to_string()))?;

            if !response.status().is_success() {
                return Err(JwksCacheError::FetchError(format!(
                    "HTTP {} from JWKS endpoint",
                    response.status()
                )));
            }

            response
                .json::<JwksDocument>()
                .await
                .map_err(|e| JwksCacheError::ParseError(e.to_string()))
        })
    }

    fn describe(&self) -> String {
        self.jwks_url.to_string()
    }
}

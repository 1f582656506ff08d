//! Service configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! JSON file, `CONTEXT_SYNC_*` environment variables, and finally CLI flags
//! (applied by the binary).

use std::path::Path;
use std::time::Duration;
use std::{env, fs};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::{DEFAULT_CACHE_TTL_SECONDS, DEFAULT_FETCH_TIMEOUT_MS};
use crate::vault::DEFAULT_HISTORY_CAPACITY;

/// Default staleness threshold (24 hours).
pub const DEFAULT_STALE_AFTER_SECONDS: u64 = 86400;

/// Default pause between eviction sweeps (5 minutes).
pub const DEFAULT_EVICTION_INTERVAL_SECONDS: u64 = 300;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

const ENV_PREFIX: &str = "CONTEXT_SYNC_";

/// Token validation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// JWKS endpoint of the identity provider
    #[serde(default)]
    pub jwks_url: Option<Url>,
    /// Trusted issuer, compared exactly against `iss`
    #[serde(default)]
    pub issuer: String,
    /// This service's identifier, which `aud` must contain
    #[serde(default)]
    pub audience: String,
    /// JWKS cache TTL in seconds (default: 3600)
    #[serde(default = "default_jwks_cache_seconds")]
    pub jwks_cache_seconds: u64,
    /// Bound on one JWKS fetch in milliseconds (default: 5000)
    #[serde(default = "default_jwks_fetch_timeout_ms")]
    pub jwks_fetch_timeout_ms: u64,
    /// Keep serving an expired key set when a refresh fails
    #[serde(default)]
    pub allow_stale_jwks: bool,
}

fn default_jwks_cache_seconds() -> u64 {
    DEFAULT_CACHE_TTL_SECONDS
}

fn default_jwks_fetch_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT_MS
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwks_url: None,
            issuer: String::new(),
            audience: String::new(),
            jwks_cache_seconds: DEFAULT_CACHE_TTL_SECONDS,
            jwks_fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            allow_stale_jwks: false,
        }
    }
}

impl AuthConfig {
    /// Config for an identity provider publishing its keys at `jwks_url`.
    pub fn with_jwks(jwks_url: Url, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            jwks_url: Some(jwks_url),
            issuer: issuer.into(),
            audience: audience.into(),
            ..Default::default()
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_seconds)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.jwks_fetch_timeout_ms)
    }
}

/// Context vault configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Entries retained per history log
    pub history_capacity: usize,
    /// Contexts untouched for this long are evicted
    pub stale_after_seconds: u64,
    pub eviction_interval_seconds: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            stale_after_seconds: DEFAULT_STALE_AFTER_SECONDS,
            eviction_interval_seconds: DEFAULT_EVICTION_INTERVAL_SECONDS,
        }
    }
}

impl VaultConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_seconds)
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP bind address
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub vault: VaultConfig,
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            auth: AuthConfig::default(),
            vault: VaultConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Defaults, overlaid with `path` when given, overlaid with the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Read a JSON config file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Overlay `CONTEXT_SYNC_*` variables resolved through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(bind) = var("BIND") {
            self.bind = bind;
        }
        if let Some(url) = var("JWKS_URL") {
            self.auth.jwks_url =
                Some(Url::parse(&url).with_context(|| format!("Invalid CONTEXT_SYNC_JWKS_URL: {}", url))?);
        }
        if let Some(issuer) = var("ISSUER") {
            self.auth.issuer = issuer;
        }
        if let Some(audience) = var("AUDIENCE") {
            self.auth.audience = audience;
        }
        if let Some(v) = var("JWKS_CACHE_SECONDS") {
            self.auth.jwks_cache_seconds = parse_number("JWKS_CACHE_SECONDS", &v)?;
        }
        if let Some(v) = var("JWKS_FETCH_TIMEOUT_MS") {
            self.auth.jwks_fetch_timeout_ms = parse_number("JWKS_FETCH_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("ALLOW_STALE_JWKS") {
            self.auth.allow_stale_jwks = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = var("HISTORY_CAPACITY") {
            self.vault.history_capacity = parse_number("HISTORY_CAPACITY", &v)?;
        }
        if let Some(v) = var("STALE_AFTER_SECONDS") {
            self.vault.stale_after_seconds = parse_number("STALE_AFTER_SECONDS", &v)?;
        }
        if let Some(v) = var("EVICTION_INTERVAL_SECONDS") {
            self.vault.eviction_interval_seconds = parse_number("EVICTION_INTERVAL_SECONDS", &v)?;
        }

        Ok(())
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.jwks_url.is_none() {
            bail!("jwks_url is required");
        }
        if self.auth.issuer.trim().is_empty() {
            bail!("issuer is required");
        }
        if self.auth.audience.trim().is_empty() {
            bail!("audience is required");
        }
        if self.auth.jwks_fetch_timeout_ms == 0 {
            bail!("jwks_fetch_timeout_ms must be greater than zero");
        }
        if self.vault.history_capacity == 0 {
            bail!("history_capacity must be greater than zero");
        }
        if self.vault.stale_after_seconds == 0 {
            bail!("stale_after_seconds must be greater than zero");
        }
        if self.vault.eviction_interval_seconds == 0 {
            bail!("eviction_interval_seconds must be greater than zero");
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> anyhow::Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid {}{}: {}", ENV_PREFIX, name, value))
}

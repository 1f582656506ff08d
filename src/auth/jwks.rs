//! JWKS (JSON Web Key Set) caching module.
//!
//! Holds the most recent successfully fetched key set, refreshes it when the
//! TTL runs out, and forces one refetch when a token names a key id the
//! snapshot does not know (key rotation at the identity provider).

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::auth::source::{Jwk, JwksDocument, KeySource};

/// Default cache TTL in seconds (1 hour).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

/// Default bound on a single key-set fetch, in milliseconds.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 5000;

/// Maximum stale cache age in seconds (24 hours).
pub const MAX_STALE_CACHE_SECONDS: u64 = 86400;

/// Key id assigned to JWKs that carry none.
const DEFAULT_KID: &str = "default";

const RSA_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

/// A public key ready for signature verification.
#[derive(Clone)]
pub struct VerificationKey {
    /// Key material for jsonwebtoken.
    pub decoding_key: DecodingKey,
    /// Algorithms a token signed with this key may declare.
    pub algorithms: Vec<Algorithm>,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

/// One successful fetch of the key set.
struct KeySnapshot {
    keys: HashMap<String, VerificationKey>,
    fetched_at: Instant,
    generation: u64,
}

impl KeySnapshot {
    fn find(&self, kid: Option<&str>) -> Option<VerificationKey> {
        match kid {
            Some(k) => self.keys.get(k).cloned(),
            // Without a kid the choice is only unambiguous for a single-key set
            None if self.keys.len() == 1 => self.keys.values().next().cloned(),
            None => None,
        }
    }
}

/// Thread-safe JWKS cache with TTL refresh and single-flight refetches.
pub struct JwksCache {
    /// Where key sets come from.
    source: Arc<dyn KeySource>,
    /// Cache TTL.
    cache_ttl: Duration,
    /// Upper bound on one fetch.
    fetch_timeout: Duration,
    /// Whether to keep serving an expired snapshot when a TTL refresh fails.
    allow_stale: bool,
    /// Most recent successful snapshot.
    snapshot: RwLock<Option<Arc<KeySnapshot>>>,
    /// Held for the duration of a fetch so at most one is in flight.
    refresh_lock: Mutex<()>,
    /// Generation counter for snapshots.
    generations: AtomicU64,
}

impl JwksCache {
    /// Create a new JWKS cache over `source`.
    pub fn new(source: Arc<dyn KeySource>, cache_ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            source,
            cache_ttl,
            fetch_timeout,
            allow_stale: false,
            snapshot: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            generations: AtomicU64::new(0),
        }
    }

    /// Serve an expired snapshot (up to 24 hours old) when a TTL refresh fails.
    ///
    /// Forced refetches for unknown key ids never fall back.
    pub fn with_allow_stale(mut self, allow_stale: bool) -> Self {
        self.allow_stale = allow_stale;
        self
    }

    /// Get a verification key by key ID.
    ///
    /// Serves from the cached snapshot while it is fresh. If `kid` is not in
    /// the snapshot, the cache refetches exactly once before giving up with
    /// [`JwksCacheError::KeyNotFound`].
    pub async fn get_key(&self, kid: Option<&str>) -> Result<VerificationKey, JwksCacheError> {
        let snapshot = self.current().await?;
        if let Some(key) = snapshot.find(kid) {
            return Ok(key);
        }

        debug!(
            "Key {:?} not in JWKS snapshot {}, forcing refetch",
            kid, snapshot.generation
        );
        let snapshot = self.refresh(Some(snapshot.generation)).await?;
        snapshot
            .find(kid)
            .ok_or_else(|| JwksCacheError::KeyNotFound(kid.unwrap_or("<none>").to_string()))
    }

    /// Drop the cached snapshot so the next lookup fetches.
    pub async fn invalidate(&self) {
        let mut snapshot = self.snapshot.write().await;
        *snapshot = None;
    }

    /// Fetch the key set now, replacing the snapshot, and return the usable key ids.
    pub async fn refresh_now(&self) -> Result<Vec<String>, JwksCacheError> {
        let observed = self.snapshot.read().await.as_ref().map(|s| s.generation);
        let snapshot = self.refresh(observed).await?;
        let mut kids: Vec<String> = snapshot.keys.keys().cloned().collect();
        kids.sort();
        Ok(kids)
    }

    /// Check if the cache has any keys.
    pub async fn has_keys(&self) -> bool {
        self.key_count().await > 0
    }

    /// Get the number of cached keys.
    pub async fn key_count(&self) -> usize {
        self.snapshot
            .read()
            .await
            .as_ref()
            .map_or(0, |s| s.keys.len())
    }

    /// Return the snapshot if fresh, otherwise refresh it.
    async fn current(&self) -> Result<Arc<KeySnapshot>, JwksCacheError> {
        let stale = {
            let snapshot = self.snapshot.read().await;
            match snapshot.as_ref() {
                Some(s) if s.fetched_at.elapsed() < self.cache_ttl => return Ok(s.clone()),
                other => other.cloned(),
            }
        };

        match self.refresh(stale.as_ref().map(|s| s.generation)).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                if self.allow_stale
                    && let Some(s) = stale
                    && s.fetched_at.elapsed() < Duration::from_secs(MAX_STALE_CACHE_SECONDS)
                {
                    warn!("JWKS fetch failed, using stale cache: {}", e);
                    return Ok(s);
                }
                Err(e)
            }
        }
    }

    /// Replace the snapshot with a fresh fetch.
    ///
    /// `observed` is the generation the caller saw. If another caller already
    /// replaced it while this one waited for the lock, that result is reused.
    async fn refresh(&self, observed: Option<u64>) -> Result<Arc<KeySnapshot>, JwksCacheError> {
        let _in_flight = self.refresh_lock.lock().await;

        if let Some(s) = self.snapshot.read().await.as_ref()
            && Some(s.generation) != observed
        {
            debug!("Reusing JWKS snapshot {} fetched concurrently", s.generation);
            return Ok(s.clone());
        }

        let document = tokio::time::timeout(self.fetch_timeout, self.source.fetch())
            .await
            .map_err(|_| JwksCacheError::Timeout(self.fetch_timeout))??;

        let keys = Self::parse_document(document);
        if keys.is_empty() {
            return Err(JwksCacheError::NoValidKeys);
        }

        let snapshot = Arc::new(KeySnapshot {
            keys,
            fetched_at: Instant::now(),
            generation: self.generations.fetch_add(1, Ordering::SeqCst) + 1,
        });

        debug!(
            "Cached {} keys from {} (generation {})",
            snapshot.keys.len(),
            self.source.describe(),
            snapshot.generation
        );

        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    fn parse_document(document: JwksDocument) -> HashMap<String, VerificationKey> {
        let mut keys = HashMap::new();

        for jwk in document.keys {
            // Only process signature keys
            if jwk.key_use.as_deref() == Some("enc") {
                debug!("Skipping encryption key {:?}", jwk.kid);
                continue;
            }

            match Self::jwk_to_verification_key(&jwk) {
                Ok(key) => {
                    let kid = jwk.kid.clone().unwrap_or_else(|| DEFAULT_KID.to_string());
                    keys.insert(kid, key);
                }
                Err(e) => {
                    warn!("Failed to parse JWK {:?}: {}", jwk.kid, e);
                }
            }
        }

        keys
    }

    /// Convert a JWK to a jsonwebtoken DecodingKey plus its accepted algorithms.
    fn jwk_to_verification_key(jwk: &Jwk) -> Result<VerificationKey, JwksCacheError> {
        let (decoding_key, family): (DecodingKey, Vec<Algorithm>) = match jwk.kty.as_str() {
            "RSA" => {
                let n = required(&jwk.n, "n")?;
                let e = required(&jwk.e, "e")?;
                let key = DecodingKey::from_rsa_components(n, e).map_err(|e| {
                    JwksCacheError::ParseError(format!("Invalid RSA components: {}", e))
                })?;
                (key, RSA_ALGORITHMS.to_vec())
            }
            "EC" => {
                let algorithm = match jwk.crv.as_deref() {
                    Some("P-256") => Algorithm::ES256,
                    Some("P-384") => Algorithm::ES384,
                    other => {
                        return Err(JwksCacheError::ParseError(format!(
                            "Unsupported EC curve: {:?}",
                            other
                        )));
                    }
                };
                let x = required(&jwk.x, "x")?;
                let y = required(&jwk.y, "y")?;
                let key = DecodingKey::from_ec_components(x, y).map_err(|e| {
                    JwksCacheError::ParseError(format!("Invalid EC components: {}", e))
                })?;
                (key, vec![algorithm])
            }
            "OKP" => {
                if jwk.crv.as_deref() != Some("Ed25519") {
                    return Err(JwksCacheError::ParseError(format!(
                        "Unsupported OKP curve: {:?}",
                        jwk.crv
                    )));
                }
                let x = required(&jwk.x, "x")?;
                let key = DecodingKey::from_ed_components(x).map_err(|e| {
                    JwksCacheError::ParseError(format!("Invalid Ed25519 key: {}", e))
                })?;
                (key, vec![Algorithm::EdDSA])
            }
            other => {
                return Err(JwksCacheError::ParseError(format!(
                    "Unsupported key type: {}",
                    other
                )));
            }
        };

        // A pinned alg narrows the family, it cannot widen it
        let algorithms = match &jwk.alg {
            Some(alg) => {
                let pinned = Algorithm::from_str(alg).map_err(|_| {
                    JwksCacheError::ParseError(format!("Unknown algorithm: {}", alg))
                })?;
                if !family.contains(&pinned) {
                    return Err(JwksCacheError::ParseError(format!(
                        "Algorithm {} does not match key type {}",
                        alg, jwk.kty
                    )));
                }
                vec![pinned]
            }
            None => family,
        };

        Ok(VerificationKey {
            decoding_key,
            algorithms,
        })
    }
}

fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str, JwksCacheError> {
    field
        .as_deref()
        .ok_or_else(|| JwksCacheError::ParseError(format!("Missing '{}' in JWK", name)))
}

/// Errors that can occur when working with the JWKS cache.
#[derive(Debug, Clone)]
pub enum JwksCacheError {
    /// Failed to fetch JWKS from endpoint.
    FetchError(String),
    /// Failed to parse JWKS response.
    ParseError(String),
    /// The fetch did not complete in time.
    Timeout(Duration),
    /// No valid keys found in JWKS.
    NoValidKeys,
    /// Key with specified kid not found, even after a refetch.
    KeyNotFound(String),
}

impl std::fmt::Display for JwksCacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FetchError(msg) => write!(f, "Failed to fetch JWKS: {}", msg),
            Self::ParseError(msg) => write!(f, "Failed to parse JWKS: {}", msg),
            Self::Timeout(d) => write!(f, "JWKS fetch timed out after {:?}", d),
            Self::NoValidKeys => write!(f, "No valid keys found in JWKS"),
            Self::KeyNotFound(kid) => write!(f, "Key not found: {}", kid),
        }
    }
}

impl std::error::Error for JwksCacheError {}

//! Bearer token validation.

use std::fmt;
use std::sync::Arc;

use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{Validation, decode, decode_header};
use serde::Deserialize;
use tracing::debug;

use crate::auth::identity::VerifiedIdentity;
use crate::auth::jwks::{JwksCache, JwksCacheError};
use crate::auth::source::HttpKeySource;
use crate::config::AuthConfig;
use crate::types::{AuthorizedParty, Subject};

/// Authentication errors.
///
/// Every variant is terminal for the request. Only
/// [`AuthError::KeySourceUnavailable`] is worth retrying, the rest will fail
/// again with the same token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The token header could not be decoded
    MalformedToken(String),
    /// No key with the token's kid, even after a refetch
    UnknownKey(String),
    /// Signature verification failed
    BadSignature(String),
    /// exp, iss or aud did not check out
    ClaimRejected(String),
    /// The token carries no subject
    MissingSubject,
    /// The key set could not be fetched
    KeySourceUnavailable(String),
}

impl AuthError {
    /// Whether retrying later with the same token can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::KeySourceUnavailable(_))
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedToken(msg) => write!(f, "Malformed token: {}", msg),
            Self::UnknownKey(kid) => write!(f, "Unknown signing key: {}", kid),
            Self::BadSignature(msg) => write!(f, "Signature verification failed: {}", msg),
            Self::ClaimRejected(reason) => write!(f, "Claim rejected: {}", reason),
            Self::MissingSubject => write!(f, "Token has no subject"),
            Self::KeySourceUnavailable(msg) => write!(f, "Key source unavailable: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<JwksCacheError> for AuthError {
    fn from(err: JwksCacheError) -> Self {
        match err {
            JwksCacheError::KeyNotFound(kid) => Self::UnknownKey(kid),
            other => Self::KeySourceUnavailable(other.to_string()),
        }
    }
}

/// JWT claims read after signature verification.
#[derive(Debug, Deserialize)]
pub struct TokenClaims {
    /// Subject (caller ID)
    pub sub: Option<String>,
    /// Email
    pub email: Option<String>,
    /// Name
    pub name: Option<String>,
    /// Authorized party (client application)
    pub azp: Option<String>,
    /// Expiration time; a NumericDate may carry a fraction
    pub exp: Option<serde_json::Value>,
}

impl TokenClaims {
    /// `exp` as seconds since the epoch, if it is a number.
    pub fn expires_at(&self) -> Option<f64> {
        self.exp.as_ref().and_then(serde_json::Value::as_f64)
    }
}

/// Stateless validator: a pure function of the token, the cached keys and
/// the configured issuer and audience.
pub struct TokenValidator {
    issuer: String,
    audience: String,
    jwks: Arc<JwksCache>,
}

impl TokenValidator {
    /// Create a validator over an existing key cache.
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>, jwks: Arc<JwksCache>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            jwks,
        }
    }

    /// Build the validator and its HTTP-backed key cache from configuration.
    pub fn from_config(config: &AuthConfig) -> anyhow::Result<Self> {
        let jwks_url = config
            .jwks_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("jwks_url is not configured"))?;

        let source = HttpKeySource::new(jwks_url, config.fetch_timeout())?;
        let cache = JwksCache::new(Arc::new(source), config.cache_ttl(), config.fetch_timeout())
            .with_allow_stale(config.allow_stale_jwks);

        Ok(Self::new(
            config.issuer.clone(),
            config.audience.clone(),
            Arc::new(cache),
        ))
    }

    /// Get the key cache.
    pub fn jwks(&self) -> &Arc<JwksCache> {
        &self.jwks
    }

    /// Validate a bearer token and extract the caller identity.
    pub async fn validate(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        // Parse the JWT header to get the key ID (kid)
        let header = decode_header(token)
            .map_err(|e| AuthError::MalformedToken(format!("Invalid JWT header: {}", e)))?;

        let key = self.jwks.get_key(header.kid.as_deref()).await?;

        if !key.algorithms.contains(&header.alg) {
            return Err(AuthError::BadSignature(format!(
                "algorithm {:?} not accepted for key {}",
                header.alg,
                header.kid.as_deref().unwrap_or("<none>")
            )));
        }

        // exp is checked below: jsonwebtoken only reads integer exp and accepts exp == now
        let mut validation = Validation::new(header.alg);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["iss", "aud"]);

        let claims = decode::<TokenClaims>(token, &key.decoding_key, &validation)
            .map_err(classify_decode_error)?
            .claims;

        let expires_at = match (&claims.exp, claims.expires_at()) {
            (None, _) => {
                return Err(AuthError::ClaimRejected(
                    "missing required claim: exp".to_string(),
                ));
            }
            (Some(_), None) => {
                return Err(AuthError::ClaimRejected("exp is not a NumericDate".to_string()));
            }
            (Some(_), Some(exp)) => exp,
        };
        if expires_at <= now_seconds() {
            return Err(AuthError::ClaimRejected("token expired".to_string()));
        }

        let subject = claims
            .sub
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingSubject)?;

        debug!("JWT verified successfully for subject: {}", subject);

        Ok(VerifiedIdentity::new(
            Subject::new(subject),
            claims.email,
            claims.name,
            claims
                .azp
                .map(AuthorizedParty::new)
                .unwrap_or_else(AuthorizedParty::unknown),
        ))
    }
}

fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn classify_decode_error(err: JwtError) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::ClaimRejected("token expired".to_string()),
        ErrorKind::ImmatureSignature => AuthError::ClaimRejected("token not yet valid".to_string()),
        ErrorKind::InvalidIssuer => AuthError::ClaimRejected("issuer mismatch".to_string()),
        ErrorKind::InvalidAudience => AuthError::ClaimRejected("audience mismatch".to_string()),
        ErrorKind::MissingRequiredClaim(claim) => {
            AuthError::ClaimRejected(format!("missing required claim: {}", claim))
        }
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
            AuthError::MalformedToken(err.to_string())
        }
        _ => AuthError::BadSignature(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_valid_token_yields_identity() {
        let validator = validator_over(default_source());
        let identity = validator.validate(&token_for("u1")).await.unwrap();

        assert_eq!(identity.subject().as_str(), "u1");
        assert_eq!(identity.email(), Some("u1@example.com"));
        assert_eq!(identity.display_name(), Some("Test User"));
        assert_eq!(identity.authorized_party().as_str(), "appA");
    }

    #[tokio::test]
    async fn test_rsa_token_accepted() {
        let validator = validator_over(default_source());
        let identity = validator
            .validate(&sign_rsa("r1", &valid_claims("rsa-user")))
            .await
            .unwrap();
        assert_eq!(identity.subject().as_str(), "rsa-user");
    }

    #[tokio::test]
    async fn test_missing_azp_defaults_to_unknown() {
        let mut claims = valid_claims("u1");
        claims.as_object_mut().unwrap().remove("azp");
        let validator = validator_over(default_source());

        let identity = validator
            .validate(&sign_ed(Some("k1"), &claims, ED_PRIVATE_PEM))
            .await
            .unwrap();
        assert!(identity.authorized_party().is_unknown());
    }

    #[tokio::test]
    async fn test_forged_signature_rejected_regardless_of_claims() {
        let validator = validator_over(default_source());

        let forged = sign_ed(Some("k1"), &valid_claims("u1"), ROGUE_ED_PRIVATE_PEM);
        assert!(matches!(
            validator.validate(&forged).await,
            Err(AuthError::BadSignature(_))
        ));

        // Expired claims do not mask the signature failure
        let mut claims = valid_claims("u1");
        claims["exp"] = json!(now_secs() - 3600);
        let forged = sign_ed(Some("k1"), &claims, ROGUE_ED_PRIVATE_PEM);
        assert!(matches!(
            validator.validate(&forged).await,
            Err(AuthError::BadSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_algorithm_not_matching_key_rejected() {
        let validator = validator_over(default_source());
        // RS256 header naming the Ed25519 key
        let token = sign_rsa("k1", &valid_claims("u1"));
        assert!(matches!(
            validator.validate(&token).await,
            Err(AuthError::BadSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let mut claims = valid_claims("u1");
        claims["exp"] = json!(now_secs() - 3600);
        let validator = validator_over(default_source());

        let err = validator
            .validate(&sign_ed(Some("k1"), &claims, ED_PRIVATE_PEM))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ClaimRejected(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_exp_equal_to_now_rejected() {
        let mut claims = valid_claims("u1");
        claims["exp"] = json!(now_secs());
        let validator = validator_over(default_source());

        let err = validator
            .validate(&sign_ed(Some("k1"), &claims, ED_PRIVATE_PEM))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ClaimRejected(_)));
    }

    #[tokio::test]
    async fn test_wrong_issuer_and_audience_rejected() {
        let validator = validator_over(default_source());

        let mut claims = valid_claims("u1");
        claims["iss"] = json!("https://evil.example.test");
        let err = validator
            .validate(&sign_ed(Some("k1"), &claims, ED_PRIVATE_PEM))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::ClaimRejected("issuer mismatch".to_string()));

        let mut claims = valid_claims("u1");
        claims["aud"] = json!(["other-service"]);
        let err = validator
            .validate(&sign_ed(Some("k1"), &claims, ED_PRIVATE_PEM))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::ClaimRejected("audience mismatch".to_string()));
    }

    #[tokio::test]
    async fn test_audience_list_containing_service_accepted() {
        let mut claims = valid_claims("u1");
        claims["aud"] = json!(["account", AUDIENCE]);
        let validator = validator_over(default_source());
        assert!(
            validator
                .validate(&sign_ed(Some("k1"), &claims, ED_PRIVATE_PEM))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_missing_exp_rejected() {
        let mut claims = valid_claims("u1");
        claims.as_object_mut().unwrap().remove("exp");
        let validator = validator_over(default_source());

        let err = validator
            .validate(&sign_ed(Some("k1"), &claims, ED_PRIVATE_PEM))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AuthError::ClaimRejected("missing required claim: exp".to_string())
        );
    }

    #[tokio::test]
    async fn test_fractional_exp_is_a_valid_date() {
        let validator = validator_over(default_source());

        let mut claims = valid_claims("u1");
        claims["exp"] = json!(now_secs() as f64 + 3600.5);
        let identity = validator
            .validate(&sign_ed(Some("k1"), &claims, ED_PRIVATE_PEM))
            .await
            .unwrap();
        assert_eq!(identity.subject().as_str(), "u1");

        claims["exp"] = json!(now_secs() as f64 - 0.5);
        let err = validator
            .validate(&sign_ed(Some("k1"), &claims, ED_PRIVATE_PEM))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::ClaimRejected("token expired".to_string()));
    }

    #[tokio::test]
    async fn test_non_numeric_exp_rejected_as_claim() {
        let mut claims = valid_claims("u1");
        claims["exp"] = json!("tomorrow");
        let validator = validator_over(default_source());

        let err = validator
            .validate(&sign_ed(Some("k1"), &claims, ED_PRIVATE_PEM))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ClaimRejected(_)));
    }

    #[tokio::test]
    async fn test_missing_subject_rejected() {
        let mut claims = valid_claims("u1");
        claims.as_object_mut().unwrap().remove("sub");
        let validator = validator_over(default_source());

        let err = validator
            .validate(&sign_ed(Some("k1"), &claims, ED_PRIVATE_PEM))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::MissingSubject);
    }

    #[tokio::test]
    async fn test_unknown_kid_refetches_once_then_rejects() {
        let source = default_source();
        let validator = validator_over(source.clone());
        validator.validate(&token_for("u1")).await.unwrap();

        let token = sign_ed(Some("retired"), &valid_claims("u1"), ED_PRIVATE_PEM);
        let err = validator.validate(&token).await.unwrap_err();
        assert_eq!(err, AuthError::UnknownKey("retired".to_string()));
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_key_rotation_accepted_after_refetch() {
        let source = default_source();
        let validator = validator_over(source.clone());
        validator.validate(&token_for("u1")).await.unwrap();

        source.set_keys(vec![ed_jwk("k2", ROGUE_ED_PUBLIC_X)]);
        let token = sign_ed(Some("k2"), &valid_claims("u1"), ROGUE_ED_PRIVATE_PEM);
        assert!(validator.validate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_key_source_down_is_distinct_and_retryable() {
        let source = default_source();
        source.set_failing(true);
        let validator = validator_over(source);

        let err = validator.validate(&token_for("u1")).await.unwrap_err();
        assert!(matches!(err, AuthError::KeySourceUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_failed_refetch_for_unknown_kid_is_unavailable() {
        let source = default_source();
        let validator = validator_over(source.clone());
        validator.validate(&token_for("u1")).await.unwrap();

        source.set_failing(true);
        let token = sign_ed(Some("k2"), &valid_claims("u1"), ROGUE_ED_PRIVATE_PEM);
        let err = validator.validate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::KeySourceUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_garbage_token_is_malformed() {
        let validator = validator_over(default_source());
        let err = validator.validate("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }

    #[test]
    fn test_auth_error_display() {
        assert_eq!(AuthError::MissingSubject.to_string(), "Token has no subject");
        assert_eq!(
            AuthError::UnknownKey("k9".to_string()).to_string(),
            "Unknown signing key: k9"
        );
        assert_eq!(
            AuthError::from(JwksCacheError::NoValidKeys),
            AuthError::KeySourceUnavailable("No valid keys found in JWKS".to_string())
        );
    }

    #[test]
    fn test_token_claims_deserialization() {
        let json = r#"{
            "sub": "user123",
            "email": "user@example.com",
            "name": "Test User",
            "azp": "appA",
            "exp": 1735689600
        }"#;

        let claims: TokenClaims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("user123"));
        assert_eq!(claims.azp.as_deref(), Some("appA"));
        assert_eq!(claims.expires_at(), Some(1735689600.0));
    }
}

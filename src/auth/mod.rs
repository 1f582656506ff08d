//! Bearer token authentication.
//!
//! Turns a bearer token into a [`VerifiedIdentity`] without any server-side
//! session or database lookup:
//!
//! - The token header names the signing key (`kid`)
//! - The key comes from a cached copy of the identity provider's JWKS
//! - Signature, `exp`, `iss` and `aud` are checked before any claim is trusted
//!
//! ## Usage
//!
//! ```ignore
//! let validator = TokenValidator::from_config(&config.auth)?;
//! let identity = validator.validate(token).await?;
//! vault.get(identity.subject(), identity.authorized_party()).await;
//! ```

mod identity;
pub mod jwks;
pub mod source;
mod validator;

#[cfg(test)]
pub(crate) mod test_support;

pub use identity::VerifiedIdentity;
pub use jwks::{DEFAULT_CACHE_TTL_SECONDS, DEFAULT_FETCH_TIMEOUT_MS, JwksCache, JwksCacheError};
pub use source::{HttpKeySource, Jwk, JwksDocument, KeySource};
pub use validator::{AuthError, TokenClaims, TokenValidator};

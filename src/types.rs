//! NewType wrappers for the identifiers that flow between the validator and the vault.
//!
//! These keep a subject from being passed where a patient id is expected, and
//! make it obvious at call sites which strings came out of a verified token.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Stable caller identity taken from the `sub` claim of a verified token.
    ///
    /// This is the only key the vault isolates state by. It must never be
    /// built from request payload fields.
    Subject
);

newtype_string!(
    /// Application-defined patient identifier. Opaque to the service.
    PatientId
);

newtype_string!(
    /// Identifier of the calling application, from the `azp` claim.
    ///
    /// Recorded as `set_by` on contexts and as the actor on history entries.
    AuthorizedParty
);

/// Sentinel recorded when a token carries no `azp` claim.
pub const UNKNOWN_AUTHORIZED_PARTY: &str = "unknown";

impl AuthorizedParty {
    /// The sentinel party used when the token names no client application.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_AUTHORIZED_PARTY)
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_AUTHORIZED_PARTY
    }
}

//! Verified caller identity for request-scoped isolation.

use crate::types::{AuthorizedParty, Subject};
use serde::Serialize;

/// Identity extracted from a bearer token whose signature and claims checked out.
///
/// This struct is passed from the HTTP layer to the vault and is the only
/// source of the subject and actor used there. It is immutable once created
/// and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedIdentity {
    /// Immutable caller identifier (`sub` claim)
    subject: Subject,
    /// Optional email for display
    email: Option<String>,
    /// Optional display name (`name` claim)
    display_name: Option<String>,
    /// Calling application (`azp` claim, "unknown" when absent)
    authorized_party: AuthorizedParty,
}

impl VerifiedIdentity {
    /// Create a new verified identity.
    pub fn new(
        subject: Subject,
        email: Option<String>,
        display_name: Option<String>,
        authorized_party: AuthorizedParty,
    ) -> Self {
        Self {
            subject,
            email,
            display_name,
            authorized_party,
        }
    }

    /// Get the subject used as the isolation key.
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Get the email if available.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Get the display name if available.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Get the attested calling application.
    pub fn authorized_party(&self) -> &AuthorizedParty {
        &self.authorized_party
    }

    /// Get a display-friendly name for this caller.
    pub fn display(&self) -> String {
        if let Some(name) = &self.display_name {
            name.clone()
        } else if let Some(email) = &self.email {
            email.clone()
        } else {
            self.subject.to_string()
        }
    }
}

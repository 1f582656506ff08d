//! Error types for vault operations.

use std::fmt;

/// Errors returned by vault writes. Lookups that find nothing return `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// The patient id was empty or whitespace.
    InvalidPatientId,
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPatientId => write!(f, "patientId must not be empty"),
        }
    }
}

impl std::error::Error for VaultError {}

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

// Core modules
pub mod api;
pub mod auth;
mod config;
mod types;
pub mod vault;

// Re-export key types and functions
pub use auth::{AuthError, TokenValidator, VerifiedIdentity};
pub use config::{AuthConfig, ServiceConfig, VaultConfig};
pub use types::{AuthorizedParty, PatientId, Subject, UNKNOWN_AUTHORIZED_PARTY};
pub use vault::{ContextStore, ContextVault, HistoryQuery, PatientContext, spawn_eviction_task};

use std::sync::Arc;

use anyhow::Result;
use axum::Router;

/// Build the validator, the vault and the HTTP router from one configuration.
///
/// The returned vault is the same instance the router serves, so callers can
/// hand it to [`spawn_eviction_task`].
pub fn create_app(config: &ServiceConfig) -> Result<(Router, ContextVault)> {
    config.validate()?;

    let validator = Arc::new(TokenValidator::from_config(&config.auth)?);
    let vault = ContextVault::new(config.vault.history_capacity);
    let state = api::AppState::new(validator, Arc::new(vault.clone()));

    Ok((api::create_router(state), vault))
}

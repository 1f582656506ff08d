//! Records held by the vault.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AuthorizedParty, PatientId, Subject};

/// The active patient for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientContext {
    pub subject: Subject,
    pub email: Option<String>,
    pub patient_id: PatientId,
    /// Application that set the context (`azp` of the setting request)
    pub set_by: AuthorizedParty,
    pub set_at: DateTime<Utc>,
    /// Refreshed on every successful read or write
    pub last_accessed_at: DateTime<Utc>,
}

/// What happened to a subject's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Set,
    Clear,
    Access,
}

/// Immutable record of one state transition or read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Position in the vault's total order of recorded events
    pub sequence: u64,
    pub action: HistoryAction,
    pub subject: Subject,
    pub email: Option<String>,
    /// None for clear
    pub patient_id: Option<PatientId>,
    pub actor: AuthorizedParty,
    pub timestamp: DateTime<Utc>,
}

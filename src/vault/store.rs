//! In-memory context vault.
//!
//! One coarse mutex guards the context map and both history logs, so every
//! operation observes and leaves a consistent state. Nothing under the lock
//! awaits anything but the lock itself.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::types::{AuthorizedParty, PatientId, Subject};
use crate::vault::clock::{Clock, SystemClock};
use crate::vault::error::{VaultError, VaultResult};
use crate::vault::history::HistoryLog;
use crate::vault::model::{HistoryAction, HistoryEntry, PatientContext};

/// Future returned by [`ContextStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Contract a context backend must honor to stand in for the vault.
///
/// Every `subject` and `actor` must come from a verified identity.
pub trait ContextStore: Send + Sync {
    fn get<'a>(
        &'a self,
        subject: &'a Subject,
        actor: &'a AuthorizedParty,
    ) -> StoreFuture<'a, Option<PatientContext>>;

    fn set<'a>(
        &'a self,
        subject: &'a Subject,
        email: Option<&'a str>,
        patient_id: &'a str,
        set_by: &'a AuthorizedParty,
    ) -> StoreFuture<'a, VaultResult<PatientContext>>;

    fn clear<'a>(&'a self, subject: &'a Subject, actor: &'a AuthorizedParty) -> StoreFuture<'a, bool>;

    fn list_all(&self) -> StoreFuture<'_, Vec<PatientContext>>;

    fn history(&self, query: HistoryQuery) -> StoreFuture<'_, Vec<HistoryEntry>>;
}

/// Selection over the history logs. Results are always newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Restrict to one subject
    pub subject: Option<Subject>,
    /// Cap on returned entries; defaults to the log capacity
    pub limit: Option<usize>,
    /// Merge in read (`access`) entries
    pub include_access: bool,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            subject: None,
            limit: None,
            include_access: true,
        }
    }
}

impl HistoryQuery {
    /// Everything retained, for all subjects.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_subject(subject: Subject) -> Self {
        Self {
            subject: Some(subject),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Only set and clear entries.
    pub fn without_access(mut self) -> Self {
        self.include_access = false;
        self
    }
}

struct VaultState {
    contexts: HashMap<Subject, PatientContext>,
    /// set and clear entries
    changes: HistoryLog,
    /// access entries, kept apart so reads cannot push changes out
    accesses: HistoryLog,
    next_sequence: u64,
}

impl VaultState {
    fn record(
        &mut self,
        action: HistoryAction,
        subject: &Subject,
        email: Option<String>,
        patient_id: Option<PatientId>,
        actor: &AuthorizedParty,
        timestamp: DateTime<Utc>,
    ) {
        let entry = HistoryEntry {
            sequence: self.next_sequence,
            action,
            subject: subject.clone(),
            email,
            patient_id,
            actor: actor.clone(),
            timestamp,
        };
        self.next_sequence += 1;

        match action {
            HistoryAction::Access => self.accesses.push(entry),
            HistoryAction::Set | HistoryAction::Clear => self.changes.push(entry),
        }
    }
}

/// Concurrent per-subject store of the active patient, with bounded history.
#[derive(Clone)]
pub struct ContextVault {
    state: Arc<Mutex<VaultState>>,
    clock: Arc<dyn Clock>,
    history_capacity: usize,
}

impl ContextVault {
    /// Create a vault on the wall clock.
    pub fn new(history_capacity: usize) -> Self {
        Self::with_clock(history_capacity, Arc::new(SystemClock))
    }

    /// Create a vault reading time from `clock`.
    pub fn with_clock(history_capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let changes = HistoryLog::new(history_capacity);
        let history_capacity = changes.capacity();
        Self {
            state: Arc::new(Mutex::new(VaultState {
                contexts: HashMap::new(),
                accesses: HistoryLog::new(history_capacity),
                changes,
                next_sequence: 0,
            })),
            clock,
            history_capacity,
        }
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    /// Current context for `subject`, refreshing its access time.
    ///
    /// `None` is the normal answer for a subject that never set a context.
    pub async fn get(&self, subject: &Subject, actor: &AuthorizedParty) -> Option<PatientContext> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let context = {
            let context = state.contexts.get_mut(subject)?;
            context.last_accessed_at = now;
            context.clone()
        };

        state.record(
            HistoryAction::Access,
            subject,
            context.email.clone(),
            Some(context.patient_id.clone()),
            actor,
            now,
        );

        Some(context)
    }

    /// Replace the context for `subject`. Last writer wins.
    pub async fn set(
        &self,
        subject: &Subject,
        email: Option<&str>,
        patient_id: &str,
        set_by: &AuthorizedParty,
    ) -> VaultResult<PatientContext> {
        if patient_id.trim().is_empty() {
            return Err(VaultError::InvalidPatientId);
        }

        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let context = PatientContext {
            subject: subject.clone(),
            email: email.map(str::to_string),
            patient_id: PatientId::new(patient_id),
            set_by: set_by.clone(),
            set_at: now,
            last_accessed_at: now,
        };
        state.contexts.insert(subject.clone(), context.clone());
        state.record(
            HistoryAction::Set,
            subject,
            context.email.clone(),
            Some(context.patient_id.clone()),
            set_by,
            now,
        );

        debug!("Context for {} set to {} by {}", subject, context.patient_id, set_by);
        Ok(context)
    }

    /// Remove the context for `subject`. Returns whether one existed.
    ///
    /// A clear entry is recorded either way.
    pub async fn clear(&self, subject: &Subject, actor: &AuthorizedParty) -> bool {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let removed = state.contexts.remove(subject);
        let existed = removed.is_some();
        state.record(
            HistoryAction::Clear,
            subject,
            removed.and_then(|c| c.email),
            None,
            actor,
            now,
        );

        debug!("Context for {} cleared by {} (existed: {})", subject, actor, existed);
        existed
    }

    /// Snapshot of every current context, most recently set first.
    pub async fn list_all(&self) -> Vec<PatientContext> {
        let mut contexts: Vec<PatientContext> = {
            let state = self.state.lock().await;
            state.contexts.values().cloned().collect()
        };
        contexts.sort_by(|a, b| {
            b.set_at
                .cmp(&a.set_at)
                .then_with(|| a.subject.cmp(&b.subject))
        });
        contexts
    }

    /// Retained history, newest first.
    pub async fn history(&self, query: HistoryQuery) -> Vec<HistoryEntry> {
        let limit = query.limit.unwrap_or(self.history_capacity);
        let subject = query.subject.as_ref();
        let state = self.state.lock().await;

        if !query.include_access {
            return state.changes.recent(subject).take(limit).cloned().collect();
        }

        // Both logs are newest first; merge by sequence
        let mut changes = state.changes.recent(subject).peekable();
        let mut accesses = state.accesses.recent(subject).peekable();
        let mut merged = Vec::with_capacity(limit.min(state.changes.len() + state.accesses.len()));
        while merged.len() < limit {
            let take_change = match (changes.peek(), accesses.peek()) {
                (Some(c), Some(a)) => c.sequence > a.sequence,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_change {
                changes.next()
            } else {
                accesses.next()
            };
            if let Some(entry) = next {
                merged.push(entry.clone());
            }
        }
        merged
    }

    /// Drop every context not touched within `threshold`. Returns how many went.
    ///
    /// Eviction is maintenance, so it records no history.
    pub async fn evict_stale(&self, threshold: Duration) -> usize {
        let Ok(threshold) = chrono::Duration::from_std(threshold) else {
            return 0;
        };
        let mut state = self.state.lock().await;
        let Some(cutoff) = self.clock.now().checked_sub_signed(threshold) else {
            return 0;
        };
        let before = state.contexts.len();
        state.contexts.retain(|_, c| c.last_accessed_at >= cutoff);
        before - state.contexts.len()
    }

    /// Number of subjects with a context.
    pub async fn len(&self) -> usize {
        self.state.lock().await.contexts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl ContextStore for ContextVault {
    fn get<'a>(
        &'a self,
        subject: &'a Subject,
        actor: &'a AuthorizedParty,
    ) -> StoreFuture<'a, Option<PatientContext>> {
        Box::pin(ContextVault::get(self, subject, actor))
    }

    fn set<'a>(
        &'a self,
        subject: &'a Subject,
        email: Option<&'a str>,
        patient_id: &'a str,
        set_by: &'a AuthorizedParty,
    ) -> StoreFuture<'a, VaultResult<PatientContext>> {
        Box::pin(ContextVault::set(self, subject, email, patient_id, set_by))
    }

    fn clear<'a>(&'a self, subject: &'a Subject, actor: &'a AuthorizedParty) -> StoreFuture<'a, bool> {
        Box::pin(ContextVault::clear(self, subject, actor))
    }

    fn list_all(&self) -> StoreFuture<'_, Vec<PatientContext>> {
        Box::pin(ContextVault::list_all(self))
    }

    fn history(&self, query: HistoryQuery) -> StoreFuture<'_, Vec<HistoryEntry>> {
        Box::pin(ContextVault::history(self, query))
    }
}

//! Per-subject patient context storage.
//!
//! The vault maps each verified subject to the patient currently active for
//! that user, keeps a bounded history of changes and reads, and drops
//! contexts nobody has touched for longer than the staleness threshold.
//! All state is in memory and lost on restart.

mod clock;
mod error;
mod eviction;
mod history;
mod model;
mod store;

pub use clock::{Clock, SystemClock};
pub use error::{VaultError, VaultResult};
pub use eviction::spawn_eviction_task;
pub use history::{DEFAULT_HISTORY_CAPACITY, HistoryLog};
pub use model::{HistoryAction, HistoryEntry, PatientContext};
pub use store::{ContextStore, ContextVault, HistoryQuery, StoreFuture};

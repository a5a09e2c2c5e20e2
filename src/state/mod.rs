//! State management module for the Strata orchestrator.
//!
//! This module provides persistent storage of the last applied state of
//! each deployment unit, keyed by region and unit id.

mod store;
mod local;
mod s3;
mod memory;
mod lock;
mod snapshot;
mod types;

pub use store::{StateStore, take_snapshot};
pub use local::{LocalStateStore, STATE_DIR};
pub use s3::S3StateStore;
pub use memory::MemoryStateStore;
pub use lock::{LockInfo, LOCK_EXPIRY_SECS, generate_holder_id};
pub use snapshot::StateSnapshot;
pub use types::{
    AppliedState, HistoryEntry, MAX_HISTORY, ProviderHandle, STATE_VERSION, StateOperation,
    UnitKey,
};

#[cfg(test)]
pub use store::MockStateStore;

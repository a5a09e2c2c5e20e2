//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.

use async_trait::async_trait;

use crate::error::Result;
use super::lock::LockInfo;
use super::snapshot::StateSnapshot;
use super::types::{AppliedState, UnitKey};

/// Trait for state storage backends.
///
/// Records are keyed by `(region, unit id)`. Writes to one key are
/// serialized by the backend; writes to different keys may run concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the applied state of a unit.
    ///
    /// Returns `None` if the unit was never applied.
    async fn load(&self, key: &UnitKey) -> Result<Option<AppliedState>>;

    /// Saves the applied state of a unit, replacing any previous record.
    async fn save(&self, key: &UnitKey, state: &AppliedState) -> Result<()>;

    /// Deletes the record of a unit. Deleting a missing record succeeds.
    async fn delete(&self, key: &UnitKey) -> Result<()>;

    /// Lists every stored record.
    async fn list(&self) -> Result<Vec<AppliedState>>;

    /// Acquires the run lock.
    ///
    /// Returns lock information if successful.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the run lock.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked.
    async fn is_locked(&self) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

/// Reads every record into a point-in-time snapshot.
///
/// # Errors
///
/// Returns an error if the backend cannot be listed.
pub async fn take_snapshot(store: &dyn StateStore) -> Result<StateSnapshot> {
    let records = store.list().await?;
    Ok(StateSnapshot::from_records(records))
}

//! In-memory state storage backend.
//!
//! Used by tests and by dry runs, which start from a copy of the real
//! state and must never write back to it.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::{Result, StateError, StrataError};

use super::lock::{resolve_holder, LockInfo};
use super::snapshot::StateSnapshot;
use super::store::StateStore;
use super::types::{AppliedState, UnitKey};

/// In-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: RwLock<BTreeMap<UnitKey, AppliedState>>,
    lock: Mutex<Option<LockInfo>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with the records of a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Self {
        let records = snapshot.records().map(|r| (r.key(), r.clone())).collect();
        Self {
            records: RwLock::new(records),
            lock: Mutex::new(None),
        }
    }

    /// Returns the number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true if no records are stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, key: &UnitKey) -> Result<Option<AppliedState>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn save(&self, key: &UnitKey, state: &AppliedState) -> Result<()> {
        debug!("Saving in-memory state for {key}");
        self.records.write().await.insert(key.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, key: &UnitKey) -> Result<()> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<AppliedState>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let mut lock = self.lock.lock().await;
        if let Some(existing) = lock.as_ref().filter(|l| !l.is_expired()) {
            return Err(StrataError::State(StateError::LockedByOther {
                holder: existing.holder.clone(),
                since: existing.acquired_at.to_rfc3339(),
            }));
        }

        let info = LockInfo::new(&resolve_holder(holder));
        *lock = Some(info.clone());
        Ok(info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let mut lock = self.lock.lock().await;
        if lock.as_ref().is_some_and(|l| l.lock_id == lock_id) {
            *lock = None;
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.lock.lock().await.clone())
    }

    async fn is_locked(&self) -> Result<bool> {
        Ok(self.lock.lock().await.as_ref().is_some_and(|l| !l.is_expired()))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_snapshot_is_detached() {
        let key = UnitKey::new("us-west-1", "eks");
        let snapshot =
            StateSnapshot::from_records([AppliedState::new(&key, "1", "h", Vec::new())]);

        let store = MemoryStateStore::from_snapshot(&snapshot);
        store.delete(&key).await.unwrap();

        assert!(store.is_empty().await);
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_lock_roundtrip() {
        let store = MemoryStateStore::new();
        let lock = store.acquire_lock("a").await.unwrap();
        assert!(store.acquire_lock("b").await.is_err());

        store.release_lock("other").await.unwrap();
        assert!(store.is_locked().await.unwrap());

        store.release_lock(&lock.lock_id).await.unwrap();
        assert!(!store.is_locked().await.unwrap());
        assert_eq!(store.len().await, 0);
    }
}

//! Local file-based state storage backend.
//!
//! Each unit is stored as `<base>/units/<region>/<unit>.json`. Records are
//! written to a temporary file and renamed into place, so a crash never
//! leaves a half-written record behind.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StateError, StrataError};

use super::lock::{resolve_holder, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::{AppliedState, UnitKey, STATE_VERSION};

/// Default state directory name.
pub const STATE_DIR: &str = ".strata";

/// Directory holding unit records.
const UNITS_DIR: &str = "units";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
    /// Per-unit write locks.
    writers: Mutex<HashMap<UnitKey, Arc<Mutex<()>>>>,
}

impl LocalStateStore {
    /// Creates a new local state store under `.strata` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| StrataError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local state store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            lock_path,
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the path of a unit record.
    fn record_path(&self, key: &UnitKey) -> PathBuf {
        self.base_dir
            .join(UNITS_DIR)
            .join(&key.region)
            .join(format!("{}.json", key.unit_id))
    }

    /// Returns the write lock of a unit, creating it on first use.
    async fn writer(&self, key: &UnitKey) -> Arc<Mutex<()>> {
        let mut writers = self.writers.lock().await;
        Arc::clone(writers.entry(key.clone()).or_default())
    }

    /// Ensures a directory exists.
    async fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            debug!("Creating state directory: {}", dir.display());
            fs::create_dir_all(dir).await.map_err(|e| {
                StrataError::State(StateError::unavailable(format!(
                    "Failed to create state directory: {e}"
                )))
            })?;
        }
        Ok(())
    }

    /// Reads and parses a unit record.
    async fn read_record(path: &Path) -> Result<AppliedState> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            StrataError::State(StateError::unavailable(format!(
                "Failed to read {}: {e}",
                path.display()
            )))
        })?;

        let record: AppliedState = serde_json::from_str(&content).map_err(|e| {
            StrataError::State(StateError::corrupted(format!(
                "Failed to parse {}: {e}",
                path.display()
            )))
        })?;

        if record.version != STATE_VERSION {
            return Err(StrataError::State(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: record.version,
            }));
        }

        Ok(record)
    }

    /// Writes content to a temporary file and renames it into place.
    async fn write_atomic(path: &Path, content: &str) -> Result<()> {
        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            StrataError::State(StateError::unavailable(format!(
                "Failed to create temp state file: {e}"
            )))
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            StrataError::State(StateError::unavailable(format!(
                "Failed to write state file: {e}"
            )))
        })?;

        file.sync_all().await.map_err(|e| {
            StrataError::State(StateError::unavailable(format!(
                "Failed to sync state file: {e}"
            )))
        })?;

        fs::rename(&temp_path, path).await.map_err(|e| {
            StrataError::State(StateError::unavailable(format!(
                "Failed to rename state file: {e}"
            )))
        })?;

        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| {
            StrataError::State(StateError::corrupted(format!("Failed to read lock file: {e}")))
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            StrataError::State(StateError::corrupted(format!("Failed to parse lock file: {e}")))
        })?;

        Ok(Some(lock_info))
    }

    /// Creates the lock file, failing if it already exists.
    ///
    /// Returns false when another holder created it first.
    async fn create_lock_file(&self, lock_info: &LockInfo) -> Result<bool> {
        Self::ensure_dir(&self.base_dir).await?;

        let content = serde_json::to_string_pretty(lock_info).map_err(|e| {
            StrataError::State(StateError::serialization(format!("Failed to serialize lock: {e}")))
        })?;

        let lock_failed = |e: std::io::Error| {
            StrataError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        };

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(lock_failed(e)),
        };

        file.write_all(content.as_bytes()).await.map_err(lock_failed)?;
        file.sync_all().await.map_err(lock_failed)?;
        Ok(true)
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).await.map_err(|e| {
                StrataError::State(StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self, key: &UnitKey) -> Result<Option<AppliedState>> {
        let path = self.record_path(key);
        if !path.exists() {
            debug!("No state record for {key}");
            return Ok(None);
        }

        Self::read_record(&path).await.map(Some)
    }

    async fn save(&self, key: &UnitKey, state: &AppliedState) -> Result<()> {
        let writer = self.writer(key).await;
        let _guard = writer.lock().await;

        let path = self.record_path(key);
        if let Some(dir) = path.parent() {
            Self::ensure_dir(dir).await?;
        }

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            StrataError::State(StateError::serialization(format!(
                "Failed to serialize state: {e}"
            )))
        })?;

        Self::write_atomic(&path, &content).await?;

        debug!("Saved state for {key} to {}", path.display());
        Ok(())
    }

    async fn delete(&self, key: &UnitKey) -> Result<()> {
        let writer = self.writer(key).await;
        let _guard = writer.lock().await;

        let path = self.record_path(key);
        if path.exists() {
            info!("Deleting state record: {}", path.display());
            fs::remove_file(&path).await.map_err(|e| {
                StrataError::State(StateError::unavailable(format!(
                    "Failed to delete state file: {e}"
                )))
            })?;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<AppliedState>> {
        let units_dir = self.base_dir.join(UNITS_DIR);
        if !units_dir.exists() {
            return Ok(Vec::new());
        }

        let unavailable = |e: std::io::Error| {
            StrataError::State(StateError::unavailable(format!(
                "Failed to list state directory: {e}"
            )))
        };

        let mut records = Vec::new();
        let mut regions = fs::read_dir(&units_dir).await.map_err(unavailable)?;
        while let Some(region) = regions.next_entry().await.map_err(unavailable)? {
            if !region.path().is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(region.path()).await.map_err(unavailable)?;
            while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    records.push(Self::read_record(&path).await?);
                }
            }
        }

        records.sort_by_key(AppliedState::key);
        debug!("Listed {} state records", records.len());
        Ok(records)
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let lock_info = LockInfo::new(&resolve_holder(holder));

        // One retry, after clearing an expired lock.
        for _ in 0..2 {
            if self.create_lock_file(&lock_info).await? {
                info!(
                    "Acquired state lock: {} (expires in {}s)",
                    lock_info.lock_id, LOCK_EXPIRY_SECS
                );
                return Ok(lock_info);
            }

            match self.read_lock_file().await? {
                Some(existing) if !existing.is_expired() => {
                    return Err(StrataError::State(StateError::LockedByOther {
                        holder: existing.holder,
                        since: existing.acquired_at.to_rfc3339(),
                    }));
                }
                Some(_) => {
                    debug!("Expired lock found, taking over");
                    self.delete_lock_file().await?;
                }
                None => debug!("Lock file vanished, retrying"),
            }
        }

        Err(StrataError::State(StateError::LockFailed {
            message: String::from("lock file was recreated while taking over an expired lock"),
        }))
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    async fn is_locked(&self) -> Result<bool> {
        if let Some(lock_info) = self.read_lock_file().await? {
            return Ok(!lock_info.is_expired());
        }
        Ok(false)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path());
        (store, temp_dir)
    }

    fn record(region: &str, unit: &str, hash: &str) -> (UnitKey, AppliedState) {
        let key = UnitKey::new(region, unit);
        let state = AppliedState::new(&key, "370926141865", hash, vec![unit.to_string()]);
        (key, state)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, temp) = create_test_store();
        let (key, state) = record("us-east-2", "drstack", "abc");

        store.save(&key, &state).await.expect("Failed to save state");

        let loaded = store
            .load(&key)
            .await
            .expect("Failed to load state")
            .expect("State should exist");
        assert_eq!(loaded.content_hash, "abc");
        assert!(temp.path().join("units/us-east-2/drstack.json").exists());
        assert!(!temp.path().join("units/us-east-2/drstack.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_state_survives_new_store_instance() {
        let temp = TempDir::new().unwrap();
        let (key, state) = record("us-west-1", "backupstack", "h1");

        LocalStateStore::with_base_dir(temp.path())
            .save(&key, &state)
            .await
            .unwrap();

        let reopened = LocalStateStore::with_base_dir(temp.path());
        assert_eq!(reopened.load(&key).await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_same_unit_in_two_regions_is_distinct() {
        let (store, _temp) = create_test_store();
        let (west, west_state) = record("us-west-1", "vault", "w");
        let (east, east_state) = record("us-east-2", "vault", "e");

        store.save(&west, &west_state).await.unwrap();
        store.save(&east, &east_state).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(store.load(&east).await.unwrap().unwrap().content_hash, "e");
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        let result = store
            .load(&UnitKey::new("us-west-1", "missing"))
            .await
            .expect("Load should not fail");
        assert!(result.is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, _temp) = create_test_store();
        let (key, state) = record("us-west-1", "eks", "h");

        store.save(&key, &state).await.unwrap();
        store.delete(&key).await.unwrap();
        store.delete(&key).await.unwrap();

        assert!(store.load(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_record() {
        let (store, temp) = create_test_store();
        let dir = temp.path().join("units/us-west-1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("eks.json"), "{not json").unwrap();

        let result = store.load(&UnitKey::new("us-west-1", "eks")).await;
        assert!(matches!(
            result,
            Err(StrataError::State(StateError::Corrupted { .. }))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_saves_to_one_unit() {
        let (store, _temp) = create_test_store();
        let store = Arc::new(store);
        let key = UnitKey::new("us-west-1", "eks");

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                let state = AppliedState::new(&key, "1", &format!("h{i}"), Vec::new());
                store.save(&key, &state).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let loaded = store.load(&key).await.unwrap().unwrap();
        assert!(loaded.content_hash.starts_with('h'));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder")
            .await
            .expect("Failed to acquire lock");

        assert!(store.is_locked().await.expect("is_locked failed"));
        assert_eq!(
            store.get_lock_info().await.unwrap().map(|l| l.holder),
            Some(String::from("test-holder"))
        );

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store
            .acquire_lock("holder-1")
            .await
            .expect("Failed to acquire first lock");

        let result = store.acquire_lock("holder-2").await;
        assert!(matches!(
            result,
            Err(StrataError::State(StateError::LockedByOther { .. }))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_acquire_has_one_winner() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            // Separate instances, like separate processes sharing a directory.
            let store = LocalStateStore::with_base_dir(temp_dir.path());
            tasks.spawn(async move { store.acquire_lock(&format!("holder-{i}")).await });
        }

        let mut winners = 0;
        while let Some(result) = tasks.join_next().await {
            if result.expect("task panicked").is_ok() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (store, _temp) = create_test_store();
        let mut stale = LockInfo::new("crashed-run");
        stale.expires_at = stale.acquired_at - chrono::Duration::seconds(1);
        std::fs::create_dir_all(store.base_dir()).unwrap();
        std::fs::write(
            store.base_dir().join(LOCK_FILE),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        let lock = store.acquire_lock("next-run").await.expect("takeover failed");

        assert_eq!(lock.holder, "next-run");
        assert_eq!(store.get_lock_info().await.unwrap(), Some(lock));
    }
}

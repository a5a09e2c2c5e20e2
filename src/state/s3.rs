//! S3-based state storage backend.
//!
//! This module provides remote state storage using AWS S3 (or compatible
//! services) so that several operators can share one deployment's state.
//! Each unit is stored as `<prefix>units/<region>/<unit>.json`.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{Result, StateError, StrataError};

use super::lock::{resolve_holder, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::{AppliedState, UnitKey, STATE_VERSION};

/// Key segment holding unit records.
const UNITS_KEY: &str = "units/";

/// Lock object key suffix.
const LOCK_KEY: &str = "state.lock";

/// S3-based state store.
#[derive(Debug)]
pub struct S3StateStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix.
    prefix: String,
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| {
            let p = p.trim_matches('/');
            if p.is_empty() {
                String::new()
            } else {
                format!("{p}/")
            }
        })
        .unwrap_or_default()
}

fn parse_record(key: &str, json: &str) -> Result<AppliedState> {
    let record: AppliedState = serde_json::from_str(json).map_err(|e| {
        StrataError::State(StateError::corrupted(format!("Failed to parse {key}: {e}")))
    })?;

    if record.version != STATE_VERSION {
        return Err(StrataError::State(StateError::VersionMismatch {
            expected: STATE_VERSION.to_string(),
            found: record.version,
        }));
    }

    Ok(record)
}

impl S3StateStore {
    /// Creates a new S3 state store.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be initialized.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Result<Self> {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Ok(Self::with_client(Client::new(&config), bucket, prefix))
    }

    /// Creates a new S3 state store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    /// Gets the object key of a unit record.
    fn record_key(&self, key: &UnitKey) -> String {
        format!("{}{UNITS_KEY}{}/{}.json", self.prefix, key.region, key.unit_id)
    }

    /// Gets the object key of the lock.
    fn lock_key(&self) -> String {
        format!("{}{LOCK_KEY}", self.prefix)
    }

    /// Gets an object from S3.
    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response.body.collect().await.map_err(|e| {
                    StrataError::State(StateError::unavailable(format!(
                        "Failed to read S3 object: {e}"
                    )))
                })?;

                let content = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    StrataError::State(StateError::corrupted(format!(
                        "Invalid UTF-8 in S3 object: {e}"
                    )))
                })?;

                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StrataError::State(StateError::unavailable(format!(
                        "S3 get error: {service_err}"
                    ))))
                }
            }
        }
    }

    /// Puts an object to S3.
    async fn put_object(&self, key: &str, content: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| {
                StrataError::State(StateError::unavailable(format!("S3 put error: {e}")))
            })?;

        Ok(())
    }

    /// Deletes an object from S3.
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                StrataError::State(StateError::unavailable(format!("S3 delete error: {e}")))
            })?;

        Ok(())
    }

    /// Lists the keys of every unit record.
    async fn list_record_keys(&self) -> Result<Vec<String>> {
        let prefix = format!("{}{UNITS_KEY}", self.prefix);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix);
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| {
                StrataError::State(StateError::unavailable(format!("S3 list error: {e}")))
            })?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter(|key| key.ends_with(".json"))
                    .map(str::to_string),
            );

            continuation = response.next_continuation_token().map(str::to_string);
            if !response.is_truncated().unwrap_or(false) || continuation.is_none() {
                break;
            }
        }

        Ok(keys)
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        let Some(content) = self.get_object(&self.lock_key()).await? else {
            return Ok(None);
        };

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            StrataError::State(StateError::corrupted(format!("Failed to parse lock: {e}")))
        })?;

        Ok(Some(lock_info))
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self, key: &UnitKey) -> Result<Option<AppliedState>> {
        let object_key = self.record_key(key);
        debug!("Loading state from s3://{}/{object_key}", self.bucket);

        match self.get_object(&object_key).await? {
            Some(json) => parse_record(&object_key, &json).map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &UnitKey, state: &AppliedState) -> Result<()> {
        let object_key = self.record_key(key);
        debug!("Saving state to s3://{}/{object_key}", self.bucket);

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            StrataError::State(StateError::serialization(format!(
                "Failed to serialize state: {e}"
            )))
        })?;

        // Single PUTs are atomic per object
        self.put_object(&object_key, &content).await
    }

    async fn delete(&self, key: &UnitKey) -> Result<()> {
        let object_key = self.record_key(key);
        info!("Deleting state from s3://{}/{object_key}", self.bucket);
        self.delete_object(&object_key).await
    }

    async fn list(&self) -> Result<Vec<AppliedState>> {
        let mut records = Vec::new();
        for object_key in self.list_record_keys().await? {
            if let Some(json) = self.get_object(&object_key).await? {
                records.push(parse_record(&object_key, &json)?);
            }
        }

        records.sort_by_key(AppliedState::key);
        debug!("Listed {} state records from S3", records.len());
        Ok(records)
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock().await? {
            if !existing.is_expired() {
                return Err(StrataError::State(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock found, taking over");
        }

        let lock_info = LockInfo::new(&resolve_holder(holder));

        let content = serde_json::to_string_pretty(&lock_info).map_err(|e| {
            StrataError::State(StateError::serialization(format!(
                "Failed to serialize lock: {e}"
            )))
        })?;

        self.put_object(&self.lock_key(), &content).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock().await? {
            if existing.lock_id == lock_id {
                self.delete_object(&self.lock_key()).await?;
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
        self.read_lock().await
    }

    async fn is_locked(&self) -> Result<bool> {
        if let Some(lock_info) = self.read_lock().await? {
            return Ok(!lock_info.is_expired());
        }
        Ok(false)
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("/team/prod/")), "team/prod/");
    }

    #[test]
    fn test_parse_record_rejects_other_versions() {
        let key = UnitKey::new("us-west-1", "eks");
        let mut record = AppliedState::new(&key, "1", "h", Vec::new());
        record.version = String::from("0.9");
        let json = serde_json::to_string(&record).unwrap();

        assert!(matches!(
            parse_record("k", &json),
            Err(StrataError::State(StateError::VersionMismatch { .. }))
        ));
    }
}

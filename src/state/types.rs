//! State types for tracking applied deployment units.
//!
//! These records describe what was last applied for each unit and are
//! compared against freshly computed content hashes to skip unchanged work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Current version of the state record format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept per unit.
pub const MAX_HISTORY: usize = 20;

/// Key of a state record: a unit within a region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitKey {
    /// Region the unit is deployed in.
    pub region: String,
    /// Unit id.
    pub unit_id: String,
}

impl UnitKey {
    /// Creates a new unit key.
    #[must_use]
    pub fn new(region: &str, unit_id: &str) -> Self {
        Self {
            region: region.to_string(),
            unit_id: unit_id.to_string(),
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region, self.unit_id)
    }
}

/// Opaque reference returned by a provider for an applied unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHandle {
    /// Provider-side identifier (stack id, ARN, ...).
    pub reference: String,
    /// Outputs exported by the unit.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

impl ProviderHandle {
    /// Creates a handle with no outputs.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            outputs: BTreeMap::new(),
        }
    }

    /// Adds an output value.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }
}

/// The last successfully applied state of a deployment unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedState {
    /// State format version.
    pub version: String,
    /// Unit id.
    pub unit_id: String,
    /// Region the unit was applied in.
    pub region: String,
    /// Account the unit was applied into.
    pub account: String,
    /// Content hash of the applied descriptor set.
    pub content_hash: String,
    /// When the unit was last applied.
    pub applied_at: DateTime<Utc>,
    /// Ids of the descriptors in the unit.
    pub descriptor_ids: Vec<String>,
    /// Handle returned by the provider.
    #[serde(default)]
    pub handle: Option<ProviderHandle>,
    /// Apply history (recent entries).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// A single entry in a unit's apply history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the operation occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: StateOperation,
    /// Content hash at the time of the operation.
    pub content_hash: String,
    /// Provider attempts it took.
    pub attempts: u32,
}

/// Types of recorded operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StateOperation {
    /// First apply of the unit.
    Create,
    /// Re-apply after a content change.
    Update,
}

impl AppliedState {
    /// Creates a new record for a freshly applied unit.
    #[must_use]
    pub fn new(key: &UnitKey, account: &str, content_hash: &str, descriptor_ids: Vec<String>) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            unit_id: key.unit_id.clone(),
            region: key.region.clone(),
            account: account.to_string(),
            content_hash: content_hash.to_string(),
            applied_at: Utc::now(),
            descriptor_ids,
            handle: None,
            history: Vec::new(),
        }
    }

    /// Returns the key of this record.
    #[must_use]
    pub fn key(&self) -> UnitKey {
        UnitKey::new(&self.region, &self.unit_id)
    }

    /// Sets the provider handle.
    #[must_use]
    pub fn with_handle(mut self, handle: ProviderHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Carries history over from the previous record and appends an entry.
    pub fn record(&mut self, previous: Option<&Self>, attempts: u32) {
        let operation = if previous.is_some() {
            StateOperation::Update
        } else {
            StateOperation::Create
        };
        if let Some(previous) = previous {
            self.history.clone_from(&previous.history);
        }
        self.add_history(HistoryEntry {
            timestamp: self.applied_at,
            operation,
            content_hash: self.content_hash.clone(),
            attempts,
        });
    }

    /// Adds a history entry, dropping the oldest past the limit.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }
}

impl fmt::Display for StateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Create => "create",
            Self::Update => "update",
        };
        write!(f, "{op}")
    }
}

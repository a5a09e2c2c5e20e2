//! Point-in-time view of the state store.

use std::collections::BTreeMap;

use super::types::{AppliedState, UnitKey};

/// Records read from the state store at the start of a run.
///
/// Plans are compiled and units skipped against this view, so writes made
/// during the run never affect decisions taken in the same run.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    records: BTreeMap<UnitKey, AppliedState>,
}

impl StateSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a snapshot from a list of records.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = AppliedState>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.key(), r)).collect(),
        }
    }

    /// Gets the record of a unit.
    #[must_use]
    pub fn get(&self, key: &UnitKey) -> Option<&AppliedState> {
        self.records.get(key)
    }

    /// Gets the stored content hash of a unit.
    #[must_use]
    pub fn content_hash(&self, key: &UnitKey) -> Option<&str> {
        self.records.get(key).map(|r| r.content_hash.as_str())
    }

    /// Returns all keys, in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &UnitKey> {
        self.records.keys()
    }

    /// Returns all records, in ascending key order.
    pub fn records(&self) -> impl Iterator<Item = &AppliedState> {
        self.records.values()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_lookup() {
        let key = UnitKey::new("us-east-2", "drstack");
        let record = AppliedState::new(&key, "1", "abc", vec!["drVault".into()]);
        let snapshot = StateSnapshot::from_records([record]);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.content_hash(&key), Some("abc"));
        assert!(snapshot.get(&UnitKey::new("us-west-1", "drstack")).is_none());
        assert!(StateSnapshot::new().is_empty());
    }
}

//! Content hashing for change detection.
//!
//! This module provides deterministic hashing of descriptor sets so that
//! re-applying an unchanged deployment unit can be skipped.

use sha2::{Digest, Sha256};

use super::spec::ResourceDescriptor;

/// Hasher for computing descriptor content hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentHasher;

impl ContentHasher {
    /// Creates a new content hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the content hash of a deployment unit.
    ///
    /// The hash covers the unit identity, its account and region, and every
    /// descriptor, visited in ascending id order so that declaration order
    /// inside the document does not matter.
    #[must_use]
    pub fn hash_unit(
        &self,
        unit_id: &str,
        account: &str,
        region: &str,
        descriptors: &[ResourceDescriptor],
    ) -> String {
        let mut hasher = Sha256::new();

        hasher.update(unit_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(account.as_bytes());
        hasher.update([0u8]);
        hasher.update(region.as_bytes());
        hasher.update([0u8]);

        let mut sorted: Vec<&ResourceDescriptor> = descriptors.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        for descriptor in sorted {
            hasher.update(self.hash_descriptor(descriptor).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single descriptor.
    #[must_use]
    pub fn hash_descriptor(&self, descriptor: &ResourceDescriptor) -> String {
        let mut hasher = Sha256::new();

        hasher.update(descriptor.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(descriptor.kind.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(descriptor.region.as_bytes());
        hasher.update([0u8]);

        for (key, value) in &descriptor.properties {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            let mut canonical = String::new();
            write_canonical(value, &mut canonical);
            hasher.update(canonical.as_bytes());
            hasher.update([0u8]);
        }

        // Reference order is part of the declaration
        for reference in &descriptor.references {
            hasher.update(reference.as_bytes());
            hasher.update([1u8]);
        }

        hex::encode(hasher.finalize())
    }

    /// Combines unit hashes into a single plan hash.
    #[must_use]
    pub fn hash_plan<'a>(&self, unit_hashes: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
        let mut hasher = Sha256::new();
        for (unit_id, hash) in unit_hashes {
            hasher.update(unit_id.as_bytes());
            hasher.update([0u8]);
            hasher.update(hash.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Serializes a value with object keys in ascending order.
fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, nested)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(nested, out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, nested) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(nested, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceKind;
    use serde_json::json;

    fn vault(id: &str, name: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(id, ResourceKind::Vault, "us-west-1")
            .with_property("vaultName", json!(name))
    }

    #[test]
    fn test_unit_hash_ignores_declaration_order() {
        let hasher = ContentHasher::new();
        let a = vault("a", "VaultA");
        let b = vault("b", "VaultB");

        let forward = hasher.hash_unit("stack", "1", "us-west-1", &[a.clone(), b.clone()]);
        let reverse = hasher.hash_unit("stack", "1", "us-west-1", &[b, a]);

        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_property_change_changes_hash() {
        let hasher = ContentHasher::new();
        let before = hasher.hash_unit("stack", "1", "us-west-1", &[vault("a", "VaultA")]);
        let after = hasher.hash_unit("stack", "1", "us-west-1", &[vault("a", "Renamed")]);

        assert_ne!(before, after);
    }

    #[test]
    fn test_account_change_changes_hash() {
        let hasher = ContentHasher::new();
        let descriptors = [vault("a", "VaultA")];

        assert_ne!(
            hasher.hash_unit("stack", "1", "us-west-1", &descriptors),
            hasher.hash_unit("stack", "2", "us-west-1", &descriptors)
        );
    }

    #[test]
    fn test_nested_property_order_is_canonical() {
        let hasher = ContentHasher::new();
        let first: serde_json::Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        let second: serde_json::Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();

        let d1 = vault("v", "x").with_property("tags", first);
        let d2 = vault("v", "x").with_property("tags", second);

        assert_eq!(hasher.hash_descriptor(&d1), hasher.hash_descriptor(&d2));
    }

    #[test]
    fn test_short_hash() {
        let short = ContentHasher::short_hash("abcdef1234567890abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }

    #[test]
    fn test_hashes_match() {
        assert!(ContentHasher::hashes_match("abc123", "abc123"));
        assert!(!ContentHasher::hashes_match("abc123", "abc124"));
        assert!(!ContentHasher::hashes_match("abc123", "abc12"));
    }
}

//! Configuration specification types for the orchestrator.
//!
//! This module defines the structs that map to the `strata.yaml` document.
//! Descriptors are declarative and never mutated once loaded; a change to a
//! resource produces a new descriptor with the same id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployConfig {
    /// Default region for descriptors that do not name one.
    pub region: String,
    /// Account every deployment unit is deployed into.
    pub account: String,
    /// Resource descriptors, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Orchestration engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Resource provider configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// Declarative specification of one desired resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDescriptor {
    /// Unique id within the document.
    pub id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Target region. Filled from the document region when omitted.
    #[serde(default)]
    pub region: String,
    /// Stack (deployment unit) this descriptor belongs to.
    ///
    /// When omitted the descriptor forms its own unit named after its id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Kind-specific properties.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Ids of descriptors this one depends on, in declaration order.
    #[serde(default)]
    pub references: Vec<String>,
    /// Set when the region was filled from the document region.
    #[serde(skip)]
    pub(crate) inherits_region: bool,
}

/// Kinds of resources a descriptor can describe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// Managed Kubernetes cluster.
    #[serde(alias = "Cluster")]
    Cluster,
    /// Cluster add-on (CSI driver, CNI, ingress controller, GitOps agent).
    #[serde(alias = "AddOn", alias = "addon")]
    AddOn,
    /// Backup vault.
    #[serde(alias = "Vault")]
    Vault,
    /// Encryption key, primary or replica.
    #[serde(alias = "Key")]
    Key,
    /// Backup plan with schedule and copy rules.
    #[serde(alias = "BackupPlan")]
    BackupPlan,
    /// Resource selection attached to a backup plan.
    #[serde(alias = "Selection")]
    Selection,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Orchestration engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum units applied concurrently within one batch.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Retries after the first attempt for transient provider failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on the retry delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Keep applying units that do not depend on a failed unit.
    #[serde(default)]
    pub continue_independent: bool,
    /// Ask the provider to roll back a unit whose apply failed.
    #[serde(default = "default_true")]
    pub rollback_on_failure: bool,
}

/// Resource provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProviderConfig {
    /// Provider implementation.
    #[serde(default)]
    pub kind: ProviderKind,
    /// Base URL of the deployment gateway (http provider).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Request timeout in seconds (http provider).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Provider implementations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// JSON over HTTP to a deployment gateway.
    Http,
    /// Log every call and report success.
    #[default]
    DryRun,
}

const fn default_workers() -> usize {
    4
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

const fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            continue_independent: false,
            rollback_on_failure: true,
        }
    }
}

impl DeployConfig {
    /// Fills descriptor regions from the document region.
    pub fn resolve_defaults(&mut self) {
        for resource in &mut self.resources {
            if resource.region.is_empty() {
                resource.region.clone_from(&self.region);
                resource.inherits_region = true;
            }
        }
    }

    /// Looks up a descriptor by id.
    #[must_use]
    pub fn resource(&self, id: &str) -> Option<&ResourceDescriptor> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Returns the distinct regions targeted by the document.
    #[must_use]
    pub fn regions(&self) -> Vec<&str> {
        let mut regions: Vec<&str> = self.resources.iter().map(|r| r.region.as_str()).collect();
        regions.sort_unstable();
        regions.dedup();
        regions
    }
}

impl ResourceDescriptor {
    /// Creates a descriptor with no properties or references.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ResourceKind, region: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            region: region.into(),
            stack: None,
            properties: BTreeMap::new(),
            references: Vec::new(),
            inherits_region: false,
        }
    }

    /// Sets the stack this descriptor belongs to.
    #[must_use]
    pub fn in_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Adds a reference to another descriptor.
    #[must_use]
    pub fn with_reference(mut self, id: impl Into<String>) -> Self {
        self.references.push(id.into());
        self
    }

    /// Returns the id of the deployment unit this descriptor belongs to.
    #[must_use]
    pub fn unit_id(&self) -> &str {
        self.stack.as_deref().unwrap_or(&self.id)
    }

    /// Returns true if the descriptor carries a non-null property.
    #[must_use]
    pub fn has_property(&self, key: &str) -> bool {
        self.properties.get(key).is_some_and(|v| !v.is_null())
    }
}

impl ResourceKind {
    /// Properties that must be present for this kind.
    #[must_use]
    pub const fn required_properties(self) -> &'static [&'static str] {
        match self {
            Self::Cluster => &["version"],
            Self::AddOn => &["addon"],
            Self::Vault => &["vaultName"],
            Self::Key => &["keyPolicy"],
            Self::BackupPlan => &["planName", "schedule"],
            Self::Selection => &["selectionName", "resources"],
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Cluster => "cluster",
            Self::AddOn => "add-on",
            Self::Vault => "vault",
            Self::Key => "key",
            Self::BackupPlan => "backup-plan",
            Self::Selection => "selection",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::DryRun => write!(f, "dry-run"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_id_defaults_to_descriptor_id() {
        let descriptor = ResourceDescriptor::new("vaultPrimary", ResourceKind::Vault, "us-west-1");
        assert_eq!(descriptor.unit_id(), "vaultPrimary");

        let descriptor = descriptor.in_stack("backupstack");
        assert_eq!(descriptor.unit_id(), "backupstack");
    }

    #[test]
    fn test_resolve_defaults_fills_region() {
        let mut config = DeployConfig {
            region: String::from("us-west-1"),
            account: String::from("123456789012"),
            resources: vec![
                ResourceDescriptor::new("a", ResourceKind::Vault, ""),
                ResourceDescriptor::new("b", ResourceKind::Vault, "us-east-2"),
            ],
            state: StateConfig::default(),
            engine: EngineConfig::default(),
            provider: ProviderConfig::default(),
        };

        config.resolve_defaults();

        assert_eq!(config.resources[0].region, "us-west-1");
        assert_eq!(config.resources[1].region, "us-east-2");
        assert_eq!(config.regions(), vec!["us-east-2", "us-west-1"]);
    }

    #[test]
    fn test_null_property_is_absent() {
        let descriptor = ResourceDescriptor::new("k", ResourceKind::Key, "us-west-1")
            .with_property("keyPolicy", serde_json::Value::Null);
        assert!(!descriptor.has_property("keyPolicy"));
    }
}

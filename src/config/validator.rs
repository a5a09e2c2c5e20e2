//! Descriptor validation.
//!
//! Every check here is side-effect free and runs before the dependency
//! graph is built, so a malformed document never reaches a provider.

use crate::error::{Result, StrataError, ValidationError};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use super::spec::{DeployConfig, ResourceDescriptor, ResourceKind};

/// Minimum gap between cold storage transition and deletion, in days.
const MIN_COLD_STORAGE_DAYS: u64 = 90;

/// Validator for resource descriptors.
#[derive(Debug, Default)]
pub struct DescriptorValidator;

/// Validation result containing all errors and warnings found.
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// Validation errors, in document order.
    pub errors: Vec<ValidationError>,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
}

impl DescriptorValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a single descriptor against the ids of its document.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: an invalid id or region, a
    /// self-reference, a missing required property, a dangling reference,
    /// or an invalid property value.
    pub fn validate(
        &self,
        descriptor: &ResourceDescriptor,
        known_ids: &HashSet<&str>,
    ) -> std::result::Result<(), ValidationError> {
        if !is_valid_id(&descriptor.id) {
            return Err(ValidationError::InvalidId {
                id: descriptor.id.clone(),
            });
        }

        if let Some(stack) = descriptor.stack.as_ref().filter(|s| !is_valid_id(s)) {
            return Err(ValidationError::InvalidId { id: stack.clone() });
        }

        if !is_valid_region(&descriptor.region) {
            return Err(ValidationError::InvalidRegion {
                id: descriptor.id.clone(),
                region: descriptor.region.clone(),
            });
        }

        for property in descriptor.kind.required_properties() {
            if !descriptor.has_property(property) {
                return Err(ValidationError::MissingProperty {
                    id: descriptor.id.clone(),
                    kind: descriptor.kind.to_string(),
                    property: (*property).to_string(),
                });
            }
        }

        for reference in &descriptor.references {
            if *reference == descriptor.id {
                return Err(ValidationError::SelfReference {
                    id: descriptor.id.clone(),
                });
            }
            if !known_ids.contains(reference.as_str()) {
                return Err(ValidationError::DanglingReference {
                    id: descriptor.id.clone(),
                    reference: reference.clone(),
                });
            }
        }

        match descriptor.kind {
            ResourceKind::BackupPlan => validate_backup_plan(descriptor),
            ResourceKind::Cluster => validate_cluster(descriptor),
            _ => Ok(()),
        }
    }

    /// Collects every error and warning in a document.
    #[must_use]
    pub fn collect(&self, config: &DeployConfig) -> ValidationReport {
        let mut report = ValidationReport::default();

        if config.account.trim().is_empty() {
            report.errors.push(ValidationError::EmptyAccount);
        }

        if config.resources.is_empty() {
            report
                .warnings
                .push(String::from("No resources defined in configuration"));
            return report;
        }

        let mut known_ids = HashSet::new();
        for descriptor in &config.resources {
            if !known_ids.insert(descriptor.id.as_str()) {
                report.errors.push(ValidationError::DuplicateId {
                    id: descriptor.id.clone(),
                });
            }
        }

        for descriptor in &config.resources {
            if let Err(e) = self.validate(descriptor, &known_ids) {
                report.errors.push(e);
            }
            Self::collect_warnings(descriptor, config, &mut report);
        }

        Self::validate_stack_regions(&config.resources, &mut report);

        report
    }

    /// Validates a document, failing on the first error.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate_config(&self, config: &DeployConfig) -> Result<ValidationReport> {
        let mut report = self.collect(config);

        if report.errors.is_empty() {
            debug!("Validated {} resources", config.resources.len());
            Ok(report)
        } else {
            Err(StrataError::Validation(report.errors.remove(0)))
        }
    }

    /// Checks that every stack targets a single region.
    fn validate_stack_regions(resources: &[ResourceDescriptor], report: &mut ValidationReport) {
        let mut stack_regions: BTreeMap<&str, &str> = BTreeMap::new();

        for descriptor in resources {
            let unit = descriptor.unit_id();
            match stack_regions.get(unit) {
                Some(region) if *region != descriptor.region => {
                    report.errors.push(ValidationError::RegionMismatch {
                        stack: unit.to_string(),
                        first: (*region).to_string(),
                        second: descriptor.region.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    stack_regions.insert(unit, &descriptor.region);
                }
            }
        }
    }

    /// Adds non-fatal findings for a descriptor.
    fn collect_warnings(
        descriptor: &ResourceDescriptor,
        config: &DeployConfig,
        report: &mut ValidationReport,
    ) {
        let referenced_kinds: Vec<ResourceKind> = descriptor
            .references
            .iter()
            .filter_map(|r| config.resource(r))
            .map(|r| r.kind)
            .collect();

        match descriptor.kind {
            ResourceKind::Vault if !referenced_kinds.contains(&ResourceKind::Key) => {
                report.warnings.push(format!(
                    "Vault '{}' references no key and will use the default encryption key",
                    descriptor.id
                ));
            }
            ResourceKind::Selection if !referenced_kinds.contains(&ResourceKind::BackupPlan) => {
                report.warnings.push(format!(
                    "Selection '{}' references no backup plan",
                    descriptor.id
                ));
            }
            _ => {}
        }

        let mut seen = HashSet::new();
        for reference in &descriptor.references {
            if !seen.insert(reference) {
                report.warnings.push(format!(
                    "Resource '{}' lists reference '{reference}' more than once",
                    descriptor.id
                ));
            }
        }
    }
}

/// Checks the schedule and copy rules of a backup plan.
fn validate_backup_plan(descriptor: &ResourceDescriptor) -> std::result::Result<(), ValidationError> {
    let schedule = descriptor
        .properties
        .get("schedule")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();

    if schedule.split_whitespace().count() != 5 {
        return Err(ValidationError::invalid_property(
            &descriptor.id,
            "schedule",
            format!("'{schedule}' is not a five-field cron expression"),
        ));
    }

    let Some(rules) = descriptor
        .properties
        .get("copyActions")
        .and_then(serde_json::Value::as_array)
    else {
        return Ok(());
    };

    for rule in rules {
        let cold = rule
            .get("moveToColdStorageAfterDays")
            .and_then(serde_json::Value::as_u64);
        let delete = rule.get("deleteAfterDays").and_then(serde_json::Value::as_u64);

        let Some((cold, delete)) = cold.zip(delete) else {
            continue;
        };

        if cold
            .checked_add(MIN_COLD_STORAGE_DAYS)
            .is_none_or(|min| delete < min)
        {
            return Err(ValidationError::invalid_property(
                &descriptor.id,
                "copyActions",
                format!(
                    "deleteAfterDays ({delete}) must be at least {MIN_COLD_STORAGE_DAYS} days after moveToColdStorageAfterDays ({cold})"
                ),
            ));
        }
    }

    Ok(())
}

/// Checks node group sizing of a cluster.
fn validate_cluster(descriptor: &ResourceDescriptor) -> std::result::Result<(), ValidationError> {
    let Some(groups) = descriptor
        .properties
        .get("nodeGroups")
        .and_then(serde_json::Value::as_array)
    else {
        return Ok(());
    };

    for group in groups {
        let size = |key: &str| group.get(key).and_then(serde_json::Value::as_u64);
        let name = group
            .get("id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("<unnamed>");

        let min = size("minSize").unwrap_or(0);
        let desired = size("desiredSize");
        let max = size("maxSize");

        let in_bounds = match (desired, max) {
            (Some(d), Some(m)) => min <= d && d <= m,
            (Some(d), None) => min <= d,
            (None, Some(m)) => min <= m,
            (None, None) => true,
        };

        if !in_bounds {
            return Err(ValidationError::invalid_property(
                &descriptor.id,
                "nodeGroups",
                format!("node group '{name}' must satisfy minSize <= desiredSize <= maxSize"),
            ));
        }
    }

    Ok(())
}

/// Ids start with an ASCII letter and contain letters, digits, '-' or '_'.
fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Regions are lowercase alphanumeric with hyphens, e.g. `us-west-1`.
fn is_valid_region(region: &str) -> bool {
    !region.is_empty()
        && !region.starts_with('-')
        && !region.ends_with('-')
        && region
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl ValidationReport {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, ProviderConfig, StateConfig};
    use serde_json::json;

    fn vault(id: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(id, ResourceKind::Vault, "us-west-1")
            .with_property("vaultName", json!("EKSBackupVault"))
    }

    fn config(resources: Vec<ResourceDescriptor>) -> DeployConfig {
        DeployConfig {
            region: String::from("us-west-1"),
            account: String::from("370926141865"),
            resources,
            state: StateConfig::default(),
            engine: EngineConfig::default(),
            provider: ProviderConfig::default(),
        }
    }

    #[test]
    fn test_valid_id() {
        assert!(is_valid_id("vaultPrimary"));
        assert!(is_valid_id("eks-blueprint"));
        assert!(is_valid_id("key_1"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("1vault"));
        assert!(!is_valid_id("vault/primary"));
    }

    #[test]
    fn test_valid_region() {
        assert!(is_valid_region("us-west-1"));
        assert!(!is_valid_region(""));
        assert!(!is_valid_region("US-WEST-1"));
        assert!(!is_valid_region("us-west-"));
    }

    #[test]
    fn test_missing_property() {
        let descriptor = ResourceDescriptor::new("plan", ResourceKind::BackupPlan, "us-west-1")
            .with_property("planName", json!("EKSBackupPlan"));
        let known = HashSet::from(["plan"]);

        let err = DescriptorValidator::new()
            .validate(&descriptor, &known)
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingProperty {
                id: String::from("plan"),
                kind: String::from("backup-plan"),
                property: String::from("schedule"),
            }
        );
    }

    #[test]
    fn test_dangling_reference() {
        let descriptor = vault("drVault").with_reference("replicaKey");
        let known = HashSet::from(["drVault"]);

        let err = DescriptorValidator::new()
            .validate(&descriptor, &known)
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::DanglingReference {
                id: String::from("drVault"),
                reference: String::from("replicaKey"),
            }
        );
    }

    #[test]
    fn test_self_reference() {
        let descriptor = vault("drVault").with_reference("drVault");
        let known = HashSet::from(["drVault"]);

        let err = DescriptorValidator::new()
            .validate(&descriptor, &known)
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::SelfReference {
                id: String::from("drVault")
            }
        );
    }

    #[test]
    fn test_schedule_must_be_cron() {
        let descriptor = ResourceDescriptor::new("plan", ResourceKind::BackupPlan, "us-west-1")
            .with_property("planName", json!("EKSBackupPlan"))
            .with_property("schedule", json!("daily"));
        let known = HashSet::from(["plan"]);

        let err = DescriptorValidator::new()
            .validate(&descriptor, &known)
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidProperty { ref property, .. } if property == "schedule"));
    }

    #[test]
    fn test_copy_rule_lifecycle() {
        let base = ResourceDescriptor::new("plan", ResourceKind::BackupPlan, "us-west-1")
            .with_property("planName", json!("EKSBackupPlan"))
            .with_property("schedule", json!("30 3 * * *"));
        let known = HashSet::from(["plan"]);
        let validator = DescriptorValidator::new();

        let ok = base.clone().with_property(
            "copyActions",
            json!([{ "moveToColdStorageAfterDays": 30, "deleteAfterDays": 120 }]),
        );
        assert!(validator.validate(&ok, &known).is_ok());

        let too_short = base.with_property(
            "copyActions",
            json!([{ "moveToColdStorageAfterDays": 30, "deleteAfterDays": 60 }]),
        );
        assert!(validator.validate(&too_short, &known).is_err());
    }

    #[test]
    fn test_copy_rule_huge_cold_storage_rejected() {
        let plan = ResourceDescriptor::new("plan", ResourceKind::BackupPlan, "us-west-1")
            .with_property("planName", json!("EKSBackupPlan"))
            .with_property("schedule", json!("30 3 * * *"))
            .with_property(
                "copyActions",
                json!([{ "moveToColdStorageAfterDays": u64::MAX, "deleteAfterDays": 1 }]),
            );
        let known = HashSet::from(["plan"]);

        let err = DescriptorValidator::new().validate(&plan, &known).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidProperty { ref property, .. } if property == "copyActions"));
    }

    #[test]
    fn test_node_group_bounds() {
        let cluster = ResourceDescriptor::new("cluster", ResourceKind::Cluster, "us-west-1")
            .with_property("version", json!("1.27"))
            .with_property(
                "nodeGroups",
                json!([{ "id": "mng1", "desiredSize": 4, "maxSize": 3 }]),
            );
        let known = HashSet::from(["cluster"]);

        let err = DescriptorValidator::new()
            .validate(&cluster, &known)
            .unwrap_err();
        assert!(err.to_string().contains("mng1"));
    }

    #[test]
    fn test_collect_reports_duplicates_and_region_mismatch() {
        let resources = vec![
            vault("primaryVault").in_stack("backupstack"),
            vault("primaryVault"),
            ResourceDescriptor::new("drVault", ResourceKind::Vault, "us-east-2")
                .with_property("vaultName", json!("EKSBackupVault"))
                .in_stack("backupstack"),
        ];

        let report = DescriptorValidator::new().collect(&config(resources));

        assert!(report.errors.contains(&ValidationError::DuplicateId {
            id: String::from("primaryVault")
        }));
        assert!(report.errors.iter().any(|e| matches!(
            e,
            ValidationError::RegionMismatch { stack, .. } if stack == "backupstack"
        )));
    }

    #[test]
    fn test_collect_warnings() {
        let resources = vec![vault("primaryVault")];
        let report = DescriptorValidator::new().collect(&config(resources));

        assert!(report.is_valid());
        assert_eq!(report.warning_count(), 1);
        assert!(report.warnings[0].contains("default encryption key"));
    }

    #[test]
    fn test_validate_config_fails_on_first_error() {
        let mut cfg = config(vec![vault("primaryVault")]);
        cfg.account = String::new();

        let result = DescriptorValidator::new().validate_config(&cfg);
        assert!(matches!(
            result,
            Err(StrataError::Validation(ValidationError::EmptyAccount))
        ));
    }
}

//! Provider that records what it would do and changes nothing.

use async_trait::async_trait;
use tracing::info;

use crate::planner::DeploymentUnit;
use crate::state::{ProviderHandle, UnitKey};

use super::{ProviderResult, ResourceProvider};

/// Provider that logs every call and always succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunProvider;

impl DryRunProvider {
    /// Creates a new dry-run provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResourceProvider for DryRunProvider {
    async fn apply(&self, unit: &DeploymentUnit) -> ProviderResult<ProviderHandle> {
        info!(
            unit = %unit.id,
            region = %unit.region,
            resources = unit.descriptors.len(),
            "[dry-run] would apply unit"
        );
        for descriptor in &unit.descriptors {
            info!("[dry-run]   {} ({})", descriptor.id, descriptor.kind);
        }
        Ok(ProviderHandle::new(format!("dry-run:{}", unit.key())))
    }

    async fn rollback(&self, unit: &DeploymentUnit) -> ProviderResult<()> {
        info!(unit = %unit.id, "[dry-run] would roll back unit");
        Ok(())
    }

    async fn decommission(&self, key: &UnitKey) -> ProviderResult<()> {
        info!(unit = %key, "[dry-run] would decommission unit");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}

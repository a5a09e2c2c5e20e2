//! Resource provider interface.
//!
//! Providers create, update and remove the real infrastructure behind a
//! deployment unit. Every call must be idempotent per unit: applying the same
//! unit twice converges to the same result.

mod dry_run;
mod http;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::planner::DeploymentUnit;
use crate::state::{ProviderHandle, UnitKey};

pub use dry_run::DryRunProvider;
pub use http::{DEFAULT_TIMEOUT_SECS, HttpProvider};

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A backend able to apply deployment units.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Creates or updates every resource of a unit.
    async fn apply(&self, unit: &DeploymentUnit) -> ProviderResult<ProviderHandle>;

    /// Reverts a unit whose apply failed.
    async fn rollback(&self, unit: &DeploymentUnit) -> ProviderResult<()> {
        let _ = unit;
        Err(ProviderError::unsupported("rollback"))
    }

    /// Removes a unit that is no longer declared.
    async fn decommission(&self, key: &UnitKey) -> ProviderResult<()> {
        let _ = key;
        Err(ProviderError::unsupported("decommission"))
    }

    /// Gets the provider name.
    fn name(&self) -> &'static str;
}

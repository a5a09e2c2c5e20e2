//! Per-unit run status and the final apply report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{EXIT_PARTIAL_FAILURE, EXIT_SUCCESS};
use crate::state::{ProviderHandle, UnitKey};

/// Status of a unit during one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Not started yet.
    Pending,
    /// A provider call is in flight.
    InProgress,
    /// Applied successfully.
    Applied,
    /// Unchanged since the last run; no provider call made.
    Skipped,
    /// Apply failed.
    Failed,
    /// Apply failed and the provider rolled the unit back.
    RolledBack,
    /// Not attempted because a dependency failed or the run halted.
    Blocked,
    /// Not attempted because the run was cancelled.
    Cancelled,
}

impl UnitStatus {
    /// Returns true if the transition is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress | Self::Skipped | Self::Blocked | Self::Cancelled)
                | (Self::InProgress, Self::Applied | Self::Failed | Self::Cancelled)
                | (Self::Failed, Self::RolledBack)
        )
    }

    /// Returns true if no further transition is expected.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::InProgress)
    }

    /// Returns true if the unit ended in a good state.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Applied | Self::Skipped)
    }

    /// Returns true if the unit's own apply failed.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::RolledBack)
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Applied => "applied",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::RolledBack => "rolled-back",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Outcome of one unit.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    /// Unit id.
    pub unit_id: String,
    /// Region of the unit.
    pub region: String,
    /// Batch index the unit was planned in.
    pub batch: usize,
    /// Final status.
    pub status: UnitStatus,
    /// Provider apply attempts made.
    pub attempts: u32,
    /// Error message, for failed units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failed unit responsible, for blocked units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    /// Provider handle, for applied units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<ProviderHandle>,
}

impl UnitReport {
    /// Creates a pending report.
    #[must_use]
    pub fn pending(unit_id: &str, region: &str, batch: usize) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            region: region.to_string(),
            batch,
            status: UnitStatus::Pending,
            attempts: 0,
            error: None,
            blocked_by: None,
            handle: None,
        }
    }

    /// Moves the unit to a new status.
    ///
    /// Returns false and leaves the status unchanged if the transition is
    /// not allowed.
    pub fn transition(&mut self, next: UnitStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(
                unit = %self.unit_id,
                from = %self.status,
                to = %next,
                "Ignoring invalid status transition"
            );
            return false;
        }

        debug!(unit = %self.unit_id, from = %self.status, to = %next, "Unit status changed");
        self.status = next;
        true
    }
}

/// Outcome of a decommissioned unit.
#[derive(Debug, Clone, Serialize)]
pub struct DecommissionReport {
    /// Key of the removed unit.
    pub key: UnitKey,
    /// Whether the provider removed it and the record was deleted.
    pub removed: bool,
    /// Error message when removal failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of applying a plan.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// Hash of the applied plan.
    pub plan_hash: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Every planned unit, in batch order.
    pub units: Vec<UnitReport>,
    /// Decommissioned units handled after a successful run.
    pub decommissioned: Vec<DecommissionReport>,
    /// Total provider calls made (apply, rollback and decommission).
    pub provider_calls: u32,
    /// Whether the run was cancelled.
    pub cancelled: bool,
}

impl ApplyReport {
    /// Gets the report of a unit.
    #[must_use]
    pub fn unit(&self, id: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.unit_id == id)
    }

    /// Gets the status of a unit.
    #[must_use]
    pub fn status_of(&self, id: &str) -> Option<UnitStatus> {
        self.unit(id).map(|u| u.status)
    }

    /// Counts units per status.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for unit in &self.units {
            *counts.entry(unit.status.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the number of units with a status.
    #[must_use]
    pub fn count(&self, status: UnitStatus) -> usize {
        self.units.iter().filter(|u| u.status == status).count()
    }

    /// Returns true if every unit was applied or skipped.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self.units.iter().all(|u| u.status.is_success())
            && self.decommissioned.iter().all(|d| d.removed)
    }

    /// Returns the process exit code for this report.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_PARTIAL_FAILURE
        }
    }

    /// Returns the run duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        use UnitStatus::*;

        assert!(Pending.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Skipped));
        assert!(Pending.can_transition_to(Blocked));
        assert!(InProgress.can_transition_to(Applied));
        assert!(InProgress.can_transition_to(Failed));
        assert!(Failed.can_transition_to(RolledBack));
        assert!(InProgress.can_transition_to(Cancelled));

        assert!(!Applied.can_transition_to(Failed));
        assert!(!Skipped.can_transition_to(InProgress));
        assert!(!Pending.can_transition_to(Applied));
        assert!(!Blocked.can_transition_to(InProgress));
    }

    #[test]
    fn test_exit_code() {
        let mut report = ApplyReport {
            plan_hash: String::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            units: vec![UnitReport::pending("a", "us-west-1", 0)],
            decommissioned: Vec::new(),
            provider_calls: 0,
            cancelled: false,
        };
        assert!(report.units[0].transition(UnitStatus::Skipped));
        assert_eq!(report.exit_code(), EXIT_SUCCESS);

        assert!(!report.units[0].transition(UnitStatus::InProgress));
        report.units[0].status = UnitStatus::Blocked;
        assert_eq!(report.exit_code(), EXIT_PARTIAL_FAILURE);
        assert_eq!(report.counts().get("blocked"), Some(&1));
    }
}

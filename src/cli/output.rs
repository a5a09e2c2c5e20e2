//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ContentHasher, ValidationReport};
use crate::planner::{ApplyReport, Plan, UnitChange, UnitStatus};
use crate::state::{AppliedState, LockInfo, StateSnapshot};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan unit row for table display.
#[derive(Tabled)]
struct PlanUnitRow {
    #[tabled(rename = "Batch")]
    batch: usize,
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Resources")]
    resources: usize,
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "Hash")]
    hash: String,
}

/// Report row for table display.
#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Stored record row for table display.
#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Hash")]
    hash: String,
    #[tabled(rename = "Applied at")]
    applied_at: String,
    #[tabled(rename = "Resources")]
    resources: usize,
    #[tabled(rename = "Reference")]
    reference: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true if output is JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Formats a deployment plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if plan.units.is_empty() && plan.decommissioned.is_empty() {
            return format!("{} Nothing to deploy.\n", "✓".green());
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nDeployment Plan");
        let _ = writeln!(
            output,
            "   Plan hash: {}\n",
            ContentHasher::short_hash(&plan.plan_hash)
        );

        let rows: Vec<PlanUnitRow> = plan
            .ordered_units()
            .map(|p| PlanUnitRow {
                batch: p.batch + 1,
                unit: p.unit.id.clone(),
                region: p.unit.region.clone(),
                resources: p.unit.descriptors.len(),
                change: Self::format_change(p.change),
                hash: ContentHasher::short_hash(&p.content_hash),
            })
            .collect();

        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if detailed {
            for planned in plan.ordered_units() {
                let _ = writeln!(output, "\n   {} ({}):", planned.unit.id.bold(), planned.unit.region);
                for descriptor in &planned.unit.descriptors {
                    let refs = if descriptor.references.is_empty() {
                        String::new()
                    } else {
                        format!(" -> {}", descriptor.references.join(", "))
                    };
                    let _ = writeln!(output, "     - {} [{}]{refs}", descriptor.id, descriptor.kind);
                }
            }
        }

        if !plan.decommissioned.is_empty() {
            let _ = writeln!(output, "\n{} Units to decommission:", "-".red());
            for key in &plan.decommissioned {
                let _ = writeln!(output, "   - {key}");
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} unchanged, {} to decommission\n",
            plan.change_count(UnitChange::Create).to_string().green(),
            plan.change_count(UnitChange::Update).to_string().yellow(),
            plan.change_count(UnitChange::NoChange),
            plan.decommissioned.len().to_string().red()
        );

        output
    }

    /// Formats an apply report.
    #[must_use]
    pub fn format_report(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    /// Formats a report as text.
    fn format_report_text(report: &ApplyReport) -> String {
        let mut output = String::new();

        let headline = if report.is_success() {
            format!("{} Apply complete", "✓".green())
        } else if report.cancelled {
            format!("{} Apply cancelled", "⚠".yellow())
        } else {
            format!("{} Apply finished with failures", "✗".red())
        };
        let _ = writeln!(output, "\n{headline}\n");

        let rows: Vec<ReportRow> = report
            .units
            .iter()
            .map(|u| ReportRow {
                unit: u.unit_id.clone(),
                region: u.region.clone(),
                status: Self::format_status(u.status),
                attempts: u.attempts,
                detail: u
                    .error
                    .clone()
                    .or_else(|| u.blocked_by.as_ref().map(|b| format!("blocked by {b}")))
                    .or_else(|| u.handle.as_ref().map(|h| h.reference.clone()))
                    .map(|d| Self::truncate(&d, 60))
                    .unwrap_or_default(),
            })
            .collect();

        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        for decommission in &report.decommissioned {
            let marker = if decommission.removed { "-".red() } else { "✗".red() };
            let _ = write!(output, "   {marker} decommission {}", decommission.key);
            if let Some(error) = &decommission.error {
                let _ = write!(output, ": {error}");
            }
            output.push('\n');
        }

        let summary = report
            .counts()
            .iter()
            .map(|(status, count)| format!("{count} {status}"))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(
            output,
            "\n{summary} ({} provider calls, {} ms)",
            report.provider_calls,
            report.duration_ms()
        );

        output
    }

    /// Formats stored records.
    #[must_use]
    pub fn format_states(&self, records: &[AppliedState], lock: Option<&LockInfo>) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "lock": lock,
                "units": records,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();

                if records.is_empty() {
                    output.push_str("No state found.\n");
                } else {
                    let rows: Vec<StateRow> = records
                        .iter()
                        .map(|r| StateRow {
                            region: r.region.clone(),
                            unit: r.unit_id.clone(),
                            hash: ContentHasher::short_hash(&r.content_hash),
                            applied_at: r.applied_at.format("%Y-%m-%d %H:%M").to_string(),
                            resources: r.descriptor_ids.len(),
                            reference: r
                                .handle
                                .as_ref()
                                .map(|h| Self::truncate(&h.reference, 40))
                                .unwrap_or_default(),
                        })
                        .collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if let Some(lock) = lock {
                    let _ = writeln!(
                        output,
                        "\n{} Locked by {} since {} ({}s left)",
                        "⚠".yellow(),
                        lock.holder,
                        lock.acquired_at.format("%Y-%m-%d %H:%M"),
                        lock.remaining_secs()
                    );
                }

                output
            }
        }
    }

    /// Formats the stored state against a freshly compiled plan.
    #[must_use]
    pub fn format_drift(&self, plan: &Plan, snapshot: &StateSnapshot) -> String {
        let in_sync = plan.change_count(UnitChange::NoChange);

        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "in_sync": in_sync,
                "changed": plan.change_count(UnitChange::Update),
                "not_applied": plan.change_count(UnitChange::Create),
                "orphaned": plan.decommissioned,
                "stored": snapshot.len(),
                "units": plan.ordered_units().map(|p| serde_json::json!({
                    "unit": p.unit.id,
                    "region": p.unit.region,
                    "change": p.change,
                })).collect::<Vec<_>>(),
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                for planned in plan.ordered_units() {
                    let label = match planned.change {
                        UnitChange::NoChange => "in sync".green(),
                        UnitChange::Update => "changed".yellow(),
                        UnitChange::Create => "not applied".cyan(),
                    };
                    let _ = writeln!(
                        output,
                        "   {:<24} {:<12} {label}",
                        planned.unit.id, planned.unit.region
                    );
                }
                for key in &plan.decommissioned {
                    let _ = writeln!(output, "   {key:<37} {}", "orphaned".red());
                }
                let _ = writeln!(
                    output,
                    "\n{in_sync}/{} units in sync ({} stored records)",
                    plan.unit_count(),
                    snapshot.len()
                );
                output
            }
        }
    }

    /// Formats a validation report.
    #[must_use]
    pub fn format_validation(&self, report: &ValidationReport, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "valid": report.is_valid(),
                "errors": report.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": report.warnings,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                if report.is_valid() {
                    let _ = writeln!(output, "{} Configuration is valid.", "✓".green());
                } else {
                    let _ = writeln!(
                        output,
                        "{} {} validation error(s):",
                        "✗".red(),
                        report.error_count()
                    );
                    for error in &report.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }

                if show_warnings && !report.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &report.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                } else if report.warning_count() > 0 {
                    let _ = writeln!(
                        output,
                        "   ({} warning(s), use --warnings to show)",
                        report.warning_count()
                    );
                }

                output
            }
        }
    }

    /// Formats a one-line message.
    #[must_use]
    pub fn message(&self, status: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::json!({ "status": status, "message": message }).to_string()
            }
            OutputFormat::Text => {
                let marker = match status {
                    "success" => "✓".green(),
                    "error" => "✗".red(),
                    _ => "⚠".yellow(),
                };
                format!("{marker} {message}")
            }
        }
    }

    /// Formats a unit status with color.
    fn format_status(status: UnitStatus) -> String {
        let text = status.to_string();
        match status {
            UnitStatus::Applied => text.green().to_string(),
            UnitStatus::Skipped => text.dimmed().to_string(),
            UnitStatus::Failed | UnitStatus::RolledBack => text.red().to_string(),
            UnitStatus::Blocked | UnitStatus::Cancelled => text.yellow().to_string(),
            UnitStatus::Pending | UnitStatus::InProgress => text,
        }
    }

    /// Formats a change with color.
    fn format_change(change: UnitChange) -> String {
        match change {
            UnitChange::Create => "+create".green().to_string(),
            UnitChange::Update => "~update".yellow().to_string(),
            UnitChange::NoChange => "no-change".dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceDescriptor, ResourceKind};
    use crate::planner::{DependencyGraph, PlanCompiler};

    fn plan() -> Plan {
        let graph = DependencyGraph::build(
            "1",
            &[
                ResourceDescriptor::new("primaryKey", ResourceKind::Key, "us-west-1"),
                ResourceDescriptor::new("replicaKey", ResourceKind::Key, "us-east-2")
                    .with_reference("primaryKey"),
            ],
        )
        .unwrap();
        PlanCompiler::new().compile(&graph)
    }

    #[test]
    fn test_plan_json_lists_batches() {
        let json = OutputFormatter::new(OutputFormat::Json).format_plan(&plan(), false);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["batches"], serde_json::json!([["primaryKey"], ["replicaKey"]]));
        assert_eq!(value["units"]["replicaKey"]["change"], "create");
    }

    #[test]
    fn test_plan_text_mentions_units() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan(), true);

        assert!(text.contains("replicaKey"));
        assert!(text.contains("-> primaryKey"));
        assert!(text.contains("2 to create"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("a-very-long-reference", 10), "a-very-...");
    }

    #[test]
    fn test_json_message() {
        let message = OutputFormatter::new(OutputFormat::Json).message("success", "done");
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["message"], "done");
    }
}

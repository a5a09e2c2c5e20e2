//! Planning and orchestration of deployment units.
//!
//! This module turns validated descriptors into a dependency graph, compiles
//! the graph into batches, and applies the batches against a provider.

mod graph;
mod plan;
mod report;
mod executor;

pub use graph::{DependencyGraph, DeploymentUnit};
pub use plan::{Plan, PlanCompiler, PlannedUnit, UnitChange};
pub use report::{ApplyReport, DecommissionReport, UnitReport, UnitStatus};
pub use executor::{EngineOptions, Orchestrator};

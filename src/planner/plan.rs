//! Deployment plan types and compilation.
//!
//! A plan is a sequence of batches. Every unit of a batch depends only on
//! units of earlier batches, so the units of one batch can be applied
//! concurrently.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::ContentHasher;
use crate::state::{StateSnapshot, UnitKey};

use super::graph::{DependencyGraph, DeploymentUnit};

/// A compiled deployment plan.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// When the plan was compiled.
    pub created_at: DateTime<Utc>,
    /// Hash over every unit hash, in plan order.
    pub plan_hash: String,
    /// Unit ids per batch; ascending within a batch.
    pub batches: Vec<Vec<String>>,
    /// Planned units by id.
    pub units: BTreeMap<String, PlannedUnit>,
    /// Stored units no longer declared by the document.
    pub decommissioned: Vec<UnitKey>,
}

/// A unit scheduled in a plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedUnit {
    /// The unit itself.
    pub unit: DeploymentUnit,
    /// Zero-based batch index.
    pub batch: usize,
    /// Content hash of the unit's descriptors.
    pub content_hash: String,
    /// Change relative to the stored state.
    pub change: UnitChange,
    /// Units that directly depend on this one.
    pub dependents: BTreeSet<String>,
}

/// Change classification of a planned unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitChange {
    /// No stored state exists for the unit.
    Create,
    /// Stored state exists with a different hash.
    Update,
    /// Stored state matches; the unit will be skipped.
    NoChange,
}

/// Compiles dependency graphs into plans.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanCompiler {
    hasher: ContentHasher,
}

impl PlanCompiler {
    /// Creates a new plan compiler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ContentHasher::new(),
        }
    }

    /// Compiles a graph without consulting stored state.
    ///
    /// Every unit is classified as a create.
    #[must_use]
    pub fn compile(&self, graph: &DependencyGraph) -> Plan {
        self.compile_with_state(graph, &StateSnapshot::new())
    }

    /// Compiles a graph and classifies each unit against a state snapshot.
    #[must_use]
    pub fn compile_with_state(&self, graph: &DependencyGraph, snapshot: &StateSnapshot) -> Plan {
        let batches = topological_batches(graph);

        let mut dependents: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        for (id, unit) in graph.units() {
            for dependency in &unit.depends_on {
                dependents
                    .entry(dependency.as_str())
                    .or_default()
                    .insert(id.clone());
            }
        }

        let mut units = BTreeMap::new();
        for (batch, ids) in batches.iter().enumerate() {
            for id in ids {
                let Some(unit) = graph.units().get(id) else {
                    continue;
                };

                let content_hash =
                    self.hasher
                        .hash_unit(&unit.id, &unit.account, &unit.region, &unit.descriptors);
                let change = match snapshot.content_hash(&unit.key()) {
                    None => UnitChange::Create,
                    Some(stored) if ContentHasher::hashes_match(stored, &content_hash) => {
                        UnitChange::NoChange
                    }
                    Some(_) => UnitChange::Update,
                };

                units.insert(
                    id.clone(),
                    PlannedUnit {
                        unit: unit.clone(),
                        batch,
                        content_hash,
                        change,
                        dependents: dependents.remove(id.as_str()).unwrap_or_default(),
                    },
                );
            }
        }

        let declared: BTreeSet<UnitKey> = graph.units().values().map(DeploymentUnit::key).collect();
        let decommissioned: Vec<UnitKey> = snapshot
            .keys()
            .filter(|key| !declared.contains(*key))
            .cloned()
            .collect();

        let plan_hash = self.hasher.hash_plan(
            batches
                .iter()
                .flatten()
                .filter_map(|id| units.get(id).map(|u| (id.as_str(), u.content_hash.as_str()))),
        );

        debug!(
            "Compiled plan: {} units in {} batches, {} decommissioned",
            units.len(),
            batches.len(),
            decommissioned.len()
        );

        Plan {
            created_at: Utc::now(),
            plan_hash,
            batches,
            units,
            decommissioned,
        }
    }
}

/// Kahn's algorithm, emitting every zero in-degree unit of a step as one
/// batch in ascending id order.
fn topological_batches(graph: &DependencyGraph) -> Vec<Vec<String>> {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (id, unit) in graph.units() {
        in_degree.insert(id.as_str(), unit.depends_on.len());
        for dependency in &unit.depends_on {
            dependents
                .entry(dependency.as_str())
                .or_default()
                .push(id.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut batches = Vec::new();

    while !ready.is_empty() {
        let mut next = BTreeSet::new();
        for id in &ready {
            for dependent in dependents.get(id).map_or(&[][..], Vec::as_slice) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.insert(*dependent);
                    }
                }
            }
        }
        batches.push(ready.iter().map(ToString::to_string).collect());
        ready = next;
    }

    batches
}

impl Plan {
    /// Gets a planned unit by id.
    #[must_use]
    pub fn unit(&self, id: &str) -> Option<&PlannedUnit> {
        self.units.get(id)
    }

    /// Returns planned units in batch order.
    pub fn ordered_units(&self) -> impl Iterator<Item = &PlannedUnit> {
        self.batches
            .iter()
            .flatten()
            .filter_map(|id| self.units.get(id))
    }

    /// Returns the number of batches.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Returns the number of units.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Returns the number of units with the given change.
    #[must_use]
    pub fn change_count(&self, change: UnitChange) -> usize {
        self.units.values().filter(|u| u.change == change).count()
    }

    /// Returns true if applying the plan would change nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.decommissioned.is_empty()
            && self.units.values().all(|u| u.change == UnitChange::NoChange)
    }

    /// Returns every unit that transitively depends on `id`.
    #[must_use]
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut stack = vec![id.to_string()];

        while let Some(current) = stack.pop() {
            let Some(planned) = self.units.get(&current) else {
                continue;
            };
            for dependent in &planned.dependents {
                if found.insert(dependent.clone()) {
                    stack.push(dependent.clone());
                }
            }
        }

        found
    }
}

impl std::fmt::Display for UnitChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::NoChange => "no-change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.units.is_empty() && self.decommissioned.is_empty() {
            return write!(f, "Nothing to deploy");
        }

        writeln!(
            f,
            "Deployment Plan ({} units in {} batches):",
            self.units.len(),
            self.batches.len()
        )?;
        for (i, batch) in self.batches.iter().enumerate() {
            writeln!(f, "  Batch {}:", i + 1)?;
            for id in batch {
                if let Some(planned) = self.units.get(id) {
                    writeln!(
                        f,
                        "    {} ({}) [{}]",
                        id, planned.unit.region, planned.change
                    )?;
                }
            }
        }

        if !self.decommissioned.is_empty() {
            writeln!(f, "  Decommission:")?;
            for key in &self.decommissioned {
                writeln!(f, "    {key}")?;
            }
        }

        Ok(())
    }
}

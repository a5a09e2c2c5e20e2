//! Dependency graph construction.
//!
//! Descriptors are grouped into deployment units (stacks), and the
//! references between descriptors become edges between units. Cycles are
//! rejected here, before any plan is compiled.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::config::{DeployConfig, ResourceDescriptor};
use crate::error::{GraphError, Result, StrataError, ValidationError};
use crate::state::UnitKey;

/// A region-scoped group of descriptors applied together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentUnit {
    /// Unit id (stack name, or the descriptor id for standalone resources).
    pub id: String,
    /// Region every descriptor of the unit targets.
    pub region: String,
    /// Account the unit is deployed into.
    pub account: String,
    /// Descriptors owned by this unit, in ascending id order.
    pub descriptors: Vec<ResourceDescriptor>,
    /// Units this unit depends on.
    pub depends_on: BTreeSet<String>,
}

impl DeploymentUnit {
    /// Returns the state store key of this unit.
    #[must_use]
    pub fn key(&self) -> UnitKey {
        UnitKey::new(&self.region, &self.id)
    }

    /// Returns the ids of the descriptors in this unit.
    #[must_use]
    pub fn descriptor_ids(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.id.clone()).collect()
    }
}

/// DFS colouring for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Directed acyclic graph of descriptors and the units that own them.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Descriptor ids in declaration order.
    order: Vec<String>,
    /// Edge A -> B for every reference from A to B.
    references: BTreeMap<String, Vec<String>>,
    /// Descriptor id -> owning unit id.
    membership: BTreeMap<String, String>,
    /// Units by id.
    units: BTreeMap<String, DeploymentUnit>,
}

impl DependencyGraph {
    /// Builds the graph for a validated document.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::CycleDetected` if the references form a cycle,
    /// or a validation error if a reference does not resolve.
    pub fn from_config(config: &DeployConfig) -> Result<Self> {
        Self::build(&config.account, &config.resources)
    }

    /// Builds the graph from descriptors whose regions are resolved.
    ///
    /// Descriptor-level cycles are reported first; unit-level cycles, which
    /// can appear when acyclic descriptors are grouped into stacks, second.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::CycleDetected` if either level contains a cycle,
    /// or a validation error if a reference does not resolve.
    pub fn build(account: &str, descriptors: &[ResourceDescriptor]) -> Result<Self> {
        let order: Vec<String> = descriptors.iter().map(|d| d.id.clone()).collect();
        let by_id: HashMap<&str, &ResourceDescriptor> =
            descriptors.iter().map(|d| (d.id.as_str(), d)).collect();

        let mut references = BTreeMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for descriptor in descriptors {
            for reference in &descriptor.references {
                if !by_id.contains_key(reference.as_str()) {
                    return Err(StrataError::Validation(ValidationError::DanglingReference {
                        id: descriptor.id.clone(),
                        reference: reference.clone(),
                    }));
                }
                dependents
                    .entry(reference.as_str())
                    .or_default()
                    .push(descriptor.id.as_str());
            }
            references.insert(descriptor.id.clone(), descriptor.references.clone());
        }

        let roots: Vec<&str> = order.iter().map(String::as_str).collect();
        if let Some(cycle) = find_cycle(&roots, &dependents) {
            return Err(StrataError::Graph(GraphError::CycleDetected { cycle }));
        }

        let membership: BTreeMap<String, String> = descriptors
            .iter()
            .map(|d| (d.id.clone(), d.unit_id().to_string()))
            .collect();

        let mut units: BTreeMap<String, DeploymentUnit> = BTreeMap::new();
        let mut unit_order: Vec<String> = Vec::new();
        for descriptor in descriptors {
            let unit_id = descriptor.unit_id();
            let unit = units.entry(unit_id.to_string()).or_insert_with(|| {
                unit_order.push(unit_id.to_string());
                DeploymentUnit {
                    id: unit_id.to_string(),
                    region: descriptor.region.clone(),
                    account: account.to_string(),
                    descriptors: Vec::new(),
                    depends_on: BTreeSet::new(),
                }
            });
            unit.descriptors.push(descriptor.clone());

            let foreign = descriptor
                .references
                .iter()
                .filter_map(|reference| membership.get(reference))
                .filter(|target| target.as_str() != unit_id);
            for target in foreign {
                unit.depends_on.insert(target.clone());
            }
        }

        for unit in units.values_mut() {
            unit.descriptors.sort_by(|a, b| a.id.cmp(&b.id));
        }

        let mut unit_dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for unit_id in &unit_order {
            if let Some(unit) = units.get(unit_id) {
                for dependency in &unit.depends_on {
                    unit_dependents
                        .entry(dependency.as_str())
                        .or_default()
                        .push(unit_id.as_str());
                }
            }
        }

        let unit_roots: Vec<&str> = unit_order.iter().map(String::as_str).collect();
        if let Some(cycle) = find_cycle(&unit_roots, &unit_dependents) {
            return Err(StrataError::Graph(GraphError::CycleDetected { cycle }));
        }

        debug!(
            "Built dependency graph: {} descriptors in {} units",
            order.len(),
            units.len()
        );

        Ok(Self {
            order,
            references,
            membership,
            units,
        })
    }

    /// Returns all units, keyed by id.
    #[must_use]
    pub const fn units(&self) -> &BTreeMap<String, DeploymentUnit> {
        &self.units
    }

    /// Looks up a unit by id.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::UnknownUnit` if the graph has no such unit.
    pub fn unit(&self, id: &str) -> std::result::Result<&DeploymentUnit, GraphError> {
        self.units.get(id).ok_or_else(|| GraphError::UnknownUnit {
            unit: id.to_string(),
        })
    }

    /// Returns the unit that owns a descriptor.
    #[must_use]
    pub fn unit_of(&self, descriptor_id: &str) -> Option<&str> {
        self.membership.get(descriptor_id).map(String::as_str)
    }

    /// Returns the references of a descriptor.
    #[must_use]
    pub fn references_of(&self, descriptor_id: &str) -> &[String] {
        self.references
            .get(descriptor_id)
            .map_or(&[], Vec::as_slice)
    }

    /// Returns descriptor ids in declaration order.
    #[must_use]
    pub fn descriptor_ids(&self) -> &[String] {
        &self.order
    }

    /// Returns the number of units.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Returns the number of descriptors.
    #[must_use]
    pub fn descriptor_count(&self) -> usize {
        self.order.len()
    }
}

/// Finds a cycle by depth-first search over dependency -> dependent edges.
///
/// Roots and neighbours are visited in the given order, so the reported
/// cycle is deterministic and reads in deployment order.
fn find_cycle(roots: &[&str], dependents: &HashMap<&str, Vec<&str>>) -> Option<Vec<String>> {
    let mut colors: HashMap<&str, Color> = roots.iter().map(|r| (*r, Color::White)).collect();
    let mut path: Vec<&str> = Vec::new();

    for root in roots {
        if colors.get(root).copied() != Some(Color::White) {
            continue;
        }
        if let Some(cycle) = visit(root, dependents, &mut colors, &mut path) {
            return Some(cycle);
        }
    }

    None
}

fn visit<'a>(
    node: &'a str,
    dependents: &HashMap<&'a str, Vec<&'a str>>,
    colors: &mut HashMap<&'a str, Color>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    colors.insert(node, Color::Gray);
    path.push(node);

    for &next in dependents.get(node).map_or(&[][..], Vec::as_slice) {
        match colors.get(next).copied().unwrap_or(Color::White) {
            Color::Gray => {
                let start = path.iter().position(|p| *p == next).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(ToString::to_string).collect();
                cycle.push(next.to_string());
                return Some(cycle);
            }
            Color::White => {
                if let Some(cycle) = visit(next, dependents, colors, path) {
                    return Some(cycle);
                }
            }
            Color::Black => {}
        }
    }

    path.pop();
    colors.insert(node, Color::Black);
    None
}

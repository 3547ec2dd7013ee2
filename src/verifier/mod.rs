//! Post-failover consistency checks.
//!
//! [`verify`] is pure: it only compares views and never touches the cluster.


use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use tracing::error;

use crate::ConsistencyError;
use crate::Deployment;
use crate::NodeId;
use crate::RegistrySnapshot;
use crate::Result;
use crate::UnitKey;

/// Node → deployments, one entry per node that was snapshotted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterView {
    nodes: BTreeMap<NodeId, Vec<Deployment>>,
}

impl ClusterView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        node_id: NodeId,
        deployments: Vec<Deployment>,
    ) {
        self.nodes.insert(node_id, deployments);
    }

    pub fn insert_snapshot(
        &mut self,
        snapshot: RegistrySnapshot,
    ) {
        self.insert(snapshot.node_id, snapshot.deployments);
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn contains(
        &self,
        node_id: NodeId,
    ) -> bool {
        self.nodes.contains_key(&node_id)
    }

    pub fn deployments_on(
        &self,
        node_id: NodeId,
    ) -> &[Deployment] {
        self.nodes.get(&node_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn deployments(&self) -> impl Iterator<Item = &Deployment> {
        self.nodes.values().flatten()
    }

    /// Same view with `node_id` left out
    pub fn without(
        &self,
        node_id: NodeId,
    ) -> Self {
        let mut view = self.clone();
        view.nodes.remove(&node_id);
        view
    }

    pub fn total(&self) -> usize {
        self.nodes.values().map(Vec::len).sum()
    }

    pub fn ha_units(&self) -> usize {
        self.deployments().filter(|d| d.ha).count()
    }

    /// How many deployments of `unit` sit on `node_id`
    pub fn count_of(
        &self,
        node_id: NodeId,
        unit: &UnitKey,
    ) -> usize {
        self.deployments_on(node_id)
            .iter()
            .filter(|d| d.unit_name == unit.unit_name && d.config == unit.config)
            .count()
    }
}

/// What a failover was supposed to do
#[derive(Debug, Clone)]
pub struct FailoverCheck<'a> {
    pub dead_node: NodeId,
    /// Frozen registry of the dead node
    pub dead_snapshot: &'a RegistrySnapshot,
    /// `None` when the failover ended with no survivors
    pub target: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyViolation {
    /// Fewer copies of `unit` on `node` than expected
    Missing {
        unit: UnitKey,
        node: NodeId,
        expected: usize,
        found: usize,
    },
    /// More copies of `unit` on `node` than expected
    Duplicated {
        unit: UnitKey,
        node: NodeId,
        expected: usize,
        found: usize,
    },
    /// `unit` went missing on some nodes and showed up on others
    Misplaced {
        unit: UnitKey,
        expected_on: Vec<NodeId>,
        found_on: Vec<NodeId>,
    },
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ConsistencyViolation::Missing {
                unit,
                node,
                expected,
                found,
            } => write!(f, "{unit} missing on node {node}: expected {expected}, found {found}"),
            ConsistencyViolation::Duplicated {
                unit,
                node,
                expected,
                found,
            } => write!(f, "{unit} duplicated on node {node}: expected {expected}, found {found}"),
            ConsistencyViolation::Misplaced {
                unit,
                expected_on,
                found_on,
            } => write!(f, "{unit} expected on nodes {expected_on:?} but found on {found_on:?}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub violations: Vec<ConsistencyViolation>,
}

impl ValidationResult {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }

    /// Turns violations into a loud error.
    pub fn into_result(self) -> Result<()> {
        if self.is_consistent() {
            return Ok(());
        }
        for violation in &self.violations {
            error!("consistency violation: {}", violation);
        }
        Err(ConsistencyError(self.violations).into())
    }
}

/// Compares the cluster before and after a failover.
///
/// `before` holds the nodes that stay alive, as they were right before the
/// death. `after` is the view once the failover completed. Every unit on a
/// surviving node must still be on that node in the same multiplicity, and the
/// target must additionally carry exactly one copy of each HA unit of the dead
/// node. Non-HA units of the dead node are expected nowhere. With no target the
/// dead node's units are expected nowhere either.
pub fn verify(
    before: &ClusterView,
    after: &ClusterView,
    check: &FailoverCheck<'_>,
) -> ValidationResult {
    let mut expected: BTreeMap<UnitKey, BTreeMap<NodeId, usize>> = BTreeMap::new();
    for node_id in before.nodes().filter(|n| *n != check.dead_node) {
        for deployment in before.deployments_on(node_id) {
            *expected
                .entry(deployment.unit_key())
                .or_default()
                .entry(node_id)
                .or_default() += 1;
        }
    }
    if let Some(target) = check.target {
        for deployment in check.dead_snapshot.ha_deployments() {
            *expected
                .entry(deployment.unit_key())
                .or_default()
                .entry(target)
                .or_default() += 1;
        }
    }

    let mut actual: BTreeMap<UnitKey, BTreeMap<NodeId, usize>> = BTreeMap::new();
    for node_id in after.nodes() {
        for deployment in after.deployments_on(node_id) {
            *actual
                .entry(deployment.unit_key())
                .or_default()
                .entry(node_id)
                .or_default() += 1;
        }
    }

    let units: BTreeSet<&UnitKey> = expected.keys().chain(actual.keys()).collect();
    let mut violations = Vec::new();
    for unit in units {
        let want = expected.get(unit);
        let have = actual.get(unit);
        let nodes: BTreeSet<NodeId> = want
            .into_iter()
            .chain(have)
            .flat_map(|per_node| per_node.keys().copied())
            .collect();

        let mut short = Vec::new();
        let mut excess = Vec::new();
        for node in nodes {
            let e = want.and_then(|m| m.get(&node)).copied().unwrap_or(0);
            let f = have.and_then(|m| m.get(&node)).copied().unwrap_or(0);
            if f < e {
                short.push((node, e, f));
            } else if f > e {
                excess.push((node, e, f));
            }
        }

        if !short.is_empty() && !excess.is_empty() {
            violations.push(ConsistencyViolation::Misplaced {
                unit: unit.clone(),
                expected_on: short.iter().map(|(n, _, _)| *n).collect(),
                found_on: excess.iter().map(|(n, _, _)| *n).collect(),
            });
            continue;
        }
        for (node, expected, found) in short {
            violations.push(ConsistencyViolation::Missing {
                unit: unit.clone(),
                node,
                expected,
                found,
            });
        }
        for (node, expected, found) in excess {
            violations.push(ConsistencyViolation::Duplicated {
                unit: unit.clone(),
                node,
                expected,
                found,
            });
        }
    }

    ValidationResult { violations }
}

/// Post-failover total expected across surviving nodes: everything that was
/// alive before the death, minus the dead node's non-HA units.
///
/// `before` is the full pre-death view, dead node included.
pub fn expected_total(
    before: &ClusterView,
    dead_snapshot: &RegistrySnapshot,
) -> usize {
    let lost = dead_snapshot.deployments.iter().filter(|d| !d.ha).count();
    before.total().saturating_sub(lost)
}

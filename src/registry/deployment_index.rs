//! Cluster-wide bookkeeping shared by the registry and every node worker.
//!
//! Workers write here before they reply, so a deploy that lands is recorded
//! even when its caller stopped waiting for the reply.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::Deployment;
use super::DeploymentId;
use crate::NodeId;

#[derive(Debug, Default)]
pub(crate) struct DeploymentIndex {
    /// Deployment → owning node. Retired ids are dropped from here.
    owners: DashMap<DeploymentId, NodeId>,
    /// Original deployment → the replacement that landed for it
    replacements: DashMap<DeploymentId, Deployment>,
    /// Original deployment → node whose worker holds its queued redeploy
    in_flight: DashMap<DeploymentId, NodeId>,
}

impl DeploymentIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(
        &self,
        deployment: &Deployment,
    ) {
        self.owners.insert(deployment.id.clone(), deployment.node_id);
    }

    pub(crate) fn forget(
        &self,
        deployment_id: &DeploymentId,
    ) -> bool {
        self.owners.remove(deployment_id).is_some()
    }

    pub(crate) fn owner(
        &self,
        deployment_id: &DeploymentId,
    ) -> Option<NodeId> {
        self.owners.get(deployment_id).map(|owner| *owner)
    }

    pub(crate) fn load_of(
        &self,
        node_id: NodeId,
    ) -> usize {
        self.owners.iter().filter(|e| *e.value() == node_id).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.owners.len()
    }

    /// First replacement wins; a later one for the same original is ignored.
    pub(crate) fn record_replacement(
        &self,
        original: &DeploymentId,
        replacement: &Deployment,
    ) {
        self.replacements
            .entry(original.clone())
            .or_insert_with(|| replacement.clone());
    }

    pub(crate) fn replacement_of(
        &self,
        original: &DeploymentId,
    ) -> Option<Deployment> {
        self.replacements.get(original).map(|r| r.clone())
    }

    /// Claims `original` for a redeploy on `node_id`. Fails while another
    /// claim is outstanding.
    pub(crate) fn claim(
        &self,
        original: &DeploymentId,
        node_id: NodeId,
    ) -> bool {
        match self.in_flight.entry(original.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(node_id);
                true
            }
        }
    }

    pub(crate) fn in_flight_on(
        &self,
        original: &DeploymentId,
    ) -> Option<NodeId> {
        self.in_flight.get(original).map(|node| *node)
    }

    /// Drops the claim of `node_id` on `original`, if it still holds it.
    pub(crate) fn settle(
        &self,
        original: &DeploymentId,
        node_id: NodeId,
    ) {
        self.in_flight.remove_if(original, |_, owner| *owner == node_id);
    }
}

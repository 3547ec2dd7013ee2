//! Cluster-visible view over every node's registry worker.
//!
//! Workers are created and frozen from membership hooks, so by the time a
//! `NodeFailed` event reaches any listener the dead node's worker already has
//! the freeze queued ahead of whatever that listener asks next.
//!
//! Ownership lives in a [`DeploymentIndex`] that the workers update themselves,
//! so a unit that landed on a node is visible to that node's own failover
//! whether or not the deploying caller is still around.

use std::sync::Arc;

use autometrics::autometrics;
use dashmap::DashMap;
use futures::future::join_all;
use tracing::debug;
use tracing::error;

use super::DeployRequest;
use super::Deployment;
use super::DeploymentId;
use super::DeploymentIndex;
use super::NodeRegistryHandle;
use super::RegistrySnapshot;
use crate::engine::ExecutionEngine;
use crate::verifier::ClusterView;
use crate::ClusterMonitor;
use crate::Error;
use crate::MembershipError;
use crate::MembershipHook;
use crate::NodeId;
use crate::NodeState;
use crate::RegistryError;
use crate::Result;
use crate::UnitConfig;
use crate::API_SLO;

pub struct DeploymentRegistry {
    monitor: Arc<ClusterMonitor>,
    engine: Arc<dyn ExecutionEngine>,
    workers: DashMap<NodeId, NodeRegistryHandle>,
    index: Arc<DeploymentIndex>,
    max_units_per_node: usize,
}

impl std::fmt::Debug for DeploymentRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DeploymentRegistry")
            .field("nodes", &self.workers.len())
            .field("deployments", &self.index.len())
            .finish()
    }
}

impl MembershipHook for DeploymentRegistry {
    fn on_join(
        &self,
        node_id: NodeId,
    ) {
        self.ensure_worker(node_id);
    }

    fn on_dead(
        &self,
        node_id: NodeId,
    ) {
        match self.workers.get(&node_id) {
            Some(worker) => worker.freeze(),
            None => error!("node {} died without a registry worker", node_id),
        }
    }
}

impl DeploymentRegistry {
    /// Creates the registry and hooks it into `monitor`. Nodes that are
    /// already members get a worker immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        monitor: Arc<ClusterMonitor>,
        engine: Arc<dyn ExecutionEngine>,
        max_units_per_node: usize,
    ) -> Arc<Self> {
        let registry = Arc::new(Self {
            monitor: monitor.clone(),
            engine,
            workers: DashMap::new(),
            index: Arc::new(DeploymentIndex::new()),
            max_units_per_node,
        });
        monitor.register_hook(registry.clone());

        for (node_id, state) in monitor.members() {
            registry.ensure_worker(node_id);
            if state == NodeState::Dead {
                registry.on_dead(node_id);
            }
        }

        registry
    }

    /// Deploys a unit on an ALIVE node and returns its fresh identifier.
    ///
    /// # Errors
    /// - `UnknownNode` if the node was never seen
    /// - `NodeNotAlive` if the node is SUSPECTED or DEAD
    /// - `CapacityExceeded` when the node is full
    /// - `DeploymentExecution` from the engine
    #[autometrics(objective = API_SLO)]
    pub async fn deploy(
        &self,
        node_id: NodeId,
        unit_name: impl Into<String> + Send,
        config: UnitConfig,
        ha: bool,
    ) -> Result<DeploymentId> {
        let request = DeployRequest {
            unit_name: unit_name.into(),
            config,
            ha,
            enforce_capacity: true,
            origin: None,
        };
        self.check_alive(node_id)?;
        self.worker(node_id)?.deploy(request).await.map(|d| d.id)
    }

    /// Failover path: same name and configuration, new identifier, always HA,
    /// exempt from the capacity limit.
    ///
    /// Idempotent per original. Once a replacement of `original` landed
    /// anywhere it is returned instead of starting another copy, and a
    /// redeploy still queued from an earlier attempt is waited for first.
    ///
    /// # Errors
    /// - `NodeNotAlive` if `node_id` is not ALIVE
    /// - `RedeployInFlight` if another attempt claimed `original` meanwhile
    /// - `DeploymentExecution` from the engine
    pub(crate) async fn redeploy(
        &self,
        node_id: NodeId,
        original: &Deployment,
    ) -> Result<Deployment> {
        if let Some(existing) = self.settle(original).await {
            return Ok(existing);
        }

        self.check_alive(node_id)?;
        let worker = self.worker(node_id)?;
        if !self.index.claim(&original.id, node_id) {
            return Err(RegistryError::RedeployInFlight {
                deployment_id: original.id.clone(),
            }
            .into());
        }

        let request = DeployRequest {
            unit_name: original.unit_name.clone(),
            config: original.config.clone(),
            ha: true,
            enforce_capacity: false,
            origin: Some(original.id.clone()),
        };
        let result = worker.deploy(request).await;
        if let Err(Error::Registry(RegistryError::WorkerUnavailable { .. })) = &result {
            self.index.settle(&original.id, node_id);
        }
        result
    }

    /// Waits out any redeploy of `original` still queued on some worker, then
    /// returns the replacement that landed for it, if one did.
    pub(crate) async fn settle(
        &self,
        original: &Deployment,
    ) -> Option<Deployment> {
        if let Some(pending_on) = self.index.in_flight_on(&original.id) {
            debug!(
                "redeploy of {} still queued on node {}, waiting for it",
                original.id, pending_on
            );
            // FIFO worker: once this snapshot returns the queued redeploy
            // has finished one way or the other.
            if let Err(e) = self.snapshot(pending_on).await {
                error!("registry of node {} unreachable: {}", pending_on, e);
                self.index.settle(&original.id, pending_on);
            }
        }
        self.index.replacement_of(&original.id)
    }

    pub(crate) fn replacement_of(
        &self,
        original: &DeploymentId,
    ) -> Option<Deployment> {
        self.index.replacement_of(original)
    }

    /// # Errors
    /// - `UnknownNode` if the node was never seen
    /// - `NodeNotAlive` if the node is DEAD (its registry is frozen)
    /// - `NotFound` if `deployment_id` is not on that node
    #[autometrics(objective = API_SLO)]
    pub async fn undeploy(
        &self,
        node_id: NodeId,
        deployment_id: &DeploymentId,
    ) -> Result<()> {
        self.worker(node_id)?.undeploy(deployment_id.clone()).await?;
        Ok(())
    }

    /// Point-in-time copy of a node's deployments. For a dead node this is the
    /// frozen state recorded at death.
    #[autometrics(objective = API_SLO)]
    pub async fn snapshot(
        &self,
        node_id: NodeId,
    ) -> Result<RegistrySnapshot> {
        self.worker(node_id)?.snapshot().await
    }

    /// Snapshots of every ALIVE node, taken concurrently.
    pub async fn cluster_view(&self) -> Result<ClusterView> {
        self.view_of(&self.monitor.alive_nodes()).await
    }

    /// Snapshots of the given nodes, taken concurrently.
    pub async fn view_of(
        &self,
        nodes: &[NodeId],
    ) -> Result<ClusterView> {
        let snapshots = join_all(nodes.iter().map(|node_id| self.snapshot(*node_id))).await;

        let mut view = ClusterView::default();
        for snapshot in snapshots {
            view.insert_snapshot(snapshot?);
        }
        Ok(view)
    }

    /// Owning node of a live (non-retired) deployment
    pub fn locate(
        &self,
        deployment_id: &DeploymentId,
    ) -> Option<NodeId> {
        self.index.owner(deployment_id)
    }

    /// Drops a migrated deployment from the ownership index; its frozen
    /// snapshot entry is left untouched.
    pub(crate) fn retire(
        &self,
        deployment_id: &DeploymentId,
    ) {
        if self.index.forget(deployment_id) {
            debug!("retired deployment {}", deployment_id);
        }
    }

    /// Number of deployments currently owned by `node_id`
    pub fn load_of(
        &self,
        node_id: NodeId,
    ) -> usize {
        self.index.load_of(node_id)
    }

    fn check_alive(
        &self,
        node_id: NodeId,
    ) -> Result<()> {
        match self.monitor.state(node_id) {
            None => Err(MembershipError::UnknownNode { node_id }.into()),
            Some(NodeState::Alive) => Ok(()),
            Some(_) => Err(RegistryError::NodeNotAlive { node_id }.into()),
        }
    }

    fn worker(
        &self,
        node_id: NodeId,
    ) -> Result<NodeRegistryHandle> {
        if let Some(worker) = self.workers.get(&node_id) {
            return Ok(worker.clone());
        }
        match self.monitor.state(node_id) {
            None => Err(MembershipError::UnknownNode { node_id }.into()),
            Some(_) => Err(RegistryError::WorkerUnavailable { node_id }.into()),
        }
    }

    fn ensure_worker(
        &self,
        node_id: NodeId,
    ) {
        if self.workers.contains_key(&node_id) {
            return;
        }
        match NodeRegistryHandle::spawn(
            node_id,
            self.engine.clone(),
            self.index.clone(),
            self.max_units_per_node,
        ) {
            Ok(handle) => {
                self.workers.entry(node_id).or_insert(handle);
            }
            Err(e) => error!("failed to start registry worker for node {}: {:?}", node_id, e),
        }
    }
}

//! Wiring of every HA component behind one handle.
//!
//! [`HaClusterBuilder`] assembles the membership monitor, the deployment
//! registry, the failover coordinator and its notifier, then optionally starts
//! the failure detector and the metrics exporter.
//!
//! ## Example
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let cluster = HaClusterBuilder::new(config, shutdown_rx)
//!     .engine(my_engine)
//!     .build()?
//!     .start_failure_detector()
//!     .start_metrics_server(shutdown_tx.subscribe())
//!     .ready()?;
//!
//! let id = cluster.deploy(1, "web", UnitConfig::new(), true).await?;
//! cluster.kill(1)?;
//! let event = cluster.wait_for_failover(1).await?;
//! ```

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;

use crate::engine::ExecutionEngine;
use crate::engine::LocalExecutionEngine;
use crate::metrics;
use crate::utils::async_task::spawn_task;
use crate::verifier::ClusterView;
use crate::ClusterMonitor;
use crate::DeploymentId;
use crate::DeploymentRegistry;
use crate::Error;
use crate::FailoverCoordinator;
use crate::FailoverEvent;
use crate::FailoverLock;
use crate::FailoverNotifier;
use crate::FailoverState;
use crate::HaNodeConfig;
use crate::HeartbeatDetector;
use crate::LocalFailoverLock;
use crate::MembershipEvent;
use crate::NodeId;
use crate::NodeState;
use crate::RegistrySnapshot;
use crate::Result;
use crate::UnitConfig;

/// Operator and test facing handle over one HA coordinator instance.
pub struct HaCluster {
    config: HaNodeConfig,
    monitor: Arc<ClusterMonitor>,
    registry: Arc<DeploymentRegistry>,
    coordinator: Arc<FailoverCoordinator>,
    notifier: Arc<FailoverNotifier>,
    detector: Arc<HeartbeatDetector>,
}

impl std::fmt::Debug for HaCluster {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("HaCluster")
            .field("member_id", &self.config.cluster.member_id)
            .field("monitor", &self.monitor)
            .finish()
    }
}

impl HaCluster {
    pub fn member_id(&self) -> NodeId {
        self.config.cluster.member_id
    }

    pub fn config(&self) -> &HaNodeConfig {
        &self.config
    }

    pub fn join(
        &self,
        node_id: NodeId,
    ) -> Result<()> {
        self.monitor.join(node_id)
    }

    pub fn heartbeat(
        &self,
        node_id: NodeId,
    ) -> Result<()> {
        self.detector.heartbeat(node_id)
    }

    /// Declares `node_id` dead. Returns `false` if it already was.
    pub fn kill(
        &self,
        node_id: NodeId,
    ) -> Result<bool> {
        self.monitor.mark_dead(node_id)
    }

    pub async fn deploy(
        &self,
        node_id: NodeId,
        unit_name: impl Into<String> + Send,
        config: UnitConfig,
        ha: bool,
    ) -> Result<DeploymentId> {
        self.registry.deploy(node_id, unit_name, config, ha).await
    }

    pub async fn undeploy(
        &self,
        node_id: NodeId,
        deployment_id: &DeploymentId,
    ) -> Result<()> {
        self.registry.undeploy(node_id, deployment_id).await
    }

    pub async fn snapshot(
        &self,
        node_id: NodeId,
    ) -> Result<RegistrySnapshot> {
        self.registry.snapshot(node_id).await
    }

    /// Every ALIVE node's deployments
    pub async fn cluster_view(&self) -> Result<ClusterView> {
        self.registry.cluster_view().await
    }

    pub fn node_state(
        &self,
        node_id: NodeId,
    ) -> Option<NodeState> {
        self.monitor.state(node_id)
    }

    pub fn alive_nodes(&self) -> Vec<NodeId> {
        self.monitor.alive_nodes()
    }

    pub fn locate(
        &self,
        deployment_id: &DeploymentId,
    ) -> Option<NodeId> {
        self.registry.locate(deployment_id)
    }

    /// `onNodeFailed` and every other membership transition
    pub fn subscribe_membership(&self) -> mpsc::UnboundedReceiver<MembershipEvent> {
        self.monitor.subscribe()
    }

    /// `onFailoverComplete` events
    pub fn subscribe_failovers(&self) -> broadcast::Receiver<FailoverEvent> {
        self.notifier.subscribe()
    }

    /// Rounds that left units behind; each is driven again automatically
    pub fn subscribe_failover_failures(&self) -> broadcast::Receiver<FailoverEvent> {
        self.notifier.subscribe_failures()
    }

    /// Waits for the failover of `dead_node`, bounded by `ha.failover_timeout`.
    pub async fn wait_for_failover(
        &self,
        dead_node: NodeId,
    ) -> Result<FailoverEvent> {
        self.notifier
            .wait_for(dead_node, self.config.ha.failover_timeout())
            .await
    }

    pub fn failover_state(
        &self,
        dead_node: NodeId,
    ) -> Option<FailoverState> {
        self.coordinator.state_of(dead_node)
    }

    pub fn monitor(&self) -> &Arc<ClusterMonitor> {
        &self.monitor
    }

    pub fn registry(&self) -> &Arc<DeploymentRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &Arc<FailoverCoordinator> {
        &self.coordinator
    }
}

/// Fluent construction of an [`HaCluster`].
pub struct HaClusterBuilder {
    pub(crate) config: HaNodeConfig,
    pub(crate) engine: Option<Arc<dyn ExecutionEngine>>,
    pub(crate) lock: Option<Arc<dyn FailoverLock>>,
    pub(crate) shutdown_signal: watch::Receiver<()>,

    pub(crate) cluster: Option<Arc<HaCluster>>,
}

impl HaClusterBuilder {
    /// Starts from an already loaded configuration.
    pub fn new(
        config: HaNodeConfig,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        Self {
            config,
            engine: None,
            lock: None,
            shutdown_signal,
            cluster: None,
        }
    }

    /// Loads defaults, `CONFIG_PATH` and `HA__*` env vars, then the optional
    /// `config_path` override, and validates the result.
    pub fn from_config_path(
        config_path: Option<&str>,
        shutdown_signal: watch::Receiver<()>,
    ) -> Result<Self> {
        let mut config = HaNodeConfig::new()?;
        if let Some(p) = config_path {
            info!("with_override_config from: {}", p);
            config = config.with_override_config(p)?;
        }
        Ok(Self::new(config.validate()?, shutdown_signal))
    }

    /// Execution engine used to start and stop units. Defaults to
    /// [`LocalExecutionEngine`].
    pub fn engine(
        mut self,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Lock shared with other coordinators. Defaults to a private
    /// [`LocalFailoverLock`].
    pub fn failover_lock(
        mut self,
        lock: Arc<dyn FailoverLock>,
    ) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Validates the configuration, wires every component, joins
    /// `cluster.initial_nodes` and starts the failover coordinator.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(mut self) -> Result<Self> {
        let config = self.config.clone().validate()?;

        let engine = self
            .engine
            .take()
            .unwrap_or_else(|| Arc::new(LocalExecutionEngine::new()) as Arc<dyn ExecutionEngine>);
        let lock = self
            .lock
            .take()
            .unwrap_or_else(|| Arc::new(LocalFailoverLock::new()) as Arc<dyn FailoverLock>);

        let monitor = Arc::new(ClusterMonitor::new());
        let registry = DeploymentRegistry::new(monitor.clone(), engine, config.ha.max_units_per_node);
        let notifier = Arc::new(FailoverNotifier::new(config.ha.event_buffer_size));
        let coordinator = Arc::new(FailoverCoordinator::new(
            config.cluster.member_id,
            config.ha.clone(),
            config.retry.redeploy,
            monitor.clone(),
            registry.clone(),
            lock,
            notifier.clone(),
        ));
        let detector = Arc::new(HeartbeatDetector::new(monitor.clone(), config.membership.clone()));

        if coordinator.clone().start(self.shutdown_signal.clone()).is_some() {
            debug!("failover coordinator {} listening", config.cluster.member_id);
        }

        for node_id in &config.cluster.initial_nodes {
            monitor.join(*node_id)?;
        }

        info!(
            "HA coordinator {} ready with {} initial node(s)",
            config.cluster.member_id,
            config.cluster.initial_nodes.len()
        );
        self.cluster = Some(Arc::new(HaCluster {
            config,
            monitor,
            registry,
            coordinator,
            notifier,
            detector,
        }));
        Ok(self)
    }

    /// Spawns the heartbeat sweep loop. Without it nodes only die through
    /// [`HaCluster::kill`].
    pub fn start_failure_detector(self) -> Self {
        if let Some(ref cluster) = self.cluster {
            let detector = cluster.detector.clone();
            let shutdown = self.shutdown_signal.clone();
            spawn_task("heartbeat_detector", move || detector.run(shutdown), None);
        }
        self
    }

    /// Serves `/metrics` when `monitoring.prometheus_enabled` is set.
    pub fn start_metrics_server(
        self,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        if self.config.monitoring.prometheus_enabled {
            let port = self.config.monitoring.prometheus_port;
            tokio::spawn(async move {
                metrics::start_server(port, shutdown_signal).await;
            });
        }
        self
    }

    pub fn ready(self) -> Result<Arc<HaCluster>> {
        self.cluster
            .ok_or_else(|| Error::Fatal("HA cluster was not built".to_string()))
    }
}

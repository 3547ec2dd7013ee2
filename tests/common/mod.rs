use std::collections::BTreeMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use verticle_ha::verifier::expected_total;
use verticle_ha::verifier::verify;
use verticle_ha::verifier::ClusterView;
use verticle_ha::verifier::FailoverCheck;
use verticle_ha::Deployment;
use verticle_ha::ExecutionEngine;
use verticle_ha::ExecutionError;
use verticle_ha::FailoverEvent;
use verticle_ha::FailoverOutcome;
use verticle_ha::HaCluster;
use verticle_ha::HaClusterBuilder;
use verticle_ha::HaNodeConfig;
use verticle_ha::LocalExecutionEngine;
use verticle_ha::NodeId;
use verticle_ha::RegistrySnapshot;
use verticle_ha::Result;
use verticle_ha::UnitConfig;
use verticle_ha::UnitHandle;

pub struct TestCluster {
    pub cluster: Arc<HaCluster>,
    // Dropping the sender stops background tasks
    _shutdown_tx: watch::Sender<()>,
}

impl std::ops::Deref for TestCluster {
    type Target = HaCluster;

    fn deref(&self) -> &HaCluster {
        &self.cluster
    }
}

pub fn test_config(nodes: &[NodeId]) -> HaNodeConfig {
    let mut config = HaNodeConfig::default();
    config.cluster.initial_nodes = nodes.to_vec();
    config.ha.max_units_per_node = 0;
    config.ha.failover_timeout_in_ms = 5_000;
    config.retry.redeploy.base_delay_ms = 1;
    config.retry.redeploy.max_delay_ms = 10;
    config
}

pub fn start_cluster(nodes: &[NodeId]) -> TestCluster {
    start_cluster_with(test_config(nodes), Arc::new(LocalExecutionEngine::new()))
}

pub fn start_cluster_with(
    config: HaNodeConfig,
    engine: Arc<dyn ExecutionEngine>,
) -> TestCluster {
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let cluster = HaClusterBuilder::new(config, shutdown_rx)
        .engine(engine)
        .build()
        .expect("cluster builds")
        .ready()
        .expect("cluster ready");
    TestCluster {
        cluster,
        _shutdown_tx: shutdown_tx,
    }
}

pub fn unit_config(name: &str) -> UnitConfig {
    UnitConfig::new().with("unit", name).with("instances", "1")
}

/// Kills `node_id`, waits for its failover and checks conservation plus the
/// verifier against the views around the kill.
pub async fn kill_and_verify(
    cluster: &HaCluster,
    node_id: NodeId,
) -> FailoverEvent {
    let before = cluster.cluster_view().await.expect("view before kill");

    assert!(cluster.kill(node_id).expect("kill"));
    let dead_snapshot = cluster.snapshot(node_id).await.expect("dead snapshot");
    assert!(dead_snapshot.frozen);

    let event = cluster.wait_for_failover(node_id).await.expect("failover finishes");
    assert_eq!(event.dead_node, node_id);

    let after = cluster.cluster_view().await.expect("view after failover");
    let result = verify(
        &before.without(node_id),
        &after,
        &FailoverCheck {
            dead_node: node_id,
            dead_snapshot: &dead_snapshot,
            target: event.target,
        },
    );
    assert!(result.is_consistent(), "violations: {:?}", result.violations);

    if event.outcome == FailoverOutcome::Complete {
        assert_eq!(after.total(), expected_total(&before, &dead_snapshot));
    }
    event
}

/// Fails the first `failures` starts on `flaky_node`, then behaves.
pub struct FlakyEngine {
    inner: LocalExecutionEngine,
    flaky_node: NodeId,
    remaining_failures: AtomicUsize,
    pub failed: AtomicUsize,
}

impl FlakyEngine {
    pub fn new(
        flaky_node: NodeId,
        failures: usize,
    ) -> Self {
        Self {
            inner: LocalExecutionEngine::new(),
            flaky_node,
            remaining_failures: AtomicUsize::new(failures),
            failed: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ExecutionEngine for FlakyEngine {
    async fn start_unit(
        &self,
        node_id: NodeId,
        unit_name: String,
        config: UnitConfig,
    ) -> Result<UnitHandle> {
        if node_id == self.flaky_node
            && self
                .remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Err(ExecutionError::DeploymentExecution {
                node_id,
                unit_name,
                reason: "injected failure".to_string(),
            }
            .into());
        }
        self.inner.start_unit(node_id, unit_name, config).await
    }

    async fn stop_unit(
        &self,
        node_id: NodeId,
        handle: UnitHandle,
    ) -> Result<()> {
        self.inner.stop_unit(node_id, handle).await
    }
}

/// Checks the cluster after several failovers ran: every unit of `before`
/// stays where it was and each unit the events moved sits where its last
/// replacement landed, exactly once.
///
/// `before` holds only the nodes that survive every death.
pub async fn verify_after_failovers(
    cluster: &HaCluster,
    before: &ClusterView,
    events: &[FailoverEvent],
) {
    let alive = cluster.alive_nodes();
    let mut expected: BTreeMap<NodeId, Vec<Deployment>> = before
        .nodes()
        .map(|node_id| (node_id, before.deployments_on(node_id).to_vec()))
        .collect();
    for moved in events.iter().flat_map(|e| e.redeployed.iter()) {
        if alive.contains(&moved.node_id) {
            expected.entry(moved.node_id).or_default().push(moved.clone());
        }
    }
    let mut expected_view = ClusterView::new();
    for (node_id, deployments) in expected {
        expected_view.insert(node_id, deployments);
    }

    let after = cluster.cluster_view().await.expect("view after failovers");
    let nobody = RegistrySnapshot {
        node_id: 0,
        frozen: true,
        deployments: Vec::new(),
    };
    let result = verify(
        &expected_view,
        &after,
        &FailoverCheck {
            dead_node: 0,
            dead_snapshot: &nobody,
            target: None,
        },
    );
    assert!(result.is_consistent(), "violations: {:?}", result.violations);
}

/// Takes `delay` for every start.
pub struct SlowEngine {
    inner: LocalExecutionEngine,
    delay: Duration,
}

impl SlowEngine {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: LocalExecutionEngine::new(),
            delay,
        }
    }

    pub fn running_on(
        &self,
        node_id: NodeId,
    ) -> usize {
        self.inner.running_on(node_id)
    }
}

#[async_trait]
impl ExecutionEngine for SlowEngine {
    async fn start_unit(
        &self,
        node_id: NodeId,
        unit_name: String,
        config: UnitConfig,
    ) -> Result<UnitHandle> {
        tokio::time::sleep(self.delay).await;
        self.inner.start_unit(node_id, unit_name, config).await
    }

    async fn stop_unit(
        &self,
        node_id: NodeId,
        handle: UnitHandle,
    ) -> Result<()> {
        self.inner.stop_unit(node_id, handle).await
    }
}

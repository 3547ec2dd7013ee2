use std::sync::Arc;
use std::time::Duration;

use verticle_ha::FailoverOutcome;
use verticle_ha::FailoverState;
use verticle_ha::HaCluster;
use verticle_ha::NodeId;

use crate::common::start_cluster_with;
use crate::common::test_config;
use crate::common::unit_config;
use crate::common::verify_after_failovers;
use crate::common::SlowEngine;

/// Each listed unit must run exactly once on an alive node.
async fn assert_placed_once(
    cluster: &HaCluster,
    names: &[String],
) {
    let alive = cluster.alive_nodes();
    let view = cluster.cluster_view().await.unwrap();
    for name in names {
        let hosts: Vec<NodeId> = view
            .deployments()
            .filter(|d| &d.unit_name == name)
            .map(|d| d.node_id)
            .collect();
        assert_eq!(hosts.len(), 1, "{name} runs on {hosts:?}");
        assert!(alive.contains(&hosts[0]), "{name} left on dead node {}", hosts[0]);
    }
}

async fn wait_until_redeploying(
    cluster: &HaCluster,
    dead_node: NodeId,
) {
    for _ in 0..500 {
        if matches!(
            cluster.failover_state(dead_node),
            Some(FailoverState::Redeploying | FailoverState::Complete)
        ) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("failover of node {dead_node} never started redeploying");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_target_dies_while_receiving_units() {
    for round in 0..3 {
        let engine = Arc::new(SlowEngine::new(Duration::from_millis(10)));
        let cluster = start_cluster_with(test_config(&[1, 2, 3, 4]), engine);
        let mut ha_names = Vec::new();
        for i in 0..4 {
            let name = format!("one-{i}");
            cluster.deploy(1, &name, unit_config(&name), true).await.unwrap();
            ha_names.push(name);
        }
        cluster.deploy(1, "one-local", unit_config("one-local"), false).await.unwrap();
        for node in [3, 4] {
            let name = format!("base-{node}");
            cluster.deploy(node, &name, unit_config(&name), true).await.unwrap();
            ha_names.push(name);
        }
        // Empty node 2 is the least loaded survivor of node 1
        let before = cluster.cluster_view().await.unwrap().without(1).without(2);

        assert!(cluster.kill(1).unwrap());
        wait_until_redeploying(&cluster, 1).await;
        assert!(cluster.kill(2).unwrap());

        let first = cluster.wait_for_failover(1).await.unwrap();
        let second = cluster.wait_for_failover(2).await.unwrap();

        assert_eq!(first.outcome, FailoverOutcome::Complete, "round {round}");
        assert_eq!(second.outcome, FailoverOutcome::Complete, "round {round}");
        assert_placed_once(&cluster, &ha_names).await;
        let view = cluster.cluster_view().await.unwrap();
        assert_eq!(view.deployments().filter(|d| d.unit_name == "one-local").count(), 0);
        assert_eq!(view.total(), ha_names.len());
        verify_after_failovers(&cluster, &before, &[first, second]).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_deaths_fail_over_concurrently() {
    let engine = Arc::new(SlowEngine::new(Duration::from_millis(5)));
    let cluster = start_cluster_with(test_config(&[1, 2, 3, 4, 5]), engine);
    let mut ha_names = Vec::new();
    for node in 1..=5 {
        for i in 0..2 {
            let name = format!("n{node}-{i}");
            cluster.deploy(node, &name, unit_config(&name), true).await.unwrap();
            ha_names.push(name);
        }
    }
    let before = cluster.cluster_view().await.unwrap().without(1).without(2);

    assert!(cluster.kill(1).unwrap());
    assert!(cluster.kill(2).unwrap());
    let (first, second) = tokio::join!(cluster.wait_for_failover(1), cluster.wait_for_failover(2));
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.outcome, FailoverOutcome::Complete);
    assert_eq!(second.outcome, FailoverOutcome::Complete);
    assert_placed_once(&cluster, &ha_names).await;
    assert_eq!(cluster.cluster_view().await.unwrap().total(), ha_names.len());
    verify_after_failovers(&cluster, &before, &[first, second]).await;
}

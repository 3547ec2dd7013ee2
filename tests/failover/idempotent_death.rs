use std::time::Duration;

use verticle_ha::MembershipEvent;

use crate::common::start_cluster;
use crate::common::unit_config;

#[tokio::test]
async fn test_double_kill_fires_one_failure_and_one_failover() {
    let cluster = start_cluster(&[1, 2]);
    cluster.deploy(1, "alpha", unit_config("alpha"), true).await.unwrap();
    let mut membership = cluster.subscribe_membership();
    let mut failovers = cluster.subscribe_failovers();

    assert!(cluster.kill(1).unwrap());
    assert!(!cluster.kill(1).unwrap());

    assert_eq!(membership.recv().await, Some(MembershipEvent::NodeFailed(1)));
    assert!(membership.try_recv().is_err());

    let event = cluster.wait_for_failover(1).await.unwrap();
    assert_eq!(failovers.recv().await.unwrap(), event);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(failovers.try_recv().is_err());
    assert_eq!(cluster.snapshot(2).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_dead_node_cannot_rejoin() {
    let cluster = start_cluster(&[1, 2]);
    cluster.kill(1).unwrap();

    assert!(cluster.join(1).is_err());
    assert!(cluster.deploy(1, "alpha", unit_config("alpha"), true).await.is_err());
}

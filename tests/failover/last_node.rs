use verticle_ha::Error;
use verticle_ha::FailoverError;
use verticle_ha::FailoverOutcome;
use verticle_ha::FailoverState;

use crate::common::kill_and_verify;
use crate::common::start_cluster;
use crate::common::unit_config;

#[tokio::test]
async fn test_killing_last_node_reports_no_survivors() {
    let cluster = start_cluster(&[1, 2]);
    cluster.deploy(1, "alpha", unit_config("alpha"), true).await.unwrap();
    cluster.deploy(2, "beta", unit_config("beta"), true).await.unwrap();

    let first = kill_and_verify(&cluster, 1).await;
    assert_eq!(first.outcome, FailoverOutcome::Complete);
    let units_on_two = cluster.snapshot(2).await.unwrap().deployments;

    let last = kill_and_verify(&cluster, 2).await;

    assert_eq!(last.outcome, FailoverOutcome::NoSurvivors);
    assert_eq!(last.target, None);
    assert!(last.redeployed.is_empty());
    assert_eq!(cluster.snapshot(2).await.unwrap().deployments, units_on_two);
    assert_eq!(cluster.failover_state(2), Some(FailoverState::NoSurvivors));
    assert!(matches!(
        last.result(),
        Err(Error::Failover(FailoverError::NoSurvivors { dead_node: 2 }))
    ));
    assert!(cluster.alive_nodes().is_empty());
}

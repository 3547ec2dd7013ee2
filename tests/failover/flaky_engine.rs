use std::sync::atomic::Ordering;
use std::sync::Arc;

use verticle_ha::FailoverOutcome;

use crate::common::kill_and_verify;
use crate::common::start_cluster_with;
use crate::common::test_config;
use crate::common::unit_config;
use crate::common::FlakyEngine;

#[tokio::test]
async fn test_transient_engine_failures_are_retried() {
    let engine = Arc::new(FlakyEngine::new(2, 2));
    let cluster = start_cluster_with(test_config(&[1, 2]), engine.clone());
    cluster.deploy(1, "alpha", unit_config("alpha"), true).await.unwrap();
    cluster.deploy(1, "beta", unit_config("beta"), true).await.unwrap();

    let event = kill_and_verify(&cluster, 1).await;

    assert_eq!(event.outcome, FailoverOutcome::Complete);
    assert_eq!(engine.failed.load(Ordering::SeqCst), 2);
    assert_eq!(cluster.snapshot(2).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_persistent_engine_failure_leaves_failover_failed() {
    let engine = Arc::new(FlakyEngine::new(2, usize::MAX));
    let mut config = test_config(&[1, 2]);
    config.retry.redeploy.max_retries = 2;
    config.ha.failover_rounds = 2;
    config.ha.failover_timeout_in_ms = 500;
    let cluster = start_cluster_with(config, engine.clone());
    cluster.deploy(1, "alpha", unit_config("alpha"), true).await.unwrap();
    let mut failed_rounds = cluster.subscribe_failover_failures();

    cluster.kill(1).unwrap();
    for _ in 0..2 {
        let event = failed_rounds.recv().await.unwrap();
        assert!(matches!(event.outcome, FailoverOutcome::Failed { ref lost } if lost.len() == 1));
        assert!(event.result().is_err());
    }

    assert!(cluster.wait_for_failover(1).await.is_err());
    assert_eq!(engine.failed.load(Ordering::SeqCst), 4);
    assert!(cluster.snapshot(2).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_round_is_driven_again_until_it_completes() {
    let engine = Arc::new(FlakyEngine::new(2, 3));
    let mut config = test_config(&[1, 2]);
    config.retry.redeploy.max_retries = 2;
    let cluster = start_cluster_with(config, engine.clone());
    cluster.deploy(1, "alpha", unit_config("alpha"), true).await.unwrap();
    let mut failed_rounds = cluster.subscribe_failover_failures();

    let event = kill_and_verify(&cluster, 1).await;

    assert_eq!(event.outcome, FailoverOutcome::Complete);
    assert_eq!(failed_rounds.recv().await.unwrap().dead_node, 1);
    assert_eq!(engine.failed.load(Ordering::SeqCst), 3);
    assert_eq!(cluster.snapshot(2).await.unwrap().len(), 1);
}

use std::sync::Arc;
use std::time::Duration;

use verticle_ha::FailoverOutcome;

use crate::common::kill_and_verify;
use crate::common::start_cluster_with;
use crate::common::test_config;
use crate::common::unit_config;
use crate::common::SlowEngine;

#[tokio::test]
async fn test_redeploys_outliving_their_attempt_timeout_are_not_duplicated() {
    let engine = Arc::new(SlowEngine::new(Duration::from_millis(40)));
    let mut config = test_config(&[1, 2]);
    config.retry.redeploy.timeout_ms = 100;
    config.retry.redeploy.max_retries = 5;
    let cluster = start_cluster_with(config, engine.clone());
    let names = ["a", "b", "c", "d", "e"];
    for name in names {
        cluster.deploy(1, name, unit_config(name), true).await.unwrap();
    }

    let event = kill_and_verify(&cluster, 1).await;

    assert_eq!(event.outcome, FailoverOutcome::Complete);
    assert_eq!(event.redeployed.len(), names.len());
    assert_eq!(cluster.snapshot(2).await.unwrap().len(), names.len());
    assert_eq!(engine.running_on(2), names.len());
}

#[tokio::test]
async fn test_slow_redeploys_finish_before_the_unit_is_reported() {
    let engine = Arc::new(SlowEngine::new(Duration::from_millis(30)));
    let mut config = test_config(&[1, 2, 3]);
    config.retry.redeploy.timeout_ms = 50;
    config.retry.redeploy.max_retries = 4;
    let cluster = start_cluster_with(config, engine.clone());
    for name in ["a", "b", "c"] {
        cluster.deploy(1, name, unit_config(name), true).await.unwrap();
    }
    cluster.deploy(3, "x", unit_config("x"), true).await.unwrap();

    let event = kill_and_verify(&cluster, 1).await;

    assert_eq!(event.outcome, FailoverOutcome::Complete);
    let view = cluster.cluster_view().await.unwrap();
    for name in ["a", "b", "c"] {
        assert_eq!(view.deployments().filter(|d| d.unit_name == name).count(), 1, "{name}");
    }
    assert_eq!(engine.running_on(2) + engine.running_on(3), 4);
}

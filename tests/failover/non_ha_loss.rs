use verticle_ha::FailoverOutcome;

use crate::common::kill_and_verify;
use crate::common::start_cluster;
use crate::common::unit_config;

#[tokio::test]
async fn test_non_ha_unit_is_lost_with_its_node() {
    let cluster = start_cluster(&[1, 2]);
    let lost = cluster.deploy(1, "scratch", unit_config("scratch"), false).await.unwrap();
    cluster.deploy(1, "durable", unit_config("durable"), true).await.unwrap();
    cluster.deploy(2, "local", unit_config("local"), false).await.unwrap();

    let event = kill_and_verify(&cluster, 1).await;

    assert_eq!(event.outcome, FailoverOutcome::Complete);
    assert_eq!(event.redeployed.len(), 1);
    let view = cluster.cluster_view().await.unwrap();
    assert!(view.deployments().all(|d| d.unit_name != "scratch"));
    assert_eq!(view.total(), 2);
    assert_eq!(cluster.locate(&lost), Some(1));
}

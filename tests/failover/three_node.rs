use std::collections::HashSet;

use tracing_test::traced_test;
use verticle_ha::FailoverOutcome;

use crate::common::kill_and_verify;
use crate::common::start_cluster;
use crate::common::unit_config;

#[tokio::test]
#[traced_test]
async fn test_kill_one_of_three_nodes_moves_its_units_to_one_survivor() {
    let cluster = start_cluster(&[1, 2, 3]);
    let placement = [(1, "alpha"), (2, "beta"), (2, "gamma"), (3, "delta"), (3, "epsilon")];
    for (node, name) in placement {
        cluster.deploy(node, name, unit_config(name), true).await.unwrap();
    }
    let originals: Vec<_> = cluster.snapshot(2).await.unwrap().deployments;

    let event = kill_and_verify(&cluster, 2).await;

    assert_eq!(event.outcome, FailoverOutcome::Complete);
    let target = event.target.expect("a survivor was chosen");
    assert!([1, 3].contains(&target));

    let view = cluster.cluster_view().await.unwrap();
    assert_eq!(view.ha_units(), 5);
    for moved in ["beta", "gamma"] {
        let hosts: Vec<_> = view
            .deployments()
            .filter(|d| d.unit_name == moved)
            .map(|d| d.node_id)
            .collect();
        assert_eq!(hosts, vec![target], "{moved} must live exactly once on the target");
    }

    let new_ids: HashSet<_> = event.redeployed.iter().map(|d| d.id.clone()).collect();
    for original in originals {
        assert!(!new_ids.contains(&original.id), "identifiers are never reused");
        assert_eq!(cluster.locate(&original.id), None);
    }
}

#[tokio::test]
async fn test_cluster_keeps_serving_after_failover() {
    let cluster = start_cluster(&[1, 2, 3]);
    cluster.deploy(1, "alpha", unit_config("alpha"), true).await.unwrap();
    kill_and_verify(&cluster, 1).await;

    let id = cluster.deploy(2, "beta", unit_config("beta"), true).await.unwrap();
    cluster.undeploy(2, &id).await.unwrap();

    let event = kill_and_verify(&cluster, 2).await;
    assert_eq!(event.target, Some(3));
    assert_eq!(cluster.snapshot(3).await.unwrap().len(), 1);
}

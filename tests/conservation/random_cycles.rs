use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use verticle_ha::DeploymentId;
use verticle_ha::FailoverOutcome;
use verticle_ha::NodeId;

use crate::common::kill_and_verify;
use crate::common::start_cluster;
use crate::common::unit_config;

/// Random deploy / undeploy / kill / join sequences. Every kill happens with at
/// least two alive nodes and is checked for conservation and consistency.
#[tokio::test]
async fn test_random_cycles_conserve_units() {
    for seed in [7_u64, 42, 1234] {
        run_cycle(seed).await;
    }
}

async fn run_cycle(seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let cluster = start_cluster(&[1, 2, 3, 4]);
    let mut next_node: NodeId = 5;
    let mut next_unit = 0;

    for _ in 0..60 {
        let alive = cluster.alive_nodes();
        match rng.gen_range(0..10) {
            0..=4 => {
                let node = alive[rng.gen_range(0..alive.len())];
                let name = format!("unit-{next_unit}");
                next_unit += 1;
                let ha = rng.gen_bool(0.8);
                cluster.deploy(node, name.as_str(), unit_config(&name), ha).await.unwrap();
            }
            5..=6 => {
                let node = alive[rng.gen_range(0..alive.len())];
                let snapshot = cluster.snapshot(node).await.unwrap();
                if snapshot.is_empty() {
                    continue;
                }
                let victim: DeploymentId = snapshot.deployments[rng.gen_range(0..snapshot.len())].id.clone();
                cluster.undeploy(node, &victim).await.unwrap();
            }
            7..=8 if alive.len() >= 2 => {
                let node = alive[rng.gen_range(0..alive.len())];
                let event = kill_and_verify(&cluster, node).await;
                assert_eq!(event.outcome, FailoverOutcome::Complete, "seed {seed}");
            }
            _ => {
                cluster.join(next_node).unwrap();
                next_node += 1;
            }
        }
    }
}

//! High-availability failover coordinator for clusters of execution nodes
//! hosting independently deployable units ("verticles").
//!
//! When a node dies its HA units are redeployed exactly once, onto one
//! surviving node, with identical name and configuration.

mod cluster;
mod config;
mod engine;
mod errors;
mod failover;
mod lock;
mod membership;
mod metrics;
mod registry;
mod utils;
pub mod verifier;

pub use cluster::*;
pub use config::*;
pub use engine::ExecutionEngine;
pub use engine::LocalExecutionEngine;
pub use engine::UnitHandle;
pub use errors::*;
pub use failover::*;
pub use lock::FailoverLock;
pub use lock::LocalFailoverLock;
pub use membership::*;
pub use metrics::start_server as start_metrics_server;
pub use registry::*;


//-----------------------------------------------------------
// Autometrics
/// autometrics: https://docs.autometrics.dev/rust/adding-alerts-and-slos
use autometrics::objectives::Objective;
use autometrics::objectives::ObjectiveLatency;
use autometrics::objectives::ObjectivePercentile;
const API_SLO: Objective = Objective::new("api")
    .success_rate(ObjectivePercentile::P99_9)
    .latency(ObjectiveLatency::Ms10, ObjectivePercentile::P99);

//! HA Coordinator Error Hierarchy
//!
//! Errors are grouped by the layer that raises them. Registry and membership
//! errors signal caller logic mistakes and are never retried. Execution errors
//! come from the engine and are retried by the failover coordinator against a
//! re-selected target.

use std::time::Duration;

use config::ConfigError;

use crate::verifier::ConsistencyViolation;
use crate::DeploymentId;
use crate::NodeId;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Cluster membership violations (join / death transitions)
    #[error(transparent)]
    Membership(#[from] MembershipError),

    /// Per-node deployment registry failures
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Failures reported by the execution engine
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Failover protocol failures
    #[error(transparent)]
    Failover(#[from] FailoverError),

    /// Post-failover invariant violations
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether the failover coordinator may retry the operation that produced
    /// this error against a re-selected target.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Execution(ExecutionError::DeploymentExecution { .. })
                | Error::Registry(RegistryError::NodeNotAlive { .. })
                | Error::Registry(RegistryError::WorkerUnavailable { .. })
                | Error::Registry(RegistryError::RedeployInFlight { .. })
                | Error::Failover(FailoverError::AttemptTimeout(_))
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("Node {node_id} was never seen by the cluster")]
    UnknownNode { node_id: NodeId },

    #[error("Node {node_id} is already a live cluster member")]
    DuplicateNode { node_id: NodeId },

    /// Dead identifiers are never resurrected
    #[error("Node {node_id} is dead and its identifier is retired")]
    RetiredNode { node_id: NodeId },
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Node {node_id} is not alive")]
    NodeNotAlive { node_id: NodeId },

    #[error("Deployment {deployment_id} not found on node {node_id}")]
    NotFound {
        node_id: NodeId,
        deployment_id: DeploymentId,
    },

    #[error("Node {node_id} already hosts {limit} units")]
    CapacityExceeded { node_id: NodeId, limit: usize },

    /// The node's registry worker has stopped and cannot serve requests
    #[error("Registry worker of node {node_id} is unavailable")]
    WorkerUnavailable { node_id: NodeId },

    /// Another redeploy of the same original is still queued
    #[error("Redeploy of {deployment_id} is already in flight")]
    RedeployInFlight { deployment_id: DeploymentId },
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Failed to start unit {unit_name} on node {node_id}: {reason}")]
    DeploymentExecution {
        node_id: NodeId,
        unit_name: String,
        reason: String,
    },

    #[error("Unit handle {handle} is not running on node {node_id}")]
    NotRunning { node_id: NodeId, handle: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum FailoverError {
    /// Terminal: nothing left alive to receive the dead node's units
    #[error("No surviving node can take over the units of node {dead_node}")]
    NoSurvivors { dead_node: NodeId },

    /// Failover was requested for a node that is not DEAD
    #[error("Node {node_id} is not dead, refusing to fail it over")]
    NodeNotDead { node_id: NodeId },

    #[error("Redeploy of {unit_name} from node {dead_node} failed after {attempts} attempts")]
    RetryExhausted {
        dead_node: NodeId,
        unit_name: String,
        attempts: usize,
    },

    /// Every alive node was tried for this failover and none took the unit
    #[error("Failover of node {dead_node} ran out of targets after trying {tried} node(s)")]
    TargetsExhausted { dead_node: NodeId, tried: usize },

    /// Retryable: the failover may be driven again
    #[error("Failover of node {dead_node} left {lost} unit(s) behind")]
    Incomplete { dead_node: NodeId, lost: usize },

    #[error("Single redeploy attempt timed out after {0:?}")]
    AttemptTimeout(Duration),

    #[error("Waiting on {what} timed out after {duration:?}")]
    Timeout { what: String, duration: Duration },
}

#[derive(Debug, thiserror::Error)]
#[error("{} consistency violation(s), first: {}", .0.len(), .0.first().map(|v| v.to_string()).unwrap_or_default())]
pub struct ConsistencyError(pub Vec<ConsistencyViolation>);

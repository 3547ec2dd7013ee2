//! Cluster membership and failure detection.
//!
//! [`ClusterMonitor`] is the single source of truth for node liveness. Every
//! other component reads "who is alive" from it. [`HeartbeatDetector`] is the
//! liveness primitive that drives ALIVE → SUSPECTED → DEAD transitions from
//! missed heartbeats.

mod cluster_monitor;
mod heartbeat_detector;
mod membership_guard;
pub use cluster_monitor::*;
pub use heartbeat_detector::*;


use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Execution node identifier
pub type NodeId = u32;

/// Liveness of a node. DEAD is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    Alive,
    Suspected,
    Dead,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Alive => "alive",
            NodeState::Suspected => "suspected",
            NodeState::Dead => "dead",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable membership transitions, delivered to listeners in transition order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Joined(NodeId),
    Suspected(NodeId),
    Recovered(NodeId),
    /// Emitted at most once per node
    NodeFailed(NodeId),
}

/// Synchronous callbacks run inside the membership write lock, after the
/// transition and before any listener is notified.
///
/// Implementations must not block and must not call back into the
/// [`ClusterMonitor`].
pub trait MembershipHook: Send + Sync + 'static {
    fn on_join(
        &self,
        node_id: NodeId,
    );

    fn on_dead(
        &self,
        node_id: NodeId,
    );
}

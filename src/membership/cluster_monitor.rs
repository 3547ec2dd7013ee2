//! Tracks the set of cluster members and their liveness.
//!
//! All transitions (`join`, `mark_suspected`, `mark_alive`, `mark_dead`) are
//! linearized through one write lock. Hooks run and listeners are notified
//! while that lock is held, so listeners observe transitions in the order they
//! happened and a `NodeFailed` event is only visible after the node already
//! reads as DEAD. Delivery itself is non-blocking: listeners own an unbounded
//! receiver and may take as long as they like.

use std::fmt::Debug;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::membership_guard::MembershipGuard;
use super::MembershipEvent;
use super::MembershipHook;
use super::NodeState;
use crate::metrics::NODE_STATE_TRANSITIONS;
use crate::MembershipError;
use crate::NodeId;
use crate::Result;

pub struct ClusterMonitor {
    guard: MembershipGuard,
}

impl Debug for ClusterMonitor {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ClusterMonitor")
            .field("members", &self.members())
            .finish()
    }
}

impl Default for ClusterMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterMonitor {
    pub fn new() -> Self {
        Self {
            guard: MembershipGuard::new(),
        }
    }

    /// Registers a synchronous transition hook. Hooks only see transitions
    /// that happen after registration.
    pub fn register_hook(
        &self,
        hook: Arc<dyn MembershipHook>,
    ) {
        self.guard.blocking_write(|state| state.hooks.push(hook));
    }

    /// Returns a receiver for every transition from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MembershipEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.guard.blocking_write(|state| state.listeners.push(tx));
        rx
    }

    /// Registers `node_id` as ALIVE.
    ///
    /// # Errors
    /// - `DuplicateNode` if the node is already a live member
    /// - `RetiredNode` if the node died earlier in this cluster session
    pub fn join(
        &self,
        node_id: NodeId,
    ) -> Result<()> {
        self.guard.blocking_write(|state| {
            match state.nodes.get(&node_id) {
                Some(NodeState::Dead) => return Err(MembershipError::RetiredNode { node_id }.into()),
                Some(_) => return Err(MembershipError::DuplicateNode { node_id }.into()),
                None => {}
            }

            state.nodes.insert(node_id, NodeState::Alive);
            record_transition(NodeState::Alive);
            info!("node {} joined the cluster", node_id);
            state.publish(MembershipEvent::Joined(node_id));
            Ok(())
        })
    }

    /// ALIVE → SUSPECTED. Returns whether a transition happened.
    pub fn mark_suspected(
        &self,
        node_id: NodeId,
    ) -> Result<bool> {
        self.transition(node_id, NodeState::Alive, NodeState::Suspected, MembershipEvent::Suspected(node_id))
    }

    /// SUSPECTED → ALIVE. Returns whether a transition happened.
    pub fn mark_alive(
        &self,
        node_id: NodeId,
    ) -> Result<bool> {
        self.transition(node_id, NodeState::Suspected, NodeState::Alive, MembershipEvent::Recovered(node_id))
    }

    /// Declares `node_id` DEAD. Idempotent: only the first call transitions and
    /// emits `NodeFailed`, later calls return `Ok(false)`.
    ///
    /// # Errors
    /// `UnknownNode` if the node was never seen.
    pub fn mark_dead(
        &self,
        node_id: NodeId,
    ) -> Result<bool> {
        self.guard.blocking_write(|state| {
            let current = match state.nodes.get_mut(&node_id) {
                Some(current) => current,
                None => return Err(MembershipError::UnknownNode { node_id }.into()),
            };

            if *current == NodeState::Dead {
                debug!("node {} already dead, ignoring repeated death", node_id);
                return Ok(false);
            }

            *current = NodeState::Dead;
            record_transition(NodeState::Dead);
            warn!("node {} is dead", node_id);
            state.publish(MembershipEvent::NodeFailed(node_id));
            Ok(true)
        })
    }

    pub fn state(
        &self,
        node_id: NodeId,
    ) -> Option<NodeState> {
        self.guard.state_of(node_id)
    }

    pub fn is_alive(
        &self,
        node_id: NodeId,
    ) -> bool {
        self.state(node_id) == Some(NodeState::Alive)
    }

    /// ALIVE nodes in ascending id order
    pub fn alive_nodes(&self) -> Vec<NodeId> {
        self.nodes_with_state(NodeState::Alive)
    }

    pub fn nodes_with_state(
        &self,
        wanted: NodeState,
    ) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.guard.blocking_read(|state| {
            state
                .nodes
                .iter()
                .filter(|(_, s)| **s == wanted)
                .map(|(id, _)| *id)
                .collect()
        });
        nodes.sort_unstable();
        nodes
    }

    /// Every node ever seen, with its current state, in ascending id order
    pub fn members(&self) -> Vec<(NodeId, NodeState)> {
        let mut members: Vec<(NodeId, NodeState)> =
            self.guard.blocking_read(|state| state.nodes.iter().map(|(id, s)| (*id, *s)).collect());
        members.sort_unstable_by_key(|(id, _)| *id);
        members
    }

    fn transition(
        &self,
        node_id: NodeId,
        from: NodeState,
        to: NodeState,
        event: MembershipEvent,
    ) -> Result<bool> {
        self.guard.blocking_write(|state| {
            let current = match state.nodes.get_mut(&node_id) {
                Some(current) => current,
                None => return Err(MembershipError::UnknownNode { node_id }.into()),
            };

            if *current != from {
                return Ok(false);
            }

            *current = to;
            record_transition(to);
            debug!("node {} {} -> {}", node_id, from, to);
            state.publish(event);
            Ok(true)
        })
    }
}

fn record_transition(to: NodeState) {
    NODE_STATE_TRANSITIONS.with_label_values(&[to.as_str()]).inc();
}

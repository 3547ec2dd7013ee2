use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

use super::MembershipEvent;
use super::MembershipHook;
use super::NodeState;
use crate::NodeId;

/// Single lock around everything a membership transition touches, so that a
/// transition, its hooks and its notifications are linearized together.
pub(crate) struct MembershipGuard {
    inner: Arc<RwLock<InnerState>>,
}

pub(crate) struct InnerState {
    pub nodes: HashMap<NodeId, NodeState>,
    pub listeners: Vec<mpsc::UnboundedSender<MembershipEvent>>,
    pub hooks: Vec<Arc<dyn MembershipHook>>,
}

impl InnerState {
    /// Runs hooks then fans the event out to every listener still listening.
    /// Must be called while holding the write lock.
    pub fn publish(
        &mut self,
        event: MembershipEvent,
    ) {
        for hook in &self.hooks {
            match event {
                MembershipEvent::Joined(node_id) => hook.on_join(node_id),
                MembershipEvent::NodeFailed(node_id) => hook.on_dead(node_id),
                MembershipEvent::Suspected(_) | MembershipEvent::Recovered(_) => {}
            }
        }

        self.listeners.retain(|listener| listener.send(event.clone()).is_ok());
        trace!(
            "published {:?} to {} listener(s)",
            event,
            self.listeners.len()
        );
    }
}

impl MembershipGuard {
    pub fn new() -> Self {
        let inner = Arc::new(RwLock::new(InnerState {
            nodes: HashMap::new(),
            listeners: Vec::new(),
            hooks: Vec::new(),
        }));
        Self { inner }
    }

    /// Provides read access to the state
    pub fn blocking_read<R>(
        &self,
        f: impl FnOnce(&InnerState) -> R,
    ) -> R {
        let guard = self.inner.read();
        f(&guard)
    }

    /// Provides write access to the state
    pub fn blocking_write<R>(
        &self,
        f: impl FnOnce(&mut InnerState) -> R,
    ) -> R {
        let mut guard = self.inner.write();
        f(&mut guard)
    }

    pub fn state_of(
        &self,
        node_id: NodeId,
    ) -> Option<NodeState> {
        self.blocking_read(|state| state.nodes.get(&node_id).copied())
    }
}

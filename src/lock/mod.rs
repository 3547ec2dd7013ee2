//! Mutual exclusion over "who drives the failover of node X".


use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;
use tracing::debug;
use tracing::warn;

use crate::NodeId;
use crate::Result;

/// Cluster-wide lock keyed by dead node. Only the holder redeploys that
/// node's units.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FailoverLock: Send + Sync + 'static {
    /// Returns `true` if `owner` holds the lock afterwards. Re-entrant for the
    /// same owner.
    async fn try_acquire(
        &self,
        dead_node: NodeId,
        owner: NodeId,
    ) -> Result<bool>;

    /// Releases the lock if `owner` holds it, otherwise does nothing.
    async fn release(
        &self,
        dead_node: NodeId,
        owner: NodeId,
    ) -> Result<()>;

    async fn holder(
        &self,
        dead_node: NodeId,
    ) -> Result<Option<NodeId>>;
}

/// Process-local lock, shared by every coordinator in the same process.
#[derive(Debug, Default)]
pub struct LocalFailoverLock {
    holders: DashMap<NodeId, NodeId>,
}

impl LocalFailoverLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FailoverLock for LocalFailoverLock {
    async fn try_acquire(
        &self,
        dead_node: NodeId,
        owner: NodeId,
    ) -> Result<bool> {
        match self.holders.entry(dead_node) {
            Entry::Occupied(holder) => Ok(*holder.get() == owner),
            Entry::Vacant(slot) => {
                slot.insert(owner);
                debug!("member {} drives failover of node {}", owner, dead_node);
                Ok(true)
            }
        }
    }

    async fn release(
        &self,
        dead_node: NodeId,
        owner: NodeId,
    ) -> Result<()> {
        if self.holders.remove_if(&dead_node, |_, holder| *holder == owner).is_none() {
            warn!(
                "member {} released failover lock of node {} it did not hold",
                owner, dead_node
            );
        }
        Ok(())
    }

    async fn holder(
        &self,
        dead_node: NodeId,
    ) -> Result<Option<NodeId>> {
        Ok(self.holders.get(&dead_node).map(|h| *h))
    }
}

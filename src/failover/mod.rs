//! Failover protocol.
//!
//! One [`FailoverCoordinator`] per cluster member listens for `NodeFailed`
//! events. For each dead node the member that wins the [`crate::FailoverLock`]
//! moves every HA unit of the frozen registry onto one surviving node and then
//! fires a [`FailoverEvent`] through the [`FailoverNotifier`].

mod coordinator;
mod notifier;
pub use coordinator::*;
pub use notifier::*;


use std::fmt;

use crate::Deployment;
use crate::FailoverError;
use crate::NodeId;
use crate::Result;
use crate::UnitKey;

/// Per dead node: `Pending → Redeploying → Complete | NoSurvivors | Failed`.
/// Only `Failed` may be driven again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverState {
    Pending,
    Redeploying,
    Complete,
    /// Terminal: nothing was alive to take the units
    NoSurvivors,
    /// Some units could not be moved; the lock was released
    Failed,
}

impl FailoverState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FailoverState::Complete | FailoverState::NoSurvivors)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, FailoverState::Pending | FailoverState::Redeploying)
    }
}

impl fmt::Display for FailoverState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            FailoverState::Pending => "pending",
            FailoverState::Redeploying => "redeploying",
            FailoverState::Complete => "complete",
            FailoverState::NoSurvivors => "no_survivors",
            FailoverState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverOutcome {
    Complete,
    NoSurvivors,
    /// Units that exhausted their retries
    Failed { lost: Vec<UnitKey> },
}

impl FailoverOutcome {
    pub fn state(&self) -> FailoverState {
        match self {
            FailoverOutcome::Complete => FailoverState::Complete,
            FailoverOutcome::NoSurvivors => FailoverState::NoSurvivors,
            FailoverOutcome::Failed { .. } => FailoverState::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

/// Fired once per dead node when its failover finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverEvent {
    pub dead_node: NodeId,
    /// Node that received the units; `None` without survivors
    pub target: Option<NodeId>,
    /// Fresh deployments created for the dead node's HA units
    pub redeployed: Vec<Deployment>,
    pub outcome: FailoverOutcome,
    /// Milliseconds since the unix epoch
    pub completed_at: u128,
}

impl FailoverEvent {
    /// `Ok` only for a complete failover.
    pub fn result(&self) -> Result<()> {
        match &self.outcome {
            FailoverOutcome::Complete => Ok(()),
            FailoverOutcome::NoSurvivors => Err(FailoverError::NoSurvivors {
                dead_node: self.dead_node,
            }
            .into()),
            FailoverOutcome::Failed { lost } => Err(FailoverError::Incomplete {
                dead_node: self.dead_node,
                lost: lost.len(),
            }
            .into()),
        }
    }
}

//! Execution engine seam.
//!
//! Actually starting and stopping units is somebody else's job; the registry
//! only talks to it through [`ExecutionEngine`].

mod local_engine;
pub use local_engine::*;


use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::NodeId;
use crate::Result;
use crate::UnitConfig;

/// Engine-side reference to a running unit
pub type UnitHandle = u64;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExecutionEngine: Send + Sync + 'static {
    /// Instantiates `unit_name` with `config` on `node_id`.
    ///
    /// # Errors
    /// `ExecutionError::DeploymentExecution` when the unit cannot be started.
    async fn start_unit(
        &self,
        node_id: NodeId,
        unit_name: String,
        config: UnitConfig,
    ) -> Result<UnitHandle>;

    /// # Errors
    /// `ExecutionError::NotRunning` when `handle` is unknown on `node_id`.
    async fn stop_unit(
        &self,
        node_id: NodeId,
        handle: UnitHandle,
    ) -> Result<()>;
}

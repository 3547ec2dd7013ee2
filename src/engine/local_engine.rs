use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::ExecutionEngine;
use super::UnitHandle;
use crate::ExecutionError;
use crate::NodeId;
use crate::Result;
use crate::UnitConfig;

/// In-process engine that only books running units. Starting never fails.
#[derive(Debug, Default)]
pub struct LocalExecutionEngine {
    next_handle: AtomicU64,
    running: DashMap<UnitHandle, (NodeId, String)>,
}

impl LocalExecutionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of units currently running on `node_id`
    pub fn running_on(
        &self,
        node_id: NodeId,
    ) -> usize {
        self.running.iter().filter(|e| e.value().0 == node_id).count()
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }
}

#[async_trait]
impl ExecutionEngine for LocalExecutionEngine {
    async fn start_unit(
        &self,
        node_id: NodeId,
        unit_name: String,
        _config: UnitConfig,
    ) -> Result<UnitHandle> {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        trace!("starting {} on node {} as handle {}", unit_name, node_id, handle);
        self.running.insert(handle, (node_id, unit_name));
        Ok(handle)
    }

    async fn stop_unit(
        &self,
        node_id: NodeId,
        handle: UnitHandle,
    ) -> Result<()> {
        match self.running.remove_if(&handle, |_, (owner, _)| *owner == node_id) {
            Some(_) => Ok(()),
            None => Err(ExecutionError::NotRunning { node_id, handle }.into()),
        }
    }
}

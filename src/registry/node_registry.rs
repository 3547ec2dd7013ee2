//! Per-node registry worker.
//!
//! The worker owns the node's deployments outright and processes commands one
//! at a time from an unbounded queue, so every mutation of one node is
//! serialized without locks. Replies travel back over oneshot channels as
//! copies. Every landed deploy is written to the shared [`DeploymentIndex`]
//! before the reply goes out, so a caller that gave up never leaves an
//! unrecorded unit behind.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::Deployment;
use super::DeploymentId;
use super::DeploymentIndex;
use super::RegistrySnapshot;
use crate::engine::ExecutionEngine;
use crate::engine::UnitHandle;
use crate::metrics::DEPLOYMENTS_PER_NODE;
use crate::Error;
use crate::ExecutionError;
use crate::NodeId;
use crate::RegistryError;
use crate::Result;
use crate::UnitConfig;

pub(crate) struct DeployRequest {
    pub unit_name: String,
    pub config: UnitConfig,
    pub ha: bool,
    /// Explicit deploys obey `max_units_per_node`; failover redeploys do not
    pub enforce_capacity: bool,
    /// Failover only: the dead node's deployment this one replaces
    pub origin: Option<DeploymentId>,
}

pub(crate) enum RegistryCommand {
    Deploy {
        request: DeployRequest,
        resp: oneshot::Sender<Result<Deployment>>,
    },
    Undeploy {
        deployment_id: DeploymentId,
        resp: oneshot::Sender<Result<Deployment>>,
    },
    Snapshot {
        resp: oneshot::Sender<RegistrySnapshot>,
    },
    /// Node died: reject every later mutation
    Freeze,
}

/// Cheap, cloneable front door to one node's worker
#[derive(Clone)]
pub(crate) struct NodeRegistryHandle {
    node_id: NodeId,
    tx: mpsc::UnboundedSender<RegistryCommand>,
}

impl NodeRegistryHandle {
    /// Spawns the worker for `node_id` on the current tokio runtime.
    pub fn spawn(
        node_id: NodeId,
        engine: Arc<dyn ExecutionEngine>,
        index: Arc<DeploymentIndex>,
        max_units: usize,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Fatal(format!("registry worker for node {node_id} needs a tokio runtime: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = RegistryWorker {
            node_id,
            deployments: BTreeMap::new(),
            frozen: false,
            max_units,
            engine,
            index,
            rx,
        };
        runtime.spawn(worker.run());

        Ok(Self { node_id, tx })
    }

    pub async fn deploy(
        &self,
        request: DeployRequest,
    ) -> Result<Deployment> {
        let (resp, rx) = oneshot::channel();
        self.send(RegistryCommand::Deploy { request, resp })?;
        rx.await.map_err(|_| self.unavailable())?
    }

    pub async fn undeploy(
        &self,
        deployment_id: DeploymentId,
    ) -> Result<Deployment> {
        let (resp, rx) = oneshot::channel();
        self.send(RegistryCommand::Undeploy { deployment_id, resp })?;
        rx.await.map_err(|_| self.unavailable())?
    }

    pub async fn snapshot(&self) -> Result<RegistrySnapshot> {
        let (resp, rx) = oneshot::channel();
        self.send(RegistryCommand::Snapshot { resp })?;
        rx.await.map_err(|_| self.unavailable())
    }

    /// Non-blocking; safe to call from membership hooks.
    pub fn freeze(&self) {
        if self.tx.send(RegistryCommand::Freeze).is_err() {
            warn!("registry worker of node {} already gone, cannot freeze", self.node_id);
        }
    }

    fn send(
        &self,
        command: RegistryCommand,
    ) -> Result<()> {
        self.tx.send(command).map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> Error {
        RegistryError::WorkerUnavailable { node_id: self.node_id }.into()
    }
}

struct RegistryWorker {
    node_id: NodeId,
    deployments: BTreeMap<DeploymentId, (Deployment, UnitHandle)>,
    frozen: bool,
    max_units: usize,
    engine: Arc<dyn ExecutionEngine>,
    index: Arc<DeploymentIndex>,
    rx: mpsc::UnboundedReceiver<RegistryCommand>,
}

impl RegistryWorker {
    async fn run(mut self) {
        debug!("registry worker of node {} started", self.node_id);
        while let Some(command) = self.rx.recv().await {
            match command {
                RegistryCommand::Deploy { request, resp } => {
                    let origin = request.origin.clone();
                    let result = self.deploy(request).await;
                    if let Some(origin) = origin {
                        self.index.settle(&origin, self.node_id);
                    }
                    if let Err(Ok(deployment)) = resp.send(result) {
                        debug!(
                            "caller stopped waiting for {} on node {}, deployment kept",
                            deployment.id, self.node_id
                        );
                    }
                }
                RegistryCommand::Undeploy { deployment_id, resp } => {
                    let result = self.undeploy(deployment_id).await;
                    if resp.send(result).is_err() {
                        debug!("undeploy caller on node {} went away", self.node_id);
                    }
                }
                RegistryCommand::Snapshot { resp } => {
                    let _ = resp.send(self.snapshot());
                }
                RegistryCommand::Freeze => {
                    if !self.frozen {
                        self.frozen = true;
                        info!(
                            "registry of node {} frozen with {} deployment(s)",
                            self.node_id,
                            self.deployments.len()
                        );
                    }
                }
            }
        }
        debug!("registry worker of node {} stopped", self.node_id);
    }

    async fn deploy(
        &mut self,
        request: DeployRequest,
    ) -> Result<Deployment> {
        if let Some(existing) = request.origin.as_ref().and_then(|o| self.index.replacement_of(o)) {
            debug!(
                "{} already replaced by {} on node {}",
                request.unit_name, existing.id, existing.node_id
            );
            return Ok(existing);
        }

        if self.frozen {
            return Err(RegistryError::NodeNotAlive { node_id: self.node_id }.into());
        }

        if request.enforce_capacity && self.max_units > 0 && self.deployments.len() >= self.max_units {
            return Err(RegistryError::CapacityExceeded {
                node_id: self.node_id,
                limit: self.max_units,
            }
            .into());
        }

        let handle = self
            .engine
            .start_unit(self.node_id, request.unit_name.clone(), request.config.clone())
            .await?;

        let deployment = Deployment {
            id: DeploymentId::generate(),
            node_id: self.node_id,
            unit_name: request.unit_name,
            config: request.config,
            ha: request.ha,
        };
        self.deployments
            .insert(deployment.id.clone(), (deployment.clone(), handle));
        self.index.record(&deployment);
        if let Some(origin) = &request.origin {
            self.index.record_replacement(origin, &deployment);
        }
        self.report_size();

        debug!(
            "deployed {} as {} on node {}",
            deployment.unit_name, deployment.id, self.node_id
        );
        Ok(deployment)
    }

    async fn undeploy(
        &mut self,
        deployment_id: DeploymentId,
    ) -> Result<Deployment> {
        if self.frozen {
            return Err(RegistryError::NodeNotAlive { node_id: self.node_id }.into());
        }

        let handle = match self.deployments.get(&deployment_id) {
            Some((_, handle)) => *handle,
            None => {
                return Err(RegistryError::NotFound {
                    node_id: self.node_id,
                    deployment_id,
                }
                .into())
            }
        };

        match self.engine.stop_unit(self.node_id, handle).await {
            Ok(()) => {}
            Err(Error::Execution(ExecutionError::NotRunning { .. })) => {
                warn!(
                    "unit {} on node {} was no longer running, dropping record",
                    deployment_id, self.node_id
                );
            }
            Err(e) => return Err(e),
        }

        let (deployment, _) = self
            .deployments
            .remove(&deployment_id)
            .ok_or_else(|| Error::Fatal(format!("deployment {deployment_id} vanished during undeploy")))?;
        self.index.forget(&deployment.id);
        self.report_size();

        debug!("undeployed {} from node {}", deployment_id, self.node_id);
        Ok(deployment)
    }

    fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            node_id: self.node_id,
            frozen: self.frozen,
            deployments: self.deployments.values().map(|(d, _)| d.clone()).collect(),
        }
    }

    fn report_size(&self) {
        DEPLOYMENTS_PER_NODE
            .with_label_values(&[&self.node_id.to_string()])
            .set(self.deployments.len() as i64);
    }
}

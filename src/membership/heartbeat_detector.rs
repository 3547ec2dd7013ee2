//! Heartbeat based failure detector.
//!
//! Nodes (or whatever transport fronts them) call [`HeartbeatDetector::heartbeat`].
//! A periodic sweep compares the last heartbeat of every non-dead member
//! against the configured thresholds and drives the [`ClusterMonitor`].

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::ClusterMonitor;
use super::NodeState;
use crate::MembershipConfig;
use crate::MembershipError;
use crate::NodeId;
use crate::Result;

pub struct HeartbeatDetector {
    monitor: Arc<ClusterMonitor>,
    last_seen: DashMap<NodeId, Instant>,
    config: MembershipConfig,
}

impl HeartbeatDetector {
    pub fn new(
        monitor: Arc<ClusterMonitor>,
        config: MembershipConfig,
    ) -> Self {
        Self {
            monitor,
            last_seen: DashMap::new(),
            config,
        }
    }

    /// Records a heartbeat from `node_id`. Heartbeats from dead nodes are
    /// rejected: a dead identifier is never brought back.
    pub fn heartbeat(
        &self,
        node_id: NodeId,
    ) -> Result<()> {
        match self.monitor.state(node_id) {
            None => Err(MembershipError::UnknownNode { node_id }.into()),
            Some(NodeState::Dead) => Err(MembershipError::RetiredNode { node_id }.into()),
            Some(_) => {
                self.last_seen.insert(node_id, Instant::now());
                Ok(())
            }
        }
    }

    /// One detection pass at `now`. Returns the transitions it caused.
    ///
    /// A member without any recorded heartbeat gets `now` as its baseline,
    /// giving freshly joined nodes a full timeout before suspicion.
    pub fn sweep(
        &self,
        now: Instant,
    ) -> Vec<(NodeId, NodeState)> {
        let mut transitions = Vec::new();

        for (node_id, state) in self.monitor.members() {
            if state == NodeState::Dead {
                self.last_seen.remove(&node_id);
                continue;
            }

            let last = *self.last_seen.entry(node_id).or_insert(now);
            let silence = now.saturating_duration_since(last);

            let result = if silence >= self.config.dead_timeout() {
                self.monitor.mark_dead(node_id).map(|changed| (changed, NodeState::Dead))
            } else if silence >= self.config.suspect_timeout() {
                self.monitor
                    .mark_suspected(node_id)
                    .map(|changed| (changed, NodeState::Suspected))
            } else if state == NodeState::Suspected {
                self.monitor.mark_alive(node_id).map(|changed| (changed, NodeState::Alive))
            } else {
                continue;
            };

            match result {
                Ok((true, new_state)) => {
                    debug!("node {} silent for {:?}, now {}", node_id, silence, new_state);
                    transitions.push((node_id, new_state));
                }
                Ok((false, _)) => {}
                Err(e) => error!("failure detector transition for node {} failed: {:?}", node_id, e),
            }
        }

        transitions
    }

    /// Sweeps every `heartbeat_interval` until shutdown is signalled.
    pub async fn run(
        self: Arc<Self>,
        mut shutdown_signal: watch::Receiver<()>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval());
        info!("heartbeat detector started, interval {:?}", self.config.heartbeat_interval());

        loop {
            tokio::select! {
                _ = shutdown_signal.changed() => {
                    warn!("heartbeat detector received shutdown signal");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.sweep(Instant::now());
                }
            }
        }
    }
}

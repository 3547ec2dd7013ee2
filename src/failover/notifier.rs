use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use super::FailoverEvent;
use crate::Error;
use crate::FailoverError;
use crate::NodeId;
use crate::Result;

/// Broadcasts failover completions and remembers them per dead node, so late
/// waiters resolve without racing the broadcast.
///
/// Completion fires once per dead node, for `Complete` or `NoSurvivors` only.
/// Rounds that end `Failed` go out on a separate channel; the coordinator
/// drives such a failover again.
#[derive(Debug)]
pub struct FailoverNotifier {
    tx: broadcast::Sender<FailoverEvent>,
    failures_tx: broadcast::Sender<FailoverEvent>,
    /// Terminal outcome per dead node, never replaced
    outcomes: DashMap<NodeId, FailoverEvent>,
    /// Latest failed round per dead node
    failures: DashMap<NodeId, FailoverEvent>,
}

impl FailoverNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let (failures_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            failures_tx,
            outcomes: DashMap::new(),
            failures: DashMap::new(),
        }
    }

    /// `onFailoverComplete`
    pub fn subscribe(&self) -> broadcast::Receiver<FailoverEvent> {
        self.tx.subscribe()
    }

    /// Failover rounds that left units behind
    pub fn subscribe_failures(&self) -> broadcast::Receiver<FailoverEvent> {
        self.failures_tx.subscribe()
    }

    /// Records and broadcasts `event`. Returns whether it fired completion.
    pub(crate) fn publish(
        &self,
        event: FailoverEvent,
    ) -> bool {
        if !event.outcome.is_terminal() {
            self.failures.insert(event.dead_node, event.clone());
            if self.failures_tx.send(event).is_err() {
                debug!("no failover failure listeners subscribed");
            }
            return false;
        }

        match self.outcomes.entry(event.dead_node) {
            Entry::Occupied(_) => {
                warn!(
                    "failover of node {} already finished, dropping second outcome",
                    event.dead_node
                );
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(event.clone());
            }
        }

        if self.tx.send(event).is_err() {
            debug!("no failover listeners subscribed");
        }
        true
    }

    /// Terminal outcome for `dead_node`, if it reached one
    pub fn completed(
        &self,
        dead_node: NodeId,
    ) -> Option<FailoverEvent> {
        self.outcomes.get(&dead_node).map(|e| e.clone())
    }

    /// Latest failed round for `dead_node`
    pub fn last_failure(
        &self,
        dead_node: NodeId,
    ) -> Option<FailoverEvent> {
        self.failures.get(&dead_node).map(|e| e.clone())
    }

    /// Resolves with the terminal outcome of `dead_node`'s failover, waiting
    /// at most `duration` for it. Failed rounds do not resolve it.
    ///
    /// # Errors
    /// `FailoverError::Timeout` when nothing arrives in time.
    pub async fn wait_for(
        &self,
        dead_node: NodeId,
        duration: Duration,
    ) -> Result<FailoverEvent> {
        let mut rx = self.subscribe();
        if let Some(event) = self.completed(dead_node) {
            return Ok(event);
        }

        let waiting = async {
            loop {
                match rx.recv().await {
                    Ok(event) if event.dead_node == dead_node => return Ok(event),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("failover waiter lagged by {} events", skipped);
                        if let Some(event) = self.completed(dead_node) {
                            return Ok(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::Fatal("failover notifier closed".to_string()));
                    }
                }
            }
        };

        timeout(duration, waiting).await.map_err(|_| {
            Error::Failover(FailoverError::Timeout {
                what: format!("failover of node {dead_node}"),
                duration,
            })
        })?
    }
}

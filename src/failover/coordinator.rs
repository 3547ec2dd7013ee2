use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::FailoverEvent;
use super::FailoverNotifier;
use super::FailoverOutcome;
use super::FailoverState;
use crate::metrics::CLUSTER_FATAL_ERROR;
use crate::metrics::FAILOVERS;
use crate::metrics::FAILOVER_DURATION;
use crate::metrics::REDEPLOY_ATTEMPTS;
use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::utils::time::get_now_as_u128;
use crate::BackoffPolicy;
use crate::ClusterMonitor;
use crate::Deployment;
use crate::DeploymentId;
use crate::DeploymentRegistry;
use crate::Error;
use crate::FailoverError;
use crate::FailoverLock;
use crate::HaConfig;
use crate::MembershipError;
use crate::MembershipEvent;
use crate::NodeId;
use crate::NodeState;
use crate::Result;
use crate::TargetSelection;

/// Reacts to node deaths by moving their HA units onto a survivor.
pub struct FailoverCoordinator {
    /// Identity used as failover lock owner
    member_id: NodeId,
    config: HaConfig,
    retry: BackoffPolicy,
    monitor: Arc<ClusterMonitor>,
    registry: Arc<DeploymentRegistry>,
    lock: Arc<dyn FailoverLock>,
    notifier: Arc<FailoverNotifier>,
    states: DashMap<NodeId, FailoverState>,
    /// dead node → (original deployment id → its replacement)
    migrated: DashMap<NodeId, HashMap<DeploymentId, Deployment>>,
}

/// Target shared by every unit of one failover round
#[derive(Debug)]
struct TargetChoice {
    current: NodeId,
    /// Alive nodes that used up their retries during this round
    excluded: BTreeSet<NodeId>,
}

impl std::fmt::Debug for FailoverCoordinator {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("FailoverCoordinator")
            .field("member_id", &self.member_id)
            .field("states", &self.states)
            .finish()
    }
}

impl FailoverCoordinator {
    pub fn new(
        member_id: NodeId,
        config: HaConfig,
        retry: BackoffPolicy,
        monitor: Arc<ClusterMonitor>,
        registry: Arc<DeploymentRegistry>,
        lock: Arc<dyn FailoverLock>,
        notifier: Arc<FailoverNotifier>,
    ) -> Self {
        Self {
            member_id,
            config,
            retry,
            monitor,
            registry,
            lock,
            notifier,
            states: DashMap::new(),
            migrated: DashMap::new(),
        }
    }

    /// Subscribes to membership right away and spawns the event loop. Every
    /// `NodeFailed` gets its own failover task, so deaths of different nodes
    /// are handled concurrently. A round that leaves units behind is driven
    /// again, up to `failover_rounds` times.
    ///
    /// Returns `None` when HA is disabled.
    pub fn start(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<()>,
    ) -> Option<JoinHandle<()>> {
        if !self.config.ha_enabled {
            info!("HA disabled, member {} will not fail over dead nodes", self.member_id);
            return None;
        }

        let mut events = self.monitor.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        debug!("failover coordinator {} shutting down", self.member_id);
                        break;
                    }
                    event = events.recv() => match event {
                        Some(MembershipEvent::NodeFailed(dead_node)) => {
                            let coordinator = self.clone();
                            tokio::spawn(async move { coordinator.drive(dead_node).await });
                        }
                        Some(other) => debug!("ignoring membership event {:?}", other),
                        None => break,
                    }
                }
            }
        });
        Some(handle)
    }

    pub fn state_of(
        &self,
        dead_node: NodeId,
    ) -> Option<FailoverState> {
        self.states.get(&dead_node).map(|s| *s)
    }

    pub fn notifier(&self) -> &Arc<FailoverNotifier> {
        &self.notifier
    }

    /// Runs failover rounds for `dead_node` until one ends terminal, another
    /// member takes over, or `failover_rounds` is used up.
    async fn drive(
        &self,
        dead_node: NodeId,
    ) {
        let rounds = self.config.failover_rounds;
        let mut delay = self.retry.base_delay();
        for round in 1..=rounds {
            match self.failover(dead_node).await {
                Ok(Some(event)) if event.outcome.is_terminal() => return,
                Ok(None) => return,
                Ok(Some(event)) => warn!(
                    "failover round {}/{} of node {} ended as {}",
                    round,
                    rounds,
                    dead_node,
                    event.outcome.state()
                ),
                Err(e) if e.is_retryable() || matches!(e, Error::Failover(FailoverError::Timeout { .. })) => {
                    warn!("failover round {}/{} of node {}: {}", round, rounds, dead_node, e)
                }
                Err(e) => {
                    error!("failover of node {} failed: {}", dead_node, e);
                    return;
                }
            }
            if round < rounds {
                sleep(delay).await;
                delay = (delay * 2).min(self.retry.max_delay());
            }
        }

        error!("failover of node {} gave up after {} round(s)", dead_node, rounds);
        CLUSTER_FATAL_ERROR.with_label_values(&["failover_abandoned"]).inc();
    }

    /// Drives the failover of `dead_node` if this member wins its lock.
    ///
    /// Returns `Ok(None)` when another member (or another task of this one)
    /// is already driving it. A node whose failover already finished returns
    /// the recorded event without redeploying anything. A `Failed` failover
    /// may be driven again; units moved earlier are not moved twice.
    ///
    /// # Errors
    /// - `UnknownNode` if the node was never seen
    /// - `NodeNotDead` if the node is still a live member
    /// - `Timeout` if the failover exceeds `failover_timeout`
    #[instrument(skip(self), fields(member = self.member_id))]
    pub async fn failover(
        &self,
        dead_node: NodeId,
    ) -> Result<Option<FailoverEvent>> {
        match self.monitor.state(dead_node) {
            None => return Err(MembershipError::UnknownNode { node_id: dead_node }.into()),
            Some(NodeState::Dead) => {}
            Some(_) => return Err(FailoverError::NodeNotDead { node_id: dead_node }.into()),
        }

        if let Some(event) = self.notifier.completed(dead_node) {
            debug!("failover of node {} already finished", dead_node);
            return Ok(Some(event));
        }

        if !self.begin(dead_node) {
            debug!("failover of node {} already in flight", dead_node);
            return Ok(None);
        }

        let acquired = match self.lock.try_acquire(dead_node, self.member_id).await {
            Ok(acquired) => acquired,
            Err(e) => {
                self.states.remove(&dead_node);
                return Err(e);
            }
        };
        if !acquired {
            debug!("another member drives failover of node {}", dead_node);
            self.states.remove(&dead_node);
            return Ok(None);
        }

        info!("member {} drives failover of node {}", self.member_id, dead_node);
        let started = Instant::now();
        let limit = self.config.failover_timeout();

        let event = match timeout(limit, self.redeploy_all(dead_node)).await {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => {
                self.abort(dead_node, started).await;
                return Err(e);
            }
            Err(_) => {
                error!("failover of node {} exceeded {:?}", dead_node, limit);
                self.abort(dead_node, started).await;
                return Err(FailoverError::Timeout {
                    what: format!("failover of node {dead_node}"),
                    duration: limit,
                }
                .into());
            }
        };

        self.finish(&event, started).await;
        Ok(Some(event))
    }

    /// Claims the per-node in-flight slot. Only absent or `Failed` states
    /// may start.
    fn begin(
        &self,
        dead_node: NodeId,
    ) -> bool {
        match self.states.entry(dead_node) {
            Entry::Occupied(mut state) => {
                if state.get().is_in_flight() || state.get().is_terminal() {
                    return false;
                }
                state.insert(FailoverState::Pending);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(FailoverState::Pending);
                true
            }
        }
    }

    async fn redeploy_all(
        &self,
        dead_node: NodeId,
    ) -> Result<FailoverEvent> {
        let snapshot = self.registry.snapshot(dead_node).await?;
        if !snapshot.frozen {
            return Err(Error::Fatal(format!("registry of dead node {dead_node} is not frozen")));
        }

        // Replacements that landed in an earlier round, or after their caller
        // gave up, count as moved.
        let pending: Vec<&Deployment> = snapshot
            .ha_deployments()
            .filter(|d| match self.registry.replacement_of(&d.id) {
                Some(replacement) => {
                    self.record_migration(dead_node, d, &replacement);
                    false
                }
                None => true,
            })
            .collect();

        let target = match self.select_target(dead_node, &BTreeSet::new()) {
            Some(target) => target,
            None => return Ok(self.no_survivors(dead_node)),
        };

        info!(
            "moving {} HA unit(s) of node {} to node {} ({} skipped as non-HA)",
            pending.len(),
            dead_node,
            target,
            snapshot.len() - snapshot.ha_deployments().count()
        );
        self.states.insert(dead_node, FailoverState::Redeploying);

        let choice = Mutex::new(TargetChoice {
            current: target,
            excluded: BTreeSet::new(),
        });
        let results = join_all(
            pending
                .iter()
                .map(|original| self.redeploy_with_retry(dead_node, &choice, original)),
        )
        .await;

        let mut lost = Vec::new();
        let mut survivors_left = true;
        for (original, result) in pending.iter().zip(results) {
            match result {
                Ok(_) => {}
                Err(Error::Failover(FailoverError::NoSurvivors { .. })) => survivors_left = false,
                Err(e) => {
                    error!(
                        "unit {} of node {} could not be moved: {}",
                        original.unit_name, dead_node, e
                    );
                    lost.push(original.unit_key());
                }
            }
        }

        if !survivors_left {
            return Ok(self.no_survivors(dead_node));
        }

        let outcome = if lost.is_empty() {
            FailoverOutcome::Complete
        } else {
            FailoverOutcome::Failed { lost }
        };
        let target = choice.lock().current;
        Ok(FailoverEvent {
            dead_node,
            target: Some(target),
            redeployed: self.redeployed(dead_node),
            outcome,
            completed_at: get_now_as_u128(),
        })
    }

    /// One unit, retried with backoff. Every attempt re-reads the shared
    /// target and replaces it if it is no longer alive. When the retries on a
    /// live target run out, that node is excluded for the rest of the round
    /// and the shared target moves on; the unit is given up only once no
    /// untried alive node is left.
    async fn redeploy_with_retry(
        &self,
        dead_node: NodeId,
        choice: &Mutex<TargetChoice>,
        original: &Deployment,
    ) -> Result<Deployment> {
        let tried = Mutex::new(None::<NodeId>);
        let tried = &tried;
        let attempt = move || async move {
            let target = self.live_target(dead_node, choice)?;
            *tried.lock() = Some(target);
            match self.registry.redeploy(target, original).await {
                Ok(replacement) => {
                    REDEPLOY_ATTEMPTS.with_label_values(&["success"]).inc();
                    debug!(
                        "unit {} of node {} is now {} on node {}",
                        original.unit_name, dead_node, replacement.id, replacement.node_id
                    );
                    Ok(replacement)
                }
                Err(e) => {
                    REDEPLOY_ATTEMPTS.with_label_values(&["failure"]).inc();
                    warn!(
                        "redeploy of {} from node {} onto node {} failed: {}",
                        original.unit_name, dead_node, target, e
                    );
                    Err(e)
                }
            }
        };

        loop {
            let error = match task_with_timeout_and_exponential_backoff(attempt, &self.retry).await {
                Ok(replacement) => {
                    self.record_migration(dead_node, original, &replacement);
                    return Ok(replacement);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            // A timed-out attempt may still land once its queued command runs
            if let Some(replacement) = self.registry.settle(original).await {
                self.record_migration(dead_node, original, &replacement);
                return Ok(replacement);
            }

            let failed_on = match *tried.lock() {
                Some(node_id) => node_id,
                None => return Err(error),
            };
            if !self.exclude(dead_node, choice, failed_on) {
                return Err(FailoverError::RetryExhausted {
                    dead_node,
                    unit_name: original.unit_name.clone(),
                    attempts: self.retry.max_retries,
                }
                .into());
            }
        }
    }

    /// Recorded per unit as soon as it lands, so a timed-out or failed
    /// failover never moves the same unit twice when driven again.
    fn record_migration(
        &self,
        dead_node: NodeId,
        original: &Deployment,
        replacement: &Deployment,
    ) {
        self.registry.retire(&original.id);
        self.migrated
            .entry(dead_node)
            .or_default()
            .insert(original.id.clone(), replacement.clone());
    }

    fn live_target(
        &self,
        dead_node: NodeId,
        choice: &Mutex<TargetChoice>,
    ) -> Result<NodeId> {
        let mut choice = choice.lock();
        if self.monitor.is_alive(choice.current) && !choice.excluded.contains(&choice.current) {
            return Ok(choice.current);
        }
        match self.select_target(dead_node, &choice.excluded) {
            Some(next) => {
                warn!(
                    "failover target {} of node {} is gone, switching to {}",
                    choice.current, dead_node, next
                );
                choice.current = next;
                Ok(next)
            }
            None if self.monitor.alive_nodes().is_empty() => Err(FailoverError::NoSurvivors { dead_node }.into()),
            None => Err(FailoverError::TargetsExhausted {
                dead_node,
                tried: choice.excluded.len(),
            }
            .into()),
        }
    }

    /// Marks `failed_on` as unusable for this round and moves the shared
    /// target off it. Returns `false` when no untried alive node remains.
    fn exclude(
        &self,
        dead_node: NodeId,
        choice: &Mutex<TargetChoice>,
        failed_on: NodeId,
    ) -> bool {
        let mut choice = choice.lock();
        choice.excluded.insert(failed_on);
        if self.monitor.is_alive(choice.current) && !choice.excluded.contains(&choice.current) {
            return true;
        }
        match self.select_target(dead_node, &choice.excluded) {
            Some(next) => {
                warn!(
                    "node {} keeps failing redeploys for node {}, switching to {}",
                    failed_on, dead_node, next
                );
                choice.current = next;
                true
            }
            None => {
                error!(
                    "every alive node failed redeploys for node {}, tried {:?}",
                    dead_node, choice.excluded
                );
                false
            }
        }
    }

    /// Picks one ALIVE node outside `excluded` for all units of `dead_node`.
    fn select_target(
        &self,
        dead_node: NodeId,
        excluded: &BTreeSet<NodeId>,
    ) -> Option<NodeId> {
        let alive: Vec<NodeId> = self
            .monitor
            .alive_nodes()
            .into_iter()
            .filter(|node_id| !excluded.contains(node_id))
            .collect();
        if alive.is_empty() {
            return None;
        }

        match self.config.target_selection {
            TargetSelection::LeastLoaded => alive
                .into_iter()
                .min_by_key(|node_id| (self.registry.load_of(*node_id), *node_id)),
            TargetSelection::Hashed => {
                let mut hasher = DefaultHasher::new();
                dead_node.hash(&mut hasher);
                let index = (hasher.finish() % alive.len() as u64) as usize;
                alive.get(index).copied()
            }
        }
    }

    fn no_survivors(
        &self,
        dead_node: NodeId,
    ) -> FailoverEvent {
        error!("no surviving node can take over the units of node {}", dead_node);
        CLUSTER_FATAL_ERROR.with_label_values(&["no_survivors"]).inc();
        FailoverEvent {
            dead_node,
            target: None,
            redeployed: self.redeployed(dead_node),
            outcome: FailoverOutcome::NoSurvivors,
            completed_at: get_now_as_u128(),
        }
    }

    fn redeployed(
        &self,
        dead_node: NodeId,
    ) -> Vec<Deployment> {
        let mut redeployed: Vec<Deployment> = self
            .migrated
            .get(&dead_node)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        redeployed.sort_by(|a, b| a.id.cmp(&b.id));
        redeployed
    }

    async fn finish(
        &self,
        event: &FailoverEvent,
        started: Instant,
    ) {
        let state = event.outcome.state();
        self.states.insert(event.dead_node, state);
        if !state.is_terminal() {
            self.release(event.dead_node).await;
        }

        let label = state.to_string();
        FAILOVERS.with_label_values(&[&label]).inc();
        FAILOVER_DURATION
            .with_label_values(&[&label])
            .observe(started.elapsed().as_millis() as f64);

        info!(
            "failover of node {} finished as {} with {} unit(s) on {:?}",
            event.dead_node,
            state,
            event.redeployed.len(),
            event.target
        );
        self.notifier.publish(event.clone());
    }

    /// Error path: the failover did not reach a decision. Progress made so far
    /// stays in `migrated`, the lock is released and waiters are woken with a
    /// `Failed` outcome.
    async fn abort(
        &self,
        dead_node: NodeId,
        started: Instant,
    ) {
        let event = FailoverEvent {
            dead_node,
            target: None,
            redeployed: self.redeployed(dead_node),
            outcome: FailoverOutcome::Failed { lost: Vec::new() },
            completed_at: get_now_as_u128(),
        };
        self.finish(&event, started).await;
    }

    async fn release(
        &self,
        dead_node: NodeId,
    ) {
        if let Err(e) = self.lock.release(dead_node, self.member_id).await {
            error!("failed to release failover lock of node {}: {}", dead_node, e);
        }
    }
}

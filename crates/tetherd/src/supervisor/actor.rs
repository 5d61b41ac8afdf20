//! Supervisor actor - owns the worker registry and processes commands.
//!
//! The actor is the single owner of the registry. It receives commands via
//! an mpsc channel, handles them one at a time, and publishes events via
//! broadcast. Because every membership change runs to completion before the
//! next command is read, reconciliations are serialized without any lock.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Response and event send failures are ignored; the caller may be gone

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use tether_core::{MembershipSet, RelayId};

use super::commands::{
    PoolEvent, ReconcileReport, RelaySnapshot, SupervisorCommand, SupervisorError,
};
use super::WorkerSpawner;
use crate::source::MembershipSource;
use crate::worker::{StopOutcome, WorkerHandle};

// ============================================================================
// Supervisor Actor
// ============================================================================

/// The supervisor actor - owns every running worker.
pub struct SupervisorActor {
    /// Command receiver
    receiver: mpsc::Receiver<SupervisorCommand>,

    /// Registry: exactly one handle per running relay
    workers: HashMap<RelayId, WorkerHandle>,

    /// Builds workers for added relays
    spawner: WorkerSpawner,

    /// Consulted by `Reload`
    source: Arc<dyn MembershipSource>,

    /// Event publisher for subscribers
    event_publisher: broadcast::Sender<PoolEvent>,

    /// Set once `ShutdownAll` has run
    shutting_down: bool,
}

impl SupervisorActor {
    pub fn new(
        receiver: mpsc::Receiver<SupervisorCommand>,
        spawner: WorkerSpawner,
        source: Arc<dyn MembershipSource>,
        event_publisher: broadcast::Sender<PoolEvent>,
    ) -> Self {
        Self {
            receiver,
            workers: HashMap::new(),
            spawner,
            source,
            event_publisher,
            shutting_down: false,
        }
    }

    /// Runs the actor loop until every handle has been dropped.
    pub async fn run(mut self) {
        info!("Supervisor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        // Dropping the handles cancels any workers still running.
        info!(workers = self.workers.len(), "Supervisor stopped");
    }

    async fn handle_command(&mut self, cmd: SupervisorCommand) {
        match cmd {
            SupervisorCommand::Start {
                initial,
                respond_to,
            } => {
                let result = self.handle_start(initial).await;
                let _ = respond_to.send(result);
            }
            SupervisorCommand::Reconcile { target, respond_to } => {
                let result = self.handle_reconcile(target).await;
                let _ = respond_to.send(result);
            }
            SupervisorCommand::Reload { respond_to } => {
                let result = self.handle_reload().await;
                let _ = respond_to.send(result);
            }
            SupervisorCommand::ListRelays { respond_to } => {
                let _ = respond_to.send(self.handle_list_relays());
            }
            SupervisorCommand::ShutdownAll { respond_to } => {
                let report = self.handle_shutdown_all().await;
                let _ = respond_to.send(report);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------------

    async fn handle_start(
        &mut self,
        initial: MembershipSet,
    ) -> Result<ReconcileReport, SupervisorError> {
        if self.shutting_down {
            return Err(SupervisorError::ShuttingDown);
        }
        if !self.workers.is_empty() {
            return Err(SupervisorError::AlreadyStarted {
                running: self.workers.len(),
            });
        }

        info!(relays = initial.len(), "Starting relay pool");
        Ok(self.apply(&initial).await)
    }

    async fn handle_reconcile(
        &mut self,
        target: MembershipSet,
    ) -> Result<ReconcileReport, SupervisorError> {
        if self.shutting_down {
            return Err(SupervisorError::ShuttingDown);
        }
        Ok(self.apply(&target).await)
    }

    async fn handle_reload(&mut self) -> Result<ReconcileReport, SupervisorError> {
        if self.shutting_down {
            return Err(SupervisorError::ShuttingDown);
        }

        match self.source.load_current().await {
            Ok(target) => Ok(self.apply(&target).await),
            Err(e) => {
                warn!(error = %e, "Skipping reconcile");
                Ok(ReconcileReport::default())
            }
        }
    }

    fn handle_list_relays(&self) -> Vec<RelaySnapshot> {
        let mut snapshots: Vec<RelaySnapshot> = self
            .workers
            .values()
            .map(|handle| RelaySnapshot {
                relay: handle.relay().clone(),
                device_id: handle.device_id(),
                state: handle.state(),
                started_at: handle.started_at(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.relay.cmp(&b.relay));
        snapshots
    }

    async fn handle_shutdown_all(&mut self) -> ReconcileReport {
        self.shutting_down = true;

        let relays: Vec<RelayId> = self.workers.keys().cloned().collect();
        info!(workers = relays.len(), "Shutting down relay pool");

        let mut removed = self.stop_workers(relays).await;
        removed.sort();

        ReconcileReport {
            added: Vec::new(),
            removed,
        }
    }

    // ------------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------------

    /// Moves the registry to `target`: all removals finish before any
    /// addition starts.
    async fn apply(&mut self, target: &MembershipSet) -> ReconcileReport {
        let current: MembershipSet = self.workers.keys().collect();
        let diff = current.diff(target);

        if diff.is_empty() {
            debug!(workers = self.workers.len(), "Membership unchanged");
            return ReconcileReport::default();
        }

        info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            "Reconciling relay pool"
        );

        let mut removed = self.stop_workers(diff.removed).await;
        removed.sort();

        let mut added = Vec::with_capacity(diff.added.len());
        for relay in diff.added {
            if self.workers.contains_key(&relay) {
                continue;
            }
            let handle = self.spawner.spawn(relay.clone());
            let _ = self.event_publisher.send(PoolEvent::WorkerStarted {
                relay: relay.clone(),
                device_id: handle.device_id(),
            });
            debug!(relay = %relay, device_id = %handle.device_id(), "Worker registered");
            self.workers.insert(relay.clone(), handle);
            added.push(relay);
        }

        let report = ReconcileReport { added, removed };
        let _ = self.event_publisher.send(PoolEvent::Reconciled {
            added: report.added.clone(),
            removed: report.removed.clone(),
        });
        report
    }

    /// Takes each relay's handle out of the registry and waits for all of
    /// them to stop. Returns the relays that were actually running.
    async fn stop_workers(&mut self, relays: Vec<RelayId>) -> Vec<RelayId> {
        let handles: Vec<WorkerHandle> = relays
            .iter()
            .filter_map(|relay| self.workers.remove(relay))
            .collect();

        let grace = self.spawner.stop_timeout;
        let outcomes = join_all(handles.into_iter().map(|handle| async move {
            let relay = handle.relay().clone();
            let outcome = handle.stop(grace).await;
            (relay, outcome)
        }))
        .await;

        let mut stopped = Vec::with_capacity(outcomes.len());
        for (relay, outcome) in outcomes {
            if outcome == StopOutcome::Graceful {
                debug!(relay = %relay, "Worker stopped");
            } else {
                warn!(relay = %relay, outcome = %outcome, "Worker stopped abnormally");
            }
            let _ = self.event_publisher.send(PoolEvent::WorkerStopped {
                relay: relay.clone(),
                reason: outcome,
            });
            stopped.push(relay);
        }
        stopped
    }

    #[cfg(test)]
    pub(crate) fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

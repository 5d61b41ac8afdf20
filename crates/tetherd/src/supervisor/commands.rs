//! Supervisor actor commands, errors, and events.
//!
//! - `SupervisorCommand`: requests sent to the actor
//! - `SupervisorError`: why a request was refused
//! - `PoolEvent`: notifications broadcast to subscribers

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use tether_core::{DeviceId, MembershipSet, RelayId};

use crate::worker::{StopOutcome, WorkerState};

// ============================================================================
// Supervisor Commands
// ============================================================================

/// Commands sent to the supervisor actor.
///
/// The actor handles one command at a time, so two reconciliations can
/// never interleave.
#[derive(Debug)]
pub enum SupervisorCommand {
    /// Start workers for the boot snapshot.
    ///
    /// # Errors
    /// - `SupervisorError::AlreadyStarted` if any worker is running
    /// - `SupervisorError::ShuttingDown` after `ShutdownAll`
    Start {
        initial: MembershipSet,
        respond_to: oneshot::Sender<Result<ReconcileReport, SupervisorError>>,
    },

    /// Bring the running workers in line with `target`.
    ///
    /// # Errors
    /// - `SupervisorError::ShuttingDown` after `ShutdownAll`
    Reconcile {
        target: MembershipSet,
        respond_to: oneshot::Sender<Result<ReconcileReport, SupervisorError>>,
    },

    /// Load the membership source, then reconcile against it.
    ///
    /// An unavailable source yields an empty report.
    Reload {
        respond_to: oneshot::Sender<Result<ReconcileReport, SupervisorError>>,
    },

    /// Snapshot every running worker.
    ListRelays {
        respond_to: oneshot::Sender<Vec<RelaySnapshot>>,
    },

    /// Stop every worker and refuse further membership changes.
    ShutdownAll {
        respond_to: oneshot::Sender<ReconcileReport>,
    },
}

// ============================================================================
// Supervisor Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    /// `start` was called with workers already running.
    #[error("supervisor already started ({running} workers running)")]
    AlreadyStarted { running: usize },

    /// The pool has been shut down.
    #[error("supervisor is shutting down")]
    ShuttingDown,

    /// The actor is gone.
    #[error("supervisor channel closed")]
    ChannelClosed,
}

// ============================================================================
// Results
// ============================================================================

/// Which relays a membership change started and stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: Vec<RelayId>,
    pub removed: Vec<RelayId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Point-in-time view of one running worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelaySnapshot {
    pub relay: RelayId,
    pub device_id: DeviceId,
    pub state: WorkerState,
    pub started_at: DateTime<Utc>,
}

// ============================================================================
// Pool Events
// ============================================================================

/// Events published by the supervisor.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A worker was spawned for a relay.
    WorkerStarted { relay: RelayId, device_id: DeviceId },

    /// A worker was stopped and removed from the registry.
    WorkerStopped { relay: RelayId, reason: StopOutcome },

    /// A membership change finished.
    Reconciled {
        added: Vec<RelayId>,
        removed: Vec<RelayId>,
    },
}

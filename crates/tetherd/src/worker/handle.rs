//! Owner-side handle to a running connection worker.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use tether_core::{DeviceId, RelayId};

use super::WorkerState;

/// How long `stop` waits for an aborted task to be torn down.
const ABORT_WAIT: Duration = Duration::from_millis(100);

/// How a worker ended when asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker observed cancellation and exited.
    Graceful,
    /// The worker did not exit within the grace period and was aborted.
    TimedOut,
    /// The worker task panicked.
    Panicked,
    /// The worker task had already been aborted.
    Aborted,
}

impl std::fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Graceful => "graceful",
            Self::TimedOut => "timed out",
            Self::Panicked => "panicked",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Handle to one spawned worker.
///
/// Dropping the handle cancels the worker; use [`WorkerHandle::stop`] to
/// also wait for it to finish.
#[derive(Debug)]
pub struct WorkerHandle {
    relay: RelayId,
    device_id: DeviceId,
    cancel: CancellationToken,
    state: watch::Receiver<WorkerState>,
    join: JoinHandle<()>,
    started_at: DateTime<Utc>,
}

impl WorkerHandle {
    pub(crate) fn new(
        relay: RelayId,
        device_id: DeviceId,
        cancel: CancellationToken,
        state: watch::Receiver<WorkerState>,
        join: JoinHandle<()>,
    ) -> Self {
        Self {
            relay,
            device_id,
            cancel,
            state,
            join,
            started_at: Utc::now(),
        }
    }

    pub fn relay(&self) -> &RelayId {
        &self.relay
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Requests the worker to stop without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancels the worker and waits up to `grace` for it to exit.
    ///
    /// A worker that does not exit in time is aborted, so this always
    /// returns with the task gone.
    pub async fn stop(mut self, grace: Duration) -> StopOutcome {
        self.cancel.cancel();

        match timeout(grace, &mut self.join).await {
            Ok(Ok(())) => StopOutcome::Graceful,
            Ok(Err(e)) if e.is_panic() => {
                warn!(relay = %self.relay, "Worker panicked");
                StopOutcome::Panicked
            }
            Ok(Err(_)) => StopOutcome::Aborted,
            Err(_) => {
                warn!(
                    relay = %self.relay,
                    grace_ms = grace.as_millis() as u64,
                    "Worker did not stop in time, aborting"
                );
                self.join.abort();
                if timeout(ABORT_WAIT, &mut self.join).await.is_err() {
                    warn!(relay = %self.relay, "Aborted worker is still running");
                }
                StopOutcome::TimedOut
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

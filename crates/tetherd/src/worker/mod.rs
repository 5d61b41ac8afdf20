//! Connection worker: one task per relay, running its session lifecycle
//! until cancelled.
//!
//! # State Machine
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            ▼                                          │
//!      Connecting ──▶ Handshaking ──▶ SteadyState       │
//!            │              │              │            │
//!            └──────────────┴──────────────┴──▶ Backoff ┘
//!
//!      any state ── cancel ──▶ Stopped
//! ```
//!
//! A worker only knows its own relay. Failures never leave the worker:
//! every connect or session error ends in `Backoff` and another attempt.
//! Cancellation is the only way out.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_core::{DeviceId, RelayId, UserId};

pub mod backoff;
pub mod connector;
mod handle;
mod session;

pub use backoff::BackoffPolicy;
pub use connector::{ConnectError, RelayConnector, RelaySocket, SocksConnector, Transport};
pub use handle::{StopOutcome, WorkerHandle};

use session::{run_session, SessionContext, SessionEnd};

// ============================================================================
// Worker State
// ============================================================================

/// Lifecycle state of a connection worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Waiting out the startup jitter or dialing the relay.
    Connecting,
    /// Session open, no AUTH challenge answered yet.
    Handshaking,
    /// AUTH answered; heartbeats and replies flowing.
    SteadyState,
    /// Waiting before the next connection attempt.
    Backoff,
    /// Cancelled. Terminal.
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::SteadyState => "steady_state",
            Self::Backoff => "backoff",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Worker Settings
// ============================================================================

/// Settings shared by every worker in the pool.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Opaque account identifier sent in AUTH replies.
    pub user_id: UserId,

    /// User agent for the websocket handshake and AUTH replies.
    pub user_agent: String,

    /// Period of outbound heartbeats.
    pub heartbeat_interval: Duration,

    /// Upper bound of the random delay before each connection attempt.
    pub max_jitter: Duration,

    pub backoff: BackoffPolicy,
}

impl WorkerSettings {
    pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
    pub const DEFAULT_MAX_JITTER: Duration = Duration::from_secs(1);

    pub fn new(user_id: UserId, user_agent: impl Into<String>) -> Self {
        Self {
            user_id,
            user_agent: user_agent.into(),
            heartbeat_interval: Self::DEFAULT_HEARTBEAT_INTERVAL,
            max_jitter: Self::DEFAULT_MAX_JITTER,
            backoff: BackoffPolicy::default(),
        }
    }
}

// ============================================================================
// Connection Worker
// ============================================================================

/// The task body for one relay.
pub struct ConnectionWorker {
    relay: RelayId,
    device_id: DeviceId,
    settings: Arc<WorkerSettings>,
    connector: Arc<dyn RelayConnector>,
    cancel: CancellationToken,
    state: watch::Sender<WorkerState>,
}

impl ConnectionWorker {
    /// Spawns a worker for `relay` and returns its handle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        relay: RelayId,
        settings: Arc<WorkerSettings>,
        connector: Arc<dyn RelayConnector>,
    ) -> WorkerHandle {
        let device_id = relay.device_id();
        let cancel = CancellationToken::new();
        let (state, state_rx) = watch::channel(WorkerState::Connecting);

        let worker = Self {
            relay: relay.clone(),
            device_id,
            settings,
            connector,
            cancel: cancel.clone(),
            state,
        };
        let join = tokio::spawn(worker.run());

        WorkerHandle::new(relay, device_id, cancel, state_rx, join)
    }

    async fn run(self) {
        info!(relay = %self.relay, device_id = %self.device_id, "Worker starting");

        let backoff = &self.settings.backoff;
        let mut delay = backoff.initial();
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);
            self.set_state(WorkerState::Connecting);

            let jitter = startup_jitter(self.settings.max_jitter);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = sleep(jitter) => {}
            }

            debug!(relay = %self.relay, attempt, "Connecting");

            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.connector.connect(&self.relay) => result,
            };

            match connected {
                Ok(socket) => {
                    info!(relay = %self.relay, attempt, "Connected");

                    let ctx = SessionContext {
                        relay: &self.relay,
                        device_id: self.device_id,
                        user_id: &self.settings.user_id,
                        user_agent: &self.settings.user_agent,
                        heartbeat_interval: self.settings.heartbeat_interval,
                    };
                    let outcome = run_session(socket, &ctx, &self.cancel, &self.state).await;

                    if outcome.reached_steady_state {
                        delay = backoff.initial();
                        attempt = 0;
                    }

                    match outcome.end {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Closed { reason } => {
                            warn!(relay = %self.relay, reason = %reason, "Session closed");
                        }
                        SessionEnd::Failed { error } => {
                            warn!(relay = %self.relay, error = %error, "Session failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(relay = %self.relay, attempt, error = %e, "Connection attempt failed");
                }
            }

            self.set_state(WorkerState::Backoff);
            debug!(
                relay = %self.relay,
                delay_ms = delay.as_millis() as u64,
                "Backing off before reconnect"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = sleep(delay) => {
                    delay = backoff.next(delay);
                }
            }
        }

        self.set_state(WorkerState::Stopped);
        info!(relay = %self.relay, "Worker stopped");
    }

    fn set_state(&self, next: WorkerState) {
        self.state.send_replace(next);
    }
}

/// Random delay in `[0, max]` before a connection attempt.
fn startup_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis().min(u128::from(u64::MAX)) as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_bounds() {
        assert_eq!(startup_jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(startup_jitter(Duration::from_millis(50)) <= Duration::from_millis(50));
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(WorkerState::SteadyState.to_string(), "steady_state");
        assert_eq!(
            serde_json::to_string(&WorkerState::Backoff).unwrap(),
            "\"backoff\""
        );
    }

    #[test]
    fn test_settings_defaults() {
        let settings = WorkerSettings::new(UserId::new("u").unwrap(), "ua");
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(settings.max_jitter, Duration::from_secs(1));
        assert_eq!(settings.backoff, BackoffPolicy::default());
    }
}

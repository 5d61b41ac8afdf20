//! Relay pool supervisor using the Actor pattern.
//!
//! The supervisor owns the registry of running connection workers, one per
//! relay. Membership changes arrive as commands over an mpsc channel and are
//! applied one at a time; lifecycle events go out on a broadcast channel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ Bootstrap /     │────▶│ SupervisorActor │────▶│ Broadcast Channel│
//! │ Debouncer       │     └─────────────────┘     └──────────────────┘
//! └─────────────────┘             │                        │
//!         │   SupervisorCommand   │   PoolEvent            │
//!         │   (mpsc channel)      │   (broadcast)          │
//!         ▼                       ▼                        ▼
//!   Start/Reconcile/        HashMap<RelayId,          subscribers
//!   Reload/Shutdown         WorkerHandle>
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - A single relay's start or stop never fails a reconciliation

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use tether_core::RelayId;

use crate::source::MembershipSource;
use crate::worker::{ConnectionWorker, RelayConnector, WorkerHandle, WorkerSettings};

mod actor;
mod commands;
mod handle;

pub use actor::SupervisorActor;
pub use commands::{PoolEvent, ReconcileReport, RelaySnapshot, SupervisorCommand, SupervisorError};
pub use handle::SupervisorHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 256;

/// Default time a stopping worker gets before it is aborted.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to start a worker for a newly added relay.
#[derive(Clone)]
pub struct WorkerSpawner {
    connector: Arc<dyn RelayConnector>,
    settings: Arc<WorkerSettings>,
    pub(crate) stop_timeout: Duration,
}

impl WorkerSpawner {
    pub fn new(
        connector: Arc<dyn RelayConnector>,
        settings: Arc<WorkerSettings>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            settings,
            stop_timeout,
        }
    }

    pub(crate) fn spawn(&self, relay: RelayId) -> WorkerHandle {
        ConnectionWorker::spawn(relay, Arc::clone(&self.settings), Arc::clone(&self.connector))
    }
}

/// Spawns the supervisor actor and returns a handle to it.
///
/// The registry starts empty; call [`SupervisorHandle::start`] with the
/// boot snapshot.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tetherd::source::FileMembershipSource;
/// use tetherd::supervisor::{spawn_supervisor, WorkerSpawner, DEFAULT_STOP_TIMEOUT};
/// use tetherd::worker::{SocksConnector, WorkerSettings};
/// use tether_core::UserId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = SocksConnector::new("wss://relay.example/", "agent", true)?;
/// let settings = WorkerSettings::new(UserId::new("user")?, "agent");
/// let spawner = WorkerSpawner::new(Arc::new(connector), Arc::new(settings), DEFAULT_STOP_TIMEOUT);
/// let source = Arc::new(FileMembershipSource::new("proxy.txt"));
///
/// let supervisor = spawn_supervisor(spawner, source);
/// supervisor.reload().await?;
/// # Ok(())
/// # }
/// ```
pub fn spawn_supervisor(
    spawner: WorkerSpawner,
    source: Arc<dyn MembershipSource>,
) -> SupervisorHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = SupervisorActor::new(cmd_rx, spawner, source, event_tx.clone());
    tokio::spawn(actor.run());

    SupervisorHandle::new(cmd_tx, event_tx)
}

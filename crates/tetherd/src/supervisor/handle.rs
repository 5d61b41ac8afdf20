//! Client interface for the supervisor actor.
//!
//! `SupervisorHandle` is cheap to clone. Every method sends one command and
//! waits for the actor's reply; a vanished actor surfaces as
//! `SupervisorError::ChannelClosed`.

use tokio::sync::{broadcast, mpsc, oneshot};

use tether_core::MembershipSet;

use super::commands::{
    PoolEvent, ReconcileReport, RelaySnapshot, SupervisorCommand, SupervisorError,
};

#[derive(Clone)]
pub struct SupervisorHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<SupervisorCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<PoolEvent>,
}

impl SupervisorHandle {
    pub fn new(
        sender: mpsc::Sender<SupervisorCommand>,
        event_sender: broadcast::Sender<PoolEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Starts workers for the boot snapshot.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::AlreadyStarted` if workers are already running
    /// - `SupervisorError::ShuttingDown` after [`Self::shutdown_all`]
    /// - `SupervisorError::ChannelClosed` if the actor has shut down
    pub async fn start(&self, initial: MembershipSet) -> Result<ReconcileReport, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorCommand::Start {
            initial,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| SupervisorError::ChannelClosed)?
    }

    /// Applies a new membership snapshot: stops removed relays, then starts
    /// added ones.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::ShuttingDown` after [`Self::shutdown_all`]
    /// - `SupervisorError::ChannelClosed` if the actor has shut down
    pub async fn reconcile(
        &self,
        target: MembershipSet,
    ) -> Result<ReconcileReport, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorCommand::Reconcile {
            target,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| SupervisorError::ChannelClosed)?
    }

    /// Reloads the membership source and reconciles against it.
    ///
    /// An unreadable source is logged by the actor and reported as an
    /// empty change.
    pub async fn reload(&self) -> Result<ReconcileReport, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorCommand::Reload { respond_to: tx }).await?;
        rx.await.map_err(|_| SupervisorError::ChannelClosed)?
    }

    /// Snapshots of every running worker, ordered by relay.
    pub async fn list_relays(&self) -> Result<Vec<RelaySnapshot>, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorCommand::ListRelays { respond_to: tx })
            .await?;
        rx.await.map_err(|_| SupervisorError::ChannelClosed)
    }

    /// Stops every worker and waits for them. Later membership changes are
    /// rejected.
    pub async fn shutdown_all(&self) -> Result<ReconcileReport, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(SupervisorCommand::ShutdownAll { respond_to: tx })
            .await?;
        rx.await.map_err(|_| SupervisorError::ChannelClosed)
    }

    /// Subscribe to pool events.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.event_sender.subscribe()
    }

    async fn send(&self, cmd: SupervisorCommand) -> Result<(), SupervisorError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| SupervisorError::ChannelClosed)
    }
}

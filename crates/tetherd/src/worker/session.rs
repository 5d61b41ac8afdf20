//! One connected relay session: the inbound read loop plus its heartbeat
//! and writer sub-tasks.
//!
//! ```text
//!   heartbeat task ──┐
//!                    ├──▶ mpsc<Message> ──▶ writer task ──▶ socket sink
//!   read loop ───────┘        (replies)
//!       ▲
//!       └──────────── socket stream
//! ```
//!
//! Both sub-tasks are owned by a guard that aborts them when the session
//! ends. On cancellation the writer is released instead: it gets
//! `CLOSE_GRACE` on its own to flush the close frame, then it is aborted.

use std::time::Duration;

use chrono::Utc;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_core::{DeviceId, RelayId, UserId};
use tether_protocol::{AuthResult, FrameError, InboundFrame, OutboundFrame};

use super::WorkerState;

/// Outbound frames queued between producers and the writer task.
const OUTBOUND_BUFFER: usize = 32;

/// How long a cancelled session waits for its close frame to go out.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// What a session needs to answer the upstream.
pub(crate) struct SessionContext<'a> {
    pub relay: &'a RelayId,
    pub device_id: DeviceId,
    pub user_id: &'a UserId,
    pub user_agent: &'a str,
    pub heartbeat_interval: Duration,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    /// The worker was told to stop.
    Cancelled,
    /// The peer closed the connection or the stream ended.
    Closed { reason: String },
    /// The transport errored.
    Failed { error: String },
}

#[derive(Debug)]
pub(crate) struct SessionOutcome {
    pub end: SessionEnd,
    /// Whether an AUTH challenge was answered during the session.
    pub reached_steady_state: bool,
}

/// Aborts the session's sub-tasks on drop.
struct SessionTasks {
    heartbeat: JoinHandle<()>,
    writer: Option<JoinHandle<()>>,
}

impl SessionTasks {
    /// Detaches the writer so it can finish the close handshake without
    /// holding up the worker.
    fn release_writer(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            tokio::spawn(async move {
                if timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                    writer.abort();
                }
            });
        }
    }
}

impl Drop for SessionTasks {
    fn drop(&mut self) {
        self.heartbeat.abort();
        if let Some(writer) = &self.writer {
            writer.abort();
        }
    }
}

/// Runs a session until cancellation, peer close, or transport error.
pub(crate) async fn run_session<S>(
    socket: S,
    ctx: &SessionContext<'_>,
    cancel: &CancellationToken,
    state: &watch::Sender<WorkerState>,
) -> SessionOutcome
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin + 'static,
{
    let (sink, mut stream) = socket.split();
    let (outbound, outbound_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    let mut tasks = SessionTasks {
        writer: Some(tokio::spawn(write_loop(sink, outbound_rx, ctx.relay.clone()))),
        heartbeat: tokio::spawn(heartbeat_loop(
            outbound.clone(),
            ctx.heartbeat_interval,
            ctx.relay.clone(),
        )),
    };

    state.send_replace(WorkerState::Handshaking);
    let mut reached_steady_state = false;

    let end = loop {
        let reply = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tasks.heartbeat.abort();
                let _ = outbound.try_send(Message::Close(None));
                tasks.release_writer();
                break SessionEnd::Cancelled;
            }

            next = stream.next() => match next {
                Some(Ok(Message::Text(text))) => match respond(text.as_str(), ctx) {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(relay = %ctx.relay, error = %e, "Dropping inbound frame");
                        None
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("{} {}", f.code, f.reason.as_str()))
                        .unwrap_or_else(|| "no close frame".to_string());
                    break SessionEnd::Closed { reason };
                }
                Some(Ok(_)) => None,
                Some(Err(e)) => break SessionEnd::Failed { error: e.to_string() },
                None => break SessionEnd::Closed { reason: "stream ended".to_string() },
            },
        };

        let Some(frame) = reply else {
            continue;
        };

        let json = match frame.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(relay = %ctx.relay, error = %e, "Failed to encode reply");
                continue;
            }
        };

        debug!(relay = %ctx.relay, action = frame.label(), id = frame.id(), "Sending reply");

        tokio::select! {
            biased;

            // The next loop iteration handles the cancellation itself.
            _ = cancel.cancelled() => continue,

            sent = outbound.send(Message::text(json)) => {
                if sent.is_err() {
                    break SessionEnd::Failed {
                        error: "session writer stopped".to_string(),
                    };
                }
            }
        }

        if matches!(frame, OutboundFrame::Reply(ref r) if r.result.is_some()) && !reached_steady_state {
            reached_steady_state = true;
            state.send_replace(WorkerState::SteadyState);
            info!(relay = %ctx.relay, device_id = %ctx.device_id, "Authenticated with upstream");
        }
    };

    drop(tasks);
    SessionOutcome {
        end,
        reached_steady_state,
    }
}

/// Builds the reply for one inbound text frame, if it needs one.
pub(crate) fn respond(
    text: &str,
    ctx: &SessionContext<'_>,
) -> Result<Option<OutboundFrame>, FrameError> {
    let frame = InboundFrame::parse(text)?;
    debug!(relay = %ctx.relay, frame = ?frame, "Received frame");

    Ok(match frame {
        InboundFrame::AuthChallenge { id } => Some(OutboundFrame::auth_reply(
            id,
            AuthResult::new(&ctx.device_id, ctx.user_id, ctx.user_agent, Utc::now()),
        )),
        InboundFrame::KeepaliveProbe { id } => Some(OutboundFrame::pong_reply(id)),
        InboundFrame::Unhandled { .. } => None,
    })
}

/// Sends a heartbeat every `every` until the writer goes away.
async fn heartbeat_loop(outbound: mpsc::Sender<Message>, every: Duration, relay: RelayId) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let frame = OutboundFrame::heartbeat();
        let json = match frame.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(relay = %relay, error = %e, "Failed to encode heartbeat");
                continue;
            }
        };

        debug!(relay = %relay, id = frame.id(), "Sending heartbeat");
        if outbound.send(Message::text(json)).await.is_err() {
            debug!(relay = %relay, "Heartbeat stopping: session writer closed");
            break;
        }
    }
}

/// Owns the socket sink; writes queued frames in order.
async fn write_loop<K>(mut sink: K, mut outbound: mpsc::Receiver<Message>, relay: RelayId)
where
    K: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!(relay = %relay, error = %e, "Session write failed");
            return;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    use serde_json::Value;
    use tokio::time::{sleep, Instant};
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::WebSocketStream;

    fn context<'a>(relay: &'a RelayId, user: &'a UserId) -> SessionContext<'a> {
        SessionContext {
            relay,
            device_id: relay.device_id(),
            user_id: user,
            user_agent: "test-agent",
            heartbeat_interval: Duration::from_secs(20),
        }
    }

    #[test]
    fn test_respond_to_auth() {
        let relay = RelayId::parse("p1").unwrap();
        let user = UserId::new("user-1").unwrap();
        let ctx = context(&relay, &user);

        let reply = respond(r#"{"action":"AUTH","id":"x"}"#, &ctx).unwrap().unwrap();
        let value: Value = serde_json::from_str(&reply.to_json().unwrap()).unwrap();

        assert_eq!(value["id"], "x");
        assert_eq!(value["origin_action"], "AUTH");
        assert_eq!(value["result"]["browser_id"], relay.device_id().to_string());
        assert_eq!(value["result"]["user_id"], "user-1");
        assert_eq!(value["result"]["user_agent"], "test-agent");
    }

    #[test]
    fn test_respond_to_keepalive_and_ignore_others() {
        let relay = RelayId::parse("p1").unwrap();
        let user = UserId::new("user-1").unwrap();
        let ctx = context(&relay, &user);

        let reply = respond(r#"{"action":"PONG","id":"k"}"#, &ctx).unwrap().unwrap();
        assert_eq!(reply, OutboundFrame::pong_reply("k"));

        assert!(respond(r#"{"action":"OTHER","id":"k"}"#, &ctx).unwrap().is_none());
        assert!(respond("{{{", &ctx).is_err());
    }

    async fn socket_pair() -> (
        WebSocketStream<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        (client, server)
    }

    async fn next_text(server: &mut WebSocketStream<tokio::io::DuplexStream>) -> Value {
        loop {
            match server.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected server read: {other:?}"),
            }
        }
    }

    /// Next reply frame, skipping heartbeats.
    async fn next_reply(server: &mut WebSocketStream<tokio::io::DuplexStream>) -> Value {
        loop {
            let value = next_text(server).await;
            if value.get("origin_action").is_some() {
                return value;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_heartbeats_and_replies() {
        let relay = RelayId::parse("p1").unwrap();
        let user = UserId::new("user-1").unwrap();
        let (client, mut server) = socket_pair().await;
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(WorkerState::Connecting);

        let session_cancel = cancel.clone();
        let session = tokio::spawn(async move {
            let ctx = context(&relay, &user);
            run_session(client, &ctx, &session_cancel, &state_tx).await
        });

        // First heartbeat goes out immediately.
        let first = next_text(&mut server).await;
        assert_eq!(first["action"], "PING");

        server
            .send(Message::text(r#"{"action":"PONG","id":"k1"}"#))
            .await
            .unwrap();
        let reply = next_reply(&mut server).await;
        assert_eq!(reply["origin_action"], "PONG");
        assert_eq!(reply["id"], "k1");
        assert_eq!(*state_rx.borrow(), WorkerState::Handshaking);

        server
            .send(Message::text(r#"{"action":"AUTH","id":"a1"}"#))
            .await
            .unwrap();
        let reply = next_reply(&mut server).await;
        assert_eq!(reply["origin_action"], "AUTH");
        assert_eq!(*state_rx.borrow(), WorkerState::SteadyState);

        // Next heartbeat after the interval, with a fresh id.
        let second = next_text(&mut server).await;
        assert_eq!(second["action"], "PING");
        assert_ne!(second["id"], first["id"]);

        cancel.cancel();
        let outcome = session.await.unwrap();
        assert_eq!(outcome.end, SessionEnd::Cancelled);
        assert!(outcome.reached_steady_state);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_survives_malformed_frames() {
        let relay = RelayId::parse("p1").unwrap();
        let user = UserId::new("user-1").unwrap();
        let (client, mut server) = socket_pair().await;
        let cancel = CancellationToken::new();
        let (state_tx, _state_rx) = watch::channel(WorkerState::Connecting);

        let session_cancel = cancel.clone();
        let session = tokio::spawn(async move {
            let ctx = context(&relay, &user);
            run_session(client, &ctx, &session_cancel, &state_tx).await
        });

        let _ = next_text(&mut server).await;
        server.send(Message::text("not json")).await.unwrap();
        server
            .send(Message::text(r#"{"action":"PONG","id":"still-alive"}"#))
            .await
            .unwrap();

        let reply = next_reply(&mut server).await;
        assert_eq!(reply["id"], "still-alive");

        cancel.cancel();
        assert_eq!(session.await.unwrap().end, SessionEnd::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_ends_on_peer_close() {
        let relay = RelayId::parse("p1").unwrap();
        let user = UserId::new("user-1").unwrap();
        let (client, mut server) = socket_pair().await;
        let cancel = CancellationToken::new();
        let (state_tx, _state_rx) = watch::channel(WorkerState::Connecting);

        let session = tokio::spawn(async move {
            let ctx = context(&relay, &user);
            run_session(client, &ctx, &cancel, &state_tx).await
        });

        let _ = next_text(&mut server).await;
        server.close(None).await.unwrap();

        let outcome = session.await.unwrap();
        assert!(matches!(outcome.end, SessionEnd::Closed { .. }));
        assert!(!outcome.reached_steady_state);
    }

    // ------------------------------------------------------------------------
    // Scripted sockets: inbound items come from a channel, writes follow a
    // fixed behavior.
    // ------------------------------------------------------------------------

    #[derive(Clone, Copy)]
    enum WriteBehavior {
        /// Never ready to accept a frame.
        Stall,
        /// Every write fails.
        Fail,
    }

    struct ScriptedSocket {
        inbound: mpsc::UnboundedReceiver<Result<Message, WsError>>,
        writes: WriteBehavior,
        attempts: Arc<AtomicUsize>,
    }

    type Script = mpsc::UnboundedSender<Result<Message, WsError>>;

    fn scripted(writes: WriteBehavior) -> (ScriptedSocket, Script, Arc<AtomicUsize>) {
        let (script, inbound) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicUsize::new(0));
        let socket = ScriptedSocket {
            inbound,
            writes,
            attempts: Arc::clone(&attempts),
        };
        (socket, script, attempts)
    }

    impl Stream for ScriptedSocket {
        type Item = Result<Message, WsError>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.inbound.poll_recv(cx)
        }
    }

    impl Sink<Message> for ScriptedSocket {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match self.writes {
                WriteBehavior::Stall => Poll::Pending,
                WriteBehavior::Fail => Poll::Ready(Err(WsError::ConnectionClosed)),
            }
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), WsError> {
            Err(WsError::ConnectionClosed)
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }
    }

    fn spawn_session(socket: ScriptedSocket, cancel: CancellationToken) -> JoinHandle<SessionOutcome> {
        tokio::spawn(async move {
            let relay = RelayId::parse("p1").unwrap();
            let user = UserId::new("user-1").unwrap();
            let (state_tx, _state_rx) = watch::channel(WorkerState::Connecting);
            let ctx = context(&relay, &user);
            run_session(socket, &ctx, &cancel, &state_tx).await
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_does_not_wait_on_stalled_writer() {
        let (socket, script, attempts) = scripted(WriteBehavior::Stall);
        let cancel = CancellationToken::new();
        let session = spawn_session(socket, cancel.clone());

        // The writer is stuck on the first heartbeat.
        while attempts.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let cancelled_at = Instant::now();
        cancel.cancel();
        let outcome = session.await.unwrap();
        assert_eq!(outcome.end, SessionEnd::Cancelled);
        assert!(Instant::now() - cancelled_at < CLOSE_GRACE);

        // The released writer is torn down once its grace runs out.
        sleep(CLOSE_GRACE * 2).await;
        assert!(script.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_outlives_failed_heartbeat() {
        let (socket, script, attempts) = scripted(WriteBehavior::Fail);
        let cancel = CancellationToken::new();
        let session = spawn_session(socket, cancel);

        // The first heartbeat write fails and takes the writer down. Later
        // heartbeats find the outbound queue closed and stop.
        sleep(Duration::from_secs(65)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!session.is_finished());

        // Inbound frames are still read.
        script
            .send(Ok(Message::text(r#"{"action":"OTHER","id":"z"}"#)))
            .unwrap();
        script.send(Ok(Message::Close(None))).unwrap();

        let outcome = session.await.unwrap();
        assert!(matches!(outcome.end, SessionEnd::Closed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_fails_on_transport_error() {
        let (socket, script, _attempts) = scripted(WriteBehavior::Stall);
        let cancel = CancellationToken::new();
        let session = spawn_session(socket, cancel);

        script
            .send(Err(WsError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by relay",
            ))))
            .unwrap();

        let outcome = session.await.unwrap();
        match outcome.end {
            SessionEnd::Failed { error } => assert!(error.contains("connection reset by relay")),
            other => panic!("expected a failed session, got {other:?}"),
        }
        assert!(!outcome.reached_steady_state);
    }
}

//! Push channel lifecycle.
//!
//! [`TransportConnection`] drives one handshake at a time through a
//! [`Connector`] and forwards what happens on the channel to a handler channel
//! as [`TransportEvent`]s. It never retries on its own; reconnection policy
//! belongs to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::protocol::{PushMessage, SessionId};
use crate::transport::{Connector, Transport};

/// Default time allowed for the push channel handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for a graceful close before the transport is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// State of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No channel and no handshake in progress.
    #[default]
    Disconnected,
    /// A handshake is in progress.
    Connecting,
    /// The channel is live.
    Connected,
    /// The last handshake or channel failed.
    Error,
}

impl ConnectionState {
    /// Returns `true` only for [`ConnectionState::Connected`].
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Something that happened on the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The handshake succeeded. Emitted exactly once per handshake.
    Connected,
    /// The server closed the channel.
    Disconnected {
        /// Reason, if one is known.
        reason: Option<String>,
    },
    /// The handshake failed, timed out, or the channel broke.
    Error {
        /// Description of the failure.
        message: String,
    },
    /// A push message arrived.
    Message(PushMessage),
}

/// What [`TransportConnection::connect`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new handshake was started; its result arrives as an event.
    Connecting,
    /// A channel was already live or connecting; only the handlers changed.
    HandlersReplaced,
}

/// Channel receiving [`TransportEvent`]s.
pub type TransportHandlers = mpsc::UnboundedSender<TransportEvent>;

/// Owns the push channel for one session screen.
pub struct TransportConnection {
    connector: Arc<dyn Connector>,
    handshake_timeout: Duration,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    handlers: Arc<watch::Sender<TransportHandlers>>,
    generation: Arc<AtomicU64>,
    close_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TransportConnection {
    /// Create an idle connection that will use `connector` for handshakes.
    pub fn new(connector: Arc<dyn Connector>, handshake_timeout: Duration) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        // Placeholder sink until the first `connect` installs real handlers.
        let (sink, _) = mpsc::unbounded_channel();
        let (handlers, _) = watch::channel(sink);
        Self {
            connector,
            handshake_timeout,
            state_tx: Arc::new(state_tx),
            handlers: Arc::new(handlers),
            generation: Arc::new(AtomicU64::new(0)),
            close_tx: None,
            task: None,
        }
    }

    /// Start a handshake for `session_id`, reporting to `handlers`.
    ///
    /// If a channel is already live or connecting, only the handlers are
    /// replaced.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidSessionId`] if `session_id` is not positive.
    pub fn connect(
        &mut self,
        session_id: SessionId,
        handlers: TransportHandlers,
    ) -> Result<ConnectOutcome> {
        if session_id <= 0 {
            return Err(SyncError::InvalidSessionId(session_id));
        }

        self.handlers.send_replace(handlers);

        if matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            debug!(session_id, "connect while active: handlers replaced");
            return Ok(ConnectOutcome::HandlersReplaced);
        }

        // Release whatever a finished handshake left behind.
        self.release_task();

        let mut generation = 0;
        self.state_tx.send_modify(|state| {
            generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            *state = ConnectionState::Connecting;
        });

        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(run_channel(ChannelTask {
            connector: Arc::clone(&self.connector),
            session_id,
            handshake_timeout: self.handshake_timeout,
            state_tx: Arc::clone(&self.state_tx),
            handlers: Arc::clone(&self.handlers),
            generation: Arc::clone(&self.generation),
            my_generation: generation,
            close_rx,
        }));

        self.close_tx = Some(close_tx);
        self.task = Some(task);
        debug!(session_id, generation, "push channel handshake started");
        Ok(ConnectOutcome::Connecting)
    }

    /// Tear the channel down. Idempotent; emits no event.
    ///
    /// The transport is closed gracefully in the background. Events the old
    /// channel might still produce are discarded.
    pub fn disconnect(&mut self) {
        if self.state() != ConnectionState::Disconnected {
            debug!("push channel disconnected by caller");
        }
        // Invalidate the running handshake under the state lock so a report
        // racing with teardown cannot publish after it.
        self.state_tx.send_modify(|state| {
            self.generation.fetch_add(1, Ordering::AcqRel);
            *state = ConnectionState::Disconnected;
        });
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        // The task finishes on its own after the close signal.
        self.task = None;
    }

    /// Snapshot of the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Returns `true` if the push channel is live.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn release_task(&mut self) {
        self.close_tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnection")
            .field("state", &self.state())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for TransportConnection {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Channel task ────────────────────────────────────────────────────

struct ChannelTask {
    connector: Arc<dyn Connector>,
    session_id: SessionId,
    handshake_timeout: Duration,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    handlers: Arc<watch::Sender<TransportHandlers>>,
    generation: Arc<AtomicU64>,
    my_generation: u64,
    close_rx: oneshot::Receiver<()>,
}

impl ChannelTask {
    fn is_current(&self) -> bool {
        self.generation.load(Ordering::Acquire) == self.my_generation
    }

    /// Publish a state change and an event, unless this handshake was superseded.
    ///
    /// The generation is checked under the state lock, which `disconnect`
    /// also holds while invalidating.
    fn report(&self, state: Option<ConnectionState>, event: TransportEvent) -> bool {
        let mut current = false;
        let mut event = Some(event);
        self.state_tx.send_if_modified(|published| {
            current = self.is_current();
            if !current {
                return false;
            }
            if let Some(event) = event.take() {
                if self.handlers.borrow().send(event).is_err() {
                    debug!("transport handlers dropped");
                }
            }
            match state {
                Some(next) if *published != next => {
                    *published = next;
                    true
                }
                _ => false,
            }
        });
        if !current {
            debug!(
                generation = self.my_generation,
                "dropping event from superseded push channel"
            );
        }
        current
    }
}

/// Handshake, then forward frames until the channel ends or a close is requested.
async fn run_channel(mut task: ChannelTask) {
    let session_id = task.session_id;
    let handshake = tokio::time::timeout(
        task.handshake_timeout,
        task.connector.connect(session_id),
    );

    let outcome = tokio::select! {
        _ = &mut task.close_rx => {
            debug!(session_id, "close requested during handshake");
            return;
        }
        outcome = handshake => outcome,
    };

    let mut transport: Box<dyn Transport> = match outcome {
        Ok(Ok(transport)) => transport,
        Ok(Err(e)) => {
            warn!(session_id, error = %e, "push channel handshake failed");
            task.report(
                Some(ConnectionState::Error),
                TransportEvent::Error {
                    message: e.to_string(),
                },
            );
            return;
        }
        Err(_) => {
            warn!(session_id, timeout = ?task.handshake_timeout, "push channel handshake timed out");
            task.report(
                Some(ConnectionState::Error),
                TransportEvent::Error {
                    message: SyncError::HandshakeTimeout.to_string(),
                },
            );
            return;
        }
    };

    if !task.report(Some(ConnectionState::Connected), TransportEvent::Connected) {
        close_quietly(transport.as_mut()).await;
        return;
    }
    info!(session_id, "push channel connected");

    loop {
        tokio::select! {
            _ = &mut task.close_rx => {
                debug!(session_id, "closing push channel");
                close_quietly(transport.as_mut()).await;
                return;
            }
            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => match PushMessage::parse(&text) {
                    Ok(message) => {
                        debug!(session_id, kind = message.kind(), "push message received");
                        if !task.report(None, TransportEvent::Message(message)) {
                            close_quietly(transport.as_mut()).await;
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(session_id, error = %e, raw = %text, "failed to parse push message");
                    }
                },
                Some(Err(e)) => {
                    warn!(session_id, error = %e, "push channel receive error");
                    task.report(
                        Some(ConnectionState::Error),
                        TransportEvent::Error { message: e.to_string() },
                    );
                    return;
                }
                None => {
                    info!(session_id, "push channel closed by server");
                    task.report(
                        Some(ConnectionState::Disconnected),
                        TransportEvent::Disconnected { reason: None },
                    );
                    return;
                }
            }
        }
    }
}

async fn close_quietly(transport: &mut dyn Transport) {
    match tokio::time::timeout(CLOSE_TIMEOUT, transport.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "push channel close failed"),
        Err(_) => debug!("push channel close timed out"),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;

    /// Transport fed from a test-held channel.
    struct ChannelTransport {
        rx: mpsc::UnboundedReceiver<Option<Result<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn recv(&mut self) -> Option<Result<String>> {
            match self.rx.recv().await {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::Release);
            Ok(())
        }
    }

    enum Script {
        Accept(ChannelTransport),
        Fail,
        Hang,
    }

    struct ScriptedConnector {
        scripts: StdMutex<Vec<Script>>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _session_id: SessionId) -> Result<Box<dyn Transport>> {
            let script = self.scripts.lock().unwrap().pop();
            match script {
                Some(Script::Accept(transport)) => Ok(Box::new(transport)),
                Some(Script::Fail) | None => Err(SyncError::TransportConnect("refused".into())),
                Some(Script::Hang) => std::future::pending().await,
            }
        }
    }

    type ServerSide = (
        mpsc::UnboundedSender<Option<Result<String>>>,
        Arc<AtomicBool>,
    );

    fn channel_transport() -> (ChannelTransport, ServerSide) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            ChannelTransport {
                rx,
                closed: Arc::clone(&closed),
            },
            (tx, closed),
        )
    }

    /// Scripts are consumed last-first.
    fn connection(scripts: Vec<Script>) -> TransportConnection {
        let connector = ScriptedConnector {
            scripts: StdMutex::new(scripts),
        };
        TransportConnection::new(Arc::new(connector), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn rejects_non_positive_session_id() {
        let mut conn = connection(vec![]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = conn.connect(0, tx).unwrap_err();
        assert!(matches!(err, SyncError::InvalidSessionId(0)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connected_then_messages_then_disconnected() {
        let (transport, (server, _closed)) = channel_transport();
        let mut conn = connection(vec![Script::Accept(transport)]);
        let (tx, mut events) = mpsc::unbounded_channel();

        assert_eq!(conn.connect(5, tx).unwrap(), ConnectOutcome::Connecting);
        assert_eq!(conn.state(), ConnectionState::Connecting);

        assert_eq!(events.recv().await.unwrap(), TransportEvent::Connected);
        assert!(conn.is_connected());

        server
            .send(Some(Ok(
                r#"{"type":"participant.ready","data":{"all_ready":true}}"#.into()
            )))
            .unwrap();
        server.send(Some(Ok("not json".into()))).unwrap();
        server.send(None).unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(event, TransportEvent::Message(PushMessage::ParticipantReady(p)) if p.all_ready));
        // The malformed frame is skipped.
        assert_eq!(
            events.recv().await.unwrap(),
            TransportEvent::Disconnected { reason: None }
        );
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn failed_handshake_reports_error_once() {
        let mut conn = connection(vec![Script::Fail]);
        let (tx, mut events) = mpsc::unbounded_channel();
        conn.connect(5, tx).unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(event, TransportEvent::Error { .. }));
        assert_eq!(conn.state(), ConnectionState::Error);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_reports_error() {
        let mut conn = connection(vec![Script::Hang]);
        let (tx, mut events) = mpsc::unbounded_channel();
        conn.connect(5, tx).unwrap();

        match events.recv().await.unwrap() {
            TransportEvent::Error { message } => assert!(message.contains("timed out")),
            other => panic!("expected Error, got {other:?}"),
        }
        assert_eq!(conn.state(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn connect_while_connected_only_replaces_handlers() {
        let (transport, (server, _closed)) = channel_transport();
        let mut conn = connection(vec![Script::Accept(transport)]);
        let (first_tx, mut first) = mpsc::unbounded_channel();
        conn.connect(5, first_tx).unwrap();
        assert_eq!(first.recv().await.unwrap(), TransportEvent::Connected);

        let (second_tx, mut second) = mpsc::unbounded_channel();
        assert_eq!(
            conn.connect(5, second_tx).unwrap(),
            ConnectOutcome::HandlersReplaced
        );

        server
            .send(Some(Ok(r#"{"type":"session.updated","data":{"status":"ready"}}"#.into())))
            .unwrap();
        let event = second.recv().await.unwrap();
        assert!(matches!(event, TransportEvent::Message(PushMessage::SessionUpdated(_))));
        assert!(first.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_silent() {
        let (transport, (_server, closed)) = channel_transport();
        let mut conn = connection(vec![Script::Accept(transport)]);
        let (tx, mut events) = mpsc::unbounded_channel();
        conn.connect(5, tx).unwrap();
        assert_eq!(events.recv().await.unwrap(), TransportEvent::Connected);

        conn.disconnect();
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        // Let the background close run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(closed.load(Ordering::Acquire));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn report_after_disconnect_cannot_republish_state() {
        let mut conn = connection(vec![]);
        let (tx, mut events) = mpsc::unbounded_channel();
        conn.handlers.send_replace(tx);
        let (_close_tx, close_rx) = oneshot::channel();
        let task = ChannelTask {
            connector: Arc::clone(&conn.connector),
            session_id: 5,
            handshake_timeout: Duration::from_millis(500),
            state_tx: Arc::clone(&conn.state_tx),
            handlers: Arc::clone(&conn.handlers),
            generation: Arc::clone(&conn.generation),
            my_generation: conn.generation.load(Ordering::Acquire),
            close_rx,
        };

        assert!(task.report(Some(ConnectionState::Connected), TransportEvent::Connected));
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(events.try_recv().unwrap(), TransportEvent::Connected);

        conn.disconnect();
        assert!(!task.report(
            Some(ConnectionState::Error),
            TransportEvent::Error {
                message: "late".into()
            }
        ));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn racing_report_never_outlives_disconnect() {
        for _ in 0..200 {
            let mut conn = connection(vec![]);
            let (tx, _events) = mpsc::unbounded_channel();
            conn.handlers.send_replace(tx);
            let (_close_tx, close_rx) = oneshot::channel();
            let task = ChannelTask {
                connector: Arc::clone(&conn.connector),
                session_id: 5,
                handshake_timeout: Duration::from_millis(500),
                state_tx: Arc::clone(&conn.state_tx),
                handlers: Arc::clone(&conn.handlers),
                generation: Arc::clone(&conn.generation),
                my_generation: conn.generation.load(Ordering::Acquire),
                close_rx,
            };
            let reporter = tokio::spawn(async move {
                task.report(Some(ConnectionState::Connected), TransportEvent::Connected);
            });
            conn.disconnect();
            reporter.await.unwrap();
            assert_eq!(conn.state(), ConnectionState::Disconnected);
        }
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_safe() {
        let mut conn = connection(vec![]);
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn reconnect_after_failure_starts_new_handshake() {
        let (transport, _server) = channel_transport();
        // Consumed last-first: Fail, then Accept.
        let mut conn = connection(vec![Script::Accept(transport), Script::Fail]);
        let (tx, mut events) = mpsc::unbounded_channel();

        conn.connect(5, tx.clone()).unwrap();
        assert!(matches!(events.recv().await.unwrap(), TransportEvent::Error { .. }));

        assert_eq!(conn.connect(5, tx).unwrap(), ConnectOutcome::Connecting);
        assert_eq!(events.recv().await.unwrap(), TransportEvent::Connected);
    }
}

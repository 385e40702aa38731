#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for live quiz sync integration tests.
//!
//! Provides a scripted [`MockConnector`] whose accepted channels are driven
//! through [`MockServer`] handles, a recording [`MockApi`], and JSON fixtures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use live_quiz_sync::controller::{ReadySessionController, SyncConfig};
use live_quiz_sync::protocol::{ReadyResponse, StatusSnapshot};
use live_quiz_sync::{
    Connector, Participant, SessionApi, SessionEvent, SessionId, SessionStatus, SyncError,
    Transport,
};
use tokio::sync::mpsc;

/// Session id used by every controller test.
pub const SESSION_ID: SessionId = 42;

/// The local user in every fixture.
pub const SELF_ID: i64 = 1;

// ── Push channel ────────────────────────────────────────────────────

enum Frame {
    Text(String),
    Error(String),
    Close,
}

/// Server side of one accepted push channel.
pub struct MockServer {
    tx: mpsc::UnboundedSender<Frame>,
    client_closed: Arc<AtomicBool>,
}

impl MockServer {
    /// Deliver a text frame to the client.
    pub fn push(&self, json: impl Into<String>) {
        let _ = self.tx.send(Frame::Text(json.into()));
    }

    /// Close the channel from the server side.
    pub fn close(&self) {
        let _ = self.tx.send(Frame::Close);
    }

    /// Break the channel with a receive error.
    pub fn fail(&self, message: &str) {
        let _ = self.tx.send(Frame::Error(message.to_string()));
    }

    /// Whether the client closed its end.
    pub fn client_closed(&self) -> bool {
        self.client_closed.load(Ordering::Acquire)
    }
}

struct MockTransport {
    rx: mpsc::UnboundedReceiver<Frame>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        match self.rx.recv().await {
            Some(Frame::Text(text)) => Some(Ok(text)),
            Some(Frame::Error(message)) => Some(Err(SyncError::TransportReceive(message))),
            Some(Frame::Close) => None,
            // Server handle dropped: keep the channel open until the client closes it.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

enum Attempt {
    Accept {
        delay: Duration,
        transport: MockTransport,
    },
    Fail(String),
}

/// A [`Connector`] that plays back scripted handshake outcomes in order.
///
/// Once the script runs out, handshakes hang forever.
#[derive(Default)]
pub struct MockConnector {
    attempts: StdMutex<VecDeque<Attempt>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script a handshake that succeeds immediately.
    pub fn accept(&self) -> MockServer {
        self.accept_after(Duration::ZERO)
    }

    /// Script a handshake that succeeds after `delay`.
    pub fn accept_after(&self, delay: Duration) -> MockServer {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let transport = MockTransport {
            rx,
            closed: Arc::clone(&closed),
        };
        self.attempts
            .lock()
            .unwrap()
            .push_back(Attempt::Accept { delay, transport });
        MockServer {
            tx,
            client_closed: closed,
        }
    }

    /// Script a handshake that fails immediately.
    pub fn fail(&self, message: &str) {
        self.attempts
            .lock()
            .unwrap()
            .push_back(Attempt::Fail(message.to_string()));
    }

    /// Number of handshakes attempted so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _session_id: SessionId) -> Result<Box<dyn Transport>, SyncError> {
        self.connects.fetch_add(1, Ordering::AcqRel);
        let attempt = self.attempts.lock().unwrap().pop_front();
        match attempt {
            Some(Attempt::Accept { delay, transport }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(Box::new(transport))
            }
            Some(Attempt::Fail(message)) => Err(SyncError::TransportConnect(message)),
            None => std::future::pending().await,
        }
    }
}

// ── Session API ─────────────────────────────────────────────────────

/// A request received by [`MockApi`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiCall {
    FetchStatus,
    SubmitReady,
    Leave,
    CancelAttempt,
}

/// A [`SessionApi`] serving a mutable snapshot and recording every call.
pub struct MockApi {
    status: StdMutex<StatusSnapshot>,
    ready: StdMutex<VecDeque<Result<ReadyResponse, SyncError>>>,
    leave_error: StdMutex<Option<SyncError>>,
    cancel_error: StdMutex<Option<SyncError>>,
    latency: StdMutex<Duration>,
    calls: StdMutex<Vec<ApiCall>>,
}

impl MockApi {
    pub fn new(status: StatusSnapshot) -> Arc<Self> {
        Arc::new(Self {
            status: StdMutex::new(status),
            ready: StdMutex::new(VecDeque::new()),
            leave_error: StdMutex::new(None),
            cancel_error: StdMutex::new(None),
            latency: StdMutex::new(Duration::ZERO),
            calls: StdMutex::new(Vec::new()),
        })
    }

    /// Replace the snapshot served by `fetch_status`.
    pub fn set_status(&self, status: StatusSnapshot) {
        *self.status.lock().unwrap() = status;
    }

    /// Queue the next `submit_ready` result. Without one, the answer is
    /// derived from the current snapshot.
    pub fn queue_ready(&self, result: Result<ReadyResponse, SyncError>) {
        self.ready.lock().unwrap().push_back(result);
    }

    pub fn fail_leave(&self, error: SyncError) {
        *self.leave_error.lock().unwrap() = Some(error);
    }

    pub fn fail_cancel_attempt(&self, error: SyncError) {
        *self.cancel_error.lock().unwrap() = Some(error);
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: ApiCall) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == call)
            .count()
    }

    async fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl SessionApi for MockApi {
    async fn fetch_status(&self, _session_id: SessionId) -> live_quiz_sync::Result<StatusSnapshot> {
        self.record(ApiCall::FetchStatus).await;
        Ok(self.status.lock().unwrap().clone())
    }

    async fn submit_ready(&self, _session_id: SessionId) -> live_quiz_sync::Result<ReadyResponse> {
        self.record(ApiCall::SubmitReady).await;
        if let Some(result) = self.ready.lock().unwrap().pop_front() {
            return result;
        }
        let status = self.status.lock().unwrap();
        Ok(ReadyResponse {
            status: status.status,
            all_ready: status.participants.len() == 2
                && status.participants.iter().all(|p| p.is_ready),
        })
    }

    async fn leave(&self, _session_id: SessionId) -> live_quiz_sync::Result<()> {
        self.record(ApiCall::Leave).await;
        match self.leave_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn cancel_attempt(&self, _session_id: SessionId) -> live_quiz_sync::Result<()> {
        self.record(ApiCall::CancelAttempt).await;
        match self.cancel_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

/// Ada (the local user) and Lin with the given ready flags.
pub fn participants(ready: [bool; 2]) -> Vec<Participant> {
    vec![
        Participant::new(SELF_ID, "Ada", ready[0]),
        Participant::new(2, "Lin", ready[1]),
    ]
}

pub fn snapshot(status: SessionStatus, ready: [bool; 2]) -> StatusSnapshot {
    StatusSnapshot {
        status,
        participants: participants(ready),
    }
}

/// A `session.updated` frame carrying a status and both participants.
pub fn session_updated(status: &str, ready: [bool; 2]) -> String {
    serde_json::json!({
        "type": "session.updated",
        "data": {
            "status": status,
            "participants": [
                {"user_id": SELF_ID, "name": "Ada", "is_ready": ready[0]},
                {"user_id": 2, "name": "Lin", "is_ready": ready[1]},
            ],
        },
    })
    .to_string()
}

/// A `session.updated` frame carrying only a status.
pub fn status_only(status: &str) -> String {
    serde_json::json!({"type": "session.updated", "data": {"status": status}}).to_string()
}

/// A `participant.ready` frame.
pub fn participant_ready(all_ready: bool) -> String {
    serde_json::json!({"type": "participant.ready", "data": {"all_ready": all_ready}}).to_string()
}

// ── Harness ─────────────────────────────────────────────────────────

/// Default config with the local user set.
pub fn config() -> SyncConfig {
    SyncConfig::new().with_self_user_id(SELF_ID)
}

/// Start a controller for [`SESSION_ID`].
pub fn start(
    connector: &Arc<MockConnector>,
    api: &Arc<MockApi>,
    config: SyncConfig,
) -> (ReadySessionController, mpsc::Receiver<SessionEvent>) {
    ReadySessionController::start(
        SESSION_ID,
        Arc::clone(connector) as Arc<dyn Connector>,
        Arc::clone(api) as Arc<dyn SessionApi>,
        config,
    )
    .unwrap()
}

/// Let every runnable task make progress without moving the paused clock.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Advance the paused clock by `ms`, then settle.
pub async fn advance_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    settle().await;
}

/// Every event currently queued.
pub fn drain(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

//! The ready screen controller.
//!
//! [`ReadySessionController`] is a thin handle over a background task that
//! owns every component of the synchronizer: the push channel, the fallback
//! poller, the reconciler and the transition coordinator. The task multiplexes
//! user commands, push channel events, completions of spawned HTTP requests and
//! the earliest pending deadline with `tokio::select!`, so all state is touched
//! from one place and no locks are needed.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = SyncConfig::new().with_self_user_id(42);
//! let (controller, mut events) =
//!     ReadySessionController::start(session_id, connector, api, config)?;
//!
//! controller.request_ready()?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::NavigateToMatch => { /* show the match */ break; }
//!         SessionEvent::CommandFailed { message, .. } => { /* show a notice */ }
//!         _ => {}
//!     }
//! }
//! ```

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::actions::{ReadyActionClient, ReadyOutcome};
use crate::api::SessionApi;
use crate::connection::{
    ConnectionState, TransportConnection, TransportEvent, DEFAULT_HANDSHAKE_TIMEOUT,
};
use crate::coordinator::{Effect, TransitionCoordinator, TransitionTimings};
use crate::error::{Result, SyncError};
use crate::event::{Command, SessionEvent};
use crate::poller::{FallbackPoller, DEFAULT_POLL_INTERVAL};
use crate::protocol::{PushMessage, SessionId, StatusSnapshot, UserId};
use crate::reconciler::{
    SessionUpdate, StateReconciler, UpdateSource, DEFAULT_EXPECTED_PARTICIPANTS,
};
use crate::store::SessionView;
use crate::transport::Connector;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

/// Default time [`ReadySessionController::stop`] waits for the loop.
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Default delay before a new push channel handshake after a failure.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`ReadySessionController`].
///
/// Every field has a default matching the production timings.
///
/// ```
/// use live_quiz_sync::controller::SyncConfig;
/// use std::time::Duration;
///
/// let config = SyncConfig::new()
///     .with_self_user_id(42)
///     .with_poll_interval(Duration::from_secs(5))
///     .with_max_reconnect_attempts(3);
/// assert_eq!(config.self_user_id, Some(42));
/// assert_eq!(config.expected_participants, 2);
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// The local user, used to recognise the self entry in participant lists.
    pub self_user_id: Option<UserId>,
    /// Number of participants that must be ready. Defaults to **2**.
    pub expected_participants: usize,
    /// Fallback, confirm and navigation delays.
    pub timings: TransitionTimings,
    /// Poller cadence. Defaults to **3 seconds**.
    pub poll_interval: Duration,
    /// Push channel handshake timeout. Defaults to **10 seconds**.
    pub handshake_timeout: Duration,
    /// Delay before retrying the push channel. Defaults to **2 seconds**.
    pub reconnect_delay: Duration,
    /// Maximum consecutive reconnect attempts; `None` retries forever.
    ///
    /// Once exhausted the poller stays the only update source.
    pub max_reconnect_attempts: Option<u32>,
    /// Capacity of the bounded event channel. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time [`ReadySessionController::stop`] waits before aborting the loop.
    pub stop_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            self_user_id: None,
            expected_participants: DEFAULT_EXPECTED_PARTICIPANTS,
            timings: TransitionTimings::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: None,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl SyncConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local user's id.
    #[must_use]
    pub fn with_self_user_id(mut self, user_id: UserId) -> Self {
        self.self_user_id = Some(user_id);
        self
    }

    /// Set the number of participants that must be ready. Clamped to at least 1.
    #[must_use]
    pub fn with_expected_participants(mut self, count: usize) -> Self {
        self.expected_participants = count.max(1);
        self
    }

    /// Replace the coordinator's delays.
    #[must_use]
    pub fn with_timings(mut self, timings: TransitionTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Set the poller cadence.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the push channel handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the delay before a push channel reconnect.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Limit consecutive reconnect attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Set the capacity of the bounded event channel. Clamped to at least 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the stop timeout. Zero aborts the loop immediately.
    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

// ── Controller handle ───────────────────────────────────────────────

/// Handle to a running ready screen session.
///
/// Created with [`ReadySessionController::start`]. Commands are queued to the
/// background loop and return immediately; their results arrive as
/// [`SessionEvent`]s or as changes to the [`SessionView`].
pub struct ReadySessionController {
    session_id: SessionId,
    cmd_tx: mpsc::UnboundedSender<Command>,
    view_rx: watch::Receiver<SessionView>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    stop_timeout: Duration,
}

impl ReadySessionController {
    /// Enter the ready screen for `session_id`.
    ///
    /// Starts the push channel handshake immediately and schedules fallback
    /// polling in case it does not connect in time. Must be called from within
    /// a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidSessionId`] if `session_id` is not positive.
    pub fn start(
        session_id: SessionId,
        connector: Arc<dyn Connector>,
        api: Arc<dyn SessionApi>,
        config: SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>)> {
        if session_id <= 0 {
            return Err(SyncError::InvalidSessionId(session_id));
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let reconciler = StateReconciler::new(
            session_id,
            config.expected_participants,
            config.self_user_id,
        );
        let view_rx = reconciler.subscribe();
        let stop_timeout = config.stop_timeout;

        let mut session = SessionLoop {
            session_id,
            actions: ReadyActionClient::new(Arc::clone(&api), session_id),
            api,
            connection: TransportConnection::new(connector, config.handshake_timeout),
            poller: FallbackPoller::new(),
            reconciler,
            coordinator: TransitionCoordinator::new(config.timings),
            event_tx,
            transport_tx,
            internal_tx,
            reconnect_at: None,
            reconnect_attempts: 0,
            in_flight: HashSet::new(),
            finished: false,
            config,
        };
        session.open()?;

        let task = tokio::spawn(session.run(LoopInputs {
            cmd_rx,
            transport_rx,
            internal_rx,
            shutdown_rx,
        }));

        let controller = Self {
            session_id,
            cmd_tx,
            view_rx,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            stop_timeout,
        };
        Ok((controller, event_rx))
    }

    /// Flag the local user ready.
    ///
    /// The view reflects the mark at once; a failure reverts it and emits
    /// [`SessionEvent::CommandFailed`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] after the controller stopped.
    pub fn request_ready(&self) -> Result<()> {
        self.send(Command::Ready)
    }

    /// Leave the session. [`SessionEvent::Left`] follows a successful request.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] after the controller stopped.
    pub fn request_leave(&self) -> Result<()> {
        self.send(Command::Leave)
    }

    /// Cancel the current attempt. [`SessionEvent::AttemptCancelled`] follows a
    /// successful request.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] after the controller stopped.
    pub fn request_cancel_attempt(&self) -> Result<()> {
        self.send(Command::CancelAttempt)
    }

    /// A clone of the current view.
    pub fn view(&self) -> SessionView {
        self.view_rx.borrow().clone()
    }

    /// Watch for view changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_rx.clone()
    }

    /// Last push channel state mirrored into the view.
    pub fn connection_state(&self) -> ConnectionState {
        self.view_rx.borrow().connection
    }

    /// The session this controller synchronizes.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Leave the ready screen: disconnect the push channel, stop the poller and
    /// cancel pending timers, then wait for the loop to exit.
    ///
    /// Idempotent.
    pub async fn stop(&mut self) {
        debug!(session_id = self.session_id, "stop requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.stop_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.cmd_tx.send(command).map_err(|_| SyncError::NotRunning)
    }
}

impl std::fmt::Debug for ReadySessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadySessionController")
            .field("session_id", &self.session_id)
            .field("connection", &self.connection_state())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for ReadySessionController {
    fn drop(&mut self) {
        // Dropping the loop drops the push channel and the poller, which abort
        // their own tasks.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

/// Result of a spawned HTTP request, routed back into the loop.
enum Completion {
    Fetched {
        source: UpdateSource,
        result: Result<StatusSnapshot>,
    },
    Ready {
        confirm: bool,
        result: Result<ReadyOutcome>,
    },
    Leave(Result<()>),
    CancelAttempt(Result<()>),
}

struct LoopInputs {
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    internal_rx: mpsc::UnboundedReceiver<Completion>,
    shutdown_rx: oneshot::Receiver<()>,
}

struct SessionLoop {
    session_id: SessionId,
    config: SyncConfig,
    api: Arc<dyn SessionApi>,
    actions: ReadyActionClient,
    connection: TransportConnection,
    poller: FallbackPoller,
    reconciler: StateReconciler,
    coordinator: TransitionCoordinator,
    event_tx: mpsc::Sender<SessionEvent>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    internal_tx: mpsc::UnboundedSender<Completion>,
    reconnect_at: Option<Instant>,
    reconnect_attempts: u32,
    in_flight: HashSet<Command>,
    /// Set once `Left` or `AttemptCancelled` has been emitted.
    finished: bool,
}

impl SessionLoop {
    fn open(&mut self) -> Result<()> {
        self.connection
            .connect(self.session_id, self.transport_tx.clone())?;
        self.sync_connection_state();
        // Until the handshake succeeds the session is without a push channel.
        self.coordinator.on_connection_lost(Instant::now());
        Ok(())
    }

    async fn run(mut self, mut inputs: LoopInputs) {
        info!(session_id = self.session_id, "ready session started");

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                _ = &mut inputs.shutdown_rx => {
                    debug!("shutdown signal received");
                    break;
                }
                cmd = inputs.cmd_rx.recv() => match cmd {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("command channel closed, shutting down session loop");
                        break;
                    }
                },
                Some(event) = inputs.transport_rx.recv() => self.handle_transport(event).await,
                Some(done) = inputs.internal_rx.recv() => self.handle_completion(done).await,
                () = sleep_until(deadline) => self.handle_deadline().await,
            }
        }

        self.release_sources();
        info!(session_id = self.session_id, "ready session stopped");
    }

    // ── Inputs ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, command: Command) {
        if command == Command::Ready && self.coordinator.is_terminated() {
            debug!("session finished; ready ignored");
            return;
        }
        if self.finished {
            debug!(%command, "session already left; command ignored");
            return;
        }
        if !self.in_flight.insert(command) {
            debug!(%command, "command already in flight; ignored");
            return;
        }
        debug!(%command, "command dispatched");

        match command {
            Command::Ready => {
                let mark = self.actions.optimistic_mark();
                self.apply(mark).await;
                self.spawn_ready(false);
            }
            Command::Leave => {
                let actions = self.actions.clone();
                self.spawn(async move { Completion::Leave(actions.leave().await) });
            }
            Command::CancelAttempt => {
                let actions = self.actions.clone();
                self.spawn(async move { Completion::CancelAttempt(actions.cancel_attempt().await) });
            }
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.sync_connection_state();
                self.reconnect_at = None;
                self.reconnect_attempts = 0;
                let effects = self.coordinator.on_connected();
                self.execute(effects).await;
            }
            TransportEvent::Disconnected { reason } => {
                info!(session_id = self.session_id, ?reason, "push channel lost");
                self.on_channel_down();
            }
            TransportEvent::Error { message } => {
                warn!(session_id = self.session_id, %message, "push channel error");
                self.on_channel_down();
            }
            TransportEvent::Message(message) => self.handle_push(message).await,
        }
    }

    async fn handle_push(&mut self, message: PushMessage) {
        if matches!(message, PushMessage::ParticipantReady(_)) && !self.coordinator.is_terminated()
        {
            self.spawn_fetch(UpdateSource::Refresh);
        }
        match SessionUpdate::from_push(&message) {
            Some(update) => self.apply(update).await,
            None => debug!(kind = message.kind(), "ignoring push message"),
        }
    }

    async fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Fetched {
                source,
                result: Ok(snapshot),
            } => {
                self.apply(SessionUpdate::from_snapshot(source, snapshot))
                    .await;
            }
            Completion::Fetched {
                source,
                result: Err(e),
            } => {
                warn!(?source, error = %e, "status fetch failed");
            }
            Completion::Ready { confirm, result } => self.finish_ready(confirm, result).await,
            Completion::Leave(result) => {
                self.in_flight.remove(&Command::Leave);
                match result {
                    Ok(()) => {
                        info!(session_id = self.session_id, "left session");
                        self.finish(SessionEvent::Left).await;
                    }
                    Err(e) => self.command_failed(Command::Leave, e.to_string()).await,
                }
            }
            Completion::CancelAttempt(result) => {
                self.in_flight.remove(&Command::CancelAttempt);
                match result {
                    Ok(()) => {
                        info!(session_id = self.session_id, "attempt cancelled");
                        self.finish(SessionEvent::AttemptCancelled).await;
                    }
                    Err(e) => {
                        self.command_failed(Command::CancelAttempt, e.to_string())
                            .await;
                    }
                }
            }
        }
    }

    async fn handle_deadline(&mut self) {
        let now = Instant::now();
        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            self.reconnect();
        }
        let effects = self
            .coordinator
            .on_deadline(now, self.connection.is_connected());
        self.execute(effects).await;
    }

    // ── State ───────────────────────────────────────────────────────

    async fn apply(&mut self, update: SessionUpdate) {
        if self.coordinator.is_terminated() {
            debug!(source = ?update.source, "session finished; update ignored");
            return;
        }
        if self.reconciler.apply(update) {
            let view = self.reconciler.view();
            let effects = self.coordinator.observe(&view, Instant::now());
            self.execute(effects).await;
        }
    }

    async fn finish_ready(&mut self, confirm: bool, result: Result<ReadyOutcome>) {
        if !confirm {
            self.in_flight.remove(&Command::Ready);
        }
        let failure = match result {
            Ok(ReadyOutcome::Accepted(response)) => {
                self.apply(SessionUpdate::from_ready_response(response))
                    .await;
                return;
            }
            Ok(ReadyOutcome::Rejected { message }) => {
                message.unwrap_or_else(|| "ready rejected by server".to_string())
            }
            Err(e) => e.to_string(),
        };

        if confirm {
            warn!(error = %failure, "ready confirmation failed");
        } else {
            let revert = self.actions.revert_mark();
            self.apply(revert).await;
            self.command_failed(Command::Ready, failure).await;
        }
    }

    fn on_channel_down(&mut self) {
        self.sync_connection_state();
        if self.coordinator.is_terminated() {
            return;
        }
        let now = Instant::now();
        self.coordinator.on_connection_lost(now);
        self.schedule_reconnect(now);
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        if self.reconnect_at.is_some() {
            return;
        }
        if let Some(max) = self.config.max_reconnect_attempts {
            if self.reconnect_attempts >= max {
                warn!(
                    attempts = self.reconnect_attempts,
                    "push channel reconnects exhausted; polling only"
                );
                return;
            }
        }
        self.reconnect_at = Some(now + self.config.reconnect_delay);
    }

    fn reconnect(&mut self) {
        if self.coordinator.is_terminated() || self.connection.is_connected() {
            return;
        }
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        info!(
            session_id = self.session_id,
            attempt = self.reconnect_attempts,
            "reconnecting push channel"
        );
        if let Err(e) = self
            .connection
            .connect(self.session_id, self.transport_tx.clone())
        {
            warn!(error = %e, "push channel reconnect failed");
        }
        self.sync_connection_state();
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.coordinator.next_deadline(), self.reconnect_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn sync_connection_state(&mut self) {
        self.reconciler
            .set_connection_state(self.connection.state());
    }

    // ── Effects ─────────────────────────────────────────────────────

    async fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartPoller => self.start_poller(),
                Effect::StopPoller => {
                    self.poller.stop();
                }
                Effect::SeedFetch => self.spawn_fetch(UpdateSource::Seed),
                Effect::ConfirmReady => {
                    info!(session_id = self.session_id, "confirming ready");
                    self.spawn_ready(true);
                }
                Effect::NavigateToMatch => {
                    info!(session_id = self.session_id, "navigating to match");
                    self.emit(SessionEvent::NavigateToMatch).await;
                }
                Effect::NavigateToDisconnected => {
                    self.release_sources();
                    self.emit(SessionEvent::NavigateToDisconnected).await;
                }
            }
        }
    }

    fn start_poller(&mut self) {
        let api = Arc::clone(&self.api);
        let tx = self.internal_tx.clone();
        let session_id = self.session_id;
        let fetch = move || {
            let api = Arc::clone(&api);
            let tx = tx.clone();
            async move {
                let result = api.fetch_status(session_id).await;
                let _ = tx.send(Completion::Fetched {
                    source: UpdateSource::Poll,
                    result,
                });
            }
        };

        if self.poller.start(
            self.config.poll_interval,
            self.connection.subscribe_state(),
            fetch,
        ) {
            info!(session_id, "push channel unavailable; polling");
        }
    }

    fn spawn_fetch(&self, source: UpdateSource) {
        let api = Arc::clone(&self.api);
        let session_id = self.session_id;
        self.spawn(async move {
            Completion::Fetched {
                source,
                result: api.fetch_status(session_id).await,
            }
        });
    }

    fn spawn_ready(&self, confirm: bool) {
        let actions = self.actions.clone();
        self.spawn(async move {
            Completion::Ready {
                confirm,
                result: actions.submit_ready().await,
            }
        });
    }

    /// Run `work` as its own task and route its result back into the loop.
    fn spawn<F>(&self, work: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let done = work.await;
            if tx.send(done).is_err() {
                debug!("session loop gone; request result dropped");
            }
        });
    }

    /// Disconnect the push channel, stop the poller, cancel pending timers.
    fn release_sources(&mut self) {
        self.connection.disconnect();
        self.poller.stop();
        self.coordinator.cancel_timers();
        self.reconnect_at = None;
        self.sync_connection_state();
    }

    async fn finish(&mut self, event: SessionEvent) {
        if self.finished {
            debug!(?event, "session already left; result dropped");
            return;
        }
        self.finished = true;
        self.coordinator.terminate();
        self.release_sources();
        self.emit(event).await;
    }

    async fn command_failed(&mut self, command: Command, message: String) {
        warn!(%command, %message, "command failed");
        self.emit(SessionEvent::CommandFailed { command, message })
            .await;
    }

    /// Deliver `event`. Terminal events wait for channel capacity; others are
    /// dropped with a warning when the consumer lags.
    async fn emit(&self, event: SessionEvent) {
        if event.is_terminal() {
            if self.event_tx.send(event).await.is_err() {
                debug!("event channel closed, receiver dropped");
            }
            return;
        }
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("event channel full, dropping event: {dropped:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ── Tests ───────────────────────────────────────────────────────────

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
    use crate::protocol::ReadyResponse;
    use crate::transport::Transport;
    use async_trait::async_trait;

    struct NeverConnects;

    #[async_trait]
    impl Connector for NeverConnects {
        async fn connect(&self, _session_id: SessionId) -> Result<Box<dyn Transport>> {
            std::future::pending().await
        }
    }

    struct OfflineApi;

    #[async_trait]
    impl SessionApi for OfflineApi {
        async fn fetch_status(&self, _session_id: SessionId) -> Result<StatusSnapshot> {
            Err(SyncError::Io(std::io::Error::other("offline")))
        }
        async fn submit_ready(&self, _session_id: SessionId) -> Result<ReadyResponse> {
            Err(SyncError::Io(std::io::Error::other("offline")))
        }
        async fn leave(&self, _session_id: SessionId) -> Result<()> {
            Err(SyncError::Io(std::io::Error::other("offline")))
        }
        async fn cancel_attempt(&self, _session_id: SessionId) -> Result<()> {
            Err(SyncError::Io(std::io::Error::other("offline")))
        }
    }

    #[test]
    fn config_defaults() {
        let config = SyncConfig::new();
        assert_eq!(config.self_user_id, None);
        assert_eq!(config.expected_participants, 2);
        assert_eq!(config.poll_interval, Duration::from_millis(3000));
        assert_eq!(config.reconnect_delay, Duration::from_millis(2000));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.max_reconnect_attempts, None);
        assert_eq!(config.stop_timeout, Duration::from_secs(1));
        assert_eq!(config.timings, TransitionTimings::default());
    }

    #[test]
    fn config_builder_clamps() {
        let config = SyncConfig::new()
            .with_event_channel_capacity(0)
            .with_expected_participants(0);
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.expected_participants, 1);
    }

    #[tokio::test]
    async fn start_rejects_non_positive_session_id() {
        let result = ReadySessionController::start(
            0,
            Arc::new(NeverConnects),
            Arc::new(OfflineApi),
            SyncConfig::new(),
        );
        assert!(matches!(result, Err(SyncError::InvalidSessionId(0))));
    }

    #[tokio::test(start_paused = true)]
    async fn commands_fail_after_stop() {
        let (mut controller, _events) = ReadySessionController::start(
            7,
            Arc::new(NeverConnects),
            Arc::new(OfflineApi),
            SyncConfig::new(),
        )
        .unwrap();
        assert_eq!(controller.session_id(), 7);
        assert_eq!(controller.connection_state(), ConnectionState::Connecting);

        controller.stop().await;
        controller.stop().await;
        assert!(matches!(
            controller.request_ready(),
            Err(SyncError::NotRunning)
        ));
        assert_eq!(controller.view().connection, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn debug_impl_mentions_session() {
        let (mut controller, _events) = ReadySessionController::start(
            3,
            Arc::new(NeverConnects),
            Arc::new(OfflineApi),
            SyncConfig::new(),
        )
        .unwrap();
        let debug = format!("{controller:?}");
        assert!(debug.contains("ReadySessionController"));
        assert!(debug.contains("session_id: 3"));
        controller.stop().await;
    }
}

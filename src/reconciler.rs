//! Merge point for updates coming from the push channel, the poller, and
//! command responses.
//!
//! Merging is last-writer-wins per field with one exception: a status that
//! would move the session backwards (for example a late poll reporting
//! `ready` after a push already said `in_progress`) is ignored.

use tokio::sync::watch;
use tracing::debug;

use crate::connection::ConnectionState;
use crate::protocol::{
    Participant, PushMessage, ReadyResponse, SessionId, SessionStatus, StatusSnapshot, UserId,
};
use crate::store::{SessionStore, SessionView};

/// Default number of participants in a live quiz session.
pub const DEFAULT_EXPECTED_PARTICIPANTS: usize = 2;

/// Where an update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    /// A push channel message.
    Push,
    /// A fallback poll response.
    Poll,
    /// The one-shot fetch issued after the push channel connects.
    Seed,
    /// A fetch triggered by a `participant.ready` message.
    Refresh,
    /// A command response or an optimistic local mark.
    Command,
}

/// A partial or full change to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUpdate {
    /// Origin of the update, for logging.
    pub source: UpdateSource,
    /// New status, if reported.
    pub status: Option<SessionStatus>,
    /// Full participant list, if reported.
    pub participants: Option<Vec<Participant>>,
    /// Server-computed `all_ready`; ignored when `participants` is present.
    pub all_ready: Option<bool>,
    /// Local "I am ready" mark (`true`) or its revert (`false`).
    pub self_ready: Option<bool>,
}

impl SessionUpdate {
    /// An update carrying nothing.
    pub fn empty(source: UpdateSource) -> Self {
        Self {
            source,
            status: None,
            participants: None,
            all_ready: None,
            self_ready: None,
        }
    }

    /// Translate a push message. Unknown message types yield `None`.
    pub fn from_push(message: &PushMessage) -> Option<Self> {
        match message {
            PushMessage::SessionUpdated(payload) => Some(Self {
                status: payload.status,
                participants: payload.participants.clone(),
                ..Self::empty(UpdateSource::Push)
            }),
            PushMessage::ParticipantReady(payload) => Some(Self {
                all_ready: Some(payload.all_ready),
                ..Self::empty(UpdateSource::Push)
            }),
            PushMessage::Other { .. } => None,
        }
    }

    /// A full snapshot from `GET /sessions/{id}/status`.
    pub fn from_snapshot(source: UpdateSource, snapshot: StatusSnapshot) -> Self {
        Self {
            status: Some(snapshot.status),
            participants: Some(snapshot.participants),
            ..Self::empty(source)
        }
    }

    /// The authoritative answer to a ready command.
    pub fn from_ready_response(response: ReadyResponse) -> Self {
        Self {
            status: Some(response.status),
            all_ready: Some(response.all_ready),
            ..Self::empty(UpdateSource::Command)
        }
    }

    /// Set or revert the local "I am ready" mark.
    pub fn self_ready(ready: bool) -> Self {
        Self {
            self_ready: Some(ready),
            ..Self::empty(UpdateSource::Command)
        }
    }
}

/// Sole writer of the [`SessionStore`].
#[derive(Debug)]
pub struct StateReconciler {
    store: SessionStore,
    expected_participants: usize,
    self_user_id: Option<UserId>,
}

impl StateReconciler {
    /// Create a reconciler over a fresh store for `session_id`.
    pub fn new(
        session_id: SessionId,
        expected_participants: usize,
        self_user_id: Option<UserId>,
    ) -> Self {
        Self {
            store: SessionStore::new(session_id),
            expected_participants,
            self_user_id,
        }
    }

    /// A clone of the current view.
    pub fn view(&self) -> SessionView {
        self.store.snapshot()
    }

    /// Watch for view changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.store.subscribe()
    }

    /// Merge `update` into the store. Returns `true` if the view changed.
    pub fn apply(&mut self, update: SessionUpdate) -> bool {
        let mut next = self.store.snapshot();

        if let Some(status) = update.status {
            match next.status {
                Some(current) if !current.can_advance_to(status) => {
                    debug!(
                        source = ?update.source,
                        ?current,
                        rejected = ?status,
                        "ignoring status regression"
                    );
                }
                _ => next.status = Some(status),
            }
        }

        match (update.participants, update.all_ready) {
            (Some(participants), _) => {
                next.all_ready = self.derive_all_ready(&participants);
                if self.self_entry(&participants).is_some_and(|p| p.is_ready) {
                    next.is_self_ready = true;
                }
                next.participants = participants;
            }
            (None, Some(all_ready)) => next.all_ready = all_ready,
            (None, None) => {}
        }

        match update.self_ready {
            Some(true) => next.is_self_ready = true,
            Some(false) => {
                next.is_self_ready = self
                    .self_entry(&next.participants)
                    .is_some_and(|p| p.is_ready);
            }
            None => {}
        }

        let changed = self.store.replace(next);
        if changed {
            debug!(source = ?update.source, "session state changed");
        }
        changed
    }

    /// Mirror the push channel state into the view.
    pub fn set_connection_state(&mut self, state: ConnectionState) -> bool {
        let mut next = self.store.snapshot();
        next.connection = state;
        self.store.replace(next)
    }

    fn derive_all_ready(&self, participants: &[Participant]) -> bool {
        participants.len() == self.expected_participants && participants.iter().all(|p| p.is_ready)
    }

    fn self_entry<'a>(&self, participants: &'a [Participant]) -> Option<&'a Participant> {
        let me = self.self_user_id?;
        participants.iter().find(|p| p.user_id == me)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::{ParticipantReadyPayload, SessionUpdatedPayload};

    fn reconciler() -> StateReconciler {
        StateReconciler::new(9, DEFAULT_EXPECTED_PARTICIPANTS, Some(1))
    }

    fn snapshot(status: SessionStatus, p1: bool, p2: bool) -> StatusSnapshot {
        StatusSnapshot {
            status,
            participants: vec![Participant::new(1, "Ada", p1), Participant::new(2, "Lin", p2)],
        }
    }

    #[test]
    fn identical_snapshot_is_not_a_change() {
        let mut r = reconciler();
        let snap = snapshot(SessionStatus::Waiting, false, true);
        assert!(r.apply(SessionUpdate::from_snapshot(UpdateSource::Seed, snap.clone())));
        assert!(!r.apply(SessionUpdate::from_snapshot(UpdateSource::Poll, snap)));
    }

    #[test]
    fn all_ready_is_derived_from_participants() {
        let mut r = reconciler();
        r.apply(SessionUpdate::from_snapshot(
            UpdateSource::Poll,
            snapshot(SessionStatus::Ready, true, true),
        ));
        assert!(r.view().all_ready);

        // A single ready participant is not enough for a two-player session.
        let mut r = reconciler();
        r.apply(SessionUpdate::from_snapshot(
            UpdateSource::Poll,
            StatusSnapshot {
                status: SessionStatus::Waiting,
                participants: vec![Participant::new(1, "Ada", true)],
            },
        ));
        assert!(!r.view().all_ready);
    }

    #[test]
    fn network_all_ready_used_only_without_participants() {
        let mut r = reconciler();
        let msg = PushMessage::ParticipantReady(ParticipantReadyPayload { all_ready: true });
        assert!(r.apply(SessionUpdate::from_push(&msg).unwrap()));
        assert!(r.view().all_ready);

        let update = SessionUpdate {
            participants: Some(vec![Participant::new(1, "Ada", true)]),
            all_ready: Some(true),
            ..SessionUpdate::empty(UpdateSource::Push)
        };
        r.apply(update);
        assert!(!r.view().all_ready);
    }

    #[test]
    fn status_never_regresses_but_cancel_always_lands() {
        let mut r = reconciler();
        r.apply(SessionUpdate::from_snapshot(
            UpdateSource::Push,
            snapshot(SessionStatus::InProgress, true, true),
        ));
        r.apply(SessionUpdate::from_snapshot(
            UpdateSource::Poll,
            snapshot(SessionStatus::Ready, true, true),
        ));
        assert_eq!(r.view().status, Some(SessionStatus::InProgress));

        let cancel = PushMessage::SessionUpdated(SessionUpdatedPayload {
            status: Some(SessionStatus::Cancelled),
            participants: None,
        });
        assert!(r.apply(SessionUpdate::from_push(&cancel).unwrap()));
        assert_eq!(r.view().status, Some(SessionStatus::Cancelled));
    }

    #[test]
    fn participants_are_last_writer_wins() {
        let mut r = reconciler();
        r.apply(SessionUpdate::from_snapshot(
            UpdateSource::Push,
            snapshot(SessionStatus::Waiting, true, true),
        ));
        // A stale poll response overwrites the newer participant list.
        r.apply(SessionUpdate::from_snapshot(
            UpdateSource::Poll,
            snapshot(SessionStatus::Waiting, true, false),
        ));
        assert!(!r.view().all_ready);
    }

    #[test]
    fn optimistic_mark_survives_stale_participants_until_reverted() {
        let mut r = reconciler();
        assert!(r.apply(SessionUpdate::self_ready(true)));
        assert!(r.view().is_self_ready);

        r.apply(SessionUpdate::from_snapshot(
            UpdateSource::Poll,
            snapshot(SessionStatus::Waiting, false, false),
        ));
        assert!(r.view().is_self_ready);

        r.apply(SessionUpdate::self_ready(false));
        assert!(!r.view().is_self_ready);
    }

    #[test]
    fn self_ready_from_server_list() {
        let mut r = reconciler();
        r.apply(SessionUpdate::from_snapshot(
            UpdateSource::Poll,
            snapshot(SessionStatus::Waiting, true, false),
        ));
        assert!(r.view().is_self_ready);
    }

    #[test]
    fn unknown_push_message_is_not_an_update() {
        let msg = PushMessage::Other {
            kind: "quiz.question".into(),
        };
        assert!(SessionUpdate::from_push(&msg).is_none());
    }

    #[test]
    fn connection_state_is_mirrored() {
        let mut r = reconciler();
        assert!(r.set_connection_state(ConnectionState::Connecting));
        assert!(!r.set_connection_state(ConnectionState::Connecting));
        assert_eq!(r.view().connection, ConnectionState::Connecting);
    }
}

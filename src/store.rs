//! Shared session state published to the presentation layer.

use tokio::sync::watch;

use crate::connection::ConnectionState;
use crate::protocol::{Participant, SessionId, SessionStatus};

/// Everything the ready screen renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionView {
    /// Session being synchronized.
    pub session_id: SessionId,
    /// Last known push channel state.
    pub connection: ConnectionState,
    /// Last accepted status; `None` until the first update arrives.
    pub status: Option<SessionStatus>,
    /// Last received participant list.
    pub participants: Vec<Participant>,
    /// Whether every expected participant is ready.
    pub all_ready: bool,
    /// Whether the local user is ready, including an optimistic local mark.
    pub is_self_ready: bool,
}

impl SessionView {
    /// An empty view for `session_id`.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            ..Self::default()
        }
    }
}

/// Single-writer holder of the current [`SessionView`].
///
/// Only [`StateReconciler`](crate::reconciler::StateReconciler) writes to it;
/// readers either borrow the current view or subscribe to changes.
#[derive(Debug)]
pub struct SessionStore {
    tx: watch::Sender<SessionView>,
}

impl SessionStore {
    /// Create a store holding an empty view for `session_id`.
    pub fn new(session_id: SessionId) -> Self {
        let (tx, _) = watch::channel(SessionView::new(session_id));
        Self { tx }
    }

    /// A clone of the current view.
    pub fn snapshot(&self) -> SessionView {
        self.tx.borrow().clone()
    }

    /// Watch for view changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.tx.subscribe()
    }

    /// Publish `next` if it differs from the current view. Returns whether it did.
    pub(crate) fn replace(&mut self, next: SessionView) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }
}

//! User commands issued from the ready screen.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::SessionApi;
use crate::error::{Result, SyncError};
use crate::protocol::{ReadyResponse, SessionId};
use crate::reconciler::SessionUpdate;

/// Result of a ready submission the server answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// The server recorded the ready flag.
    Accepted(ReadyResponse),
    /// The server answered with `ok: false`.
    Rejected {
        /// Reason supplied by the server, if any.
        message: Option<String>,
    },
}

impl ReadyOutcome {
    /// Returns `true` if the server recorded the ready flag.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Issues ready, leave and cancel-attempt requests for one session.
///
/// Cheap to clone; every clone shares the same [`SessionApi`].
#[derive(Clone)]
pub struct ReadyActionClient {
    api: Arc<dyn SessionApi>,
    session_id: SessionId,
}

impl ReadyActionClient {
    /// Create a client for `session_id`.
    pub fn new(api: Arc<dyn SessionApi>, session_id: SessionId) -> Self {
        Self { api, session_id }
    }

    /// The local "I am ready" mark, to be applied before [`submit_ready`](Self::submit_ready).
    pub fn optimistic_mark(&self) -> SessionUpdate {
        SessionUpdate::self_ready(true)
    }

    /// The update undoing [`optimistic_mark`](Self::optimistic_mark) after a failure.
    pub fn revert_mark(&self) -> SessionUpdate {
        SessionUpdate::self_ready(false)
    }

    /// `POST /sessions/{id}/ready`.
    ///
    /// A server-side rejection is an outcome, not an error.
    ///
    /// # Errors
    ///
    /// Returns the underlying error if the request could not be completed.
    pub async fn submit_ready(&self) -> Result<ReadyOutcome> {
        match self.api.submit_ready(self.session_id).await {
            Ok(response) => {
                debug!(
                    session_id = self.session_id,
                    status = ?response.status,
                    all_ready = response.all_ready,
                    "ready accepted"
                );
                Ok(ReadyOutcome::Accepted(response))
            }
            Err(SyncError::Rejected { message }) => {
                warn!(session_id = self.session_id, ?message, "ready rejected");
                Ok(ReadyOutcome::Rejected { message })
            }
            Err(e) => Err(e),
        }
    }

    /// `POST /sessions/{id}/leave`.
    ///
    /// # Errors
    ///
    /// Returns the underlying error, including [`SyncError::Rejected`].
    pub async fn leave(&self) -> Result<()> {
        self.api.leave(self.session_id).await
    }

    /// `POST /sessions/{id}/cancel-attempt`.
    ///
    /// # Errors
    ///
    /// Returns the underlying error, including [`SyncError::Rejected`].
    pub async fn cancel_attempt(&self) -> Result<()> {
        self.api.cancel_attempt(self.session_id).await
    }
}

impl std::fmt::Debug for ReadyActionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyActionClient")
            .field("session_id", &self.session_id)
            .finish()
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
    use crate::protocol::{SessionStatus, StatusSnapshot};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubApi {
        ready: Mutex<Option<Result<ReadyResponse>>>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl StubApi {
        fn new(ready: Result<ReadyResponse>) -> Arc<Self> {
            Arc::new(Self {
                ready: Mutex::new(Some(ready)),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SessionApi for StubApi {
        async fn fetch_status(&self, _session_id: SessionId) -> Result<StatusSnapshot> {
            self.calls.lock().unwrap().push("status");
            Err(SyncError::NotRunning)
        }

        async fn submit_ready(&self, _session_id: SessionId) -> Result<ReadyResponse> {
            self.calls.lock().unwrap().push("ready");
            self.ready.lock().unwrap().take().unwrap()
        }

        async fn leave(&self, _session_id: SessionId) -> Result<()> {
            self.calls.lock().unwrap().push("leave");
            Ok(())
        }

        async fn cancel_attempt(&self, _session_id: SessionId) -> Result<()> {
            self.calls.lock().unwrap().push("cancel-attempt");
            Err(SyncError::Rejected { message: None })
        }
    }

    #[tokio::test]
    async fn accepted_ready_carries_server_state() {
        let response = ReadyResponse {
            status: SessionStatus::Ready,
            all_ready: true,
        };
        let api = StubApi::new(Ok(response));
        let client = ReadyActionClient::new(api.clone(), 5);

        let outcome = client.submit_ready().await.unwrap();
        assert_eq!(outcome, ReadyOutcome::Accepted(response));
        assert!(outcome.is_accepted());
        assert_eq!(*api.calls.lock().unwrap(), vec!["ready"]);
    }

    #[tokio::test]
    async fn rejection_is_an_outcome() {
        let api = StubApi::new(Err(SyncError::Rejected {
            message: Some("session closed".into()),
        }));
        let client = ReadyActionClient::new(api, 5);

        let outcome = client.submit_ready().await.unwrap();
        assert_eq!(
            outcome,
            ReadyOutcome::Rejected {
                message: Some("session closed".into())
            }
        );
    }

    #[tokio::test]
    async fn transport_failure_is_an_error() {
        let api = StubApi::new(Err(SyncError::HttpStatus {
            path: "sessions/5/ready".into(),
            status: 503,
        }));
        let client = ReadyActionClient::new(api, 5);
        tokio_test::assert_err!(client.submit_ready().await);
    }

    #[tokio::test]
    async fn leave_and_cancel_hit_their_endpoints() {
        let api = StubApi::new(Err(SyncError::NotRunning));
        let client = ReadyActionClient::new(api.clone(), 5);

        tokio_test::assert_ok!(client.leave().await);
        tokio_test::assert_err!(client.cancel_attempt().await);
        assert_eq!(*api.calls.lock().unwrap(), vec!["leave", "cancel-attempt"]);
    }

    #[test]
    fn mark_and_revert_are_self_ready_updates() {
        let api = StubApi::new(Err(SyncError::NotRunning));
        let client = ReadyActionClient::new(api, 5);
        assert_eq!(client.optimistic_mark().self_ready, Some(true));
        assert_eq!(client.revert_mark().self_ready, Some(false));
    }
}

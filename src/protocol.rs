//! Wire types for the live quiz session API and push channel.
//!
//! HTTP responses are wrapped in an [`ApiEnvelope`] (`{ok, data, message}`).
//! Push messages use a `{type, data}` envelope parsed by [`PushMessage::parse`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

// ── Type aliases ────────────────────────────────────────────────────

/// Server-side identifier of a live quiz session.
pub type SessionId = i64;

/// Server-side identifier of a user.
pub type UserId = i64;

/// Push message type carrying a full or partial session snapshot.
pub const SESSION_UPDATED: &str = "session.updated";

/// Push message type carrying the server's `all_ready` flag.
pub const PARTICIPANT_READY: &str = "participant.ready";

// ── Session ─────────────────────────────────────────────────────────

/// Lifecycle status of a session.
///
/// Statuses only move forward (`waiting` → `ready` → `in_progress`), except
/// that `cancelled` may follow any of them and is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting for participants to flag themselves ready.
    Waiting,
    /// Every participant is ready; the match is about to start.
    Ready,
    /// The match has started.
    InProgress,
    /// The session was abandoned.
    Cancelled,
}

impl SessionStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Ready => 1,
            Self::InProgress => 2,
            Self::Cancelled => 3,
        }
    }

    /// Returns `true` if no further status can follow this one.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if moving from `self` to `next` does not regress.
    ///
    /// ```
    /// use live_quiz_sync::protocol::SessionStatus;
    ///
    /// assert!(SessionStatus::Waiting.can_advance_to(SessionStatus::InProgress));
    /// assert!(SessionStatus::InProgress.can_advance_to(SessionStatus::Cancelled));
    /// assert!(!SessionStatus::InProgress.can_advance_to(SessionStatus::Ready));
    /// ```
    pub fn can_advance_to(self, next: SessionStatus) -> bool {
        if self.is_terminal() {
            return next == self;
        }
        next.rank() >= self.rank()
    }
}

/// One participant of a session as reported by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    /// User identifier.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// Whether the participant flagged themselves ready.
    pub is_ready: bool,
}

impl Participant {
    /// Convenience constructor, mostly useful in tests and demos.
    pub fn new(user_id: UserId, name: impl Into<String>, is_ready: bool) -> Self {
        Self {
            user_id,
            name: name.into(),
            is_ready,
        }
    }
}

// ── HTTP payloads ───────────────────────────────────────────────────

/// Response of `GET /sessions/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Current session status.
    pub status: SessionStatus,
    /// Current participant list.
    #[serde(default)]
    pub participants: Vec<Participant>,
}

/// Response of `POST /sessions/{id}/ready`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadyResponse {
    /// Session status after the ready flag was recorded.
    pub status: SessionStatus,
    /// Whether every participant is now ready.
    pub all_ready: bool,
}

/// JSON envelope wrapping every HTTP response of the session API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope {
    /// Whether the server accepted the request.
    pub ok: bool,
    /// Endpoint-specific payload. Absent for plain acknowledgements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Human-readable reason, usually present when `ok` is `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiEnvelope {
    /// Wrap a successful payload.
    pub fn success(data: impl Serialize) -> Result<Self> {
        Ok(Self {
            ok: true,
            data: Some(serde_json::to_value(data)?),
            message: None,
        })
    }

    /// Unwrap the payload, mapping `ok: false` to [`SyncError::Rejected`].
    ///
    /// A missing `data` field decodes as JSON `null`, so acknowledgements can
    /// be read as `()`.
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T> {
        if !self.ok {
            return Err(SyncError::Rejected {
                message: self.message,
            });
        }
        let data = self.data.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(data)?)
    }
}

// ── Push channel ────────────────────────────────────────────────────

/// Payload of a `session.updated` push message. Either field may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionUpdatedPayload {
    /// New session status, if it changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    /// Full participant list, if included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<Participant>>,
}

/// Payload of a `participant.ready` push message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantReadyPayload {
    /// Whether every participant is now ready.
    pub all_ready: bool,
}

/// A message received over the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    /// `session.updated`
    SessionUpdated(SessionUpdatedPayload),
    /// `participant.ready`
    ParticipantReady(ParticipantReadyPayload),
    /// Any other message type. Carried so callers can log it; never applied.
    Other {
        /// The unrecognized `type` value.
        kind: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct RawPushMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl PushMessage {
    /// Parse one text frame received from the push channel.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Serialization`] if the frame is not a `{type, data}`
    /// object or if a known message type carries a malformed payload.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawPushMessage = serde_json::from_str(text)?;
        // A missing payload reads as an empty object.
        let data = match raw.data {
            serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
            data => data,
        };
        let message = match raw.kind.as_str() {
            SESSION_UPDATED => Self::SessionUpdated(serde_json::from_value(data)?),
            PARTICIPANT_READY => Self::ParticipantReady(serde_json::from_value(data)?),
            _ => Self::Other { kind: raw.kind },
        };
        Ok(message)
    }

    /// The wire `type` of this message.
    pub fn kind(&self) -> &str {
        match self {
            Self::SessionUpdated(_) => SESSION_UPDATED,
            Self::ParticipantReady(_) => PARTICIPANT_READY,
            Self::Other { kind } => kind,
        }
    }

    /// Encode this message in its `{type, data}` envelope.
    pub fn to_json(&self) -> Result<String> {
        let data = match self {
            Self::SessionUpdated(payload) => serde_json::to_value(payload)?,
            Self::ParticipantReady(payload) => serde_json::to_value(payload)?,
            Self::Other { .. } => serde_json::Value::Null,
        };
        let raw = RawPushMessage {
            kind: self.kind().to_string(),
            data,
        };
        Ok(serde_json::to_string(&raw)?)
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

    #[test]
    fn status_uses_snake_case() {
        let json = serde_json::to_string(&SessionStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn cancelled_follows_any_status() {
        for status in [
            SessionStatus::Waiting,
            SessionStatus::Ready,
            SessionStatus::InProgress,
        ] {
            assert!(status.can_advance_to(SessionStatus::Cancelled));
        }
        assert!(!SessionStatus::Cancelled.can_advance_to(SessionStatus::Waiting));
        assert!(SessionStatus::Cancelled.can_advance_to(SessionStatus::Cancelled));
    }

    #[test]
    fn rejected_envelope_maps_to_error() {
        let envelope: ApiEnvelope =
            serde_json::from_str(r#"{"ok":false,"message":"session closed"}"#).unwrap();
        let err = envelope.into_data::<()>().unwrap_err();
        match err {
            SyncError::Rejected { message } => assert_eq!(message.as_deref(), Some("session closed")),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn ack_without_data_decodes_as_unit() {
        let envelope: ApiEnvelope = serde_json::from_str(r#"{"ok":true}"#).unwrap();
        envelope.into_data::<()>().unwrap();
    }

    #[test]
    fn unknown_push_type_is_other() {
        let msg = PushMessage::parse(r#"{"type":"chat.message","data":{"text":"hi"}}"#).unwrap();
        assert_eq!(
            msg,
            PushMessage::Other {
                kind: "chat.message".into()
            }
        );
    }

    #[test]
    fn participant_ready_without_flag_is_an_error() {
        assert!(PushMessage::parse(r#"{"type":"participant.ready","data":{}}"#).is_err());
    }
}

//! One-shot events emitted to the presentation layer, and the commands it sends back.

/// A user command accepted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Flag the local user ready.
    Ready,
    /// Leave the session.
    Leave,
    /// Cancel the current attempt.
    CancelAttempt,
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ready => "ready",
            Self::Leave => "leave",
            Self::CancelAttempt => "cancel-attempt",
        })
    }
}

/// Discrete intents for the presentation layer.
///
/// Navigation is delivered as events rather than state so that re-reading the
/// view can never trigger it twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The match started; show the match screen.
    NavigateToMatch,
    /// The session was cancelled; show the "opponent disconnected" screen.
    NavigateToDisconnected,
    /// The leave request succeeded; navigate back.
    Left,
    /// The cancel-attempt request succeeded.
    AttemptCancelled,
    /// A user command failed and needs the user's acknowledgment.
    CommandFailed {
        /// The command that failed.
        command: Command,
        /// Human-readable description of the failure.
        message: String,
    },
}

impl SessionEvent {
    /// Returns `true` for events after which the ready screen is finished.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NavigateToMatch | Self::NavigateToDisconnected | Self::Left | Self::AttemptCancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_names_match_endpoints() {
        assert_eq!(Command::Ready.to_string(), "ready");
        assert_eq!(Command::CancelAttempt.to_string(), "cancel-attempt");
    }

    #[test]
    fn command_failure_is_not_terminal() {
        let failed = SessionEvent::CommandFailed {
            command: Command::Leave,
            message: "offline".into(),
        };
        assert!(!failed.is_terminal());
        assert!(SessionEvent::Left.is_terminal());
    }
}

//! Session identity and lifecycle.
//!
//! Every accepted client connection becomes a session with a stable
//! [`SessionId`] and a [`SessionState`] that only ever moves forward:
//!
//! ```text
//! Connecting ──► Open ──► Closing ──► Closed
//!      │                     ▲           ▲
//!      └─────────────────────┴───────────┘   (handshake failure)
//! ```
//!
//! `Closed` is terminal.  Requesting the current state again is a no-op, so
//! several parties (the broadcaster, the reader, shutdown) can all ask a
//! session to close without coordinating.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Stable identifier for one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// TCP accepted; WebSocket handshake in progress.
    Connecting,
    /// Handshake complete; frames are delivered.
    Open,
    /// A read/write failure or close request was observed; resources are
    /// being released.
    Closing,
    /// Terminal.  The session is no longer in the registry.
    Closed,
}

/// Returned when a transition would move a session backwards.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid session transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl SessionState {
    /// `true` if moving from `self` to `next` is allowed.
    ///
    /// Staying in the same state is allowed.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Connecting | Open | Closing | Closed)
                | (Open, Open | Closing | Closed)
                | (Closing, Closing | Closed)
                | (Closed, Closed)
        )
    }

    /// Validates and returns the next state.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for backwards moves, e.g. `Closed -> Open`.
    pub fn transition(self, next: SessionState) -> Result<SessionState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// `true` for `Closing` and `Closed`.
    pub fn is_closing_or_closed(self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_forward_path_is_allowed() {
        // Arrange / Act
        let state = Connecting
            .transition(Open)
            .and_then(|s| s.transition(Closing))
            .and_then(|s| s.transition(Closed));

        // Assert
        assert_eq!(state, Ok(Closed));
    }

    #[test]
    fn test_handshake_failure_can_skip_open() {
        assert!(Connecting.can_transition_to(Closing));
        assert!(Connecting.can_transition_to(Closed));
    }

    #[test]
    fn test_closed_is_terminal() {
        assert_eq!(
            Closed.transition(Open),
            Err(InvalidTransition {
                from: Closed,
                to: Open
            })
        );
        assert!(!Closed.can_transition_to(Closing));
        assert!(!Closed.can_transition_to(Connecting));
    }

    #[test]
    fn test_closing_cannot_reopen() {
        assert!(!Closing.can_transition_to(Open));
    }

    #[test]
    fn test_repeated_state_is_a_no_op() {
        for s in [Connecting, Open, Closing, Closed] {
            assert_eq!(s.transition(s), Ok(s));
        }
    }

    #[test]
    fn test_is_closing_or_closed() {
        assert!(!Open.is_closing_or_closed());
        assert!(Closing.is_closing_or_closed());
        assert!(Closed.is_closing_or_closed());
    }
}

//! Runtime error types.

use crate::runtime::RuntimeState;
use crate::session::ClientDisconnected;

/// Errors surfaced by the runtime and session managers.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A session with this ID is already registered. Indicates a bug in ID
    /// generation or a misused override; the registry is left untouched.
    #[error("Session already registered: {0}")]
    DuplicateSession(String),

    /// No active session with this ID.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// `start()` was called on a runtime that already left `Initial`.
    #[error("Runtime already started (state: {0})")]
    AlreadyStarted(RuntimeState),

    /// The runtime is stopping or stopped and no longer accepts sessions.
    #[error("Runtime is stopped")]
    Stopped,

    /// The session's client went away while messages were being delivered.
    #[error(transparent)]
    Client(#[from] ClientDisconnected),
}

impl RuntimeError {
    /// Whether the caller can reasonably retry.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SessionNotFound(_) | Self::Client(_) => true,
            Self::DuplicateSession(_) | Self::AlreadyStarted(_) | Self::Stopped => false,
        }
    }

    /// Error category string for logs and metrics labels.
    pub fn category(&self) -> &'static str {
        match self {
            Self::DuplicateSession(_) => "duplicate_session",
            Self::SessionNotFound(_) => "session_not_found",
            Self::AlreadyStarted(_) => "already_started",
            Self::Stopped => "stopped",
            Self::Client(_) => "client_disconnected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            RuntimeError::DuplicateSession("a".into()).to_string(),
            "Session already registered: a"
        );
        assert_eq!(
            RuntimeError::AlreadyStarted(RuntimeState::Running).to_string(),
            "Runtime already started (state: running)"
        );
        assert_eq!(RuntimeError::Stopped.to_string(), "Runtime is stopped");
        assert_eq!(
            RuntimeError::from(ClientDisconnected).to_string(),
            "session client disconnected"
        );
    }

    #[test]
    fn categories() {
        assert_eq!(
            RuntimeError::DuplicateSession("a".into()).category(),
            "duplicate_session"
        );
        assert_eq!(
            RuntimeError::SessionNotFound("a".into()).category(),
            "session_not_found"
        );
        assert_eq!(RuntimeError::Stopped.category(), "stopped");
        assert_eq!(
            RuntimeError::Client(ClientDisconnected).category(),
            "client_disconnected"
        );
    }

    #[test]
    fn duplicate_session_is_fatal() {
        assert!(!RuntimeError::DuplicateSession("a".into()).is_recoverable());
        assert!(!RuntimeError::Stopped.is_recoverable());
        assert!(RuntimeError::SessionNotFound("a".into()).is_recoverable());
    }
}

//! Error taxonomy shared by the gateway, the engines and the HTTP layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing input. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A conditional write lost against another writer, or the row is no
    /// longer in the state the caller saw. Callers re-fetch and decide.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cannot {event} a trip that is {from}")]
    InvalidTransition { from: String, event: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store temporarily unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A persisted row violates a model invariant.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} {id}"))
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_transition(from: impl std::fmt::Display, event: &str) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            event: event.to_string(),
        }
    }

    /// Whether the failure is an I/O hiccup that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }

    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Database(_) | Self::Unavailable(_) => "persistence_failure",
            Self::Corrupt(_) => "corrupt_record",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_io_style_failures_are_transient() {
        assert!(Error::Unavailable("down".into()).is_transient());
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!Error::conflict("taken").is_transient());
    }

    #[test]
    fn invalid_transition_message_names_state_and_event() {
        let err = Error::invalid_transition("pending", "rate");
        assert_eq!(err.to_string(), "cannot rate a trip that is pending");
        assert_eq!(err.code(), "invalid_transition");
    }
}

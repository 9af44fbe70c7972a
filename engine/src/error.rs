//! Error types for the transfer engine.
//!
//! `EngineError` covers misuse of the engine API (unknown queue items, invalid
//! state transitions, a second batch while one is running). Failures of the
//! transfers themselves are NOT engine errors: the executor reports them as
//! plain strings, which are classified by [`crate::classifier`] and recorded on
//! the queue item.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::ItemId;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No queue item with this id
    #[error("Unknown transfer item: {0}")]
    UnknownItem(ItemId),

    /// Mutation not allowed from the item's current state
    #[error("Invalid state: cannot {action} while {current_state}")]
    InvalidState {
        action: &'static str,
        current_state: String,
    },

    /// A batch is already being processed by this orchestrator
    #[error("A batch is already in progress")]
    BatchInProgress,

    /// Invalid configuration or request value
    #[error("Invalid input for '{field}': {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },

    /// Local filesystem failure outside of a single transfer
    #[error("Filesystem error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn invalid_state(action: &'static str, current_state: impl ToString) -> Self {
        Self::InvalidState {
            action,
            current_state: current_state.to_string(),
        }
    }

    pub fn invalid_input(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message() {
        let err = EngineError::invalid_state("set progress", "pending");
        assert_eq!(err.to_string(), "Invalid state: cannot set progress while pending");
    }

    #[test]
    fn test_io_error_keeps_source() {
        let err = EngineError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("gone"));
    }
}

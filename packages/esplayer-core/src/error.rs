//! Centralized error types for the esplayer core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Distinguishes cancellation from failure so callers can propagate it
//!   with `?` without conflating the two
//! - Maps errors to machine-readable codes for host applications

use serde::Serialize;
use thiserror::Error;

/// Failure reported by a native platform player binding.
///
/// Bindings wrap their platform error codes in this type; the controller
/// converts it into [`PlayerError::NativePlayer`] at the seam.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct NativeError(pub String);

impl NativeError {
    /// Creates a native error from any displayable cause.
    pub fn new(cause: impl Into<String>) -> Self {
        Self(cause.into())
    }
}

/// Application-wide error type for the esplayer core.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum PlayerError {
    /// Caller passed a missing or malformed argument (null collaborator,
    /// double stream initialization).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation is not legal in the current playback state
    /// (Play outside Ready/Paused, re-entrant Seek).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A cancellation token fired while the operation was suspended.
    ///
    /// Never surfaced as a `PlaybackError` event.
    #[error("Operation cancelled")]
    Cancelled,

    /// The native player rejected a codec configuration.
    #[error("Unsupported stream: {0}")]
    UnsupportedStream(String),

    /// A native player call failed during a lifecycle transition.
    #[error("Native player failure: {0}")]
    NativePlayer(String),

    /// Packet storage was closed for the stream; no further packets will
    /// arrive.
    #[error("Packet storage closed")]
    StorageClosed,

    /// Any operation invoked after `dispose()`.
    #[error("Operation on disposed player")]
    Disposed,
}

impl PlayerError {
    /// Returns a machine-readable error code for host applications.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InvalidState(_) => "invalid_state",
            Self::Cancelled => "cancelled",
            Self::UnsupportedStream(_) => "unsupported_stream",
            Self::NativePlayer(_) => "native_player_failure",
            Self::StorageClosed => "storage_closed",
            Self::Disposed => "operation_on_disposed",
        }
    }

    /// Returns `true` when the error is a cancellation outcome.
    ///
    /// Cancellation is control flow, not failure; it must never be
    /// published on the `PlaybackError` subject.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<NativeError> for PlayerError {
    fn from(err: NativeError) -> Self {
        Self::NativePlayer(err.to_string())
    }
}

/// Convenient Result alias for application-wide operations.
pub type PlayerResult<T> = Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_error_returns_correct_code() {
        let err = PlayerError::Cancelled;
        assert_eq!(err.code(), "cancelled");
        assert!(err.is_cancelled());
    }

    #[test]
    fn native_error_converts_with_message() {
        let err: PlayerError = NativeError::new("prepare failed").into();
        assert_eq!(err.code(), "native_player_failure");
        assert_eq!(err.to_string(), "Native player failure: prepare failed");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn invalid_state_error_returns_correct_code() {
        let err = PlayerError::InvalidState("seek already in progress".into());
        assert_eq!(err.code(), "invalid_state");
    }
}

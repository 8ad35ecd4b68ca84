//! Error types for the tool session manager.
//!
//! Errors are local to a single call: a failure on one session never touches
//! other sessions or the bridge worker. Nothing in the crate retries on its own.

use thiserror::Error;

/// Errors returned by the caller-facing API.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Unknown tool group: {0}")]
    UnknownGroup(String),

    #[error("Malformed arguments: {0}")]
    MalformedArguments(String),

    /// The remote side refused the call; no side effect is assumed.
    #[error("Rejected before execution: {0}")]
    RejectedBeforeExecution(String),

    /// Any other remote failure; the operation may or may not have taken effect.
    #[error("Unexpected failure: {0}")]
    UnexpectedFailure(String),

    #[error("Scenario load failed: {0}")]
    LoadFailed(String),

    /// The caller stopped waiting; the work may still be running in the bridge.
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The session was closed while this call was waiting for it.
    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Failed to close session {session_id}: {reason}")]
    CloseFailure { session_id: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Bridge worker closed")]
    WorkerClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by a remote tool client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The server answered with an error instead of running the operation.
    #[error("{0}")]
    Rejected(String),

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("{0}")]
    Unexpected(String),

    /// The client was released by a close; it will not reconnect.
    #[error("session {0} is closed")]
    Closed(String),
}

impl From<RemoteError> for ManagerError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Rejected(msg) => ManagerError::RejectedBeforeExecution(msg),
            RemoteError::Closed(id) => ManagerError::SessionClosed(id),
            other => ManagerError::UnexpectedFailure(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ManagerError {
    fn from(e: serde_json::Error) -> Self {
        ManagerError::MalformedArguments(e.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ManagerError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ManagerError::WorkerClosed
    }
}

impl From<std::sync::mpsc::RecvError> for ManagerError {
    fn from(_: std::sync::mpsc::RecvError) -> Self {
        ManagerError::WorkerClosed
    }
}

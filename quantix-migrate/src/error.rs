//! Error types for the live-migration protocol.
//!
//! [`MigrationError`] is everything that propagates to a caller. A rejection
//! reported by the destination host is *not* an error here: it travels as a
//! [`RemoteError`] value inside [`crate::rpc::RemoteOutcome::Rejected`] and is
//! absorbed by the coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while preparing or running a live migration.
///
/// Cloneable and serializable so the same kind can be handed back across a
/// transport hop unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum MigrationError {
    /// Referenced record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller may not access the referenced record.
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// Host tooling (filter setup, bridge setup, hypervisor migrate) failed.
    #[error("Command `{command}` failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The remote call could not be delivered or its reply could not be read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Another migration of the same workload is still running.
    #[error("Migration already in progress for workload {0}")]
    AlreadyInProgress(String),

    /// Malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Anything that does not match a known kind.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl MigrationError {
    /// Shorthand for an execution failure without an exit code.
    pub fn execution(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            command: command.into(),
            exit_code: None,
            stderr: stderr.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotAuthorized(_) => ErrorKind::NotAuthorized,
            Self::ExecutionFailed { .. } => ErrorKind::Execution,
            Self::Transport(_) => ErrorKind::Transport,
            Self::AlreadyInProgress(_) => ErrorKind::AlreadyInProgress,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Coarse classification of a [`MigrationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    NotAuthorized,
    Execution,
    Transport,
    AlreadyInProgress,
    InvalidRequest,
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::NotAuthorized => "not_authorized",
            ErrorKind::Execution => "execution",
            ErrorKind::Transport => "transport",
            ErrorKind::AlreadyInProgress => "already_in_progress",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Unexpected => "unexpected",
        };
        write!(f, "{}", s)
    }
}

/// A structured failure reported by the peer after it ran the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Host that reported the failure.
    pub host: String,
    /// Machine-readable failure name (e.g. `NoPrimaryAddress`).
    pub kind: String,
    /// Human-readable detail.
    pub message: String,
}

impl RemoteError {
    pub fn new(
        host: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.kind, self.host, self.message)
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;

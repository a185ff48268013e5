//! Error types and error code constants for birdseye.
//!
//! This module provides a unified error type (`BirdseyeError`) covering the
//! failure classes of the call inspector:
//!
//! - **Transport/server failures** while fetching call data. These are
//!   recovered at the session boundary: the caller gets "no call" and the
//!   host is notified once.
//! - **Protocol mismatches** (a captured value whose JSON shape does not
//!   follow the value encoding). These propagate as hard failures.
//! - **Caller mistakes** (unknown node/loop/call ids, edits outside the
//!   document, unusable function text).
//!
//! Unresolvable loops, stale node ranges and missing values at the current
//! iteration are *not* errors and never appear here.
//!
//! ## Error Code Mapping
//!
//! - `2`: Invalid arguments (bad input from caller)
//! - `3`: Resolution errors (unknown call, node or loop)
//! - `4`: Load errors (server unreachable or returned an error status)
//! - `5`: Protocol errors (malformed trace data)
//! - `10`: Internal errors (IO, configuration, unexpected state)

use std::fmt;
use std::io;

use thiserror::Error;

// ============================================================================
// Output Error Codes
// ============================================================================

/// Error codes for JSON output.
///
/// These codes map to CLI exit codes and appear in JSON error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputErrorCode {
    /// Invalid arguments from caller (bad input, malformed request).
    InvalidArguments = 2,
    /// Resolution errors (unknown call, node or loop).
    ResolutionError = 3,
    /// Load errors (server unreachable, non-success status).
    LoadError = 4,
    /// Protocol errors (trace data does not follow the value encoding).
    ProtocolError = 5,
    /// Internal errors (IO, configuration, unexpected state).
    InternalError = 10,
}

impl OutputErrorCode {
    /// Get the numeric code value.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for OutputErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Unified Error Type
// ============================================================================

/// Unified error type for the call inspector.
#[derive(Debug, Error)]
pub enum BirdseyeError {
    /// Invalid arguments from caller.
    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String },

    /// The request never reached the server or the connection failed.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The server answered with a non-success status.
    #[error("server returned status {status}: {message}")]
    Server { status: u16, message: String },

    /// A captured value does not follow the value encoding.
    #[error("malformed value for node {node}: {reason}")]
    MalformedValue { node: u32, reason: String },

    /// The function text handed to a snapshot is not a usable definition.
    #[error("invalid function text: {reason}")]
    InvalidFunction { reason: String },

    /// A document edit addressed bytes outside the document.
    #[error("edit [{start}, {end}) is outside the document (length {len})")]
    EditOutOfBounds { start: usize, end: usize, len: usize },

    /// No node with this index exists in the call.
    #[error("unknown node {node}")]
    UnknownNode { node: usize },

    /// No navigator is registered for this loop.
    #[error("no navigator for loop {loop_id}")]
    UnknownLoop { loop_id: u32 },

    /// No open call has this id.
    #[error("unknown call '{call_id}'")]
    UnknownCall { call_id: String },

    /// Settings could not be loaded.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for birdseye operations.
pub type BirdseyeResult<T> = Result<T, BirdseyeError>;

// ============================================================================
// Error Code Mapping
// ============================================================================

impl From<&BirdseyeError> for OutputErrorCode {
    fn from(err: &BirdseyeError) -> Self {
        match err {
            BirdseyeError::InvalidArguments { .. } => OutputErrorCode::InvalidArguments,
            BirdseyeError::EditOutOfBounds { .. } => OutputErrorCode::InvalidArguments,
            BirdseyeError::InvalidFunction { .. } => OutputErrorCode::InvalidArguments,
            BirdseyeError::UnknownNode { .. } => OutputErrorCode::ResolutionError,
            BirdseyeError::UnknownLoop { .. } => OutputErrorCode::ResolutionError,
            BirdseyeError::UnknownCall { .. } => OutputErrorCode::ResolutionError,
            BirdseyeError::Transport { .. } => OutputErrorCode::LoadError,
            BirdseyeError::Server { .. } => OutputErrorCode::LoadError,
            BirdseyeError::MalformedValue { .. } => OutputErrorCode::ProtocolError,
            BirdseyeError::Json(_) => OutputErrorCode::ProtocolError,
            BirdseyeError::Config { .. } => OutputErrorCode::InternalError,
            BirdseyeError::Io(_) => OutputErrorCode::InternalError,
        }
    }
}

impl From<BirdseyeError> for OutputErrorCode {
    fn from(err: BirdseyeError) -> Self {
        OutputErrorCode::from(&err)
    }
}

// ============================================================================
// Convenience Constructors
// ============================================================================

impl BirdseyeError {
    /// Create an InvalidArguments error.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        BirdseyeError::InvalidArguments {
            message: message.into(),
        }
    }

    /// Create a Transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        BirdseyeError::Transport {
            message: message.into(),
        }
    }

    /// Create a MalformedValue error for a node.
    pub fn malformed(node: u32, reason: impl Into<String>) -> Self {
        BirdseyeError::MalformedValue {
            node,
            reason: reason.into(),
        }
    }

    /// Create a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        BirdseyeError::Config {
            message: message.into(),
        }
    }

    /// Whether this error came from talking to the server.
    ///
    /// Load failures are the only errors a session swallows: they turn
    /// into "no call" plus a host notification.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            BirdseyeError::Transport { .. } | BirdseyeError::Server { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_categories() {
        assert_eq!(
            OutputErrorCode::from(&BirdseyeError::invalid_args("x")).code(),
            2
        );
        assert_eq!(
            OutputErrorCode::from(&BirdseyeError::UnknownLoop { loop_id: 3 }).code(),
            3
        );
        assert_eq!(
            OutputErrorCode::from(&BirdseyeError::transport("refused")).code(),
            4
        );
        assert_eq!(
            OutputErrorCode::from(&BirdseyeError::malformed(5, "not an array")).code(),
            5
        );
        assert_eq!(
            OutputErrorCode::from(&BirdseyeError::config("bad port")).code(),
            10
        );
    }

    #[test]
    fn load_failures_are_recognised() {
        assert!(BirdseyeError::transport("timeout").is_load_failure());
        assert!(BirdseyeError::Server {
            status: 404,
            message: "not found".to_string()
        }
        .is_load_failure());
        assert!(!BirdseyeError::malformed(1, "bad").is_load_failure());
    }

    #[test]
    fn messages_are_readable() {
        let err = BirdseyeError::EditOutOfBounds {
            start: 10,
            end: 12,
            len: 5,
        };
        assert_eq!(
            err.to_string(),
            "edit [10, 12) is outside the document (length 5)"
        );
        assert_eq!(OutputErrorCode::ProtocolError.to_string(), "5");
    }
}

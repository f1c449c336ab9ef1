//! Error types for pgpipe.
//!
//! All fallible operations in this crate return [`PgPipeError`], which covers:
//! - Transport errors (socket read/write failure, EOF, stopped connections)
//! - Protocol errors (malformed messages, unexpected message sequences)
//! - Server errors (structured PostgreSQL `ErrorResponse` messages)
//! - Authentication errors (wrong password, unsupported method)
//! - Task errors (dispatcher loop panics, unexpected termination)
//!
//! Transport errors are terminal for the connection: once one is published,
//! every outstanding and subsequent request resolves with it. Server errors
//! are per-request and leave the connection usable.

use std::fmt;

use thiserror::Error;

/// Error type for all pgpipe operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PgPipeError {
    /// Transport error - socket failure, EOF, or a stopped connection.
    ///
    /// Terminal: the connection is unusable once this is observed.
    ///
    /// Note: `std::io::Error` is not `Clone`, so we store the message.
    #[error("transport error: {0}")]
    Transport(String),

    /// Protocol error - malformed message or unexpected message sequence.
    ///
    /// Terminal for the current request; the connection is closed afterwards
    /// because pipeline synchronisation is lost.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server error - PostgreSQL returned a structured `ErrorResponse`.
    ///
    /// Per-request: the pipeline continues after the server's next
    /// `ReadyForQuery`.
    #[error("server error: {0}")]
    Server(BackendError),

    /// Authentication error - wrong credentials or unsupported method.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Task error - a dispatcher loop panicked or terminated unexpectedly.
    #[error("task error: {0}")]
    Task(String),
}

impl PgPipeError {
    /// The transport error every in-flight request observes after
    /// [`Dispatcher::stop`](crate::dispatch::Dispatcher::stop).
    pub(crate) fn stopped() -> Self {
        PgPipeError::Transport("connection stopped".into())
    }

    /// Returns `true` if this is a transport error.
    #[inline]
    pub fn is_transport(&self) -> bool {
        matches!(self, PgPipeError::Transport(_))
    }

    /// Returns `true` if this is a protocol error.
    #[inline]
    pub fn is_protocol(&self) -> bool {
        matches!(self, PgPipeError::Protocol(_))
    }

    /// Returns `true` if this is a server error.
    #[inline]
    pub fn is_server(&self) -> bool {
        matches!(self, PgPipeError::Server(_))
    }

    /// Returns the server error fields, if this is a server error.
    #[inline]
    pub fn as_server(&self) -> Option<&BackendError> {
        match self {
            PgPipeError::Server(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` if this error kills the connection.
    ///
    /// Server and authentication errors leave the pipeline intact; transport,
    /// protocol, and task errors do not.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PgPipeError::Transport(_) | PgPipeError::Protocol(_) | PgPipeError::Task(_)
        )
    }
}

// Manual From impl since io::Error isn't Clone
impl From<std::io::Error> for PgPipeError {
    fn from(err: std::io::Error) -> Self {
        PgPipeError::Transport(err.to_string())
    }
}

impl From<BackendError> for PgPipeError {
    fn from(err: BackendError) -> Self {
        PgPipeError::Server(err)
    }
}

/// A structured error (or notice) reported by the server.
///
/// Field codes per the protocol: `S` severity, `C` sqlstate, `M` message,
/// `D` detail, `H` hint. Sqlstate and message are always present; the rest
/// are optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub severity: Option<String>,
    pub sqlstate: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SQLSTATE {})", self.message, self.sqlstate)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BackendError {}

/// Result type alias for pgpipe operations.
pub type Result<T> = std::result::Result<T, PgPipeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_is_terminal() {
        assert!(PgPipeError::Transport("eof".into()).is_terminal());
        assert!(PgPipeError::Protocol("bad tag".into()).is_terminal());
    }

    #[test]
    fn server_error_is_not_terminal() {
        let err = PgPipeError::Server(BackendError {
            severity: Some("ERROR".into()),
            sqlstate: "22012".into(),
            message: "division by zero".into(),
            detail: None,
            hint: None,
        });
        assert!(!err.is_terminal());
        assert!(err.is_server());
        assert_eq!(err.as_server().unwrap().sqlstate, "22012");
    }

    #[test]
    fn backend_error_display_includes_sqlstate() {
        let err = BackendError {
            severity: None,
            sqlstate: "42P01".into(),
            message: "relation \"users\" does not exist".into(),
            detail: None,
            hint: None,
        };
        let s = err.to_string();
        assert!(s.contains("42P01"));
        assert!(s.contains("users"));
    }
}

//! Error types for the PostgreSQL session engine
//!
//! Every failure is surfaced to the immediate caller as one of these
//! variants; nothing is retried internally.

use crate::protocol::message::ErrorOrNoticeFields;
use serde::Serialize;
use std::fmt;
use std::io;
use thiserror::Error;
use wireprobe_core::CoreError;

/// Result type for the session engine
pub type Result<T> = std::result::Result<T, PgWireError>;

/// Error type for the session engine
#[derive(Debug, Error)]
pub enum PgWireError {
    /// Connection refused, reset, or closed before a complete message arrived
    #[error("Connection error: {0}")]
    Connection(String),

    /// Message not valid in the current state, or malformed
    #[error("PostgreSQL protocol error: {0}")]
    Protocol(String),

    /// Authentication failed locally (unsupported mechanism, nonce mismatch, unexpected message)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The server answered a credential with an ErrorResponse
    #[error("Authentication rejected: {0}")]
    AuthRejected(ServerError),

    /// The server reported an error
    #[error("Server error: {0}")]
    Server(ServerError),

    /// The caller-supplied deadline elapsed
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The server failed to prove knowledge of the credential
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl PgWireError {
    /// Whether this is an authentication failure, local or server-reported
    pub fn is_auth(&self) -> bool {
        matches!(self, PgWireError::Auth(_) | PgWireError::AuthRejected(_))
    }

    /// Whether a deadline elapsed
    pub fn is_timeout(&self) -> bool {
        matches!(self, PgWireError::Timeout(_))
    }

    /// Whether the transport failed
    pub fn is_connection(&self) -> bool {
        matches!(self, PgWireError::Connection(_) | PgWireError::Io(_))
    }

    /// The server-reported error, if this error carries one
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            PgWireError::Server(e) | PgWireError::AuthRejected(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PgWireError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe => PgWireError::Connection(err.to_string()),
            io::ErrorKind::TimedOut => PgWireError::Timeout(err.to_string()),
            _ => PgWireError::Io(err),
        }
    }
}

impl From<CoreError> for PgWireError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::DeadlineExceeded(budget) => {
                PgWireError::Timeout(format!("operation did not finish within {:?}", budget))
            }
            CoreError::IoError(e) => e.into(),
        }
    }
}

impl From<config::ConfigError> for PgWireError {
    fn from(err: config::ConfigError) -> Self {
        PgWireError::Config(err.to_string())
    }
}

/// An ErrorResponse as reported by the server, text kept verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerError {
    /// Severity (ERROR, FATAL, PANIC)
    pub severity: Option<String>,

    /// SQLSTATE code
    pub code: Option<String>,

    /// Primary message
    pub message: String,

    /// Detail message
    pub detail: Option<String>,

    /// Hint message
    pub hint: Option<String>,
}

impl From<&ErrorOrNoticeFields> for ServerError {
    fn from(fields: &ErrorOrNoticeFields) -> Self {
        ServerError {
            severity: fields.severity_non_localized.clone().or_else(|| fields.severity.clone()),
            code: fields.code.clone(),
            message: fields
                .message
                .clone()
                .unwrap_or_else(|| "server sent an error without a message".to_string()),
            detail: fields.detail.clone(),
            hint: fields.hint.clone(),
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " ({})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

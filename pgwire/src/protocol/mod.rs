//! PostgreSQL wire protocol implementation
//!
//! This module provides the message model, framing, encoding and parsing of
//! protocol messages, and the client side of the authentication exchange.

/// Message types for the PostgreSQL wire protocol
pub mod message;

/// Byte-stream framer that reassembles length-prefixed messages
pub mod framer;

/// Message parser for PostgreSQL wire protocol messages
pub mod parser;

/// Message formatter for PostgreSQL wire protocol messages
pub mod formatter;

/// Client authentication state machine
pub mod auth;

/// Built-in type OIDs
pub mod types;

// Re-export common types
pub use self::auth::{AuthHandler, AuthMethod, AuthState, AuthStep, ScramExchange};
pub use self::formatter::MessageFormatter;
pub use self::framer::{MessageFramer, RawMessage};
pub use self::message::{AuthenticationRequest, BackendMessage, FrontendMessage, TransactionStatus};
pub use self::parser::MessageParser;

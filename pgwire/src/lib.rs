//! PostgreSQL wire-protocol session engine
//!
//! This crate connects to a PostgreSQL server, authenticates (trust,
//! cleartext, MD5 or SCRAM-SHA-256), and runs simple queries, statement
//! descriptions and LISTEN windows over a single session.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

// Error types and result
pub mod error;
pub use error::{PgWireError, Result, ServerError};

// Configuration
pub mod config;
pub use config::SessionConfig;

// Protocol-related modules
pub mod protocol;
pub use protocol::{AuthMethod, BackendMessage, FrontendMessage, TransactionStatus};

// Sessions and the operations they run
pub mod session;
pub use session::{
    probe, ColumnDescriptor, ListenResult, Notification, ProbeReport, QueryResult, Session,
    SessionState, SessionStats, StatementDescription,
};

// TCP connector
pub mod transport;

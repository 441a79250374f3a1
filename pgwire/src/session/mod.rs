//! Authenticated sessions
//!
//! A [`Session`] owns one byte stream and the framer buffer in front of it.
//! Operations run strictly one at a time; each takes `&mut self` and bounds
//! all of its reads and writes with a single deadline.

mod describe;
mod listen;
mod query;

pub use describe::{ColumnDescriptor, StatementDescription};
pub use listen::{ListenResult, Notification};
pub use query::QueryResult;

use crate::config::SessionConfig;
use crate::error::{PgWireError, Result};
use crate::protocol::auth::{AuthHandler, AuthMethod, AuthStep};
use crate::protocol::framer::MessageFramer;
use crate::protocol::message::{
    BackendKey, BackendMessage, FrontendMessage, ServerParameters, TransactionStatus,
    PROTOCOL_VERSION_3,
};
use crate::protocol::{MessageFormatter, MessageParser};
use crate::transport;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use wireprobe_core::utils::utc_now;
use wireprobe_core::{Deadline, Timer};

/// Operations slower than this are logged at warn level
const SLOW_OPERATION: Duration = Duration::from_secs(1);

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Idle and accepting operations
    Ready,

    /// An operation failed mid-exchange; the stream position is unknown
    Broken,

    /// `close` was called
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Ready => write!(f, "ready"),
            SessionState::Broken => write!(f, "broken"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Session statistics
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    /// Number of operations (query, describe, listen) started
    pub queries_executed: u64,

    /// Number of rows returned
    pub rows_returned: u64,

    /// Number of messages sent
    pub messages_sent: u64,

    /// Number of messages received
    pub messages_received: u64,

    /// Total bytes sent
    pub bytes_sent: u64,

    /// Total bytes received
    pub bytes_received: u64,

    /// When the session became ready
    pub connected_at: DateTime<Utc>,
}

/// An authenticated session over a byte stream
pub struct Session<S> {
    framer: MessageFramer<S>,
    parser: MessageParser,
    formatter: MessageFormatter,
    state: SessionState,
    operation_timeout: Duration,
    parameters: ServerParameters,
    backend_key: Option<BackendKey>,
    transaction_status: TransactionStatus,
    auth_method: AuthMethod,
    server_signature_verified: Option<bool>,
    pending_notifications: Vec<Notification>,
    queries_executed: u64,
    rows_returned: u64,
    messages_sent: u64,
    messages_received: u64,
    connected_at: DateTime<Utc>,
}

impl Session<TcpStream> {
    /// Connect over TCP and authenticate within the configured connect timeout
    pub async fn connect(config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        let deadline = config.connect_deadline();

        let stream = transport::connect(&config.host, config.port, deadline).await?;
        Self::startup(stream, config, deadline).await
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Send the startup message over an open stream and authenticate
    ///
    /// Returns once the server has sent its first ReadyForQuery.
    pub async fn startup(stream: S, config: &SessionConfig, deadline: Deadline) -> Result<Self> {
        config.validate()?;
        let _timer = Timer::new(format!("startup {}@{}", config.user, config.host))
            .with_warning_threshold(SLOW_OPERATION);

        let parser = MessageParser::new();
        let formatter = MessageFormatter::new();
        let mut framer = MessageFramer::new(stream, config.max_message_len);

        let startup = formatter.format_frontend_message(&FrontendMessage::Startup {
            protocol_version: PROTOCOL_VERSION_3,
            parameters: config.startup_parameters(),
        })?;
        framer.send(&startup, deadline).await?;
        let mut messages_sent = 1;
        let mut messages_received = 0;

        let mut handler = AuthHandler::new(
            config.user.clone(),
            config.password.clone(),
            config.verify_server_signature,
        );
        loop {
            let raw = framer.read_message(deadline).await?;
            messages_received += 1;

            match handler.handle(parser.parse_backend_message(&raw)?)? {
                AuthStep::Send(reply) => {
                    let bytes = formatter.format_frontend_message(&reply)?;
                    framer.send(&bytes, deadline).await?;
                    messages_sent += 1;
                }
                AuthStep::Wait => {}
                AuthStep::Ready => break,
            }
        }

        let outcome = handler.into_outcome()?;
        let session = Self {
            framer,
            parser,
            formatter,
            state: SessionState::Ready,
            operation_timeout: Duration::from_millis(config.operation_timeout_ms),
            parameters: outcome.parameters,
            backend_key: outcome.backend_key,
            transaction_status: outcome.transaction_status,
            auth_method: outcome.method,
            server_signature_verified: outcome.server_signature_verified,
            pending_notifications: Vec::new(),
            queries_executed: 0,
            rows_returned: 0,
            messages_sent,
            messages_received,
            connected_at: utc_now(),
        };

        info!(
            "Session ready: server {} via {}",
            session.server_version().unwrap_or("unknown"),
            session.auth_method
        );
        Ok(session)
    }

    /// Terminate the session and shut the stream down
    ///
    /// A broken session skips Terminate and only shuts the stream down.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        let deadline = self.operation_deadline();
        let was_ready = self.state == SessionState::Ready;
        self.state = SessionState::Closed;

        if was_ready {
            let terminate = self.formatter.format_frontend_message(&FrontendMessage::Terminate)?;
            self.framer.send(&terminate, deadline).await?;
            self.messages_sent += 1;
            self.framer.shutdown(deadline).await
        } else {
            if let Err(e) = self.framer.shutdown(deadline).await {
                debug!("Shutdown of broken session failed: {}", e);
            }
            Ok(())
        }
    }

    pub(crate) fn operation_deadline(&self) -> Deadline {
        Deadline::after(self.operation_timeout)
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        match self.state {
            SessionState::Ready => Ok(()),
            state => Err(PgWireError::Connection(format!("Session is {}", state))),
        }
    }

    /// Record the outcome of an operation
    ///
    /// Server errors are only surfaced after the stream was drained to
    /// ReadyForQuery, so they leave the session usable. Everything else
    /// leaves the stream at an unknown position.
    pub(crate) fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if !matches!(e, PgWireError::Server(_)) {
                warn!("Session marked broken: {}", e);
                self.state = SessionState::Broken;
            }
        }
        result
    }

    pub(crate) async fn send_bytes(&mut self, bytes: &[u8], count: u64, deadline: Deadline) -> Result<()> {
        self.framer.send(bytes, deadline).await?;
        self.messages_sent += count;
        Ok(())
    }

    pub(crate) async fn receive(&mut self, deadline: Deadline) -> Result<BackendMessage> {
        let raw = self.framer.read_message(deadline).await?;
        self.messages_received += 1;
        self.parser.parse_backend_message(&raw)
    }

    /// Handle messages the server may send between any two others
    ///
    /// Returns the message back when it needs handling by the caller.
    pub(crate) fn absorb_async(&mut self, message: BackendMessage) -> Option<BackendMessage> {
        match message {
            BackendMessage::NoticeResponse(fields) => {
                debug!("Server notice: {}", fields.summary());
                None
            }
            BackendMessage::ParameterStatus { name, value } => {
                debug!("Server parameter {} = {}", name, value);
                self.parameters.insert(name, value);
                None
            }
            BackendMessage::NotificationResponse {
                process_id,
                channel,
                payload,
            } => {
                self.pending_notifications.push(Notification {
                    process_id,
                    channel,
                    payload,
                    received_at: utc_now(),
                });
                None
            }
            other => Some(other),
        }
    }

    /// Take the notifications buffered on this session
    ///
    /// These arrived during other operations or during a listen window that
    /// failed. Works in any state, so nothing is lost when the session breaks.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.pending_notifications)
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session accepts operations
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Every ParameterStatus the server reported
    pub fn parameters(&self) -> &ServerParameters {
        &self.parameters
    }

    /// The `server_version` parameter
    pub fn server_version(&self) -> Option<&str> {
        self.parameters.get("server_version").map(String::as_str)
    }

    /// Process ID and cancel key, when the server sent them
    pub fn backend_key(&self) -> Option<BackendKey> {
        self.backend_key
    }

    /// Transaction status from the last ReadyForQuery
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// The authentication method the server asked for
    pub fn auth_method(&self) -> AuthMethod {
        self.auth_method
    }

    /// SCRAM server-signature check result, `None` for other methods
    pub fn server_signature_verified(&self) -> Option<bool> {
        self.server_signature_verified
    }

    /// Snapshot of the session counters
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            queries_executed: self.queries_executed,
            rows_returned: self.rows_returned,
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            bytes_sent: self.framer.bytes_written(),
            bytes_received: self.framer.bytes_read(),
            connected_at: self.connected_at,
        }
    }
}

impl<S> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("auth_method", &self.auth_method)
            .field("transaction_status", &self.transaction_status)
            .field("backend_key", &self.backend_key.map(|k| k.process_id))
            .field("buffered", &self.framer.buffered())
            .finish()
    }
}

/// Summary of one connect-and-authenticate round trip
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// `server_version` reported at startup
    pub server_version: Option<String>,

    /// Method the server asked for
    pub auth_method: AuthMethod,

    /// SCRAM server-signature check result
    pub server_signature_verified: Option<bool>,

    /// Every ParameterStatus reported at startup
    pub parameters: ServerParameters,

    /// Backend process ID
    pub backend_pid: Option<i32>,

    /// Time to connect and authenticate
    pub elapsed_ms: u64,
}

/// Connect, authenticate, report what the server said, and disconnect
pub async fn probe(config: &SessionConfig) -> Result<ProbeReport> {
    let timer = Timer::new(format!("probe {}:{}", config.host, config.port)).without_auto_log();
    let mut session = Session::connect(config).await?;
    let elapsed_ms = timer.elapsed_ms();

    let report = ProbeReport {
        host: config.host.clone(),
        port: config.port,
        server_version: session.server_version().map(str::to_string),
        auth_method: session.auth_method(),
        server_signature_verified: session.server_signature_verified(),
        parameters: session.parameters().clone(),
        backend_pid: session.backend_key().map(|k| k.process_id),
        elapsed_ms,
    };

    if let Err(e) = session.close().await {
        debug!("Error closing probe session: {}", e);
    }
    timer.log("completed");
    Ok(report)
}

//! Message types for the PostgreSQL wire protocol
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;

/// Protocol version 3.0 as sent in the startup message
pub const PROTOCOL_VERSION_3: i32 = 0x0003_0000;

/// Name of the only SASL mechanism this client implements
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Frontend (client-to-server) message types
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    /// Startup message with protocol version and parameters (sent without a type byte)
    Startup {
        /// Protocol version, major in the high 16 bits
        protocol_version: i32,
        /// Parameters (key-value pairs), in the order they are sent
        parameters: Vec<(String, String)>,
    },

    /// Password message (cleartext or MD5-hashed password)
    Password(String),

    /// First SASL message: selected mechanism plus the client-first-message
    SaslInitialResponse {
        /// Mechanism name
        mechanism: String,
        /// Initial client response
        data: Bytes,
    },

    /// Subsequent SASL message
    SaslResponse(Bytes),

    /// Query message (simple query protocol)
    Query(String),

    /// Parse message (extended query protocol)
    Parse {
        /// Prepared statement name ("" for the unnamed statement)
        name: String,
        /// Query string
        query: String,
        /// Parameter types (OIDs, 0 lets the server infer)
        param_types: Vec<i32>,
    },

    /// Describe message (extended query protocol)
    Describe {
        /// Object type ('S' for statement, 'P' for portal)
        object_type: u8,
        /// Object name
        name: String,
    },

    /// Sync message (extended query protocol)
    Sync,

    /// Flush message (extended query protocol)
    Flush,

    /// Terminate message
    Terminate,

    /// COPY fail message
    CopyFail(String),
}

impl FrontendMessage {
    /// Message name for logging
    pub fn name(&self) -> &'static str {
        match self {
            FrontendMessage::Startup { .. } => "StartupMessage",
            FrontendMessage::Password(_) => "PasswordMessage",
            FrontendMessage::SaslInitialResponse { .. } => "SASLInitialResponse",
            FrontendMessage::SaslResponse(_) => "SASLResponse",
            FrontendMessage::Query(_) => "Query",
            FrontendMessage::Parse { .. } => "Parse",
            FrontendMessage::Describe { .. } => "Describe",
            FrontendMessage::Sync => "Sync",
            FrontendMessage::Flush => "Flush",
            FrontendMessage::Terminate => "Terminate",
            FrontendMessage::CopyFail(_) => "CopyFail",
        }
    }
}

/// Backend (server-to-client) message types
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    /// Authentication request
    Authentication(AuthenticationRequest),

    /// Backend key data
    BackendKeyData {
        /// Process ID
        process_id: i32,
        /// Secret key
        secret_key: i32,
    },

    /// Parameter status
    ParameterStatus {
        /// Parameter name
        name: String,
        /// Parameter value
        value: String,
    },

    /// Ready for query
    ReadyForQuery(TransactionStatus),

    /// Command complete
    CommandComplete(String),

    /// Row description
    RowDescription(Vec<FieldDescription>),

    /// Data row
    DataRow(Vec<Option<Bytes>>),

    /// Empty query response
    EmptyQueryResponse,

    /// Error response
    ErrorResponse(ErrorOrNoticeFields),

    /// Notice response
    NoticeResponse(ErrorOrNoticeFields),

    /// Asynchronous notification from LISTEN/NOTIFY
    NotificationResponse {
        /// Process ID of the notifying backend
        process_id: i32,
        /// Channel name
        channel: String,
        /// Payload string
        payload: String,
    },

    /// Parse complete
    ParseComplete,

    /// Bind complete
    BindComplete,

    /// Close complete
    CloseComplete,

    /// Portal suspended
    PortalSuspended,

    /// No data
    NoData,

    /// Parameter description
    ParameterDescription(Vec<i32>),

    /// Negotiation response
    NegotiateProtocolVersion {
        /// Latest minor protocol version supported by the server
        version_minor: i32,
        /// Options not recognized by the server
        options: Vec<String>,
    },

    /// Copy in response
    CopyInResponse {
        /// Format (0 for text, 1 for binary)
        format: i8,
        /// Column formats
        column_formats: Vec<i16>,
    },

    /// Copy out response
    CopyOutResponse {
        /// Format (0 for text, 1 for binary)
        format: i8,
        /// Column formats
        column_formats: Vec<i16>,
    },

    /// Copy data
    CopyData(Bytes),

    /// Copy done
    CopyDone,

    /// Unknown message type
    Unknown {
        /// Message type
        tag: u8,
        /// Message body
        body: Bytes,
    },
}

impl BackendMessage {
    /// Message name for logging and error text
    pub fn name(&self) -> &'static str {
        match self {
            BackendMessage::Authentication(_) => "Authentication",
            BackendMessage::BackendKeyData { .. } => "BackendKeyData",
            BackendMessage::ParameterStatus { .. } => "ParameterStatus",
            BackendMessage::ReadyForQuery(_) => "ReadyForQuery",
            BackendMessage::CommandComplete(_) => "CommandComplete",
            BackendMessage::RowDescription(_) => "RowDescription",
            BackendMessage::DataRow(_) => "DataRow",
            BackendMessage::EmptyQueryResponse => "EmptyQueryResponse",
            BackendMessage::ErrorResponse(_) => "ErrorResponse",
            BackendMessage::NoticeResponse(_) => "NoticeResponse",
            BackendMessage::NotificationResponse { .. } => "NotificationResponse",
            BackendMessage::ParseComplete => "ParseComplete",
            BackendMessage::BindComplete => "BindComplete",
            BackendMessage::CloseComplete => "CloseComplete",
            BackendMessage::PortalSuspended => "PortalSuspended",
            BackendMessage::NoData => "NoData",
            BackendMessage::ParameterDescription(_) => "ParameterDescription",
            BackendMessage::NegotiateProtocolVersion { .. } => "NegotiateProtocolVersion",
            BackendMessage::CopyInResponse { .. } => "CopyInResponse",
            BackendMessage::CopyOutResponse { .. } => "CopyOutResponse",
            BackendMessage::CopyData(_) => "CopyData",
            BackendMessage::CopyDone => "CopyDone",
            BackendMessage::Unknown { .. } => "Unknown",
        }
    }
}

/// Authentication request types
#[derive(Debug, Clone, PartialEq)]
pub enum AuthenticationRequest {
    /// Authentication successful
    Ok,

    /// Kerberos V5 authentication required
    KerberosV5,

    /// Cleartext password required
    CleartextPassword,

    /// MD5 password required
    Md5Password {
        /// Salt for MD5 authentication
        salt: [u8; 4],
    },

    /// SCM credentials required
    SCMCredential,

    /// GSS authentication required
    GSS,

    /// GSSAPI continuation
    GSSContinue {
        /// GSSAPI data
        data: Bytes,
    },

    /// SSPI authentication required
    SSPI,

    /// SASL authentication required
    SASL {
        /// SASL authentication mechanisms
        mechanisms: Vec<String>,
    },

    /// SASL continuation
    SASLContinue {
        /// SASL data
        data: Bytes,
    },

    /// SASL final
    SASLFinal {
        /// SASL data
        data: Bytes,
    },
}

impl AuthenticationRequest {
    /// The request code carried in the message
    pub fn code(&self) -> i32 {
        match self {
            AuthenticationRequest::Ok => 0,
            AuthenticationRequest::KerberosV5 => 2,
            AuthenticationRequest::CleartextPassword => 3,
            AuthenticationRequest::Md5Password { .. } => 5,
            AuthenticationRequest::SCMCredential => 6,
            AuthenticationRequest::GSS => 7,
            AuthenticationRequest::GSSContinue { .. } => 8,
            AuthenticationRequest::SSPI => 9,
            AuthenticationRequest::SASL { .. } => 10,
            AuthenticationRequest::SASLContinue { .. } => 11,
            AuthenticationRequest::SASLFinal { .. } => 12,
        }
    }

    /// Request name for logging and error text
    pub fn name(&self) -> &'static str {
        match self {
            AuthenticationRequest::Ok => "AuthenticationOk",
            AuthenticationRequest::KerberosV5 => "AuthenticationKerberosV5",
            AuthenticationRequest::CleartextPassword => "AuthenticationCleartextPassword",
            AuthenticationRequest::Md5Password { .. } => "AuthenticationMD5Password",
            AuthenticationRequest::SCMCredential => "AuthenticationSCMCredential",
            AuthenticationRequest::GSS => "AuthenticationGSS",
            AuthenticationRequest::GSSContinue { .. } => "AuthenticationGSSContinue",
            AuthenticationRequest::SSPI => "AuthenticationSSPI",
            AuthenticationRequest::SASL { .. } => "AuthenticationSASL",
            AuthenticationRequest::SASLContinue { .. } => "AuthenticationSASLContinue",
            AuthenticationRequest::SASLFinal { .. } => "AuthenticationSASLFinal",
        }
    }
}

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionStatus {
    /// Idle (not in a transaction)
    Idle,

    /// In a transaction block
    InTransaction,

    /// In a failed transaction block
    Failed,
}

impl TransactionStatus {
    /// Convert from a byte to a transaction status
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    /// Convert to a byte
    pub fn to_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }
}

/// Field description for row description message
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescription {
    /// Field name
    pub name: String,

    /// Table OID (0 if not from a table)
    pub table_oid: i32,

    /// Column attribute number (0 if not from a table)
    pub column_id: i16,

    /// Data type OID
    pub data_type_oid: i32,

    /// Data type size
    pub data_type_size: i16,

    /// Type modifier
    pub type_modifier: i32,

    /// Format code (0 for text, 1 for binary)
    pub format_code: i16,
}

impl FieldDescription {
    /// A text-format field not tied to a table column
    pub fn text(name: impl Into<String>, data_type_oid: i32) -> Self {
        Self {
            name: name.into(),
            table_oid: 0,
            column_id: 0,
            data_type_oid,
            data_type_size: -1,
            type_modifier: -1,
            format_code: 0,
        }
    }
}

/// Error and notice message fields
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorOrNoticeFields {
    /// Severity (localized)
    pub severity: Option<String>,

    /// Severity (non-localized)
    pub severity_non_localized: Option<String>,

    /// SQLSTATE code
    pub code: Option<String>,

    /// Primary message
    pub message: Option<String>,

    /// Detail message
    pub detail: Option<String>,

    /// Hint message
    pub hint: Option<String>,

    /// Position (character count)
    pub position: Option<i32>,

    /// Context
    pub context: Option<String>,

    /// All fields (including unknown ones), in arrival order
    pub fields: Vec<(u8, String)>,
}

impl ErrorOrNoticeFields {
    /// Build fields carrying a severity, SQLSTATE code and message
    pub fn new(severity: &str, code: &str, message: &str) -> Self {
        Self {
            severity: Some(severity.to_string()),
            severity_non_localized: Some(severity.to_string()),
            code: Some(code.to_string()),
            message: Some(message.to_string()),
            fields: vec![
                (b'S', severity.to_string()),
                (b'V', severity.to_string()),
                (b'C', code.to_string()),
                (b'M', message.to_string()),
            ],
            ..Default::default()
        }
    }

    /// Attach a detail field
    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self.fields.push((b'D', detail.to_string()));
        self
    }

    /// Look up a field by its code
    pub fn get(&self, code: u8) -> Option<&str> {
        self.fields
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, v)| v.as_str())
    }

    /// One-line summary for logging
    pub fn summary(&self) -> String {
        format!(
            "{}: {}",
            self.severity.as_deref().unwrap_or("NOTICE"),
            self.message.as_deref().unwrap_or("")
        )
    }
}

/// Parameter status values reported during startup, keyed by name
pub type ServerParameters = HashMap<String, String>;

/// Cancellation key reported in BackendKeyData
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendKey {
    /// Backend process ID
    pub process_id: i32,

    /// Secret key for cancel requests
    #[serde(skip)]
    pub secret_key: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_status_bytes() {
        for status in [
            TransactionStatus::Idle,
            TransactionStatus::InTransaction,
            TransactionStatus::Failed,
        ] {
            assert_eq!(TransactionStatus::from_byte(status.to_byte()), Some(status));
        }
        assert_eq!(TransactionStatus::from_byte(b'X'), None);
    }

    #[test]
    fn test_authentication_request_codes() {
        assert_eq!(AuthenticationRequest::Ok.code(), 0);
        assert_eq!(AuthenticationRequest::CleartextPassword.code(), 3);
        assert_eq!(AuthenticationRequest::Md5Password { salt: [0; 4] }.code(), 5);
        assert_eq!(AuthenticationRequest::SASL { mechanisms: vec![] }.code(), 10);
        assert_eq!(AuthenticationRequest::SASLContinue { data: Bytes::new() }.code(), 11);
        assert_eq!(AuthenticationRequest::SASLFinal { data: Bytes::new() }.code(), 12);
    }

    #[test]
    fn test_error_fields_lookup() {
        let fields = ErrorOrNoticeFields::new("ERROR", "42601", "syntax error at or near \"SELEC\"")
            .with_detail("near the start");
        assert_eq!(fields.get(b'C'), Some("42601"));
        assert_eq!(fields.get(b'D'), Some("near the start"));
        assert_eq!(fields.get(b'H'), None);
        assert_eq!(fields.summary(), "ERROR: syntax error at or near \"SELEC\"");
    }
}

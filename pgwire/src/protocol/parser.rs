//! Message parser for PostgreSQL wire protocol messages
//!
//! Every fixed-width read is bounds-checked against the payload the framer
//! delivered. Malformed input is a protocol error, never a panic.

use crate::error::{PgWireError, Result};
use crate::protocol::framer::RawMessage;
use crate::protocol::message::{
    AuthenticationRequest, BackendMessage, ErrorOrNoticeFields, FieldDescription, FrontendMessage,
    TransactionStatus, PROTOCOL_VERSION_3,
};
use bytes::{Buf, Bytes};
use std::io::Cursor;

/// Message parser for PostgreSQL wire protocol
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageParser;

impl MessageParser {
    /// Create a new message parser
    pub fn new() -> Self {
        Self
    }

    /// Parse a backend message from a framed tag and payload
    pub fn parse_backend_message(&self, message: &RawMessage) -> Result<BackendMessage> {
        let payload = &message.payload;
        let mut cursor = Cursor::new(payload);

        let parsed = match message.tag {
            // Authentication request
            b'R' => {
                let auth_type = self.read_i32(&mut cursor, "authentication type")?;

                let request = match auth_type {
                    0 => AuthenticationRequest::Ok,
                    2 => AuthenticationRequest::KerberosV5,
                    3 => AuthenticationRequest::CleartextPassword,
                    5 => {
                        let mut salt = [0u8; 4];
                        self.need(&cursor, 4, "MD5 salt")?;
                        cursor.copy_to_slice(&mut salt);
                        AuthenticationRequest::Md5Password { salt }
                    }
                    6 => AuthenticationRequest::SCMCredential,
                    7 => AuthenticationRequest::GSS,
                    8 => AuthenticationRequest::GSSContinue {
                        data: self.read_rest(&mut cursor),
                    },
                    9 => AuthenticationRequest::SSPI,
                    10 => {
                        // Mechanism list, terminated by an empty string
                        let mut mechanisms = Vec::new();
                        loop {
                            let mechanism = self.read_cstring(&mut cursor, "SASL mechanism")?;
                            if mechanism.is_empty() {
                                break;
                            }
                            mechanisms.push(mechanism);
                        }
                        AuthenticationRequest::SASL { mechanisms }
                    }
                    11 => AuthenticationRequest::SASLContinue {
                        data: self.read_rest(&mut cursor),
                    },
                    12 => AuthenticationRequest::SASLFinal {
                        data: self.read_rest(&mut cursor),
                    },
                    _ => {
                        return Err(PgWireError::Protocol(format!(
                            "Unknown authentication type: {}",
                            auth_type
                        )))
                    }
                };

                BackendMessage::Authentication(request)
            }

            // Backend key data
            b'K' => {
                let process_id = self.read_i32(&mut cursor, "process id")?;
                let secret_key = self.read_i32(&mut cursor, "secret key")?;
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                }
            }

            // Parameter status
            b'S' => {
                let name = self.read_cstring(&mut cursor, "parameter name")?;
                let value = self.read_cstring(&mut cursor, "parameter value")?;
                BackendMessage::ParameterStatus { name, value }
            }

            // Ready for query
            b'Z' => {
                let status_byte = self.read_u8(&mut cursor, "transaction status")?;
                let status = TransactionStatus::from_byte(status_byte).ok_or_else(|| {
                    PgWireError::Protocol(format!("Unknown transaction status: {}", status_byte))
                })?;
                BackendMessage::ReadyForQuery(status)
            }

            // Command complete
            b'C' => BackendMessage::CommandComplete(self.read_cstring(&mut cursor, "command tag")?),

            // Row description
            b'T' => {
                let field_count = self.read_count(&mut cursor, "field count")?;
                let mut fields = Vec::with_capacity(field_count);

                for _ in 0..field_count {
                    let name = self.read_cstring(&mut cursor, "field name")?;
                    self.need(&cursor, 18, "field description")?;
                    fields.push(FieldDescription {
                        name,
                        table_oid: cursor.get_i32(),
                        column_id: cursor.get_i16(),
                        data_type_oid: cursor.get_i32(),
                        data_type_size: cursor.get_i16(),
                        type_modifier: cursor.get_i32(),
                        format_code: cursor.get_i16(),
                    });
                }

                BackendMessage::RowDescription(fields)
            }

            // Data row
            b'D' => {
                let column_count = self.read_count(&mut cursor, "column count")?;
                let mut columns = Vec::with_capacity(column_count);

                for _ in 0..column_count {
                    let column_length = self.read_i32(&mut cursor, "column length")?;
                    match column_length {
                        -1 => columns.push(None),
                        n if n < -1 => {
                            return Err(PgWireError::Protocol(format!(
                                "Invalid column length: {}",
                                n
                            )))
                        }
                        n => columns.push(Some(self.read_bytes(&mut cursor, n as usize, "column value")?)),
                    }
                }

                BackendMessage::DataRow(columns)
            }

            b'I' => BackendMessage::EmptyQueryResponse,

            b'E' => BackendMessage::ErrorResponse(self.parse_error_fields(&mut cursor)?),

            b'N' => BackendMessage::NoticeResponse(self.parse_error_fields(&mut cursor)?),

            // Notification response
            b'A' => {
                let process_id = self.read_i32(&mut cursor, "notifying process id")?;
                let channel = self.read_cstring(&mut cursor, "channel name")?;
                let payload = self.read_cstring(&mut cursor, "notification payload")?;
                BackendMessage::NotificationResponse {
                    process_id,
                    channel,
                    payload,
                }
            }

            b'1' => BackendMessage::ParseComplete,
            b'2' => BackendMessage::BindComplete,
            b'3' => BackendMessage::CloseComplete,
            b's' => BackendMessage::PortalSuspended,
            b'n' => BackendMessage::NoData,

            // Parameter description
            b't' => {
                let param_count = self.read_count(&mut cursor, "parameter count")?;
                self.need(&cursor, param_count * 4, "parameter types")?;
                let params = (0..param_count).map(|_| cursor.get_i32()).collect();
                BackendMessage::ParameterDescription(params)
            }

            // Negotiate protocol version
            b'v' => {
                let version_minor = self.read_i32(&mut cursor, "minor version")?;
                let option_count = self.read_i32(&mut cursor, "option count")?;
                if option_count < 0 {
                    return Err(PgWireError::Protocol(format!(
                        "Negative option count: {}",
                        option_count
                    )));
                }
                let mut options = Vec::new();
                for _ in 0..option_count {
                    options.push(self.read_cstring(&mut cursor, "protocol option")?);
                }
                BackendMessage::NegotiateProtocolVersion {
                    version_minor,
                    options,
                }
            }

            b'G' => {
                let (format, column_formats) = self.read_copy_response(&mut cursor)?;
                BackendMessage::CopyInResponse {
                    format,
                    column_formats,
                }
            }

            b'H' => {
                let (format, column_formats) = self.read_copy_response(&mut cursor)?;
                BackendMessage::CopyOutResponse {
                    format,
                    column_formats,
                }
            }

            b'd' => BackendMessage::CopyData(self.read_rest(&mut cursor)),

            b'c' => BackendMessage::CopyDone,

            tag => BackendMessage::Unknown {
                tag,
                body: self.read_rest(&mut cursor),
            },
        };

        self.finish(&cursor, parsed.name())?;
        Ok(parsed)
    }

    /// Parse a startup message body (everything after the length word)
    pub fn parse_startup_message(&self, payload: &Bytes) -> Result<FrontendMessage> {
        let mut cursor = Cursor::new(payload);

        let protocol_version = self.read_i32(&mut cursor, "protocol version")?;
        if protocol_version != PROTOCOL_VERSION_3 {
            return Err(PgWireError::Protocol(format!(
                "Unsupported protocol version: {}.{}",
                protocol_version >> 16,
                protocol_version & 0xFFFF
            )));
        }

        let mut parameters = Vec::new();
        loop {
            let key = self.read_cstring(&mut cursor, "startup parameter name")?;
            if key.is_empty() {
                break;
            }
            let value = self.read_cstring(&mut cursor, "startup parameter value")?;
            parameters.push((key, value));
        }

        self.finish(&cursor, "StartupMessage")?;
        Ok(FrontendMessage::Startup {
            protocol_version,
            parameters,
        })
    }

    /// Parse a tagged frontend message
    ///
    /// A `'p'` message is decoded as a password; use
    /// [`parse_sasl_initial_response`](Self::parse_sasl_initial_response)
    /// or [`parse_sasl_response`](Self::parse_sasl_response) when the
    /// exchange is known to be SASL.
    pub fn parse_frontend_message(&self, message: &RawMessage) -> Result<FrontendMessage> {
        let payload = &message.payload;
        let mut cursor = Cursor::new(payload);

        let parsed = match message.tag {
            b'p' => FrontendMessage::Password(self.read_cstring(&mut cursor, "password")?),

            b'Q' => FrontendMessage::Query(self.read_cstring(&mut cursor, "query")?),

            b'P' => {
                let name = self.read_cstring(&mut cursor, "statement name")?;
                let query = self.read_cstring(&mut cursor, "query")?;
                let param_count = self.read_count(&mut cursor, "parameter count")?;
                self.need(&cursor, param_count * 4, "parameter types")?;
                let param_types = (0..param_count).map(|_| cursor.get_i32()).collect();
                FrontendMessage::Parse {
                    name,
                    query,
                    param_types,
                }
            }

            b'D' => {
                let object_type = self.read_u8(&mut cursor, "describe target")?;
                let name = self.read_cstring(&mut cursor, "describe name")?;
                FrontendMessage::Describe { object_type, name }
            }

            b'S' => FrontendMessage::Sync,
            b'H' => FrontendMessage::Flush,
            b'X' => FrontendMessage::Terminate,

            b'f' => FrontendMessage::CopyFail(self.read_cstring(&mut cursor, "copy failure message")?),

            tag => {
                return Err(PgWireError::Protocol(format!(
                    "Unsupported frontend message type: {:?}",
                    tag as char
                )))
            }
        };

        self.finish(&cursor, parsed.name())?;
        Ok(parsed)
    }

    /// Parse a `'p'` message as a SASLInitialResponse
    pub fn parse_sasl_initial_response(&self, message: &RawMessage) -> Result<FrontendMessage> {
        self.expect_tag(message, b'p')?;
        let mut cursor = Cursor::new(&message.payload);

        let mechanism = self.read_cstring(&mut cursor, "SASL mechanism")?;
        let data_len = self.read_i32(&mut cursor, "SASL data length")?;
        let data = if data_len < 0 {
            Bytes::new()
        } else {
            self.read_bytes(&mut cursor, data_len as usize, "SASL data")?
        };

        self.finish(&cursor, "SASLInitialResponse")?;
        Ok(FrontendMessage::SaslInitialResponse { mechanism, data })
    }

    /// Parse a `'p'` message as a SASLResponse
    pub fn parse_sasl_response(&self, message: &RawMessage) -> Result<FrontendMessage> {
        self.expect_tag(message, b'p')?;
        Ok(FrontendMessage::SaslResponse(message.payload.clone()))
    }

    fn expect_tag(&self, message: &RawMessage, tag: u8) -> Result<()> {
        if message.tag != tag {
            return Err(PgWireError::Protocol(format!(
                "Expected message type {:?}, got {:?}",
                tag as char, message.tag as char
            )));
        }
        Ok(())
    }

    fn need(&self, cursor: &Cursor<&Bytes>, n: usize, what: &str) -> Result<()> {
        if cursor.remaining() < n {
            return Err(PgWireError::Protocol(format!(
                "Truncated {}: need {} bytes, have {}",
                what,
                n,
                cursor.remaining()
            )));
        }
        Ok(())
    }

    fn finish(&self, cursor: &Cursor<&Bytes>, what: &str) -> Result<()> {
        if cursor.has_remaining() {
            return Err(PgWireError::Protocol(format!(
                "{} has {} trailing bytes",
                what,
                cursor.remaining()
            )));
        }
        Ok(())
    }

    fn read_u8(&self, cursor: &mut Cursor<&Bytes>, what: &str) -> Result<u8> {
        self.need(cursor, 1, what)?;
        Ok(cursor.get_u8())
    }

    fn read_i32(&self, cursor: &mut Cursor<&Bytes>, what: &str) -> Result<i32> {
        self.need(cursor, 4, what)?;
        Ok(cursor.get_i32())
    }

    /// Read an i16 element count, rejecting negative values
    fn read_count(&self, cursor: &mut Cursor<&Bytes>, what: &str) -> Result<usize> {
        self.need(cursor, 2, what)?;
        let count = cursor.get_i16();
        if count < 0 {
            return Err(PgWireError::Protocol(format!("Negative {}: {}", what, count)));
        }
        Ok(count as usize)
    }

    fn read_bytes(&self, cursor: &mut Cursor<&Bytes>, len: usize, what: &str) -> Result<Bytes> {
        self.need(cursor, len, what)?;
        let start = cursor.position() as usize;
        let bytes = cursor.get_ref().slice(start..start + len);
        cursor.advance(len);
        Ok(bytes)
    }

    fn read_rest(&self, cursor: &mut Cursor<&Bytes>) -> Bytes {
        let start = cursor.position() as usize;
        let bytes = cursor.get_ref().slice(start..);
        cursor.advance(cursor.remaining());
        bytes
    }

    /// Read a null-terminated string from the cursor
    ///
    /// Text the server sends before `client_encoding` applies may be in the
    /// server encoding, so invalid UTF-8 is replaced rather than rejected.
    fn read_cstring(&self, cursor: &mut Cursor<&Bytes>, what: &str) -> Result<String> {
        let start = cursor.position() as usize;
        let rest = &cursor.get_ref()[start..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| PgWireError::Protocol(format!("Missing NUL terminator in {}", what)))?;

        let value = String::from_utf8_lossy(&rest[..end]).into_owned();
        cursor.advance(end + 1);
        Ok(value)
    }

    fn read_copy_response(&self, cursor: &mut Cursor<&Bytes>) -> Result<(i8, Vec<i16>)> {
        self.need(cursor, 1, "copy format")?;
        let format = cursor.get_i8();
        let column_count = self.read_count(cursor, "copy column count")?;
        self.need(cursor, column_count * 2, "copy column formats")?;
        let column_formats = (0..column_count).map(|_| cursor.get_i16()).collect();
        Ok((format, column_formats))
    }

    /// Parse error and notice fields
    fn parse_error_fields(&self, cursor: &mut Cursor<&Bytes>) -> Result<ErrorOrNoticeFields> {
        let mut fields = ErrorOrNoticeFields::default();

        loop {
            let field_type = self.read_u8(cursor, "error field type")?;
            if field_type == 0 {
                break;
            }

            let field_value = self.read_cstring(cursor, "error field")?;
            match field_type {
                b'S' => fields.severity = Some(field_value.clone()),
                b'V' => fields.severity_non_localized = Some(field_value.clone()),
                b'C' => fields.code = Some(field_value.clone()),
                b'M' => fields.message = Some(field_value.clone()),
                b'D' => fields.detail = Some(field_value.clone()),
                b'H' => fields.hint = Some(field_value.clone()),
                // Position is advisory; an unparsable one is dropped
                b'P' => fields.position = field_value.parse().ok(),
                b'W' => fields.context = Some(field_value.clone()),
                _ => {}
            }
            fields.fields.push((field_type, field_value));
        }

        Ok(fields)
    }
}

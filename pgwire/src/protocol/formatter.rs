//! Message formatter for PostgreSQL wire protocol messages
//!
//! Encodes frontend messages for sending to the server, and backend
//! messages so scripted fixture servers can speak the protocol too.

use crate::error::{PgWireError, Result};
use crate::protocol::message::{
    AuthenticationRequest, BackendMessage, ErrorOrNoticeFields, FrontendMessage,
};
use bytes::{BufMut, Bytes, BytesMut};
use log::debug;
use wireprobe_core::StringUtils;

/// Message formatter for PostgreSQL wire protocol messages
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageFormatter {}

impl MessageFormatter {
    /// Create a new message formatter
    pub fn new() -> Self {
        Self {}
    }

    /// Format a frontend message for sending to the server
    ///
    /// Strings containing a NUL byte cannot be represented on the wire and
    /// are rejected before anything is encoded.
    pub fn format_frontend_message(&self, message: &FrontendMessage) -> Result<Bytes> {
        let mut buffer = BytesMut::new();

        match message {
            FrontendMessage::Startup {
                protocol_version,
                parameters,
            } => {
                // Startup has no type byte; the length covers the whole message
                buffer.put_i32(0);
                buffer.put_i32(*protocol_version);
                for (key, value) in parameters {
                    self.write_string(&mut buffer, key)?;
                    self.write_string(&mut buffer, value)?;
                }
                buffer.put_u8(0);
                let length = self.checked_len(buffer.len())?;
                buffer[0..4].copy_from_slice(&length.to_be_bytes());
            }
            FrontendMessage::Password(password) => {
                self.write_message_with_type(&mut buffer, b'p', |buf| {
                    self.write_string(buf, password)
                })?;
            }
            FrontendMessage::SaslInitialResponse { mechanism, data } => {
                self.write_message_with_type(&mut buffer, b'p', |buf| {
                    self.write_string(buf, mechanism)?;
                    buf.put_i32(self.checked_len(data.len())?);
                    buf.put_slice(data);
                    Ok(())
                })?;
            }
            FrontendMessage::SaslResponse(data) => {
                self.write_message_with_type(&mut buffer, b'p', |buf| {
                    buf.put_slice(data);
                    Ok(())
                })?;
            }
            FrontendMessage::Query(query) => {
                self.write_message_with_type(&mut buffer, b'Q', |buf| self.write_string(buf, query))?;
            }
            FrontendMessage::Parse {
                name,
                query,
                param_types,
            } => {
                self.write_message_with_type(&mut buffer, b'P', |buf| {
                    self.write_string(buf, name)?;
                    self.write_string(buf, query)?;
                    buf.put_i16(self.checked_count(param_types.len())?);
                    for oid in param_types {
                        buf.put_i32(*oid);
                    }
                    Ok(())
                })?;
            }
            FrontendMessage::Describe { object_type, name } => {
                self.write_message_with_type(&mut buffer, b'D', |buf| {
                    buf.put_u8(*object_type);
                    self.write_string(buf, name)
                })?;
            }
            FrontendMessage::Sync => {
                self.write_message_with_type(&mut buffer, b'S', |_| Ok(()))?;
            }
            FrontendMessage::Flush => {
                self.write_message_with_type(&mut buffer, b'H', |_| Ok(()))?;
            }
            FrontendMessage::Terminate => {
                self.write_message_with_type(&mut buffer, b'X', |_| Ok(()))?;
            }
            FrontendMessage::CopyFail(reason) => {
                self.write_message_with_type(&mut buffer, b'f', |buf| self.write_string(buf, reason))?;
            }
        }

        debug!("Formatted {} ({} bytes)", message.name(), buffer.len());
        Ok(buffer.freeze())
    }

    /// Format several frontend messages into one contiguous batch
    pub fn format_batch(&self, messages: &[FrontendMessage]) -> Result<Bytes> {
        let mut buffer = BytesMut::new();
        for message in messages {
            buffer.put_slice(&self.format_frontend_message(message)?);
        }
        Ok(buffer.freeze())
    }

    /// Format a backend message as a server would send it
    pub fn format_backend_message(&self, message: &BackendMessage) -> Result<Bytes> {
        let mut buffer = BytesMut::new();

        match message {
            BackendMessage::Authentication(auth_request) => {
                self.write_authentication(&mut buffer, auth_request)?;
            }
            BackendMessage::BackendKeyData {
                process_id,
                secret_key,
            } => {
                self.write_message_with_type(&mut buffer, b'K', |buf| {
                    buf.put_i32(*process_id);
                    buf.put_i32(*secret_key);
                    Ok(())
                })?;
            }
            BackendMessage::ParameterStatus { name, value } => {
                self.write_message_with_type(&mut buffer, b'S', |buf| {
                    self.write_string(buf, name)?;
                    self.write_string(buf, value)
                })?;
            }
            BackendMessage::ReadyForQuery(status) => {
                self.write_message_with_type(&mut buffer, b'Z', |buf| {
                    buf.put_u8(status.to_byte());
                    Ok(())
                })?;
            }
            BackendMessage::CommandComplete(tag) => {
                self.write_message_with_type(&mut buffer, b'C', |buf| self.write_string(buf, tag))?;
            }
            BackendMessage::RowDescription(fields) => {
                self.write_message_with_type(&mut buffer, b'T', |buf| {
                    buf.put_i16(self.checked_count(fields.len())?);
                    for field in fields {
                        self.write_string(buf, &field.name)?;
                        buf.put_i32(field.table_oid);
                        buf.put_i16(field.column_id);
                        buf.put_i32(field.data_type_oid);
                        buf.put_i16(field.data_type_size);
                        buf.put_i32(field.type_modifier);
                        buf.put_i16(field.format_code);
                    }
                    Ok(())
                })?;
            }
            BackendMessage::DataRow(values) => {
                self.write_message_with_type(&mut buffer, b'D', |buf| {
                    buf.put_i16(self.checked_count(values.len())?);
                    for value in values {
                        match value {
                            Some(bytes) => {
                                buf.put_i32(self.checked_len(bytes.len())?);
                                buf.put_slice(bytes);
                            }
                            None => buf.put_i32(-1),
                        }
                    }
                    Ok(())
                })?;
            }
            BackendMessage::EmptyQueryResponse => {
                self.write_message_with_type(&mut buffer, b'I', |_| Ok(()))?;
            }
            BackendMessage::ErrorResponse(fields) => {
                self.write_error_or_notice(&mut buffer, b'E', fields)?;
            }
            BackendMessage::NoticeResponse(fields) => {
                self.write_error_or_notice(&mut buffer, b'N', fields)?;
            }
            BackendMessage::NotificationResponse {
                process_id,
                channel,
                payload,
            } => {
                self.write_message_with_type(&mut buffer, b'A', |buf| {
                    buf.put_i32(*process_id);
                    self.write_string(buf, channel)?;
                    self.write_string(buf, payload)
                })?;
            }
            BackendMessage::ParseComplete => {
                self.write_message_with_type(&mut buffer, b'1', |_| Ok(()))?;
            }
            BackendMessage::BindComplete => {
                self.write_message_with_type(&mut buffer, b'2', |_| Ok(()))?;
            }
            BackendMessage::CloseComplete => {
                self.write_message_with_type(&mut buffer, b'3', |_| Ok(()))?;
            }
            BackendMessage::PortalSuspended => {
                self.write_message_with_type(&mut buffer, b's', |_| Ok(()))?;
            }
            BackendMessage::NoData => {
                self.write_message_with_type(&mut buffer, b'n', |_| Ok(()))?;
            }
            BackendMessage::ParameterDescription(types) => {
                self.write_message_with_type(&mut buffer, b't', |buf| {
                    buf.put_i16(self.checked_count(types.len())?);
                    for type_oid in types {
                        buf.put_i32(*type_oid);
                    }
                    Ok(())
                })?;
            }
            BackendMessage::NegotiateProtocolVersion {
                version_minor,
                options,
            } => {
                self.write_message_with_type(&mut buffer, b'v', |buf| {
                    buf.put_i32(*version_minor);
                    buf.put_i32(self.checked_len(options.len())?);
                    for option in options {
                        self.write_string(buf, option)?;
                    }
                    Ok(())
                })?;
            }
            BackendMessage::CopyInResponse {
                format,
                column_formats,
            } => {
                self.write_copy_response(&mut buffer, b'G', *format, column_formats)?;
            }
            BackendMessage::CopyOutResponse {
                format,
                column_formats,
            } => {
                self.write_copy_response(&mut buffer, b'H', *format, column_formats)?;
            }
            BackendMessage::CopyData(data) => {
                self.write_message_with_type(&mut buffer, b'd', |buf| {
                    buf.put_slice(data);
                    Ok(())
                })?;
            }
            BackendMessage::CopyDone => {
                self.write_message_with_type(&mut buffer, b'c', |_| Ok(()))?;
            }
            BackendMessage::Unknown { tag, body } => {
                self.write_message_with_type(&mut buffer, *tag, |buf| {
                    buf.put_slice(body);
                    Ok(())
                })?;
            }
        }

        Ok(buffer.freeze())
    }

    /// Format an error response with the specified severity, code, and message
    pub fn format_error_response(&self, severity: &str, code: &str, message: &str) -> Result<Bytes> {
        let fields = ErrorOrNoticeFields::new(severity, code, message);
        self.format_backend_message(&BackendMessage::ErrorResponse(fields))
    }

    // Helper methods

    /// Write a message with the specified type code, back-patching its length
    fn write_message_with_type<F>(&self, buffer: &mut BytesMut, type_code: u8, writer: F) -> Result<()>
    where
        F: FnOnce(&mut BytesMut) -> Result<()>,
    {
        buffer.put_u8(type_code);

        let length_pos = buffer.len();
        buffer.put_i32(0); // Placeholder

        let body_start = buffer.len();
        writer(buffer)?;
        let body_end = buffer.len();

        // Length includes the length field itself, but not the type byte
        let message_length = self.checked_len(body_end - body_start + 4)?;
        buffer[length_pos..length_pos + 4].copy_from_slice(&message_length.to_be_bytes());

        Ok(())
    }

    fn write_authentication(&self, buffer: &mut BytesMut, auth_request: &AuthenticationRequest) -> Result<()> {
        self.write_message_with_type(buffer, b'R', |buf| {
            buf.put_i32(auth_request.code());
            match auth_request {
                AuthenticationRequest::Md5Password { salt } => buf.put_slice(salt),
                AuthenticationRequest::SASL { mechanisms } => {
                    for mechanism in mechanisms {
                        self.write_string(buf, mechanism)?;
                    }
                    buf.put_u8(0); // Null terminator for the list
                }
                AuthenticationRequest::GSSContinue { data }
                | AuthenticationRequest::SASLContinue { data }
                | AuthenticationRequest::SASLFinal { data } => buf.put_slice(data),
                _ => {}
            }
            Ok(())
        })
    }

    fn write_error_or_notice(&self, buffer: &mut BytesMut, type_code: u8, fields: &ErrorOrNoticeFields) -> Result<()> {
        self.write_message_with_type(buffer, type_code, |buf| {
            for (field_type, field_value) in &fields.fields {
                buf.put_u8(*field_type);
                self.write_string(buf, field_value)?;
            }
            buf.put_u8(0);
            Ok(())
        })
    }

    fn write_copy_response(
        &self,
        buffer: &mut BytesMut,
        type_code: u8,
        format: i8,
        column_formats: &[i16],
    ) -> Result<()> {
        self.write_message_with_type(buffer, type_code, |buf| {
            buf.put_i8(format);
            buf.put_i16(self.checked_count(column_formats.len())?);
            for format_code in column_formats {
                buf.put_i16(*format_code);
            }
            Ok(())
        })
    }

    /// Write a null-terminated string
    fn write_string(&self, buffer: &mut BytesMut, string: &str) -> Result<()> {
        if StringUtils::contains_nul(string) {
            return Err(PgWireError::Protocol(format!(
                "String contains a NUL byte: {:?}",
                StringUtils::truncate(string, 40)
            )));
        }
        buffer.put_slice(string.as_bytes());
        buffer.put_u8(0);
        Ok(())
    }

    fn checked_len(&self, len: usize) -> Result<i32> {
        i32::try_from(len)
            .map_err(|_| PgWireError::Protocol(format!("Message too large: {} bytes", len)))
    }

    fn checked_count(&self, count: usize) -> Result<i16> {
        i16::try_from(count)
            .map_err(|_| PgWireError::Protocol(format!("Too many elements: {}", count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::framer::RawMessage;
    use crate::protocol::message::{FieldDescription, TransactionStatus, PROTOCOL_VERSION_3};
    use crate::protocol::parser::MessageParser;

    fn split(bytes: &Bytes) -> RawMessage {
        RawMessage {
            tag: bytes[0],
            payload: bytes.slice(5..),
        }
    }

    #[test]
    fn test_format_startup() {
        let formatter = MessageFormatter::new();
        let bytes = formatter
            .format_frontend_message(&FrontendMessage::Startup {
                protocol_version: PROTOCOL_VERSION_3,
                parameters: vec![("user".to_string(), "alice".to_string())],
            })
            .unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&20i32.to_be_bytes());
        expected.extend_from_slice(&[0, 3, 0, 0]);
        expected.extend_from_slice(b"user\0alice\0\0");
        assert_eq!(&bytes[..], &expected[..]);
    }

    #[test]
    fn test_format_query() {
        let formatter = MessageFormatter::new();
        let bytes = formatter
            .format_frontend_message(&FrontendMessage::Query("SELECT 1".to_string()))
            .unwrap();
        assert_eq!(bytes[0], b'Q');
        assert_eq!(bytes[1..5], 13_i32.to_be_bytes());
        assert_eq!(&bytes[5..], b"SELECT 1\0");
    }

    #[test]
    fn test_format_sasl_initial_response() {
        let formatter = MessageFormatter::new();
        let bytes = formatter
            .format_frontend_message(&FrontendMessage::SaslInitialResponse {
                mechanism: "SCRAM-SHA-256".to_string(),
                data: Bytes::from_static(b"n,,n=,r=abc"),
            })
            .unwrap();

        let mut body = Vec::new();
        body.extend_from_slice(b"SCRAM-SHA-256\0");
        body.extend_from_slice(&11i32.to_be_bytes());
        body.extend_from_slice(b"n,,n=,r=abc");
        assert_eq!(bytes[0], b'p');
        assert_eq!(&bytes[5..], &body[..]);
    }

    #[test]
    fn test_nul_in_outbound_string_is_rejected() {
        let formatter = MessageFormatter::new();
        for message in [
            FrontendMessage::Query("SELECT '\0'".to_string()),
            FrontendMessage::Password("pa\0ss".to_string()),
            FrontendMessage::Startup {
                protocol_version: PROTOCOL_VERSION_3,
                parameters: vec![("user".to_string(), "a\0b".to_string())],
            },
        ] {
            assert!(matches!(
                formatter.format_frontend_message(&message),
                Err(PgWireError::Protocol(_))
            ));
        }
    }

    #[test]
    fn test_describe_batch_layout() {
        let formatter = MessageFormatter::new();
        let bytes = formatter
            .format_batch(&[
                FrontendMessage::Parse {
                    name: String::new(),
                    query: "SELECT $1".to_string(),
                    param_types: vec![],
                },
                FrontendMessage::Describe {
                    object_type: b'S',
                    name: String::new(),
                },
                FrontendMessage::Sync,
            ])
            .unwrap();

        // Parse: tag, len, "\0", "SELECT $1\0", i16 count
        assert_eq!(bytes[0], b'P');
        assert_eq!(bytes[1..5], 17_i32.to_be_bytes());
        // Describe follows at 1 + 17
        assert_eq!(bytes[18], b'D');
        assert_eq!(bytes[19..23], 6_i32.to_be_bytes());
        assert_eq!(bytes[23], b'S');
        // Sync closes the batch
        assert_eq!(&bytes[25..], &[b'S', 0, 0, 0, 4]);
    }

    #[test]
    fn test_backend_messages_parse_back() {
        let formatter = MessageFormatter::new();
        let parser = MessageParser::new();

        let messages = vec![
            BackendMessage::Authentication(AuthenticationRequest::SASL {
                mechanisms: vec!["SCRAM-SHA-256".to_string()],
            }),
            BackendMessage::RowDescription(vec![FieldDescription::text("n", 23)]),
            BackendMessage::DataRow(vec![Some(Bytes::from_static(b"1")), None]),
            BackendMessage::NotificationResponse {
                process_id: 9,
                channel: "events".to_string(),
                payload: String::new(),
            },
            BackendMessage::ErrorResponse(ErrorOrNoticeFields::new("ERROR", "42601", "syntax error")),
            BackendMessage::ReadyForQuery(TransactionStatus::InTransaction),
        ];

        for message in messages {
            let bytes = formatter.format_backend_message(&message).unwrap();
            let parsed = parser.parse_backend_message(&split(&bytes)).unwrap();
            assert_eq!(parsed, message);
        }
    }

    #[test]
    fn test_format_error_response() {
        let formatter = MessageFormatter::new();

        let bytes = formatter
            .format_error_response("ERROR", "XX000", "Test error message")
            .unwrap();
        assert_eq!(bytes[0], b'E');
        assert!(bytes.windows(2).any(|w| w == [b'S', b'E']));
        assert!(bytes.windows(2).any(|w| w == [b'C', b'X']));
        assert!(bytes.windows(2).any(|w| w == [b'M', b'T']));
    }
}

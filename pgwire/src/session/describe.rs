//! Statement description through the extended query protocol
use super::Session;
use crate::error::{PgWireError, Result, ServerError};
use crate::protocol::message::{BackendMessage, FieldDescription, FrontendMessage};
use crate::protocol::types::type_name;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use wireprobe_core::{Deadline, StringUtils, Timer};

/// One result column of a described statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,

    /// Type OID
    pub type_oid: i32,

    /// Readable type name, `"unknown"` for types outside the built-in table
    pub type_name: String,
}

impl From<&FieldDescription> for ColumnDescriptor {
    fn from(field: &FieldDescription) -> Self {
        Self {
            name: field.name.clone(),
            type_oid: field.data_type_oid,
            type_name: type_name(field.data_type_oid).to_string(),
        }
    }
}

/// Shape of a statement, learned without executing it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatementDescription {
    /// Result columns; empty for statements that return no rows
    pub columns: Vec<ColumnDescriptor>,

    /// Number of `$n` parameters
    pub param_count: usize,

    /// Parameter type OIDs as inferred by the server
    pub param_types: Vec<i32>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Describe `sql` as an unnamed prepared statement
    pub async fn describe(&mut self, sql: &str) -> Result<StatementDescription> {
        let deadline = self.operation_deadline();
        self.describe_within(sql, deadline).await
    }

    /// Describe `sql` with an explicit deadline
    pub async fn describe_within(&mut self, sql: &str, deadline: Deadline) -> Result<StatementDescription> {
        self.ensure_ready()?;
        let batch = self.formatter.format_batch(&[
            FrontendMessage::Parse {
                name: String::new(),
                query: sql.to_string(),
                param_types: Vec::new(),
            },
            FrontendMessage::Describe {
                object_type: b'S',
                name: String::new(),
            },
            FrontendMessage::Sync,
        ])?;

        let _timer = Timer::new(format!("describe {}", StringUtils::truncate(sql, 60)))
            .with_warning_threshold(super::SLOW_OPERATION);
        self.queries_executed += 1;

        let result = self.run_describe(&batch, deadline).await;
        self.settle(result)
    }

    async fn run_describe(&mut self, batch: &[u8], deadline: Deadline) -> Result<StatementDescription> {
        self.send_bytes(batch, 3, deadline).await?;

        let mut description = StatementDescription::default();
        let mut parsed = false;
        let mut error: Option<ServerError> = None;

        loop {
            let message = self.receive(deadline).await?;
            let message = match self.absorb_async(message) {
                Some(message) => message,
                None => continue,
            };

            match message {
                BackendMessage::ParseComplete => parsed = true,
                BackendMessage::ParameterDescription(types) => {
                    description.param_count = types.len();
                    description.param_types = types;
                }
                BackendMessage::RowDescription(fields) => {
                    description.columns = fields.iter().map(ColumnDescriptor::from).collect();
                }
                BackendMessage::NoData => description.columns.clear(),
                BackendMessage::ErrorResponse(fields) => {
                    error.get_or_insert_with(|| ServerError::from(&fields));
                }
                BackendMessage::ReadyForQuery(status) => {
                    self.transaction_status = status;
                    break;
                }
                other => {
                    return Err(PgWireError::Protocol(format!(
                        "Unexpected {} during describe",
                        other.name()
                    )))
                }
            }
        }

        if let Some(error) = error {
            return Err(PgWireError::Server(error));
        }
        if !parsed {
            return Err(PgWireError::Protocol(
                "ReadyForQuery arrived without ParseComplete".to_string(),
            ));
        }
        Ok(description)
    }
}

//! Simple query protocol
use super::Session;
use crate::error::{PgWireError, Result, ServerError};
use crate::protocol::message::{BackendMessage, FieldDescription, FrontendMessage};
use bytes::Bytes;
use log::debug;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use wireprobe_core::{Deadline, StringUtils, Timer};

/// Reason sent with CopyFail when the server asks for COPY data
const COPY_IN_REFUSED: &str = "COPY FROM STDIN is not supported by this client";

/// Result of one statement
///
/// Every row has exactly as many values as there are columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    /// Column names, in order
    pub columns: Vec<String>,

    /// Rows of text values; `None` is SQL NULL
    pub rows: Vec<Vec<Option<String>>>,

    /// Command tag, empty for an empty query
    pub command_tag: String,

    /// Number of rows
    pub row_count: usize,
}

impl QueryResult {
    fn with_columns(fields: &[FieldDescription]) -> Self {
        Self {
            columns: fields.iter().map(|f| f.name.clone()).collect(),
            ..Default::default()
        }
    }

    fn push_row(&mut self, values: Vec<Option<Bytes>>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(PgWireError::Protocol(format!(
                "DataRow has {} values for {} columns",
                values.len(),
                self.columns.len()
            )));
        }

        self.rows.push(
            values
                .into_iter()
                .map(|value| value.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
                .collect(),
        );
        self.row_count = self.rows.len();
        Ok(())
    }

    /// Rows affected, taken from the trailing number of the command tag
    ///
    /// `INSERT 0 5` gives 5, `SELECT 3` gives 3, `BEGIN` gives `None`.
    pub fn affected_rows(&self) -> Option<u64> {
        self.command_tag
            .rsplit(' ')
            .next()
            .filter(|_| self.command_tag.contains(' '))
            .and_then(|count| count.parse().ok())
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Run `sql` with the simple query protocol and return the last statement's result
    ///
    /// A batch that produced no results yields an empty result.
    pub async fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        Ok(self.execute_all(sql).await?.pop().unwrap_or_default())
    }

    /// Run `sql` and return one result per statement
    pub async fn execute_all(&mut self, sql: &str) -> Result<Vec<QueryResult>> {
        let deadline = self.operation_deadline();
        self.execute_all_within(sql, deadline).await
    }

    /// Run `sql` with an explicit deadline
    pub async fn execute_all_within(&mut self, sql: &str, deadline: Deadline) -> Result<Vec<QueryResult>> {
        self.ensure_ready()?;
        let query = self
            .formatter
            .format_frontend_message(&FrontendMessage::Query(sql.to_string()))?;

        let _timer = Timer::new(format!("query {}", StringUtils::truncate(sql, 60)))
            .with_warning_threshold(super::SLOW_OPERATION);
        self.queries_executed += 1;

        let result = self.run_simple_query(&query, deadline).await;
        self.settle(result)
    }

    async fn run_simple_query(&mut self, query: &[u8], deadline: Deadline) -> Result<Vec<QueryResult>> {
        self.send_bytes(query, 1, deadline).await?;

        let mut results = Vec::new();
        let mut current: Option<QueryResult> = None;
        let mut error: Option<ServerError> = None;

        loop {
            let message = self.receive(deadline).await?;
            let message = match self.absorb_async(message) {
                Some(message) => message,
                None => continue,
            };

            match message {
                BackendMessage::RowDescription(fields) => {
                    current = Some(QueryResult::with_columns(&fields));
                }
                BackendMessage::DataRow(values) => {
                    let result = current.as_mut().ok_or_else(|| {
                        PgWireError::Protocol("DataRow before RowDescription".to_string())
                    })?;
                    result.push_row(values)?;
                    self.rows_returned += 1;
                }
                BackendMessage::CommandComplete(tag) => {
                    let mut result = current.take().unwrap_or_default();
                    result.command_tag = tag;
                    results.push(result);
                }
                BackendMessage::EmptyQueryResponse => {
                    current = None;
                    results.push(QueryResult::default());
                }
                BackendMessage::ErrorResponse(fields) => {
                    // The server still sends ReadyForQuery; keep reading until it does
                    debug!("Query failed: {}", fields.summary());
                    current = None;
                    error.get_or_insert_with(|| ServerError::from(&fields));
                }
                BackendMessage::CopyInResponse { .. } => {
                    let fail = self
                        .formatter
                        .format_frontend_message(&FrontendMessage::CopyFail(COPY_IN_REFUSED.to_string()))?;
                    self.send_bytes(&fail, 1, deadline).await?;
                }
                BackendMessage::CopyOutResponse { .. } | BackendMessage::CopyData(_) | BackendMessage::CopyDone => {}
                BackendMessage::ReadyForQuery(status) => {
                    self.transaction_status = status;
                    break;
                }
                other => {
                    return Err(PgWireError::Protocol(format!(
                        "Unexpected {} during simple query",
                        other.name()
                    )))
                }
            }
        }

        match error {
            Some(error) => Err(PgWireError::Server(error)),
            None => Ok(results),
        }
    }
}

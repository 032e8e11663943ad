use std::sync::Arc;

use fanout_client::error::ClientResult;
use fanout_client::{SqlClient, SqlConnection};
use fanout_common::credential::ConnectionCredential;
use fanout_telemetry::common::SpanAttribute;
use fanout_telemetry::recorder::record_status;
use fastrace::future::FutureExt;
use fastrace::Span;
use futures::StreamExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::normalize::row_to_json;

/// A statement together with its position in the submitted batch.
/// The SQL text is absent when the source cell is null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub index: usize,
    pub sql: Option<String>,
}

impl QueryRequest {
    pub fn from_texts<I, S>(texts: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        texts
            .into_iter()
            .enumerate()
            .map(|(index, sql)| Self {
                index,
                sql: Some(sql.into()),
            })
            .collect()
    }
}

/// The record emitted in place of the rows of a failed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error: String,
    pub query: String,
}

impl ErrorRecord {
    pub const NULL_QUERY_MESSAGE: &'static str = "query text is null";

    pub fn new(error: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            query: query.into(),
        }
    }

    pub fn to_json(&self) -> String {
        json!({ "error": self.error, "query": self.query }).to_string()
    }
}

/// The result of running one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// The JSON-serialized rows, in the order the service returned them.
    Rows(Vec<String>),
    Failed(ErrorRecord),
}

impl QueryOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, QueryOutcome::Failed(_))
    }

    /// The JSON strings stored for this statement in the result column.
    pub fn into_json_rows(self) -> Vec<String> {
        match self {
            QueryOutcome::Rows(rows) => rows,
            QueryOutcome::Failed(error) => vec![error.to_json()],
        }
    }
}

/// Runs single statements against the remote service.
///
/// Every statement gets its own connection. Failures never escape [`QueryExecutor::execute`];
/// they are reported as [`QueryOutcome::Failed`] and any rows received before the failure
/// are discarded.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    client: Arc<dyn SqlClient>,
}

impl QueryExecutor {
    pub fn new(client: Arc<dyn SqlClient>) -> Self {
        Self { client }
    }

    pub async fn execute(&self, sql: &str, credential: &ConnectionCredential) -> QueryOutcome {
        let span = Span::enter_with_local_parent("QueryExecutor::execute")
            .with_property(|| (SpanAttribute::QUERY_TEXT, sql.to_string()));
        self.execute_in_span(sql, credential, span).await
    }

    /// Runs one statement of a batch. A request without SQL text fails
    /// without opening a connection.
    pub async fn execute_request(
        &self,
        request: &QueryRequest,
        credential: &ConnectionCredential,
    ) -> QueryOutcome {
        let Some(sql) = &request.sql else {
            warn!("query {} has no text", request.index);
            return QueryOutcome::Failed(ErrorRecord::new(ErrorRecord::NULL_QUERY_MESSAGE, ""));
        };
        let span = Span::enter_with_local_parent("QueryExecutor::execute").with_properties(|| {
            [
                (SpanAttribute::QUERY_INDEX, request.index.to_string()),
                (SpanAttribute::QUERY_TEXT, sql.clone()),
            ]
        });
        self.execute_in_span(sql, credential, span).await
    }

    async fn execute_in_span(
        &self,
        sql: &str,
        credential: &ConnectionCredential,
        span: Span,
    ) -> QueryOutcome {
        let result = self
            .try_execute(sql, credential)
            .in_span(Span::enter_with_parent("QueryExecutor::try_execute", &span))
            .await;
        record_status(&span, &result);
        match result {
            Ok(rows) => {
                debug!("query returned {} rows: {sql}", rows.len());
                span.add_property(|| (SpanAttribute::QUERY_ROW_COUNT, rows.len().to_string()));
                QueryOutcome::Rows(rows)
            }
            Err(e) => {
                warn!("query failed: {sql}: {e}");
                QueryOutcome::Failed(ErrorRecord::new(e.to_string(), sql))
            }
        }
    }

    async fn try_execute(
        &self,
        sql: &str,
        credential: &ConnectionCredential,
    ) -> ClientResult<Vec<String>> {
        let mut connection = self.client.connect(credential).await?;
        let result = collect_rows(connection.as_mut(), sql).await;
        if let Err(e) = connection.close().await {
            warn!("failed to close connection: {e}");
        }
        result
    }
}

async fn collect_rows(connection: &mut dyn SqlConnection, sql: &str) -> ClientResult<Vec<String>> {
    let mut stream = connection.query(sql).await?;
    let mut rows = Vec::new();
    while let Some(batch) = stream.next().await {
        let batch = batch?;
        rows.extend((0..batch.num_rows()).map(|row| row_to_json(&batch, row)));
    }
    Ok(rows)
}

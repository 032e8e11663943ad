use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrow::array::RecordBatch;
use async_trait::async_trait;
use fanout_common::credential::ConnectionCredential;

use crate::client::{RecordBatchStream, SqlClient, SqlConnection};
use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone)]
enum ScriptedResponse {
    Batches(Vec<RecordBatch>),
    Failure(String),
    /// Yields the batches and then fails while the stream is being consumed.
    FailureAfter(Vec<RecordBatch>, String),
}

#[derive(Debug, Default)]
struct MemoryClientState {
    connections: AtomicUsize,
    open_connections: AtomicUsize,
    max_open_connections: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

/// An in-memory SQL service that answers statements from a script.
///
/// Statements that are not part of the script fail with an "unknown statement" error.
/// Clones share the connection counters.
#[derive(Debug, Clone, Default)]
pub struct MemorySqlClient {
    statements: HashMap<String, ScriptedResponse>,
    delays: HashMap<String, Duration>,
    connect_failure: Option<String>,
    close_failure: Option<String>,
    state: Arc<MemoryClientState>,
}

impl MemorySqlClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batches(self, sql: impl Into<String>, batches: Vec<RecordBatch>) -> Self {
        self.with_response(sql, ScriptedResponse::Batches(batches))
    }

    pub fn with_failure(self, sql: impl Into<String>, message: impl Into<String>) -> Self {
        self.with_response(sql, ScriptedResponse::Failure(message.into()))
    }

    pub fn with_failure_after(
        self,
        sql: impl Into<String>,
        batches: Vec<RecordBatch>,
        message: impl Into<String>,
    ) -> Self {
        self.with_response(sql, ScriptedResponse::FailureAfter(batches, message.into()))
    }

    /// Delays the answer to a statement, so that statements can complete in a different
    /// order than they were submitted. The delay may be set before or after the response.
    pub fn with_delay(mut self, sql: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(sql.into(), delay);
        self
    }

    pub fn with_connect_failure(mut self, message: impl Into<String>) -> Self {
        self.connect_failure = Some(message.into());
        self
    }

    pub fn with_close_failure(mut self, message: impl Into<String>) -> Self {
        self.close_failure = Some(message.into());
        self
    }

    fn with_response(mut self, sql: impl Into<String>, response: ScriptedResponse) -> Self {
        self.statements.insert(sql.into(), response);
        self
    }

    /// The number of connection attempts so far.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// The largest number of connections that were open at the same time.
    pub fn max_open_connections(&self) -> usize {
        self.state.max_open_connections.load(Ordering::SeqCst)
    }

    /// The statements received so far, in the order they were issued.
    pub fn executed_queries(&self) -> Vec<String> {
        self.state
            .queries
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SqlClient for MemorySqlClient {
    async fn connect(
        &self,
        _credential: &ConnectionCredential,
    ) -> ClientResult<Box<dyn SqlConnection>> {
        self.state.connections.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.connect_failure {
            return Err(ClientError::connection(message.clone()));
        }
        let open = self.state.open_connections.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .max_open_connections
            .fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            statements: self.statements.clone(),
            delays: self.delays.clone(),
            close_failure: self.close_failure.clone(),
            state: self.state.clone(),
        }))
    }
}

struct MemoryConnection {
    statements: HashMap<String, ScriptedResponse>,
    delays: HashMap<String, Duration>,
    close_failure: Option<String>,
    state: Arc<MemoryClientState>,
}

#[async_trait]
impl SqlConnection for MemoryConnection {
    async fn query(&mut self, sql: &str) -> ClientResult<RecordBatchStream> {
        if let Ok(mut queries) = self.state.queries.lock() {
            queries.push(sql.to_string());
        }
        if let Some(delay) = self.delays.get(sql) {
            tokio::time::sleep(*delay).await;
        }
        let Some(response) = self.statements.get(sql).cloned() else {
            return Err(ClientError::query(format!("unknown statement: {sql}")));
        };
        match response {
            ScriptedResponse::Batches(batches) => {
                Ok(Box::pin(futures::stream::iter(batches.into_iter().map(Ok))))
            }
            ScriptedResponse::Failure(message) => Err(ClientError::query(message)),
            ScriptedResponse::FailureAfter(batches, message) => {
                let items = batches
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(ClientError::query(message))));
                Ok(Box::pin(futures::stream::iter(items)))
            }
        }
    }

    async fn close(self: Box<Self>) -> ClientResult<()> {
        match &self.close_failure {
            Some(message) => Err(ClientError::connection(message.clone())),
            None => Ok(()),
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.state.open_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

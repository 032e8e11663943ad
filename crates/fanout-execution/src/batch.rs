use std::sync::Arc;

use fanout_client::SqlClient;
use fanout_common::credential::ConnectionCredential;
use fanout_telemetry::common::SpanAttribute;
use fastrace::future::FutureExt;
use fastrace::Span;
use futures::future::join_all;
use log::info;

use crate::executor::{QueryExecutor, QueryOutcome, QueryRequest};

/// The JSON rows of every statement in a batch, in submission order.
pub type BatchResult = Vec<Vec<String>>;

/// Runs all statements of a batch concurrently and waits for all of them.
#[derive(Debug, Clone)]
pub struct QueryBatchExecutor {
    executor: QueryExecutor,
}

impl QueryBatchExecutor {
    pub fn new(client: Arc<dyn SqlClient>) -> Self {
        Self {
            executor: QueryExecutor::new(client),
        }
    }

    pub async fn execute_batch<S: AsRef<str>>(
        &self,
        queries: &[S],
        credential: &ConnectionCredential,
    ) -> BatchResult {
        let requests = QueryRequest::from_texts(queries.iter().map(|q| q.as_ref()));
        self.execute_requests(&requests, credential)
            .await
            .into_iter()
            .map(QueryOutcome::into_json_rows)
            .collect()
    }

    /// Runs the requests concurrently without any limit on the number of statements
    /// in flight. The outcomes are returned in the order of the requests,
    /// independently of the order in which the statements complete.
    pub async fn execute_requests(
        &self,
        requests: &[QueryRequest],
        credential: &ConnectionCredential,
    ) -> Vec<QueryOutcome> {
        let span = Span::enter_with_local_parent("QueryBatchExecutor::execute_batch")
            .with_property(|| (SpanAttribute::BATCH_SIZE, requests.len().to_string()));
        let tasks = requests
            .iter()
            .map(|request| self.executor.execute_request(request, credential));
        let outcomes = join_all(tasks).in_span(span).await;
        let failed = outcomes.iter().filter(|x| x.is_failed()).count();
        info!("executed {} queries ({failed} failed)", outcomes.len());
        outcomes
    }
}

use std::fmt;
use std::pin::Pin;

use arrow::array::RecordBatch;
use async_trait::async_trait;
use fanout_common::credential::ConnectionCredential;
use futures::Stream;

use crate::error::ClientResult;

/// The rows returned for a single statement, delivered as Arrow record batches
/// whose columns are typed and named.
pub type RecordBatchStream = Pin<Box<dyn Stream<Item = ClientResult<RecordBatch>> + Send>>;

/// A client of the remote streaming SQL service.
#[async_trait]
pub trait SqlClient: fmt::Debug + Send + Sync {
    /// Opens a new connection. Every call returns a dedicated connection.
    async fn connect(
        &self,
        credential: &ConnectionCredential,
    ) -> ClientResult<Box<dyn SqlConnection>>;
}

/// A connection that runs a single SQL statement.
#[async_trait]
pub trait SqlConnection: Send {
    async fn query(&mut self, sql: &str) -> ClientResult<RecordBatchStream>;

    async fn close(self: Box<Self>) -> ClientResult<()> {
        Ok(())
    }
}

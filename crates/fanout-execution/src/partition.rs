use std::sync::Arc;

use datafusion::arrow::array::{Array, AsArray, ListBuilder, RecordBatch, StringBuilder};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use fanout_common::config::ExecutionConfig;
use fanout_common::credential::ConnectionCredential;
use fanout_telemetry::common::SpanAttribute;
use fanout_telemetry::recorder::record_status;
use fastrace::Span;
use log::debug;

use crate::batch::QueryBatchExecutor;
use crate::error::{ExecutionError, ExecutionResult};
use crate::executor::QueryRequest;

/// Runs the statements of one partition and attaches their results as a new column.
///
/// [`PartitionWorker::process`] blocks the calling thread until every statement of the
/// partition has completed, so it must not be called from within an async runtime.
#[derive(Debug, Clone)]
pub struct PartitionWorker {
    executor: QueryBatchExecutor,
    credential: Arc<ConnectionCredential>,
    query_column: String,
    result_column: String,
}

impl PartitionWorker {
    pub fn new(
        executor: QueryBatchExecutor,
        credential: Arc<ConnectionCredential>,
        config: &ExecutionConfig,
    ) -> Self {
        Self {
            executor,
            credential,
            query_column: config.query_column.clone(),
            result_column: config.result_column.clone(),
        }
    }

    pub fn query_column(&self) -> &str {
        &self.query_column
    }

    pub fn result_column(&self) -> &str {
        &self.result_column
    }

    /// The field of the result column: one list of JSON strings per input row.
    pub fn result_field(&self) -> Field {
        Field::new(
            &self.result_column,
            DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
            true,
        )
    }

    pub fn output_schema(&self, input: &Schema) -> ExecutionResult<SchemaRef> {
        if input.column_with_name(&self.result_column).is_some() {
            return Err(ExecutionError::invalid(format!(
                "input already contains the result column: {}",
                self.result_column
            )));
        }
        let mut fields = input.fields().to_vec();
        fields.push(Arc::new(self.result_field()));
        Ok(Arc::new(Schema::new_with_metadata(
            fields,
            input.metadata().clone(),
        )))
    }

    pub fn process(&self, partition: usize, batch: RecordBatch) -> ExecutionResult<RecordBatch> {
        let span = Span::enter_with_local_parent("PartitionWorker::process").with_properties(|| {
            [
                (SpanAttribute::PARTITION, partition.to_string()),
                (SpanAttribute::PARTITION_ROW_COUNT, batch.num_rows().to_string()),
            ]
        });
        let _guard = span.set_local_parent();
        let result = self.try_process(partition, &batch);
        record_status(&span, &result);
        result
    }

    fn try_process(&self, partition: usize, batch: &RecordBatch) -> ExecutionResult<RecordBatch> {
        let schema = self.output_schema(batch.schema_ref())?;
        let requests = self.requests(batch)?;
        debug!("partition {partition}: running {} queries", requests.len());
        // The runtime lives only for this partition and is dropped once all queries are done.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ExecutionError::internal(format!("failed to build runtime: {e}")))?;
        let outcomes =
            runtime.block_on(self.executor.execute_requests(&requests, &self.credential));
        drop(runtime);

        let mut builder = ListBuilder::new(StringBuilder::new());
        for outcome in outcomes {
            for row in outcome.into_json_rows() {
                builder.values().append_value(row);
            }
            builder.append(true);
        }
        let mut columns = batch.columns().to_vec();
        columns.push(Arc::new(builder.finish()));
        Ok(RecordBatch::try_new(schema, columns)?)
    }

    fn requests(&self, batch: &RecordBatch) -> ExecutionResult<Vec<QueryRequest>> {
        let column = batch.column_by_name(&self.query_column).ok_or_else(|| {
            ExecutionError::invalid(format!("missing query column: {}", self.query_column))
        })?;
        let texts: Vec<Option<&str>> = match column.data_type() {
            DataType::Utf8 => column.as_string::<i32>().iter().collect(),
            DataType::LargeUtf8 => column.as_string::<i64>().iter().collect(),
            DataType::Utf8View => column.as_string_view().iter().collect(),
            other => {
                return Err(ExecutionError::invalid(format!(
                    "query column {} must contain strings, found {other}",
                    self.query_column
                )))
            }
        };
        Ok(texts
            .into_iter()
            .enumerate()
            .map(|(index, sql)| QueryRequest {
                index,
                sql: sql.map(|s| s.to_string()),
            })
            .collect())
    }
}

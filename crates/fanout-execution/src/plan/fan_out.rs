use std::any::Any;
use std::sync::Arc;

use datafusion::arrow::compute::concat_batches;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::common::{plan_err, DataFusionError, Result};
use datafusion::execution::{SendableRecordBatchStream, TaskContext};
use datafusion::physical_expr::EquivalenceProperties;
use datafusion::physical_plan::execution_plan::{Boundedness, EmissionType};
use datafusion::physical_plan::stream::RecordBatchStreamAdapter;
use datafusion::physical_plan::{
    DisplayAs, DisplayFormatType, ExecutionPlan, ExecutionPlanProperties, PlanProperties,
};
use fanout_telemetry::common::SpanAttribute;
use fastrace::Span;
use futures::TryStreamExt;

use crate::error::ExecutionError;
use crate::partition::PartitionWorker;

/// Runs the statements of every input partition against the remote service
/// and appends the results as a list column.
///
/// Each partition is collected in full and handed to a [`PartitionWorker`] on the
/// blocking thread pool, so the partition emits a single batch once all of its
/// statements have completed.
#[derive(Debug, Clone)]
pub struct QueryFanOutExec {
    input: Arc<dyn ExecutionPlan>,
    worker: Arc<PartitionWorker>,
    output_schema: SchemaRef,
    properties: PlanProperties,
}

impl QueryFanOutExec {
    pub fn try_new(input: Arc<dyn ExecutionPlan>, worker: Arc<PartitionWorker>) -> Result<Self> {
        let output_schema = worker.output_schema(&input.schema())?;
        let properties = PlanProperties::new(
            EquivalenceProperties::new(output_schema.clone()),
            input.output_partitioning().clone(),
            EmissionType::Final,
            Boundedness::Bounded,
        );
        Ok(Self {
            input,
            worker,
            output_schema,
            properties,
        })
    }
}

impl DisplayAs for QueryFanOutExec {
    fn fmt_as(&self, _t: DisplayFormatType, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "QueryFanOutExec: query_column={}, result_column={}",
            self.worker.query_column(),
            self.worker.result_column()
        )
    }
}

impl ExecutionPlan for QueryFanOutExec {
    fn name(&self) -> &str {
        "QueryFanOutExec"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn properties(&self) -> &PlanProperties {
        &self.properties
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        vec![&self.input]
    }

    fn with_new_children(
        self: Arc<Self>,
        mut children: Vec<Arc<dyn ExecutionPlan>>,
    ) -> Result<Arc<dyn ExecutionPlan>> {
        let child = children.pop();
        match (child, children.is_empty()) {
            (Some(input), true) => Ok(Arc::new(Self::try_new(input, self.worker.clone())?)),
            _ => plan_err!("QueryFanOutExec should have one child"),
        }
    }

    fn execute(
        &self,
        partition: usize,
        context: Arc<TaskContext>,
    ) -> Result<SendableRecordBatchStream> {
        let input = self.input.execute(partition, context)?;
        let input_schema = self.input.schema();
        let worker = self.worker.clone();
        // The blocking thread has no local parent span of its own.
        let span = Span::enter_with_local_parent("QueryFanOutExec::execute")
            .with_property(|| (SpanAttribute::PARTITION, partition.to_string()));
        let output = futures::stream::once(async move {
            let batches: Vec<RecordBatch> = input.try_collect().await?;
            let batch = concat_batches(&input_schema, &batches)?;
            let output = tokio::task::spawn_blocking(move || {
                let _guard = span.set_local_parent();
                worker.process(partition, batch)
            })
            .await
            .map_err(ExecutionError::from)?;
            Ok::<_, DataFusionError>(output?)
        });
        Ok(Box::pin(RecordBatchStreamAdapter::new(
            self.output_schema.clone(),
            output,
        )))
    }
}

#[cfg(test)]
mod tests {
    use datafusion::arrow::array::{Array, AsArray, StringArray};
    use datafusion::arrow::datatypes::{DataType, Field, Schema};
    use datafusion::datasource::memory::MemorySourceConfig;
    use datafusion::physical_plan::collect;
    use datafusion::prelude::SessionContext;
    use fanout_client::memory::MemorySqlClient;
    use fanout_common::config::ExecutionConfig;
    use fanout_common::credential::ConnectionCredential;

    use super::*;
    use crate::batch::QueryBatchExecutor;

    fn queries(values: Vec<&str>) -> Result<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "sql_query",
            DataType::Utf8,
            true,
        )]));
        Ok(RecordBatch::try_new(
            schema,
            vec![Arc::new(StringArray::from(values))],
        )?)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fan_out_per_partition() -> Result<()> {
        let client = MemorySqlClient::new()
            .with_failure("SELECT a", "a failed")
            .with_failure("SELECT b", "b failed")
            .with_failure("SELECT c", "c failed");
        let worker = Arc::new(PartitionWorker::new(
            QueryBatchExecutor::new(Arc::new(client.clone())),
            Arc::new(ConnectionCredential::new("memory", "token")),
            &ExecutionConfig::default(),
        ));
        let first = queries(vec!["SELECT a", "SELECT b"])?;
        let second = queries(vec!["SELECT c"])?;
        let input = MemorySourceConfig::try_new_exec(
            &[vec![first.clone()], vec![second]],
            first.schema(),
            None,
        )?;
        let exec = Arc::new(QueryFanOutExec::try_new(input, worker)?);
        assert_eq!(exec.properties().output_partitioning().partition_count(), 2);

        let ctx = SessionContext::new();
        let output = collect(exec, ctx.task_ctx()).await?;
        let rows: Vec<String> = output
            .iter()
            .flat_map(|batch| {
                let list = batch.column(1).as_list::<i32>().clone();
                (0..list.len())
                    .map(move |i| list.value(i).as_string::<i32>().value(0).to_string())
            })
            .collect();
        assert_eq!(
            rows,
            vec![
                r#"{"error":"query error: a failed","query":"SELECT a"}"#,
                r#"{"error":"query error: b failed","query":"SELECT b"}"#,
                r#"{"error":"query error: c failed","query":"SELECT c"}"#,
            ]
        );
        assert_eq!(client.connection_count(), 3);
        Ok(())
    }

    #[test]
    fn test_with_new_children_requires_one_child() -> Result<()> {
        let batch = queries(vec!["SELECT 1"])?;
        let input: Arc<dyn ExecutionPlan> =
            MemorySourceConfig::try_new_exec(&[vec![batch.clone()]], batch.schema(), None)?;
        let worker = Arc::new(PartitionWorker::new(
            QueryBatchExecutor::new(Arc::new(MemorySqlClient::new())),
            Arc::new(ConnectionCredential::new("memory", "token")),
            &ExecutionConfig::default(),
        ));
        let exec = Arc::new(QueryFanOutExec::try_new(input.clone(), worker)?);
        assert!(exec.clone().with_new_children(vec![]).is_err());
        let exec = exec.with_new_children(vec![input])?;
        assert_eq!(exec.schema().fields().len(), 2);
        Ok(())
    }
}

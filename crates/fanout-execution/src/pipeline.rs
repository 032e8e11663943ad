use std::sync::Arc;

use datafusion::arrow::array::{Array, ArrayRef, AsArray, RecordBatch, StringArray};
use datafusion::arrow::datatypes::{Field, Schema};
use datafusion::datasource::MemTable;
use datafusion::physical_plan::{collect_partitioned, ExecutionPlan};
use datafusion::prelude::SessionContext;
use fanout_client::SqlClient;
use fanout_common::config::AppConfig;
use fanout_common::credential::{resolve_credential, CredentialResolver};
use fanout_telemetry::common::SpanAttribute;
use fastrace::future::FutureExt;
use fastrace::Span;
use log::info;

use crate::batch::QueryBatchExecutor;
use crate::error::{ExecutionError, ExecutionResult};
use crate::flatten::{flatten, infer_schema};
use crate::partition::PartitionWorker;
use crate::plan::QueryFanOutExec;

/// Runs the statements against the remote service and returns all result rows as one
/// flat table.
///
/// The credential is resolved before any statement runs. The statements are split into
/// `execution.partitions` contiguous partitions, and the statements of each partition run
/// concurrently. The output schema is inferred from the first result row, which is the
/// first row of the first statement that returned any.
pub async fn run_remote_query<S: AsRef<str>>(
    ctx: &SessionContext,
    queries: &[S],
    config: &AppConfig,
    resolver: &dyn CredentialResolver,
    client: Arc<dyn SqlClient>,
) -> ExecutionResult<RecordBatch> {
    let queries = StringArray::from_iter_values(queries.iter().map(|q| q.as_ref()));
    run_remote_query_column(ctx, Arc::new(queries), config, resolver, client).await
}

/// Same as [`run_remote_query`], for a string column of statements that may contain nulls.
pub async fn run_remote_query_column(
    ctx: &SessionContext,
    queries: ArrayRef,
    config: &AppConfig,
    resolver: &dyn CredentialResolver,
    client: Arc<dyn SqlClient>,
) -> ExecutionResult<RecordBatch> {
    let span = Span::enter_with_local_parent("run_remote_query")
        .with_property(|| (SpanAttribute::BATCH_SIZE, queries.len().to_string()));
    async move {
        let credential = resolve_credential(resolver, &config.credential)?;
        let worker = PartitionWorker::new(
            QueryBatchExecutor::new(client),
            Arc::new(credential),
            &config.execution,
        );
        let rows = fan_out(ctx, queries, config, worker).await?;
        let sample = rows.first().ok_or_else(|| {
            ExecutionError::schema_inference("no result rows to infer the schema from")
        })?;
        let schema = infer_schema(sample)?;
        let output = flatten(&rows, schema)?;
        info!(
            "flattened {} result rows into {} columns",
            output.num_rows(),
            output.num_columns()
        );
        Ok(output)
    }
    .in_span(span)
    .await
}

/// Runs the statements and returns the JSON strings of all statements, one per result
/// row or error record, in submission order.
async fn fan_out(
    ctx: &SessionContext,
    queries: ArrayRef,
    config: &AppConfig,
    worker: PartitionWorker,
) -> ExecutionResult<Vec<String>> {
    let query_column = config.execution.query_column.as_str();
    let result_column = config.execution.result_column.as_str();
    let schema = Arc::new(Schema::new(vec![Field::new(
        query_column,
        queries.data_type().clone(),
        true,
    )]));
    let partitions = split_partitions(&queries, config.execution.partitions)
        .into_iter()
        .map(|array| -> ExecutionResult<Vec<RecordBatch>> {
            Ok(vec![RecordBatch::try_new(schema.clone(), vec![array])?])
        })
        .collect::<ExecutionResult<Vec<_>>>()?;
    let table = MemTable::try_new(schema, partitions)?;
    let input = ctx.read_table(Arc::new(table))?.create_physical_plan().await?;
    let plan: Arc<dyn ExecutionPlan> =
        Arc::new(QueryFanOutExec::try_new(input, Arc::new(worker))?);
    let augmented = collect_partitioned(plan, ctx.task_ctx())
        .await?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

    // A single target partition keeps the unnested rows in input order.
    let local = SessionContext::new_with_config(ctx.copied_config().with_target_partitions(1));
    let unnested = local
        .read_batches(augmented)?
        .unnest_columns(&[result_column])?
        .select_columns(&[result_column])?
        .collect()
        .await?;
    let mut rows = vec![];
    for batch in unnested {
        let column = batch.column(0).as_string_opt::<i32>().ok_or_else(|| {
            ExecutionError::internal(format!(
                "unexpected type for unnested column {result_column}: {}",
                batch.column(0).data_type()
            ))
        })?;
        rows.extend(column.iter().flatten().map(|x| x.to_string()));
    }
    Ok(rows)
}

/// Splits the statements into at most `partitions` contiguous slices.
/// There is always at least one slice, so an empty input still yields one empty partition.
fn split_partitions(queries: &ArrayRef, partitions: usize) -> Vec<ArrayRef> {
    let total = queries.len();
    if total == 0 {
        return vec![queries.clone()];
    }
    let size = total.div_ceil(partitions.max(1));
    (0..total)
        .step_by(size)
        .map(|offset| queries.slice(offset, size.min(total - offset)))
        .collect()
}

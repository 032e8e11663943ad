use std::path::PathBuf;
use std::sync::Arc;

use datafusion::arrow::util::pretty::pretty_format_batches;
use datafusion::prelude::SessionContext;
use fanout_client::flight::{FlightSqlClient, FlightSqlClientOptions};
use fanout_common::config::AppConfig;
use fanout_common::credential::EnvCredentialResolver;
use fanout_common::error::CommonError;
use fanout_execution::pipeline::run_remote_query;
use fanout_telemetry::telemetry::{init_telemetry, shutdown_telemetry};
use fastrace::collector::SpanContext;
use fastrace::future::FutureExt;
use fastrace::Span;
use log::{error, info};

pub struct QueryOptions {
    pub statements: Vec<String>,
    pub partitions: Option<usize>,
}

/// Collects the statements given on the command line followed by the
/// statements in each file, one per non-empty line.
pub fn read_statements(
    mut statements: Vec<String>,
    files: &[PathBuf],
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    for path in files {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CommonError::invalid(format!("cannot read statements from {}: {e}", path.display()))
        })?;
        statements.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from),
        );
    }
    Ok(statements)
}

pub fn run_query(options: QueryOptions) -> Result<(), Box<dyn std::error::Error>> {
    let QueryOptions {
        statements,
        partitions,
    } = options;
    let mut config = AppConfig::load()?;
    if let Some(partitions) = partitions {
        if partitions == 0 {
            return Err(CommonError::invalid("the number of partitions must be positive").into());
        }
        config.execution.partitions = partitions;
    }
    if statements.is_empty() {
        return Err(CommonError::missing("no SQL statements to run").into());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async { init_telemetry(&config.telemetry) })?;

    info!(
        "running {} statements in {} partitions",
        statements.len(),
        config.execution.partitions
    );
    let client = Arc::new(FlightSqlClient::new(FlightSqlClientOptions::from(
        &config.client,
    )));
    let root = Span::root("fanout query", SpanContext::random());
    let resolver = EnvCredentialResolver;
    let result = runtime.block_on(
        async {
            let ctx = SessionContext::new();
            run_remote_query(&ctx, statements.as_slice(), &config, &resolver, client).await
        }
        .in_span(root),
    );

    let output: Result<_, Box<dyn std::error::Error>> = match result {
        Ok(batch) => pretty_format_batches(&[batch]).map_err(|e| e.into()),
        Err(e) => {
            error!("query failed: {e}");
            Err(e.into())
        }
    };
    shutdown_telemetry();
    println!("{}", output?);
    Ok(())
}

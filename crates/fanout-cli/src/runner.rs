use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::query::{read_statements, run_query, QueryOptions};

#[derive(Parser)]
#[command(version, name = "fanout")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Run SQL statements concurrently against the remote service and print the flattened results"
    )]
    Query {
        #[arg(help = "The SQL statements to run")]
        sql: Vec<String>,
        #[arg(
            long = "file",
            value_name = "PATH",
            help = "A file with one SQL statement per line"
        )]
        files: Vec<PathBuf>,
        #[arg(long, help = "The number of partitions to split the statements into")]
        partitions: Option<usize>,
    },
}

pub fn main(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_from(args);

    match cli.command {
        Command::Query {
            sql,
            files,
            partitions,
        } => {
            let statements = read_statements(sql, &files)?;
            run_query(QueryOptions {
                statements,
                partitions,
            })
        }
    }
}

//! Tabload - CNPJ extract loader

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tabload_common::logging::{init_logging, LogConfig, LogLevel};
use tabload_ingest::config::Config;
use tabload_ingest::connection::ConnectionDescriptor;
use tabload_ingest::loader::{BulkLoader, DumpMode, LoadRequest, DEFAULT_SCHEMA};
use tabload_ingest::orchestrator::{TableOrchestrator, CATALOG};
use tabload_ingest::parser::{ParserSettings, ResilientParser};
use tabload_ingest::store::{MemoryStore, PostgresStore, TableStore};
use tabload_ingest::tasks::LoadTasks;
use tabload_ingest::upstream::DirectoryPipeline;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "tabload")]
#[command(author, version, about = "Load CNPJ extracts into PostgreSQL")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Tables to process (case-insensitive). Defaults to every catalog table
    #[arg(short = 't', long = "table", value_name = "NAME", num_args = 1..)]
    tables: Option<Vec<String>>,

    /// Parse and report without writing to PostgreSQL
    #[arg(long, global = true)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load one source path into one table
    Load {
        /// CSV file or directory of CSV files
        path: PathBuf,

        /// Destination table id
        #[arg(long)]
        table_id: String,

        /// Destination table prefix
        #[arg(long, default_value = "")]
        dataset_id: String,

        /// append or replace
        #[arg(long, default_value = "append")]
        mode: DumpMode,

        /// Which exposed load operation to run
        #[arg(long, value_enum, default_value_t = Target::Generic)]
        target: Target,

        /// Destination schema (generic target only)
        #[arg(long, conflicts_with = "target")]
        schema: Option<String>,
    },

    /// Execute an SQL statement
    Query {
        sql: String,

        /// Schema the statement concerns, used for logging
        #[arg(long, default_value = DEFAULT_SCHEMA)]
        schema: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    Generic,
    Dev,
    Prod,
}

/// Logging settings from the verbose flag, overridden by the environment
///
/// `.env` is read first so `LOG_*` entries there apply to logging too.
fn log_config(verbose: bool) -> Result<LogConfig> {
    dotenvy::dotenv().ok();

    let log_level = if verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    Ok(LogConfig::builder()
        .level(log_level)
        .log_file_prefix("tabload")
        .build()
        .overlay_env()?)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_config = log_config(cli.verbose)?;
    let _guard = init_logging(&log_config)?;

    let config = Config::load()?;
    let parser = ResilientParser::new(ParserSettings::from_config(&config.parser)?);

    let store: Arc<dyn TableStore> = if cli.dry_run {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(PostgresStore::new(ConnectionDescriptor::resolve(&config.database)))
    };
    info!("Destination: {}", store.describe());

    let tasks = LoadTasks::new(BulkLoader::new(store, parser), config.retry_policy());

    let success = match cli.command {
        None => {
            info!("Catalog: {}", CATALOG.join(", "));
            let upstream = Arc::new(DirectoryPipeline::new(&config.upstream.extract_root));
            let orchestrator = TableOrchestrator::new(upstream, tasks);

            match orchestrator.run(cli.tables.as_deref()).await {
                Ok(summary) => summary.is_success(),
                Err(e) => {
                    error!("{}", e);
                    false
                },
            }
        },
        Some(Command::Load {
            path,
            table_id,
            dataset_id,
            mode,
            target,
            schema,
        }) => {
            let result = match target {
                Target::Generic => {
                    let request = LoadRequest::new(path, table_id)
                        .dataset_id(dataset_id)
                        .dump_mode(mode)
                        .schema(schema.unwrap_or_else(|| DEFAULT_SCHEMA.to_string()));
                    tasks.load_data(&request).await
                },
                Target::Dev => tasks.create_table_dev(path, &dataset_id, &table_id, mode).await,
                Target::Prod => tasks.create_table_prod(path, &dataset_id, &table_id, mode).await,
            };

            match result {
                Ok(result) => {
                    info!(outcome = ?result.outcome, "Load of {} finished", result.table_name);
                    result.success()
                },
                Err(e) => {
                    error!("Load failed: {}", e);
                    false
                },
            }
        },
        Some(Command::Query { sql, schema }) => tasks.execute_query(&sql, &schema).await,
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

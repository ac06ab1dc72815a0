//! Tabload Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Resilient bulk loading of delimited extracts into PostgreSQL.
//!
//! # Components
//!
//! - [`connection`]: connection descriptor and URI resolution
//! - [`discovery`]: escalating source file search
//! - [`parser`]: encoding-fallback CSV parsing with per-file skip
//! - [`schema`]: non-fatal schema provisioning
//! - [`loader`]: chunked replace/append writes through a [`store::TableStore`]
//! - [`retry`]: bounded fixed-delay retry
//! - [`tasks`]: the exposed load operations
//! - [`orchestrator`]: catalog-wide runs with per-table outcomes
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tabload_ingest::config::Config;
//! use tabload_ingest::connection::ConnectionDescriptor;
//! use tabload_ingest::loader::{BulkLoader, DumpMode, LoadRequest};
//! use tabload_ingest::parser::{ParserSettings, ResilientParser};
//! use tabload_ingest::store::PostgresStore;
//! use tabload_ingest::tasks::LoadTasks;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let store = PostgresStore::new(ConnectionDescriptor::resolve(&config.database));
//!     let parser = ResilientParser::new(ParserSettings::from_config(&config.parser)?);
//!     let tasks = LoadTasks::new(BulkLoader::new(Arc::new(store), parser), config.retry_policy());
//!
//!     let request = LoadRequest::new("./data/empresas", "empresas")
//!         .dataset_id("br_me_cnpj")
//!         .dump_mode(DumpMode::Replace);
//!     let result = tasks.load_data(&request).await?;
//!     println!("{} rows", result.rows_loaded().unwrap_or(0));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod loader;
pub mod orchestrator;
pub mod parser;
pub mod retry;
pub mod schema;
pub mod store;
pub mod table;
pub mod tasks;
pub mod upstream;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::{LoadError, OrchestratorError};
pub use loader::{BulkLoader, DumpMode, LoadOutcome, LoadRequest, LoadResult};
pub use orchestrator::{RunSummary, TableOrchestrator};

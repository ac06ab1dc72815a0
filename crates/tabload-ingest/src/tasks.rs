//! Exposed load operations
//!
//! These are the entry points a scheduler or the CLI calls. The three load
//! operations run the [`BulkLoader`] under the injected [`RetryPolicy`];
//! [`LoadTasks::execute_query`] runs once.

use std::path::PathBuf;
use tracing::{error, info};

use crate::error::LoadError;
use crate::loader::{BulkLoader, DumpMode, LoadRequest, LoadResult};
use crate::retry::{run_with_retry, RetryPolicy};

/// Schema targeted by [`LoadTasks::create_table_dev`]
pub const DEV_SCHEMA: &str = "dev";

/// Schema targeted by [`LoadTasks::create_table_prod`]
pub const PROD_SCHEMA: &str = "public";

#[derive(Clone)]
pub struct LoadTasks {
    loader: BulkLoader,
    retry: RetryPolicy,
}

impl LoadTasks {
    pub fn new(loader: BulkLoader, retry: RetryPolicy) -> Self {
        Self { loader, retry }
    }

    pub fn loader(&self) -> &BulkLoader {
        &self.loader
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Generic load, retried on store failures
    pub async fn load_data(&self, request: &LoadRequest) -> Result<LoadResult, LoadError> {
        let label = format!("Load of {}", request.target());
        run_with_retry(&self.retry, &label, || self.loader.load(request)).await
    }

    /// Load into the `dev` schema
    pub async fn create_table_dev(
        &self,
        source_path: impl Into<PathBuf>,
        dataset_id: &str,
        table_id: &str,
        dump_mode: DumpMode,
    ) -> Result<LoadResult, LoadError> {
        let request = LoadRequest::new(source_path, table_id)
            .dataset_id(dataset_id)
            .dump_mode(dump_mode)
            .schema(DEV_SCHEMA);
        self.load_data(&request).await
    }

    /// Load into the production (`public`) schema
    pub async fn create_table_prod(
        &self,
        source_path: impl Into<PathBuf>,
        dataset_id: &str,
        table_id: &str,
        dump_mode: DumpMode,
    ) -> Result<LoadResult, LoadError> {
        let request = LoadRequest::new(source_path, table_id)
            .dataset_id(dataset_id)
            .dump_mode(dump_mode)
            .schema(PROD_SCHEMA);
        self.load_data(&request).await
    }

    /// Run ad-hoc SQL once; `schema` only labels the log lines
    pub async fn execute_query(&self, sql: &str, schema: &str) -> bool {
        let mut session = match self.loader.store().open().await {
            Ok(session) => session,
            Err(e) => {
                error!(schema, "Error executing query: {}", e);
                return false;
            },
        };

        if let Err(e) = session.execute(sql).await {
            error!(schema, "Error executing query: {}", e);
            return false;
        }
        if let Err(e) = session.close().await {
            error!(schema, "Error closing connection after query: {}", e);
        }

        info!(schema, "Query executed successfully");
        true
    }
}

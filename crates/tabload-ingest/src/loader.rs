//! Bulk loader
//!
//! One call to [`BulkLoader::load`] is one load attempt: discover the source
//! files, parse them, open a fresh store session, make sure the schema exists
//! and write the concatenated table in fixed-size batches.
//!
//! A request with no source files, or whose files were all skipped, completes
//! with a failed [`LoadOutcome`] and never touches the store. Only store
//! failures are returned as `Err`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tabload_common::TabloadError;
use tracing::{error, info, warn};

use crate::discovery::discover_source_files;
use crate::error::LoadError;
use crate::parser::{ParseReport, ResilientParser};
use crate::schema::ensure_schema;
use crate::store::{TableStore, TableTarget};

/// Rows per insert batch
pub const LOAD_CHUNK_SIZE: usize = 5000;

pub const DEFAULT_SCHEMA: &str = "public";

/// What happens to rows already in the destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpMode {
    /// Keep existing rows, create the table when absent
    Append,
    /// Drop and recreate the table
    Replace,
}

impl fmt::Display for DumpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpMode::Append => f.write_str("append"),
            DumpMode::Replace => f.write_str("replace"),
        }
    }
}

impl FromStr for DumpMode {
    type Err = TabloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "append" => Ok(DumpMode::Append),
            "replace" => Ok(DumpMode::Replace),
            other => Err(TabloadError::validation(format!(
                "Invalid dump mode '{}'. Use append or replace",
                other
            ))),
        }
    }
}

/// Input of one load attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub source_path: PathBuf,
    /// Prefix of the destination table, may be empty
    pub dataset_id: String,
    pub table_id: String,
    pub dump_mode: DumpMode,
    pub schema: String,
}

impl LoadRequest {
    /// Request with no dataset prefix, append mode and the `public` schema
    pub fn new(source_path: impl Into<PathBuf>, table_id: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            dataset_id: String::new(),
            table_id: table_id.into(),
            dump_mode: DumpMode::Append,
            schema: DEFAULT_SCHEMA.to_string(),
        }
    }

    pub fn dataset_id(mut self, dataset_id: impl Into<String>) -> Self {
        self.dataset_id = dataset_id.into();
        self
    }

    pub fn dump_mode(mut self, dump_mode: DumpMode) -> Self {
        self.dump_mode = dump_mode;
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// `<dataset_id>_<table_id>`, or `<table_id>` without a dataset
    pub fn destination_table(&self) -> String {
        if self.dataset_id.is_empty() {
            self.table_id.clone()
        } else {
            format!("{}_{}", self.dataset_id, self.table_id)
        }
    }

    pub fn target(&self) -> TableTarget {
        TableTarget::new(self.schema.clone(), self.destination_table())
    }
}

/// How a load attempt ended when it did not error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded {
        rows: u64,
        files_parsed: usize,
        files_skipped: usize,
    },
    /// No discovery pattern matched
    NoSourceFiles,
    /// Files were found but none parsed
    NoParsableFiles { skipped: usize },
}

/// Result of one load attempt; immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    pub table_name: String,
    pub outcome: LoadOutcome,
}

impl LoadResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, LoadOutcome::Loaded { .. })
    }

    /// Rows written, only for a successful load
    pub fn rows_loaded(&self) -> Option<u64> {
        match self.outcome {
            LoadOutcome::Loaded { rows, .. } => Some(rows),
            _ => None,
        }
    }
}

/// Discovers, parses and writes source extracts into a [`TableStore`]
///
/// Rows are always written in batches of [`LOAD_CHUNK_SIZE`]:
///
/// ```compile_fail
/// use std::sync::Arc;
/// use tabload_ingest::loader::BulkLoader;
/// use tabload_ingest::parser::ResilientParser;
/// use tabload_ingest::store::MemoryStore;
///
/// let loader = BulkLoader::new(Arc::new(MemoryStore::new()), ResilientParser::default())
///     .with_chunk_size(3);
/// ```
#[derive(Clone)]
pub struct BulkLoader {
    store: Arc<dyn TableStore>,
    parser: ResilientParser,
    chunk_size: usize,
}

impl BulkLoader {
    pub fn new(store: Arc<dyn TableStore>, parser: ResilientParser) -> Self {
        Self {
            store,
            parser,
            chunk_size: LOAD_CHUNK_SIZE,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    /// Run one load attempt
    pub async fn load(&self, request: &LoadRequest) -> Result<LoadResult, LoadError> {
        let target = request.target();
        info!(
            mode = %request.dump_mode,
            "Loading data from {} to {}",
            request.source_path.display(),
            target
        );

        let report = self.read_sources(&request.source_path).await?;
        let report = match report {
            Some(report) => report,
            None => {
                error!("No CSV files found for {}", target);
                return Ok(LoadResult {
                    table_name: target.to_string(),
                    outcome: LoadOutcome::NoSourceFiles,
                });
            },
        };

        if report.is_empty() {
            error!("No data could be loaded from any CSV file for {}", target);
            return Ok(LoadResult {
                table_name: target.to_string(),
                outcome: LoadOutcome::NoParsableFiles {
                    skipped: report.skipped_count(),
                },
            });
        }

        let files_parsed = report.parsed.len();
        let files_skipped = report.skipped_count();
        if files_skipped > 0 {
            warn!("Skipped {} of {} files", files_skipped, files_parsed + files_skipped);
        }

        let table = report.into_table();
        info!("Total rows to load: {}", table.row_count());

        let mut session = self.store.open().await?;
        ensure_schema(session.as_mut(), &request.schema).await;
        let stats = session
            .write_table(&target, &table, request.dump_mode, self.chunk_size)
            .await?;
        session.close().await?;

        info!("Successfully loaded {} rows to {}", stats.rows, target);

        Ok(LoadResult {
            table_name: target.to_string(),
            outcome: LoadOutcome::Loaded {
                rows: stats.rows,
                files_parsed,
                files_skipped,
            },
        })
    }

    /// Discover and parse off the async runtime; `None` when nothing matched
    async fn read_sources(&self, source_path: &Path) -> Result<Option<ParseReport>, LoadError> {
        let parser = self.parser;
        let source_path = source_path.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let discovery = discover_source_files(&source_path);
            if discovery.is_empty() {
                return None;
            }
            Some(parser.parse_all(&discovery.files))
        })
        .await
        .map_err(|e| LoadError::store(format!("source reader task failed: {}", e)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::parser::ParserSettings;
    use crate::store::MemoryStore;
    use crate::test_helpers::CapturedLogs;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, bytes: &[u8]) {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    fn loader(store: &MemoryStore) -> BulkLoader {
        BulkLoader::new(Arc::new(store.clone()), ResilientParser::default())
    }

    #[test]
    fn test_destination_table_name() {
        let request = LoadRequest::new("/data", "empresas");
        assert_eq!(request.destination_table(), "empresas");
        assert_eq!(request.clone().dataset_id("br_me_cnpj").destination_table(), "br_me_cnpj_empresas");
        assert_eq!(request.target().to_string(), "public.empresas");
    }

    #[test]
    fn test_dump_mode_parsing() {
        assert_eq!("Replace".parse::<DumpMode>().unwrap(), DumpMode::Replace);
        assert_eq!(" append ".parse::<DumpMode>().unwrap(), DumpMode::Append);
        assert!("upsert".parse::<DumpMode>().is_err());
        assert_eq!(DumpMode::Replace.to_string(), "replace");
    }

    #[tokio::test]
    async fn test_rows_loaded_is_sum_of_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.csv", b"id,nome\n1,A\n2,B\n");
        write(dir.path(), "b.csv", b"id,nome\n3,C\n");
        let store = MemoryStore::new();

        let result = loader(&store)
            .load(&LoadRequest::new(dir.path(), "t").dump_mode(DumpMode::Replace))
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.rows_loaded(), Some(3));
        assert_eq!(result.table_name, "public.t");
        assert_eq!(store.row_count("public", "t"), Some(3));
    }

    #[tokio::test]
    async fn test_replace_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.csv", b"id\n1\n2\n3\n");
        let store = MemoryStore::new();
        let request = LoadRequest::new(dir.path(), "t").dump_mode(DumpMode::Replace);

        loader(&store).load(&request).await.unwrap();
        loader(&store).load(&request).await.unwrap();

        assert_eq!(store.row_count("public", "t"), Some(3));
    }

    #[tokio::test]
    async fn test_append_accumulates() {
        let first = TempDir::new().unwrap();
        write(first.path(), "a.csv", b"id\n1\n2\n");
        let second = TempDir::new().unwrap();
        write(second.path(), "a.csv", b"id\n3\n4\n5\n");
        let store = MemoryStore::new();

        loader(&store).load(&LoadRequest::new(first.path(), "t")).await.unwrap();
        loader(&store).load(&LoadRequest::new(second.path(), "t")).await.unwrap();

        assert_eq!(store.row_count("public", "t"), Some(5));
    }

    #[tokio::test]
    async fn test_undecodable_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "1.csv", b"id\n1\n2\n");
        write(dir.path(), "2.csv", b"id\n\xff\n");
        write(dir.path(), "3.csv", b"id\n3\n");
        let store = MemoryStore::new();
        let parser = ResilientParser::new(ParserSettings {
            primary: encoding_rs::UTF_8.into(),
            fallback: encoding_rs::SHIFT_JIS.into(),
            delimiter: b',',
        });
        let (logs, _guard) = CapturedLogs::install();

        let result = BulkLoader::new(Arc::new(store.clone()), parser)
            .load(&LoadRequest::new(dir.path(), "t"))
            .await
            .unwrap();

        assert_eq!(
            result.outcome,
            LoadOutcome::Loaded {
                rows: 3,
                files_parsed: 2,
                files_skipped: 1
            }
        );
        assert!(logs
            .at_level("WARN")
            .iter()
            .any(|line| line.contains("Skipped 1 of 3 files")));
        assert!(logs.at_level("ERROR").is_empty());
    }

    #[tokio::test]
    async fn test_no_source_files_never_opens_store() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "readme.txt", b"nothing here");
        let store = MemoryStore::new();

        let result = loader(&store).load(&LoadRequest::new(dir.path(), "t")).await.unwrap();

        assert_eq!(result.outcome, LoadOutcome::NoSourceFiles);
        assert!(!result.success());
        assert_eq!(result.rows_loaded(), None);
        assert_eq!(store.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn test_all_files_skipped_never_opens_store() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.csv", b"");
        write(dir.path(), "b.csv", b"x,y\n1,2,3\n");
        let store = MemoryStore::new();

        let result = loader(&store).load(&LoadRequest::new(dir.path(), "t")).await.unwrap();

        assert_eq!(result.outcome, LoadOutcome::NoParsableFiles { skipped: 2 });
        assert_eq!(store.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn test_schema_creation_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.csv", b"id\n1\n");
        let store = MemoryStore::new().with_schema("dev").deny_schema_creation();

        let result = loader(&store)
            .load(&LoadRequest::new(dir.path(), "t").schema("dev"))
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(store.row_count("dev", "t"), Some(1));
    }

    #[tokio::test]
    async fn test_store_failure_is_an_error_and_releases_session() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.csv", b"id\n1\n");
        let store = MemoryStore::new().deny_schema_creation();

        let result = loader(&store)
            .load(&LoadRequest::new(dir.path(), "t").schema("missing"))
            .await;

        assert!(result.is_err());
        assert_eq!(store.sessions_opened(), 1);
        assert_eq!(store.sessions_open(), 0);
    }

    #[tokio::test]
    async fn test_writes_in_fixed_batches() {
        let dir = TempDir::new().unwrap();
        let body: String = std::iter::once("id\n".to_string())
            .chain((0..7).map(|i| format!("{}\n", i)))
            .collect();
        write(dir.path(), "a.csv", body.as_bytes());
        let store = MemoryStore::new();

        loader(&store)
            .with_chunk_size(3)
            .load(&LoadRequest::new(dir.path(), "t"))
            .await
            .unwrap();

        assert_eq!(store.batch_sizes(), vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn test_default_batches_are_load_chunk_size() {
        let dir = TempDir::new().unwrap();
        let body: String = std::iter::once("id\n".to_string())
            .chain((0..=LOAD_CHUNK_SIZE).map(|i| format!("{}\n", i)))
            .collect();
        write(dir.path(), "a.csv", body.as_bytes());
        let store = MemoryStore::new();

        loader(&store).load(&LoadRequest::new(dir.path(), "t")).await.unwrap();

        assert_eq!(store.batch_sizes(), vec![LOAD_CHUNK_SIZE, 1]);
    }

    #[tokio::test]
    async fn test_partitioned_layout_with_heterogeneous_columns() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "data=2024-05-12/sigla_uf=SP/part-0.csv", b"cnpj,uf\n0001,SP\n");
        write(dir.path(), "data=2024-05-12/sigla_uf=RJ/part-0.csv", b"cnpj,municipio\n0002,Rio\n");
        let store = MemoryStore::new();

        let result = loader(&store)
            .load(&LoadRequest::new(dir.path(), "estabelecimentos").dataset_id("br_me_cnpj"))
            .await
            .unwrap();

        assert_eq!(result.rows_loaded(), Some(2));
        let stored = store.table("public", "br_me_cnpj_estabelecimentos").unwrap();
        assert_eq!(stored.columns, vec!["cnpj", "municipio", "uf"]);
        assert_eq!(stored.rows[0], vec![Some("0002".to_string()), Some("Rio".to_string()), None]);
    }
}

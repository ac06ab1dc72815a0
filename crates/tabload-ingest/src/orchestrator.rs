//! Table orchestrator
//!
//! Runs the loader over the catalog tables of the CNPJ dataset:
//!
//! 1. fetch the freshness signal from the upstream pipeline;
//! 2. validate the requested table names, aborting on the first unknown one;
//! 3. for each table in order, resolve its source directory, check that it
//!    holds CSV files and load it with `replace` semantics.
//!
//! A table that fails is recorded and the run moves on to the next one.

use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::discovery::DiscoveryPattern;
use crate::error::OrchestratorError;
use crate::loader::{DumpMode, LoadRequest};
use crate::retry::run_with_retry;
use crate::tasks::{LoadTasks, PROD_SCHEMA};
use crate::upstream::{FreshnessSignal, UpstreamPipeline};

/// Tables the orchestrator knows how to load, in default processing order
pub const CATALOG: [&str; 4] = ["Empresas", "Socios", "Estabelecimentos", "Simples"];

/// Destination table prefix
pub const DATASET_ID: &str = "br_me_cnpj";

const SEPARATOR: &str = "============================================================";

/// First character upper case, the rest lower case
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Resolve requested names against [`CATALOG`]
///
/// `None` selects the whole catalog. Any unknown name fails the whole request.
pub fn validate_tables(requested: Option<&[String]>) -> Result<Vec<String>, OrchestratorError> {
    let Some(requested) = requested else {
        return Ok(CATALOG.iter().map(|t| t.to_string()).collect());
    };

    requested
        .iter()
        .map(|name| {
            let candidate = capitalize(name.trim());
            if CATALOG.contains(&candidate.as_str()) {
                Ok(candidate)
            } else {
                Err(OrchestratorError::UnknownTable {
                    requested: name.clone(),
                    available: CATALOG.join(", "),
                })
            }
        })
        .collect()
}

/// Per-table results of one run, in processing order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub successful_tables: Vec<String>,
    pub failed_tables: Vec<String>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed_tables.is_empty()
    }

    pub fn log(&self) {
        info!("{}", SEPARATOR);
        info!("RUN SUMMARY");
        info!("{}", SEPARATOR);
        info!("Tables loaded successfully: {}", self.successful_tables.len());
        for table in &self.successful_tables {
            info!("  ✓ {}", table);
        }

        if !self.failed_tables.is_empty() {
            warn!("Tables with errors: {}", self.failed_tables.len());
            for table in &self.failed_tables {
                warn!("  ✗ {}", table);
            }
        }
    }
}

pub struct TableOrchestrator {
    upstream: Arc<dyn UpstreamPipeline>,
    tasks: LoadTasks,
}

impl TableOrchestrator {
    pub fn new(upstream: Arc<dyn UpstreamPipeline>, tasks: LoadTasks) -> Self {
        Self { upstream, tasks }
    }

    /// Process `requested` tables, or the whole catalog
    pub async fn run(&self, requested: Option<&[String]>) -> Result<RunSummary, OrchestratorError> {
        info!("Fetching freshness signal from upstream");
        let signal = run_with_retry(self.tasks.retry_policy(), "Freshness check", || {
            self.upstream.max_available_dates()
        })
        .await
        .map_err(OrchestratorError::Freshness)?;
        info!("Newest extract folder: {}", signal.folder_date);
        info!("Last modified: {}", signal.last_modified_date);

        let tables = validate_tables(requested)?;

        let mut summary = RunSummary::default();
        for table in tables {
            if self.process_table(&table, &signal).await {
                summary.successful_tables.push(table);
            } else {
                summary.failed_tables.push(table);
            }
        }

        summary.log();
        Ok(summary)
    }

    async fn process_table(&self, table: &str, signal: &FreshnessSignal) -> bool {
        info!("{}", SEPARATOR);
        info!("Processing table: {}", table);
        info!("{}", SEPARATOR);

        let tables = [table.to_string()];
        let label = format!("Source extraction for {}", table);
        let source_dir = match run_with_retry(self.tasks.retry_policy(), &label, || {
            self.upstream.produce_source_directory(&tables, signal)
        })
        .await
        {
            Ok(dir) => dir,
            Err(e) => {
                error!("✗ Error processing table {}: {:#}", table, e);
                return false;
            },
        };
        info!("Source directory: {}", source_dir.display());

        if !has_source_files(&source_dir) {
            return false;
        }

        let table_id = table.to_lowercase();
        let request = LoadRequest::new(&source_dir, &table_id)
            .dataset_id(DATASET_ID)
            .dump_mode(DumpMode::Replace)
            .schema(PROD_SCHEMA);
        info!("Loading into PostgreSQL: {}", request.target());

        match self.tasks.load_data(&request).await {
            Ok(result) if result.success() => {
                info!("✓ Table {} loaded successfully", table_id);
                true
            },
            Ok(_) => {
                error!("✗ Error loading table {}", table_id);
                false
            },
            Err(e) => {
                error!("✗ Error loading table {}: {}", table_id, e);
                false
            },
        }
    }
}

/// Check for CSV files, listing the directory when there are none
fn has_source_files(dir: &Path) -> bool {
    let count = DiscoveryPattern::Recursive.search(dir).len();
    if count > 0 {
        info!("Found {} CSV file(s)", count);
        return true;
    }

    warn!("No CSV files found in {}", dir.display());
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            let names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            warn!("Directory contents: {:?}", names);
        },
        Err(e) => warn!("Could not list directory contents: {}", e),
    }
    false
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::loader::BulkLoader;
    use crate::parser::ResilientParser;
    use crate::retry::RetryPolicy;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FakeUpstream {
        root: PathBuf,
        fresh: bool,
        produced: Mutex<Vec<String>>,
    }

    impl FakeUpstream {
        fn new(root: &Path) -> Self {
            Self {
                root: root.to_path_buf(),
                fresh: true,
                produced: Mutex::new(Vec::new()),
            }
        }

        fn produced(&self) -> Vec<String> {
            self.produced.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UpstreamPipeline for FakeUpstream {
        async fn max_available_dates(&self) -> anyhow::Result<FreshnessSignal> {
            if !self.fresh {
                anyhow::bail!("upstream API unavailable");
            }
            Ok(FreshnessSignal {
                folder_date: "2024-05-12".to_string(),
                last_modified_date: NaiveDate::from_ymd_opt(2024, 5, 14).unwrap(),
            })
        }

        async fn produce_source_directory(
            &self,
            tables: &[String],
            _signal: &FreshnessSignal,
        ) -> anyhow::Result<PathBuf> {
            self.produced.lock().unwrap().extend(tables.iter().cloned());
            Ok(self.root.join(tables[0].to_lowercase()))
        }
    }

    fn orchestrator(upstream: Arc<FakeUpstream>, store: &MemoryStore) -> TableOrchestrator {
        let tasks = LoadTasks::new(
            BulkLoader::new(Arc::new(store.clone()), ResilientParser::default()),
            RetryPolicy::new(1, Duration::ZERO),
        );
        TableOrchestrator::new(upstream, tasks)
    }

    fn write(root: &Path, relative: &str, body: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("empresas"), "Empresas");
        assert_eq!(capitalize("ESTABELECIMENTOS"), "Estabelecimentos");
        assert_eq!(capitalize("sOCIOS"), "Socios");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_validate_tables() {
        assert_eq!(validate_tables(None).unwrap(), CATALOG.to_vec());

        let requested = vec!["simples".to_string(), "EMPRESAS".to_string()];
        assert_eq!(validate_tables(Some(&requested)).unwrap(), vec!["Simples", "Empresas"]);

        let requested = vec!["empresas".to_string(), "municipios".to_string()];
        let err = validate_tables(Some(&requested)).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownTable { ref requested, .. } if requested == "municipios"));
        assert!(err.to_string().contains("Empresas, Socios, Estabelecimentos, Simples"));
    }

    #[tokio::test]
    async fn test_unknown_table_aborts_before_any_load() {
        let root = TempDir::new().unwrap();
        write(root.path(), "empresas/a.csv", "cnpj\n1\n");
        let upstream = Arc::new(FakeUpstream::new(root.path()));
        let store = MemoryStore::new();

        let requested = vec!["empresas".to_string(), "bogus".to_string()];
        let result = orchestrator(upstream.clone(), &store).run(Some(&requested)).await;

        assert!(matches!(result, Err(OrchestratorError::UnknownTable { .. })));
        assert!(upstream.produced().is_empty());
        assert_eq!(store.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn test_one_failed_table_does_not_stop_the_run() {
        let root = TempDir::new().unwrap();
        write(root.path(), "empresas/a.csv", "cnpj_basico,razao_social\n00000001,ACME\n");
        fs::create_dir_all(root.path().join("socios")).unwrap();
        write(root.path(), "socios/readme.txt", "no extract");
        let upstream = Arc::new(FakeUpstream::new(root.path()));
        let store = MemoryStore::new();

        let requested = vec!["socios".to_string(), "empresas".to_string()];
        let summary = orchestrator(upstream.clone(), &store)
            .run(Some(&requested))
            .await
            .unwrap();

        assert!(!summary.is_success());
        assert_eq!(summary.failed_tables, vec!["Socios"]);
        assert_eq!(summary.successful_tables, vec!["Empresas"]);
        assert_eq!(upstream.produced(), vec!["Socios", "Empresas"]);

        let stored = store.table("public", "br_me_cnpj_empresas").unwrap();
        assert_eq!(stored.rows, vec![vec![Some("00000001".to_string()), Some("ACME".to_string())]]);
    }

    #[tokio::test]
    async fn test_default_runs_whole_catalog_in_order() {
        let root = TempDir::new().unwrap();
        for table in CATALOG {
            write(root.path(), &format!("{}/part.csv", table.to_lowercase()), "id\n1\n");
        }
        let upstream = Arc::new(FakeUpstream::new(root.path()));
        let store = MemoryStore::new();

        let summary = orchestrator(upstream.clone(), &store).run(None).await.unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.successful_tables, CATALOG.to_vec());
        assert_eq!(store.table_names().len(), 4);
    }

    #[tokio::test]
    async fn test_freshness_failure_aborts_run() {
        let root = TempDir::new().unwrap();
        let upstream = Arc::new(FakeUpstream {
            fresh: false,
            ..FakeUpstream::new(root.path())
        });
        let store = MemoryStore::new();

        let result = orchestrator(upstream.clone(), &store).run(None).await;

        assert!(matches!(result, Err(OrchestratorError::Freshness(_))));
        assert!(upstream.produced().is_empty());
    }
}

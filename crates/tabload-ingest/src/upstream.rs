//! Upstream extraction pipeline
//!
//! The pipeline that downloads and unpacks extracts lives outside this crate.
//! The orchestrator only needs two things from it: the freshness signal and,
//! per table, the directory holding that table's source files.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Dates describing the newest available extract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessSignal {
    /// Name of the newest extract folder, e.g. `2024-05-12`
    pub folder_date: String,
    pub last_modified_date: NaiveDate,
}

#[async_trait]
pub trait UpstreamPipeline: Send + Sync {
    /// Newest extract available upstream
    async fn max_available_dates(&self) -> Result<FreshnessSignal>;

    /// Make the extract for `tables` available locally and return its directory
    async fn produce_source_directory(
        &self,
        tables: &[String],
        signal: &FreshnessSignal,
    ) -> Result<PathBuf>;
}

/// Serves extracts already unpacked under `<root>/<folder_date>/<table>`
#[derive(Debug, Clone)]
pub struct DirectoryPipeline {
    root: PathBuf,
}

impl DirectoryPipeline {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn newest_extract(root: &Path) -> Result<FreshnessSignal> {
    let entries = std::fs::read_dir(root)
        .with_context(|| format!("Failed to read extract root {}", root.display()))?;

    let mut newest: Option<(String, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if newest.as_ref().is_none_or(|(current, _)| name > *current) {
            newest = Some((name, entry.path()));
        }
    }

    let Some((folder_date, path)) = newest else {
        bail!("No extract folders under {}", root.display());
    };

    let modified = std::fs::metadata(&path)
        .and_then(|m| m.modified())
        .with_context(|| format!("Failed to read modification time of {}", path.display()))?;

    Ok(FreshnessSignal {
        folder_date,
        last_modified_date: DateTime::<Utc>::from(modified).date_naive(),
    })
}

#[async_trait]
impl UpstreamPipeline for DirectoryPipeline {
    async fn max_available_dates(&self) -> Result<FreshnessSignal> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || newest_extract(&root))
            .await
            .context("Extract scan task failed")?
    }

    async fn produce_source_directory(
        &self,
        tables: &[String],
        signal: &FreshnessSignal,
    ) -> Result<PathBuf> {
        let extract = self.root.join(&signal.folder_date);
        let dir = match tables {
            [table] => extract.join(table.to_lowercase()),
            _ => extract,
        };

        if !dir.is_dir() {
            bail!("Source directory {} does not exist", dir.display());
        }

        debug!(dir = %dir.display(), "Resolved source directory");
        Ok(dir)
    }
}

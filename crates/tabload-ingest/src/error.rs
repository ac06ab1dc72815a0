//! Error types for loading and orchestration
//!
//! Only hard failures live here. A table with no source files or with every file
//! skipped is a [`LoadOutcome`](crate::loader::LoadOutcome), not an error, and is
//! therefore never retried.

use thiserror::Error;

/// Failures of a single load attempt
#[derive(Error, Debug)]
pub enum LoadError {
    /// Connection, DDL or insert failure reported by PostgreSQL
    #[error("Database error: {0}. Check POSTGRES_* connection settings and privileges.")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The concatenated table cannot be written (no columns, bad identifier)
    #[error("Invalid destination table '{table}': {reason}")]
    InvalidTable { table: String, reason: String },

    /// Store-level failure that is not a driver error
    #[error("Store error: {0}")]
    Store(String),

    #[error(transparent)]
    Common(#[from] tabload_common::TabloadError),
}

impl LoadError {
    pub fn invalid_table(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTable {
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}

/// Failures that abort a whole orchestrated run
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// A requested table is not part of the catalog
    #[error("Table '{requested}' not found. Available tables: {available}")]
    UnknownTable { requested: String, available: String },

    /// The freshness signal could not be obtained from the upstream pipeline
    #[error("Failed to fetch freshness signal: {0:#}")]
    Freshness(anyhow::Error),
}

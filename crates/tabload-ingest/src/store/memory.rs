//! In-memory destination
//!
//! Mirrors the PostgreSQL semantics the loader relies on (schemas must exist,
//! replace recreates, append creates-if-absent and rejects unknown columns,
//! writes are all-or-nothing). Backs `--dry-run` and the test suite.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{StoreSession, TableStore, TableTarget, WriteStats};
use crate::error::LoadError;
use crate::loader::DumpMode;
use crate::table::{Row, TextTable};

/// Table contents as stored
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredTable {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug)]
struct MemoryState {
    schemas: BTreeSet<String>,
    tables: BTreeMap<TableTarget, StoredTable>,
    executed: Vec<String>,
    batch_sizes: Vec<usize>,
    deny_schema_creation: bool,
    sessions_opened: usize,
    sessions_open: usize,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            schemas: BTreeSet::from(["public".to_string()]),
            tables: BTreeMap::new(),
            executed: Vec::new(),
            batch_sizes: Vec::new(),
            deny_schema_creation: false,
            sessions_opened: 0,
            sessions_open: 0,
        }
    }
}

/// Shared, cloneable in-memory store; clones see the same tables
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Store with only the `public` schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `CREATE SCHEMA` fail as it does for a role without the privilege
    pub fn deny_schema_creation(self) -> Self {
        self.lock().deny_schema_creation = true;
        self
    }

    /// Pre-provision a schema
    pub fn with_schema(self, schema: &str) -> Self {
        self.lock().schemas.insert(schema.to_string());
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        self.lock().schemas.contains(schema)
    }

    pub fn table(&self, schema: &str, table: &str) -> Option<StoredTable> {
        self.lock().tables.get(&TableTarget::new(schema, table)).cloned()
    }

    pub fn row_count(&self, schema: &str, table: &str) -> Option<usize> {
        self.table(schema, table).map(|t| t.rows.len())
    }

    pub fn table_names(&self) -> Vec<TableTarget> {
        self.lock().tables.keys().cloned().collect()
    }

    /// Statements passed to [`StoreSession::execute`]
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    /// Row count of every batch written, in order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().batch_sizes.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.lock().sessions_opened
    }

    /// Sessions not yet closed or dropped
    pub fn sessions_open(&self) -> usize {
        self.lock().sessions_open
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn open(&self) -> Result<Box<dyn StoreSession>, LoadError> {
        {
            let mut state = self.lock();
            state.sessions_opened += 1;
            state.sessions_open += 1;
        }
        Ok(Box::new(MemorySession {
            store: self.clone(),
        }))
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}

struct MemorySession {
    store: MemoryStore,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let mut state = self.store.lock();
        state.sessions_open = state.sessions_open.saturating_sub(1);
    }
}

/// Build the rows to append, aligned to the existing column order
fn align_to_existing(
    target: &TableTarget,
    existing: &[String],
    table: &TextTable,
) -> Result<Vec<Row>, LoadError> {
    let mapping = table
        .columns()
        .iter()
        .map(|column| {
            existing.iter().position(|c| c == column).ok_or_else(|| {
                LoadError::store(format!(
                    "column \"{}\" of relation \"{}\" does not exist",
                    column, target.table
                ))
            })
        })
        .collect::<Result<Vec<usize>, LoadError>>()?;

    Ok(table
        .rows()
        .iter()
        .map(|row| {
            let mut aligned = vec![None; existing.len()];
            for (value, &position) in row.iter().zip(&mapping) {
                aligned[position] = value.clone();
            }
            aligned
        })
        .collect())
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn create_schema(&mut self, schema: &str) -> Result<(), LoadError> {
        let mut state = self.store.lock();
        if state.schemas.contains(schema) {
            return Ok(());
        }
        if state.deny_schema_creation {
            return Err(LoadError::store("permission denied for database"));
        }
        state.schemas.insert(schema.to_string());
        Ok(())
    }

    async fn write_table(
        &mut self,
        target: &TableTarget,
        table: &TextTable,
        mode: DumpMode,
        chunk_size: usize,
    ) -> Result<WriteStats, LoadError> {
        if table.columns().is_empty() {
            return Err(LoadError::invalid_table(target.to_string(), "no columns"));
        }

        let mut state = self.store.lock();
        if !state.schemas.contains(&target.schema) {
            return Err(LoadError::store(format!(
                "schema \"{}\" does not exist",
                target.schema
            )));
        }

        let mut stored = match (mode, state.tables.get(target)) {
            (DumpMode::Append, Some(existing)) => existing.clone(),
            _ => StoredTable {
                columns: table.columns().to_vec(),
                rows: Vec::new(),
            },
        };

        let incoming = align_to_existing(target, &stored.columns, table)?;

        let chunk_size = chunk_size.max(1);
        let mut stats = WriteStats::default();
        let mut batch_sizes = Vec::new();
        for chunk in incoming.chunks(chunk_size) {
            stored.rows.extend_from_slice(chunk);
            batch_sizes.push(chunk.len());
            stats.rows += chunk.len() as u64;
            stats.batches += 1;
        }

        // Commit
        state.tables.insert(target.clone(), stored);
        state.batch_sizes.extend(batch_sizes);
        Ok(stats)
    }

    async fn execute(&mut self, sql: &str) -> Result<(), LoadError> {
        if sql.trim().is_empty() {
            return Err(LoadError::store("empty statement"));
        }
        self.store.lock().executed.push(sql.to_string());
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), LoadError> {
        Ok(())
    }
}

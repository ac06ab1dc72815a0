//! Destination store abstraction
//!
//! A [`TableStore`] hands out one [`StoreSession`] per load attempt. The session
//! owns its connection; dropping it releases the connection on every exit path,
//! and [`StoreSession::close`] releases it gracefully after a success.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::fmt;

use crate::error::LoadError;
use crate::loader::DumpMode;
use crate::table::TextTable;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Destination table, schema qualified
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableTarget {
    pub schema: String,
    pub table: String,
}

impl TableTarget {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// `"schema"."table"` with identifiers quoted
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

impl fmt::Display for TableTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Quote an SQL identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// What a table write did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub rows: u64,
    /// Number of fixed-size row batches sent
    pub batches: usize,
}

/// Factory for per-attempt sessions
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Acquire a fresh connection
    async fn open(&self) -> Result<Box<dyn StoreSession>, LoadError>;

    /// Human-readable destination, safe to log
    fn describe(&self) -> String;
}

/// One connection to the destination
#[async_trait]
pub trait StoreSession: Send {
    /// `CREATE SCHEMA IF NOT EXISTS`
    async fn create_schema(&mut self, schema: &str) -> Result<(), LoadError>;

    /// Write `table` to `target` in batches of `chunk_size` rows, atomically
    ///
    /// [`DumpMode::Replace`] drops and recreates the table, [`DumpMode::Append`]
    /// creates it only when absent. All columns are `TEXT`.
    async fn write_table(
        &mut self,
        target: &TableTarget,
        table: &TextTable,
        mode: DumpMode,
        chunk_size: usize,
    ) -> Result<WriteStats, LoadError>;

    /// Run arbitrary SQL
    async fn execute(&mut self, sql: &str) -> Result<(), LoadError>;

    /// Release the connection gracefully
    async fn close(self: Box<Self>) -> Result<(), LoadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("empresas"), "\"empresas\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_qualified_target() {
        let target = TableTarget::new("public", "br_me_cnpj_empresas");
        assert_eq!(target.qualified(), "\"public\".\"br_me_cnpj_empresas\"");
        assert_eq!(target.to_string(), "public.br_me_cnpj_empresas");
    }
}

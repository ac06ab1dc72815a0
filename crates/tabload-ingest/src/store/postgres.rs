//! PostgreSQL destination
//!
//! One `PgConnection` per session, no pool: attempts are sequential and each
//! attempt must start from a clean connection.

use async_trait::async_trait;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tracing::{debug, info};

use super::{quote_ident, StoreSession, TableStore, TableTarget, WriteStats};
use crate::connection::ConnectionDescriptor;
use crate::error::LoadError;
use crate::loader::DumpMode;
use crate::table::TextTable;

/// PostgreSQL caps a statement at 65535 bind parameters
pub const PG_MAX_BIND_PARAMS: usize = 65_535;

pub struct PostgresStore {
    descriptor: ConnectionDescriptor,
}

impl PostgresStore {
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl TableStore for PostgresStore {
    async fn open(&self) -> Result<Box<dyn StoreSession>, LoadError> {
        debug!(connection = %self.descriptor, "Connecting to PostgreSQL");

        let options = self.descriptor.connect_options();
        let connect = PgConnection::connect_with(&options);
        let conn = tokio::time::timeout(self.descriptor.connect_timeout, connect)
            .await
            .map_err(|_| {
                LoadError::store(format!(
                    "timed out after {:?} connecting to {}",
                    self.descriptor.connect_timeout, self.descriptor
                ))
            })??;

        Ok(Box::new(PostgresSession { conn }))
    }

    fn describe(&self) -> String {
        self.descriptor.redacted()
    }
}

pub struct PostgresSession {
    conn: PgConnection,
}

/// Rows per INSERT so that `columns * rows` stays under the bind limit
fn rows_per_statement(columns: usize, chunk_size: usize) -> usize {
    (PG_MAX_BIND_PARAMS / columns.max(1)).clamp(1, chunk_size.max(1))
}

#[async_trait]
impl StoreSession for PostgresSession {
    async fn create_schema(&mut self, schema: &str) -> Result<(), LoadError> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema));
        sqlx::query(&sql).execute(&mut self.conn).await?;
        Ok(())
    }

    async fn write_table(
        &mut self,
        target: &TableTarget,
        table: &TextTable,
        mode: DumpMode,
        chunk_size: usize,
    ) -> Result<WriteStats, LoadError> {
        let columns = table.columns();
        if columns.is_empty() {
            return Err(LoadError::invalid_table(target.to_string(), "no columns"));
        }

        let qualified = target.qualified();
        let column_defs = columns
            .iter()
            .map(|c| format!("{} TEXT", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let column_list = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");

        let mut tx = self.conn.begin().await?;

        match mode {
            DumpMode::Replace => {
                let drop_sql = format!("DROP TABLE IF EXISTS {}", qualified);
                sqlx::query(&drop_sql).execute(&mut *tx).await?;
                let create = format!("CREATE TABLE {} ({})", qualified, column_defs);
                sqlx::query(&create).execute(&mut *tx).await?;
            },
            DumpMode::Append => {
                let create = format!("CREATE TABLE IF NOT EXISTS {} ({})", qualified, column_defs);
                sqlx::query(&create).execute(&mut *tx).await?;
            },
        }

        let chunk_size = chunk_size.max(1);
        let per_statement = rows_per_statement(columns.len(), chunk_size);
        let total_chunks = table.row_count().div_ceil(chunk_size);
        let mut stats = WriteStats::default();

        for (chunk_idx, chunk) in table.rows().chunks(chunk_size).enumerate() {
            debug!(
                "Inserting chunk {} / {} ({} rows) into {}",
                chunk_idx + 1,
                total_chunks,
                chunk.len(),
                target
            );

            for rows in chunk.chunks(per_statement) {
                let mut query_builder: QueryBuilder<Postgres> =
                    QueryBuilder::new(format!("INSERT INTO {} ({}) ", qualified, column_list));

                query_builder.push_values(rows, |mut b, row| {
                    for cell in row {
                        b.push_bind(cell.as_deref());
                    }
                });

                query_builder.build().execute(&mut *tx).await?;
            }

            stats.rows += chunk.len() as u64;
            stats.batches += 1;
        }

        tx.commit().await?;

        info!(rows = stats.rows, batches = stats.batches, "Wrote {}", target);
        Ok(stats)
    }

    async fn execute(&mut self, sql: &str) -> Result<(), LoadError> {
        sqlx::query(sql).execute(&mut self.conn).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), LoadError> {
        self.conn.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    fn unreachable_store() -> PostgresStore {
        let config = DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            user: "loader".to_string(),
            password: "hunter2".to_string(),
            name: "warehouse".to_string(),
            connect_timeout_secs: 2,
        };
        PostgresStore::new(ConnectionDescriptor::resolve(&config))
    }

    #[tokio::test]
    async fn test_open_unreachable_database_fails() {
        let store = unreachable_store();

        let err = match store.open().await {
            Ok(_) => panic!("nothing listens on port 1"),
            Err(e) => e,
        };
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn test_describe_hides_password() {
        let store = unreachable_store();
        let description = store.describe();
        assert!(description.contains("127.0.0.1:1"));
        assert!(description.contains("***"));
        assert!(!description.contains("hunter2"));
    }

    #[test]
    fn test_rows_per_statement_respects_bind_limit() {
        assert_eq!(rows_per_statement(1, 5000), 5000);
        assert_eq!(rows_per_statement(30, 5000), 2184);
        assert!(rows_per_statement(30, 5000) * 30 <= PG_MAX_BIND_PARAMS);
        assert_eq!(rows_per_statement(100_000, 5000), 1);
        assert_eq!(rows_per_statement(0, 0), 1);
    }
}

//! Common test utilities for tabload integration tests
//!
//! Fixture writers for extract directories plus a PostgreSQL container
//! wrapper built on testcontainers.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestPostgres;
//!
//! #[tokio::test]
//! async fn test_with_postgres() {
//!     let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
//!     sqlx::query("SELECT 1").execute(pg.pool()).await.expect("Query failed");
//! }
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tabload_ingest::config::DatabaseConfig;
use tabload_ingest::connection::ConnectionDescriptor;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

/// Extract folder used by the fixtures
pub const FOLDER_DATE: &str = "2024-05-12";

// ============================================================================
// Fixtures
// ============================================================================

/// Write `bytes` to `root/relative`, creating parent directories
pub fn write_file(root: &Path, relative: &str, bytes: &[u8]) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("fixture path has a parent"))
        .expect("Failed to create fixture directory");
    fs::write(&path, bytes).expect("Failed to write fixture");
    path
}

/// Lay out a small CNPJ extract under `root/<FOLDER_DATE>/`
///
/// - `empresas`: two flat latin-1 files, 3 rows total
/// - `estabelecimentos`: partitioned by date and state, 2 rows
/// - `socios`: one file that decodes but is ragged, so nothing parses
/// - `simples`: directory without CSV files
pub fn cnpj_extract(root: &Path) {
    let base = root.join(FOLDER_DATE);

    write_file(
        &base,
        "empresas/empresas_0.csv",
        b"cnpj_basico,razao_social,capital_social\n00000001,PADARIA S\xc3O JO\xc3O,\"1000,00\"\n00000002,ACME LTDA,\n",
    );
    write_file(
        &base,
        "empresas/empresas_1.csv",
        b"cnpj_basico,razao_social,capital_social\n00000003,CAF\xc9 DO PORTO,\"50,00\"\n",
    );

    write_file(
        &base,
        "estabelecimentos/data=2024-05-12/sigla_uf=SP/part-0.csv",
        b"cnpj_basico,cnpj_ordem,municipio\n00000001,0001,7107\n",
    );
    write_file(
        &base,
        "estabelecimentos/data=2024-05-12/sigla_uf=RJ/part-0.csv",
        b"cnpj_basico,cnpj_ordem,municipio\n00000002,0001,6001\n",
    );

    write_file(&base, "socios/socios_0.csv", b"cnpj_basico,nome\n00000001,A,B,C\n");

    fs::create_dir_all(base.join("simples")).expect("Failed to create fixture directory");
    write_file(&base, "simples/README", b"pending download");
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container with a pool for assertions
pub struct TestPostgres {
    container: ContainerAsync<Postgres>,
    pool: PgPool,
    descriptor: ConnectionDescriptor,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let descriptor = ConnectionDescriptor::resolve(&DatabaseConfig {
            host: host.to_string(),
            port,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            name: "postgres".to_string(),
            connect_timeout_secs: 30,
        });

        debug!("PostgreSQL connection: {}", descriptor);

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(descriptor.connect_options())
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            container,
            pool,
            descriptor,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Connection parameters for the loader under test
    pub fn descriptor(&self) -> ConnectionDescriptor {
        self.descriptor.clone()
    }

    pub async fn count(&self, qualified: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", qualified))
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count rows of {}", qualified))?;
        Ok(count)
    }
}

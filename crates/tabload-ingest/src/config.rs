//! Configuration management
//!
//! Everything is read from the environment (after an optional `.env`) and every
//! value has a default, so a bare `tabload` invocation works against a local
//! PostgreSQL.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tabload_common::{Result, TabloadError};

use crate::parser::SourceEncoding;
use crate::retry::RetryPolicy;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_POSTGRES_HOST: &str = "localhost";

pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

pub const DEFAULT_POSTGRES_USER: &str = "postgres";

/// Kept for compatibility with existing deployments that never set a password.
pub const DEFAULT_POSTGRES_PASSWORD: &str = "1023a548b";

pub const DEFAULT_POSTGRES_DB: &str = "postgres";

/// Connection timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Retries after the first attempt of an exposed load operation.
pub const DEFAULT_TASK_MAX_RETRIES: u32 = 5;

/// Fixed delay between attempts, in seconds.
pub const DEFAULT_TASK_RETRY_DELAY_SECS: u64 = 10;

pub const DEFAULT_PRIMARY_ENCODING: &str = "latin1";

pub const DEFAULT_FALLBACK_ENCODING: &str = "utf-8";

pub const DEFAULT_DELIMITER: u8 = b',';

pub const DEFAULT_EXTRACT_ROOT: &str = "./data/br_me_cnpj";

/// Process-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
    pub parser: ParserConfig,
    pub upstream: UpstreamConfig,
}

/// PostgreSQL connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub delay_secs: u64,
}

/// Source file parsing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParserConfig {
    /// WHATWG label tried first
    pub primary_encoding: String,
    /// WHATWG label tried after a decode failure
    pub fallback_encoding: String,
    pub delimiter: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// Directory holding one subdirectory per extract date
    pub extract_root: PathBuf,
}

impl Config {
    /// Load configuration from `.env` and the process environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// Missing or empty values take the documented defaults. Malformed numbers
    /// also fall back, matching how connection settings were always resolved.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let string_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let config = Config {
            database: DatabaseConfig {
                host: string_or("POSTGRES_HOST", DEFAULT_POSTGRES_HOST),
                port: get("POSTGRES_PORT")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(DEFAULT_POSTGRES_PORT),
                user: string_or("POSTGRES_USER", DEFAULT_POSTGRES_USER),
                password: string_or("POSTGRES_PASSWORD", DEFAULT_POSTGRES_PASSWORD),
                name: string_or("POSTGRES_DB", DEFAULT_POSTGRES_DB),
                connect_timeout_secs: get("POSTGRES_CONNECT_TIMEOUT")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            },
            retry: RetryConfig {
                max_retries: get("TASK_MAX_RETRIES")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(DEFAULT_TASK_MAX_RETRIES),
                delay_secs: get("TASK_RETRY_DELAY_SECS")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(DEFAULT_TASK_RETRY_DELAY_SECS),
            },
            parser: ParserConfig {
                primary_encoding: string_or("LOADER_PRIMARY_ENCODING", DEFAULT_PRIMARY_ENCODING),
                fallback_encoding: string_or("LOADER_FALLBACK_ENCODING", DEFAULT_FALLBACK_ENCODING),
                delimiter: match get("LOADER_DELIMITER") {
                    Some(raw) => parse_delimiter(&raw)?,
                    None => DEFAULT_DELIMITER,
                },
            },
            upstream: UpstreamConfig {
                extract_root: PathBuf::from(string_or("EXTRACT_ROOT", DEFAULT_EXTRACT_ROOT)),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.port == 0 {
            return Err(TabloadError::config("POSTGRES_PORT must be greater than 0"));
        }

        for label in [&self.parser.primary_encoding, &self.parser.fallback_encoding] {
            SourceEncoding::for_label(label)?;
        }

        Ok(())
    }

    /// Retry policy shared by the exposed load operations
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_retries(
            self.retry.max_retries,
            Duration::from_secs(self.retry.delay_secs),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            retry: RetryConfig {
                max_retries: DEFAULT_TASK_MAX_RETRIES,
                delay_secs: DEFAULT_TASK_RETRY_DELAY_SECS,
            },
            parser: ParserConfig::default(),
            upstream: UpstreamConfig {
                extract_root: PathBuf::from(DEFAULT_EXTRACT_ROOT),
            },
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_POSTGRES_HOST.to_string(),
            port: DEFAULT_POSTGRES_PORT,
            user: DEFAULT_POSTGRES_USER.to_string(),
            password: DEFAULT_POSTGRES_PASSWORD.to_string(),
            name: DEFAULT_POSTGRES_DB.to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            primary_encoding: DEFAULT_PRIMARY_ENCODING.to_string(),
            fallback_encoding: DEFAULT_FALLBACK_ENCODING.to_string(),
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

fn parse_delimiter(raw: &str) -> Result<u8> {
    let value = if raw == "\\t" { "\t" } else { raw };
    match value.as_bytes() {
        [byte] => Ok(*byte),
        _ => Err(TabloadError::config(format!(
            "LOADER_DELIMITER must be a single byte, got '{}'",
            raw
        ))),
    }
}

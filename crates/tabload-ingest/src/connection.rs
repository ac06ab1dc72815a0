//! Connection resolution
//!
//! Turns [`DatabaseConfig`] into a [`ConnectionDescriptor`] and its URI form:
//!
//! ```text
//! postgresql://<user>:<percent-encoded password>@<host>:<port>/<database>?client_encoding=utf8
//! ```
//!
//! Resolution never fails. Empty fields take the configured defaults.

use sqlx::postgres::PgConnectOptions;
use std::fmt;
use std::time::Duration;

use crate::config::{
    DatabaseConfig, DEFAULT_POSTGRES_DB, DEFAULT_POSTGRES_HOST, DEFAULT_POSTGRES_PASSWORD,
    DEFAULT_POSTGRES_PORT, DEFAULT_POSTGRES_USER,
};

const SCHEME: &str = "postgresql";

/// Resolved connection parameters for one load attempt
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub connect_timeout: Duration,
}

impl ConnectionDescriptor {
    /// Resolve a descriptor from configuration, filling empty fields with defaults
    pub fn resolve(config: &DatabaseConfig) -> Self {
        fn or_default(value: &str, default: &str) -> String {
            if value.trim().is_empty() {
                default.to_string()
            } else {
                value.to_string()
            }
        }

        Self {
            host: or_default(&config.host, DEFAULT_POSTGRES_HOST),
            port: if config.port == 0 {
                DEFAULT_POSTGRES_PORT
            } else {
                config.port
            },
            user: or_default(&config.user, DEFAULT_POSTGRES_USER),
            password: or_default(&config.password, DEFAULT_POSTGRES_PASSWORD),
            database: or_default(&config.name, DEFAULT_POSTGRES_DB),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }

    /// Connection string with the password percent-encoded
    ///
    /// Every byte outside `A-Z a-z 0-9 - _ . ~` is escaped, so passwords containing
    /// `@`, `:`, `/`, `?` or `#` survive the round trip.
    pub fn connection_string(&self) -> String {
        self.render(&urlencoding::encode(&self.password))
    }

    /// Connection string safe to log
    pub fn redacted(&self) -> String {
        self.render("***")
    }

    fn render(&self, password: &str) -> String {
        format!(
            "{}://{}:{}@{}:{}/{}?client_encoding=utf8",
            SCHEME, self.user, password, self.host, self.port, self.database
        )
    }

    /// sqlx connect options equivalent to [`connection_string`](Self::connection_string)
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .application_name("tabload")
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

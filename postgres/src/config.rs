//! Connection and engine settings loaded from the environment.
//!
//! Settings come from environment variables, optionally seeded from a `.env`
//! file via `dotenvy`:
//!
//! | Variable                       | Default | Meaning                          |
//! |--------------------------------|---------|----------------------------------|
//! | `DATABASE_URL`                 | none    | Postgres connection string       |
//! | `DATABASE_MAX_CONNECTIONS`     | `10`    | Pool size, at least `2`          |
//! | `DATABASE_CONNECT_TIMEOUT_SECS`| `5`     | Pool acquire timeout             |
//! | `PROJECTOR_BATCH_SIZE`         | `200`   | Events per projector transaction |
//!
//! A projector run holds one connection for its transaction while it reads
//! the event log through another, so smaller pool sizes are raised to
//! [`MIN_CONNECTIONS`].

use finledger_core::engine::{DEFAULT_BATCH_SIZE, EngineConfig};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use thiserror::Error;

/// Smallest pool a projector run can make progress with.
pub const MIN_CONNECTIONS: u32 = 2;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    /// The pool could not connect.
    #[error("Failed to connect to database: {0}")]
    Connect(String),
}

/// Settings for a Postgres-backed ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// PostgreSQL connection string.
    pub database_url: String,

    /// Maximum number of database connections in the pool.
    pub database_max_connections: u32,

    /// Timeout in seconds for acquiring a database connection.
    pub database_connect_timeout_secs: u64,

    /// Events applied per projector transaction.
    pub batch_size: usize,
}

impl LedgerConfig {
    /// Settings with defaults for everything but the connection string.
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            database_max_connections: 10,
            database_connect_timeout_secs: 5,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the pool size.
    #[must_use]
    pub const fn with_max_connections(mut self, max: u32) -> Self {
        self.database_max_connections = max;
        self
    }

    /// Set the projector batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Load settings from the environment.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if `DATABASE_URL` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let defaults = Self::new(database_url);

        Ok(Self {
            database_max_connections: parse_var(
                &get,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            database_connect_timeout_secs: parse_var(
                &get,
                "DATABASE_CONNECT_TIMEOUT_SECS",
                defaults.database_connect_timeout_secs,
            ),
            batch_size: parse_var(&get, "PROJECTOR_BATCH_SIZE", defaults.batch_size),
            ..defaults
        })
    }

    /// Pool size actually used by [`connect`](Self::connect).
    #[must_use]
    pub const fn pool_size(&self) -> u32 {
        if self.database_max_connections < MIN_CONNECTIONS {
            MIN_CONNECTIONS
        } else {
            self.database_max_connections
        }
    }

    /// Engine settings derived from this configuration.
    #[must_use]
    pub const fn engine_config(&self) -> EngineConfig {
        EngineConfig::new().with_batch_size(self.batch_size)
    }

    /// Open a connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Connect`] if the database is unreachable.
    pub async fn connect(&self) -> Result<PgPool, ConfigError> {
        PgPoolOptions::new()
            .max_connections(self.pool_size())
            .acquire_timeout(Duration::from_secs(self.database_connect_timeout_secs))
            .connect(&self.database_url)
            .await
            .map_err(|e| ConfigError::Connect(e.to_string()))
    }
}

/// Parses a variable as `T`, returning `default` on missing or invalid values.
fn parse_var<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn database_url_is_required() {
        let result = LedgerConfig::from_vars(vars(&[]));
        assert!(matches!(result, Err(ConfigError::Missing("DATABASE_URL"))));
    }

    #[test]
    fn defaults_apply() {
        let config = LedgerConfig::from_vars(vars(&[("DATABASE_URL", "postgres://x")])).unwrap();
        assert_eq!(config, LedgerConfig::new("postgres://x"));
        assert_eq!(config.engine_config().batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn overrides_and_bad_values() {
        let config = LedgerConfig::from_vars(vars(&[
            ("DATABASE_URL", "postgres://x"),
            ("DATABASE_MAX_CONNECTIONS", "25"),
            ("PROJECTOR_BATCH_SIZE", "not-a-number"),
        ]))
        .unwrap();

        assert_eq!(config.database_max_connections, 25);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn builder() {
        let config = LedgerConfig::new("postgres://x")
            .with_max_connections(3)
            .with_batch_size(50);
        assert_eq!(config.database_max_connections, 3);
        assert_eq!(config.pool_size(), 3);
        assert_eq!(config.engine_config().batch_size, 50);
    }

    #[test]
    fn pool_never_smaller_than_two() {
        assert_eq!(LedgerConfig::new("postgres://x").with_max_connections(1).pool_size(), 2);
        assert_eq!(LedgerConfig::new("postgres://x").with_max_connections(0).pool_size(), 2);

        let config = LedgerConfig::from_vars(vars(&[
            ("DATABASE_URL", "postgres://x"),
            ("DATABASE_MAX_CONNECTIONS", "1"),
        ]))
        .unwrap();
        assert_eq!(config.database_max_connections, 1);
        assert_eq!(config.pool_size(), MIN_CONNECTIONS);
    }
}

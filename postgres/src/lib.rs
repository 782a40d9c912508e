//! `PostgreSQL` storage for FinLedger.
//!
//! This crate provides the production implementations of the storage traits
//! from `finledger-core`:
//!
//! - [`PostgresEventStore`]: append-only `events` table with a unique idempotency key
//! - [`PostgresCheckpointStore`]: `projector_checkpoints` rows, monotonic `advance`
//! - [`PostgresProjectionBackend`]: JSONB read models and lock-holding projector transactions
//! - [`LedgerConfig`]: environment-driven connection settings
//!
//! # Example
//!
//! ```ignore
//! use finledger_postgres::{LedgerConfig, PostgresEventStore, PostgresProjectionBackend, migrate};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LedgerConfig::from_env()?;
//!     let pool = config.connect().await?;
//!     migrate(&pool).await?;
//!
//!     let store = PostgresEventStore::new(pool.clone());
//!     let backend = PostgresProjectionBackend::new(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod checkpoint;
mod config;
mod event_store;

pub use backend::{PostgresProjectionBackend, PostgresProjectionTx};
pub use checkpoint::PostgresCheckpointStore;
pub use config::{ConfigError, LedgerConfig, MIN_CONNECTIONS};
pub use event_store::PostgresEventStore;

/// Apply the bundled schema migrations.
///
/// # Errors
///
/// Returns an error if a migration fails to apply.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

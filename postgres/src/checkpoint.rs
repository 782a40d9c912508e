//! `PostgreSQL` checkpoint store.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE projector_checkpoints (
//!     projector_name TEXT NOT NULL,
//!     account_id BIGINT NOT NULL,
//!     last_event_id BIGINT NOT NULL DEFAULT 0,
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     PRIMARY KEY (projector_name, account_id)
//! );
//! ```
//!
//! Writes here take the same row lock as a running projector transaction, so
//! they wait for it instead of racing it.

use finledger_core::checkpoint::CheckpointStore;
use finledger_core::event::{AccountId, EventId};
use finledger_core::projection::{ProjectionError, Result};
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;

/// PostgreSQL-backed checkpoint tracking.
///
/// # Example
///
/// ```ignore
/// let checkpoints = PostgresCheckpointStore::new(pool);
///
/// checkpoints.advance("budget", account, EventId::new(42)).await?;
/// assert_eq!(checkpoints.get("budget", account).await?, EventId::new(42));
/// ```
#[derive(Clone, Debug)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    /// Create a checkpoint store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    fn get(
        &self,
        projector: &str,
        account_id: AccountId,
    ) -> Pin<Box<dyn Future<Output = Result<EventId>> + Send + '_>> {
        let projector = projector.to_string();
        Box::pin(async move {
            let result: Option<(i64,)> = sqlx::query_as(
                "SELECT last_event_id FROM projector_checkpoints
                 WHERE projector_name = $1 AND account_id = $2",
            )
            .bind(projector)
            .bind(account_id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("Failed to load checkpoint: {e}")))?;

            Ok(result.map_or(EventId::ZERO, |(id,)| EventId::new(id)))
        })
    }

    fn advance(
        &self,
        projector: &str,
        account_id: AccountId,
        to: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let projector = projector.to_string();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO projector_checkpoints (projector_name, account_id, last_event_id, updated_at)
                 VALUES ($1, $2, $3, now())
                 ON CONFLICT (projector_name, account_id) DO UPDATE
                 SET last_event_id = EXCLUDED.last_event_id,
                     updated_at = now()
                 WHERE projector_checkpoints.last_event_id < EXCLUDED.last_event_id",
            )
            .bind(&projector)
            .bind(account_id.value())
            .bind(to.value())
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("Failed to save checkpoint: {e}")))?;

            tracing::debug!(projector = %projector, account_id = %account_id, to = %to, "Checkpoint advanced");
            Ok(())
        })
    }

    fn reset(
        &self,
        projector: &str,
        account_id: AccountId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let projector = projector.to_string();
        Box::pin(async move {
            sqlx::query(
                "UPDATE projector_checkpoints
                 SET last_event_id = 0, updated_at = now()
                 WHERE projector_name = $1 AND account_id = $2",
            )
            .bind(&projector)
            .bind(account_id.value())
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("Failed to reset checkpoint: {e}")))?;

            Ok(())
        })
    }
}

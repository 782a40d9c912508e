//! `PostgreSQL` read model backend.
//!
//! Read models live as JSONB documents in one `read_models` table:
//!
//! ```sql
//! CREATE TABLE read_models (
//!     model TEXT NOT NULL,
//!     row_key TEXT NOT NULL,
//!     account_id BIGINT NOT NULL,
//!     data JSONB NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     PRIMARY KEY (model, row_key)
//! );
//! ```
//!
//! A projector unit of work is one database transaction. It starts by locking
//! the projector's checkpoint row with `SELECT ... FOR UPDATE`, which
//! serializes concurrent runs of the same projector for the same account.
//! Dropping the transaction without committing rolls it back.

use crate::checkpoint::PostgresCheckpointStore;
use finledger_core::checkpoint::CheckpointStore;
use finledger_core::event::{AccountId, EventId};
use finledger_core::projection::{
    ProjectionBackend, ProjectionError, ReadModelSource, ReadModelTx, Result,
};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use std::pin::Pin;

fn storage(action: &'static str) -> impl FnOnce(sqlx::Error) -> ProjectionError {
    move |e| ProjectionError::Storage(format!("Failed to {action}: {e}"))
}

/// PostgreSQL-backed read models and projector transactions.
///
/// # Example
///
/// ```ignore
/// let backend = PostgresProjectionBackend::new(pool.clone());
/// let engine = ProjectorEngine::new(BudgetProjector, store, backend.clone());
///
/// engine.run(account, None).await?;
/// let months: Vec<BudgetMonth> = backend.find_all(account).await?;
/// ```
#[derive(Clone, Debug)]
pub struct PostgresProjectionBackend {
    pool: PgPool,
    checkpoints: PostgresCheckpointStore,
}

impl PostgresProjectionBackend {
    /// Create a backend using an existing connection pool.
    ///
    /// A run keeps one connection for its transaction and reads events
    /// through another, so the pool needs at least
    /// [`MIN_CONNECTIONS`](crate::MIN_CONNECTIONS).
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            checkpoints: PostgresCheckpointStore::new(pool.clone()),
            pool,
        }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl CheckpointStore for PostgresProjectionBackend {
    fn get(
        &self,
        projector: &str,
        account_id: AccountId,
    ) -> Pin<Box<dyn Future<Output = Result<EventId>> + Send + '_>> {
        self.checkpoints.get(projector, account_id)
    }

    fn advance(
        &self,
        projector: &str,
        account_id: AccountId,
        to: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.checkpoints.advance(projector, account_id, to)
    }

    fn reset(
        &self,
        projector: &str,
        account_id: AccountId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.checkpoints.reset(projector, account_id)
    }
}

impl ProjectionBackend for PostgresProjectionBackend {
    type Tx = PostgresProjectionTx;

    async fn begin(&self, projector: &str, account_id: AccountId) -> Result<PostgresProjectionTx> {
        let mut tx = self.pool.begin().await.map_err(storage("begin transaction"))?;

        sqlx::query(
            "INSERT INTO projector_checkpoints (projector_name, account_id)
             VALUES ($1, $2)
             ON CONFLICT (projector_name, account_id) DO NOTHING",
        )
        .bind(projector)
        .bind(account_id.value())
        .execute(&mut *tx)
        .await
        .map_err(|e| ProjectionError::Checkpoint(format!("Failed to create checkpoint: {e}")))?;

        let (cursor,): (i64,) = sqlx::query_as(
            "SELECT last_event_id FROM projector_checkpoints
             WHERE projector_name = $1 AND account_id = $2
             FOR UPDATE",
        )
        .bind(projector)
        .bind(account_id.value())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ProjectionError::Checkpoint(format!("Failed to lock checkpoint: {e}")))?;

        Ok(PostgresProjectionTx {
            tx,
            projector: projector.to_string(),
            account_id,
            cursor: EventId::new(cursor),
        })
    }
}

impl ReadModelSource for PostgresProjectionBackend {
    async fn fetch_doc(&self, model: &'static str, row_key: &str) -> Result<Option<Value>> {
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT data FROM read_models WHERE model = $1 AND row_key = $2")
                .bind(model)
                .bind(row_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage("load read model"))?;
        Ok(row.map(|(data,)| data))
    }

    async fn fetch_docs(&self, model: &'static str, account_id: AccountId) -> Result<Vec<Value>> {
        let rows: Vec<(Value,)> = sqlx::query_as(
            "SELECT data FROM read_models WHERE model = $1 AND account_id = $2 ORDER BY row_key",
        )
        .bind(model)
        .bind(account_id.value())
        .fetch_all(&self.pool)
        .await
        .map_err(storage("list read models"))?;
        Ok(rows.into_iter().map(|(data,)| data).collect())
    }
}

/// One projector unit of work: a transaction holding the checkpoint row lock.
pub struct PostgresProjectionTx {
    tx: Transaction<'static, Postgres>,
    projector: String,
    account_id: AccountId,
    cursor: EventId,
}

impl ReadModelTx for PostgresProjectionTx {
    fn cursor(&self) -> EventId {
        self.cursor
    }

    async fn load_doc(&mut self, model: &'static str, row_key: &str) -> Result<Option<Value>> {
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT data FROM read_models WHERE model = $1 AND row_key = $2")
                .bind(model)
                .bind(row_key)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(storage("load read model"))?;
        Ok(row.map(|(data,)| data))
    }

    async fn store_doc(
        &mut self,
        model: &'static str,
        row_key: &str,
        account_id: AccountId,
        doc: Value,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO read_models (model, row_key, account_id, data, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (model, row_key) DO UPDATE
            SET account_id = EXCLUDED.account_id,
                data = EXCLUDED.data,
                updated_at = now()
            ",
        )
        .bind(model)
        .bind(row_key)
        .bind(account_id.value())
        .bind(doc)
        .execute(&mut *self.tx)
        .await
        .map_err(storage("save read model"))?;
        Ok(())
    }

    async fn delete_doc(&mut self, model: &'static str, row_key: &str) -> Result<()> {
        sqlx::query("DELETE FROM read_models WHERE model = $1 AND row_key = $2")
            .bind(model)
            .bind(row_key)
            .execute(&mut *self.tx)
            .await
            .map_err(storage("delete read model"))?;
        Ok(())
    }

    async fn list_docs(&mut self, model: &'static str, account_id: AccountId) -> Result<Vec<Value>> {
        let rows: Vec<(Value,)> = sqlx::query_as(
            "SELECT data FROM read_models WHERE model = $1 AND account_id = $2 ORDER BY row_key",
        )
        .bind(model)
        .bind(account_id.value())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(storage("list read models"))?;
        Ok(rows.into_iter().map(|(data,)| data).collect())
    }

    async fn clear_model(&mut self, model: &'static str, account_id: AccountId) -> Result<()> {
        let result = sqlx::query("DELETE FROM read_models WHERE model = $1 AND account_id = $2")
            .bind(model)
            .bind(account_id.value())
            .execute(&mut *self.tx)
            .await
            .map_err(storage("clear read models"))?;

        tracing::info!(
            model,
            account_id = %account_id,
            rows = result.rows_affected(),
            "Read models cleared"
        );
        Ok(())
    }

    async fn advance(&mut self, to: EventId) -> Result<()> {
        sqlx::query(
            "UPDATE projector_checkpoints
             SET last_event_id = $3, updated_at = now()
             WHERE projector_name = $1 AND account_id = $2 AND last_event_id < $3",
        )
        .bind(&self.projector)
        .bind(self.account_id.value())
        .bind(to.value())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| ProjectionError::Checkpoint(format!("Failed to advance checkpoint: {e}")))?;
        Ok(())
    }

    async fn reset_cursor(&mut self) -> Result<()> {
        sqlx::query(
            "UPDATE projector_checkpoints
             SET last_event_id = 0, updated_at = now()
             WHERE projector_name = $1 AND account_id = $2",
        )
        .bind(&self.projector)
        .bind(self.account_id.value())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| ProjectionError::Checkpoint(format!("Failed to reset checkpoint: {e}")))?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(storage("commit projection"))
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(storage("roll back projection"))
    }
}

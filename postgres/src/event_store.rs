//! `PostgreSQL` event store.

use chrono::{DateTime, Utc};
use finledger_core::event::{AccountId, EventId, NewEvent, StoredEvent};
use finledger_core::event_store::{AppendOutcome, EventFilter, EventStore, EventStoreError};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use std::future::Future;
use std::pin::Pin;

const EVENT_COLUMNS: &str =
    "id, account_id, actor_user_id, event_type, payload, occurred_at, created_at, idempotency_key";

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    account_id: i64,
    actor_user_id: Option<i64>,
    event_type: String,
    payload: Value,
    occurred_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    idempotency_key: Option<String>,
}

impl From<EventRow> for StoredEvent {
    fn from(row: EventRow) -> Self {
        Self {
            id: EventId::new(row.id),
            account_id: AccountId::new(row.account_id),
            actor_user_id: row.actor_user_id,
            event_type: row.event_type,
            payload: row.payload,
            occurred_at: row.occurred_at,
            created_at: row.created_at,
            idempotency_key: row.idempotency_key,
        }
    }
}

/// `PostgreSQL`-backed append-only event log.
///
/// Idempotency keys are enforced by a `UNIQUE` constraint, so concurrent
/// appends of the same key resolve to a single row in every case.
///
/// # Example
///
/// ```ignore
/// let store = PostgresEventStore::new(pool);
/// let outcome = store
///     .append(NewEvent::new(account, "wish_created", payload).with_idempotency_key(key))
///     .await?;
/// ```
#[derive(Clone, Debug)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Create an event store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Append inside a caller-owned transaction.
    ///
    /// Lets the event commit or roll back together with the business state
    /// change that produced it. `conn` must be inside a transaction: the
    /// per-account append lock is held until it commits or rolls back, so
    /// other appends for the same account wait and get higher ids.
    ///
    /// # Errors
    ///
    /// - `Validation`: the event is malformed
    /// - `Storage`: the insert or the duplicate lookup failed
    pub async fn append_in_tx(
        conn: &mut PgConnection,
        event: NewEvent,
    ) -> Result<AppendOutcome, EventStoreError> {
        event.validate()?;

        // BIGSERIAL ids can commit out of order; holding the account lock
        // from id assignment to commit keeps per-account visibility in id order.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(event.account_id.value())
            .execute(&mut *conn)
            .await
            .map_err(|e| EventStoreError::Storage(format!("Failed to lock account log: {e}")))?;

        let inserted: Option<EventRow> = sqlx::query_as(&format!(
            r"
            INSERT INTO events (account_id, actor_user_id, event_type, payload, occurred_at, idempotency_key)
            VALUES ($1, $2, $3, $4, COALESCE($5, now()), $6)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {EVENT_COLUMNS}
            "
        ))
        .bind(event.account_id.value())
        .bind(event.actor_user_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.occurred_at)
        .bind(event.idempotency_key.as_deref())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| EventStoreError::Storage(format!("Failed to append event: {e}")))?;

        if let Some(row) = inserted {
            metrics::counter!("event_store.appended", "event_type" => event.event_type.clone())
                .increment(1);
            tracing::debug!(
                event_id = row.id,
                account_id = row.account_id,
                event_type = %row.event_type,
                "Event appended"
            );
            return Ok(AppendOutcome::Appended(row.into()));
        }

        // Only a conflicting idempotency key suppresses the insert.
        let key = event.idempotency_key.as_deref().unwrap_or_default();
        let existing: EventRow = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| EventStoreError::Storage(format!("Failed to load duplicate event: {e}")))?;

        metrics::counter!("event_store.duplicates", "event_type" => event.event_type.clone())
            .increment(1);
        tracing::info!(
            event_id = existing.id,
            idempotency_key = key,
            "Duplicate append suppressed"
        );
        Ok(AppendOutcome::Duplicate(existing.into()))
    }
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        event: NewEvent,
    ) -> Pin<Box<dyn Future<Output = Result<AppendOutcome, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| EventStoreError::Storage(format!("Failed to begin transaction: {e}")))?;
            let outcome = Self::append_in_tx(&mut *tx, event).await?;
            tx.commit()
                .await
                .map_err(|e| EventStoreError::Storage(format!("Failed to commit append: {e}")))?;
            Ok(outcome)
        })
    }

    fn list_since(
        &self,
        account_id: AccountId,
        after: EventId,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredEvent>, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)]
            let limit = filter.limit.map(|limit| limit as i64);

            let rows: Vec<EventRow> = sqlx::query_as(&format!(
                r"
                SELECT {EVENT_COLUMNS}
                FROM events
                WHERE account_id = $1
                  AND id > $2
                  AND ($3::text[] IS NULL OR event_type = ANY($3))
                ORDER BY id ASC
                LIMIT $4
                "
            ))
            .bind(account_id.value())
            .bind(after.value())
            .bind(filter.event_types)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EventStoreError::Storage(format!("Failed to list events: {e}")))?;

            Ok(rows.into_iter().map(StoredEvent::from).collect())
        })
    }

    fn get_event(
        &self,
        id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StoredEvent>, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let row: Option<EventRow> =
                sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
                    .bind(id.value())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| EventStoreError::Storage(format!("Failed to load event: {e}")))?;

            Ok(row.map(StoredEvent::from))
        })
    }

    fn count_events(
        &self,
        account_id: AccountId,
    ) -> Pin<Box<dyn Future<Output = Result<u64, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events WHERE account_id = $1")
                .bind(account_id.value())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| EventStoreError::Storage(format!("Failed to count events: {e}")))?;

            Ok(u64::try_from(count).unwrap_or_default())
        })
    }
}

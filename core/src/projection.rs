//! Projector abstractions for building read models from the event log.
//!
//! # Overview
//!
//! A projector folds the events of one account into denormalized read models.
//! The engine hands it a [`ReadModelTx`]: a unit of work that holds the
//! projector's per-account lock and stages read model writes together with the
//! checkpoint. Either everything in a batch becomes visible or nothing does.
//!
//! ```text
//!  events table ──list_since──▶ ProjectorEngine ──apply──▶ Projector
//!                                     │                       │
//!                                     │ begin / commit        │ load / save / remove
//!                                     ▼                       ▼
//!                           ┌─────────────────────────────────────┐
//!                           │ ReadModelTx (lock + cursor + docs)  │
//!                           └─────────────────────────────────────┘
//! ```
//!
//! ## Read models
//!
//! Read models are JSON documents addressed by `(model, row_key)` and tagged
//! with the owning account. Typed access goes through [`ReadModel`].
//!
//! ## Example
//!
//! ```ignore
//! struct WishCounter;
//!
//! impl Projector for WishCounter {
//!     fn name(&self) -> &'static str {
//!         "wish_counter"
//!     }
//!
//!     fn handled_event_types(&self) -> &'static [&'static str] {
//!         &["wish_created"]
//!     }
//!
//!     async fn apply<T: ReadModelTx>(&self, tx: &mut T, event: &StoredEvent) -> Result<()> {
//!         let key = event.account_id.to_string();
//!         let mut counter = tx.load::<Counter>(&key).await?.unwrap_or_default();
//!         counter.seen += 1;
//!         tx.save(&counter).await
//!     }
//!
//!     async fn clear<T: ReadModelTx>(&self, tx: &mut T, account_id: AccountId) -> Result<()> {
//!         tx.clear_model(Counter::MODEL, account_id).await
//!     }
//! }
//! ```

use crate::checkpoint::CheckpointStore;
use crate::event::{AccountId, EventError, EventId, StoredEvent};
use crate::event_store::EventStoreError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;

/// Error type for projection operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Checkpoint error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// A handler rejected an event
    #[error("Event processing error: {0}")]
    EventProcessing(String),

    /// A handler failed while the engine was applying a batch
    #[error("Projector {projector} failed on event {event_id} ({event_type}): {message}")]
    Handler {
        /// Projector name.
        projector: String,
        /// Offending event.
        event_id: EventId,
        /// Offending event type.
        event_type: String,
        /// Underlying failure.
        message: String,
    },

    /// Reading the event log failed
    #[error(transparent)]
    EventStore(#[from] EventStoreError),
}

impl From<EventError> for ProjectionError {
    fn from(error: EventError) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// A typed read model row.
pub trait ReadModel: Serialize + DeserializeOwned + Send + Sync {
    /// Model name; rows of different models never collide.
    const MODEL: &'static str;

    /// Unique key of this row within [`ReadModel::MODEL`].
    fn row_key(&self) -> String;

    /// Account owning this row.
    fn account_id(&self) -> AccountId;
}

fn to_doc<R: ReadModel>(row: &R) -> Result<Value> {
    serde_json::to_value(row)
        .map_err(|e| ProjectionError::Serialization(format!("Failed to encode {}: {e}", R::MODEL)))
}

fn from_doc<R: ReadModel>(doc: Value) -> Result<R> {
    serde_json::from_value(doc)
        .map_err(|e| ProjectionError::Serialization(format!("Failed to decode {}: {e}", R::MODEL)))
}

/// A unit of work over read models and one projector checkpoint.
///
/// Obtained from [`ProjectionBackend::begin`]. Holds the `(projector, account)`
/// lock until committed, rolled back or dropped. Dropping without commit
/// discards every staged write.
pub trait ReadModelTx: Send {
    /// Checkpoint value when the unit of work started.
    fn cursor(&self) -> EventId;

    /// Fetch a raw document.
    fn load_doc(
        &mut self,
        model: &'static str,
        row_key: &str,
    ) -> impl Future<Output = Result<Option<Value>>> + Send;

    /// Insert or replace a raw document.
    fn store_doc(
        &mut self,
        model: &'static str,
        row_key: &str,
        account_id: AccountId,
        doc: Value,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Delete a document if present.
    fn delete_doc(
        &mut self,
        model: &'static str,
        row_key: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Every document of `model` owned by `account_id`, ordered by row key.
    fn list_docs(
        &mut self,
        model: &'static str,
        account_id: AccountId,
    ) -> impl Future<Output = Result<Vec<Value>>> + Send;

    /// Delete every document of `model` owned by `account_id`.
    fn clear_model(
        &mut self,
        model: &'static str,
        account_id: AccountId,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Stage the checkpoint to move forward to `to`. Never moves it backwards.
    fn advance(&mut self, to: EventId) -> impl Future<Output = Result<()>> + Send;

    /// Stage the checkpoint to go back to [`EventId::ZERO`].
    fn reset_cursor(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Make every staged write visible and release the lock.
    fn commit(self) -> impl Future<Output = Result<()>> + Send;

    /// Discard every staged write and release the lock.
    fn rollback(self) -> impl Future<Output = Result<()>> + Send;

    /// Fetch a typed row.
    fn load<R: ReadModel>(&mut self, row_key: &str) -> impl Future<Output = Result<Option<R>>> + Send
    where
        Self: Sized,
    {
        async move { self.load_doc(R::MODEL, row_key).await?.map(from_doc::<R>).transpose() }
    }

    /// Insert or replace a typed row.
    fn save<R: ReadModel>(&mut self, row: &R) -> impl Future<Output = Result<()>> + Send
    where
        Self: Sized,
    {
        async move {
            let doc = to_doc(row)?;
            self.store_doc(R::MODEL, &row.row_key(), row.account_id(), doc)
                .await
        }
    }

    /// Every typed row of an account.
    fn list<R: ReadModel>(
        &mut self,
        account_id: AccountId,
    ) -> impl Future<Output = Result<Vec<R>>> + Send
    where
        Self: Sized,
    {
        async move {
            self.list_docs(R::MODEL, account_id)
                .await?
                .into_iter()
                .map(from_doc::<R>)
                .collect()
        }
    }
}

/// Storage that can open [`ReadModelTx`] units of work.
///
/// Backends are also checkpoint stores; `reset` and `advance` issued through
/// [`CheckpointStore`] wait for any unit of work holding the same lock.
pub trait ProjectionBackend: CheckpointStore {
    /// Unit of work type.
    type Tx: ReadModelTx;

    /// Acquire the `(projector, account)` lock and open a unit of work.
    ///
    /// Waits while another unit of work holds the same lock.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the backend is unavailable.
    fn begin(
        &self,
        projector: &str,
        account_id: AccountId,
    ) -> impl Future<Output = Result<Self::Tx>> + Send;
}

/// Read-only access to committed read models, for query handlers and tests.
pub trait ReadModelSource: Send + Sync {
    /// Fetch a raw document.
    fn fetch_doc(
        &self,
        model: &'static str,
        row_key: &str,
    ) -> impl Future<Output = Result<Option<Value>>> + Send;

    /// Every document of `model` owned by `account_id`, ordered by row key.
    fn fetch_docs(
        &self,
        model: &'static str,
        account_id: AccountId,
    ) -> impl Future<Output = Result<Vec<Value>>> + Send;

    /// Fetch a typed row.
    fn find<R: ReadModel>(&self, row_key: &str) -> impl Future<Output = Result<Option<R>>> + Send
    where
        Self: Sized,
    {
        async move { self.fetch_doc(R::MODEL, row_key).await?.map(from_doc::<R>).transpose() }
    }

    /// Every typed row of an account.
    fn find_all<R: ReadModel>(
        &self,
        account_id: AccountId,
    ) -> impl Future<Output = Result<Vec<R>>> + Send
    where
        Self: Sized,
    {
        async move {
            self.fetch_docs(R::MODEL, account_id)
                .await?
                .into_iter()
                .map(from_doc::<R>)
                .collect()
        }
    }
}

/// Folds events into read models.
///
/// Handlers must be replay-safe: applying an event whose effect is already
/// present leaves the read models unchanged. Events with a type outside
/// [`Projector::handled_event_types`] are never passed to [`Projector::apply`].
pub trait Projector: Send + Sync + 'static {
    /// Stable name, used as the checkpoint key.
    fn name(&self) -> &'static str;

    /// Event types this projector reacts to.
    fn handled_event_types(&self) -> &'static [&'static str];

    /// Whether `event_type` is handled.
    fn handles(&self, event_type: &str) -> bool {
        self.handled_event_types().contains(&event_type)
    }

    /// Apply one handled event inside the batch's unit of work.
    ///
    /// # Errors
    ///
    /// Any error aborts the batch; nothing from it is committed.
    fn apply<T: ReadModelTx>(
        &self,
        tx: &mut T,
        event: &StoredEvent,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Delete every read model row this projector owns for `account_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the backend fails.
    fn clear<T: ReadModelTx>(
        &self,
        tx: &mut T,
        account_id: AccountId,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_display() {
        let error = ProjectionError::Handler {
            projector: "budget".to_string(),
            event_id: EventId::new(42),
            event_type: "budget_line_set".to_string(),
            message: "budget month 7 not found".to_string(),
        };
        let display = error.to_string();
        assert!(display.contains("budget"));
        assert!(display.contains("42"));
        assert!(display.contains("budget month 7 not found"));
    }

    #[test]
    fn event_store_error_converts() {
        let error: ProjectionError = EventStoreError::Storage("connection reset".to_string()).into();
        assert!(matches!(error, ProjectionError::EventStore(_)));
        assert!(error.to_string().contains("connection reset"));
    }

    #[test]
    fn event_error_becomes_serialization() {
        let error: ProjectionError = EventError::SerializationError("bad".to_string()).into();
        assert!(matches!(error, ProjectionError::Serialization(_)));
    }
}

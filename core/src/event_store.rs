//! Event store trait and related types.
//!
//! The event store is the append-only source of truth. Projectors read from it
//! in id order and never write to it.
//!
//! # Guarantees
//!
//! - Ids are assigned on append and increase across the whole log.
//! - Within one account, appends are serialized: an event becomes visible
//!   only after every lower id of the same account is visible. A reader that
//!   has seen id `n` of an account will never later see a smaller id appear.
//! - An idempotency key is unique across the whole log. Appending with a key
//!   that already exists returns the existing event as
//!   [`AppendOutcome::Duplicate`] instead of an error, even under concurrent
//!   appends of the same key.
//! - Listing never returns events of another account.
//!
//! # Implementations
//!
//! - `PostgresEventStore` (in `finledger-postgres`): production implementation
//! - `InMemoryLedger` (in `finledger-testing`): fast, deterministic testing
//!
//! # Example
//!
//! ```no_run
//! use finledger_core::event::{AccountId, EventId, NewEvent};
//! use finledger_core::event_store::{EventFilter, EventStore, EventStoreError};
//! use serde_json::json;
//!
//! async fn example(store: &dyn EventStore) -> Result<(), EventStoreError> {
//!     let account = AccountId::new(1);
//!     let outcome = store
//!         .append(NewEvent::new(account, "wish_created", json!({"wish_id": 1})))
//!         .await?;
//!
//!     let events = store
//!         .list_since(account, EventId::ZERO, EventFilter::all().limit(200))
//!         .await?;
//!     assert_eq!(events.last().map(|e| e.id), Some(outcome.event().id));
//!     Ok(())
//! }
//! ```

use crate::event::{AccountId, EventId, NewEvent, StoredEvent};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event store operations.
#[derive(Error, Debug)]
pub enum EventStoreError {
    /// The event was rejected before reaching storage.
    #[error("Invalid event: {0}")]
    Validation(String),

    /// Database connection or query failed.
    #[error("Event store error: {0}")]
    Storage(String),

    /// A stored payload could not be encoded or decoded.
    #[error("Event serialization error: {0}")]
    Serialization(String),
}

/// Result of [`EventStore::append`].
#[derive(Clone, Debug, PartialEq)]
pub enum AppendOutcome {
    /// A new event was written.
    Appended(StoredEvent),
    /// An event with the same idempotency key already existed; nothing was written.
    Duplicate(StoredEvent),
}

impl AppendOutcome {
    /// The stored event, new or pre-existing.
    #[must_use]
    pub const fn event(&self) -> &StoredEvent {
        match self {
            Self::Appended(event) | Self::Duplicate(event) => event,
        }
    }

    /// Consume the outcome and return the stored event.
    #[must_use]
    pub fn into_event(self) -> StoredEvent {
        match self {
            Self::Appended(event) | Self::Duplicate(event) => event,
        }
    }

    /// Whether the append was absorbed by an existing idempotency key.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Narrowing options for [`EventStore::list_since`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Only return these event types. `None` returns every type.
    pub event_types: Option<Vec<String>>,
    /// Maximum number of events. `None` means unbounded.
    pub limit: Option<usize>,
}

impl EventFilter {
    /// No narrowing.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            event_types: None,
            limit: None,
        }
    }

    /// Restrict to the given event types.
    #[must_use]
    pub fn types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Cap the number of returned events.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether an event type passes the type restriction.
    #[must_use]
    pub fn matches(&self, event_type: &str) -> bool {
        self.event_types
            .as_ref()
            .is_none_or(|types| types.iter().any(|t| t == event_type))
    }
}

/// Append-only event log.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the store can be shared
/// as `Arc<dyn EventStore>` between projectors and use cases.
pub trait EventStore: Send + Sync {
    /// Append an event, honouring its idempotency key.
    ///
    /// # Errors
    ///
    /// - `Validation`: blank event type, non-object payload or blank key
    /// - `Storage`: database connection or query failed
    fn append(
        &self,
        event: NewEvent,
    ) -> Pin<Box<dyn Future<Output = Result<AppendOutcome, EventStoreError>> + Send + '_>>;

    /// Events of `account_id` with id strictly greater than `after`, ascending by id.
    ///
    /// # Errors
    ///
    /// - `Storage`: database connection or query failed
    fn list_since(
        &self,
        account_id: AccountId,
        after: EventId,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredEvent>, EventStoreError>> + Send + '_>>;

    /// Fetch one event by id.
    ///
    /// # Errors
    ///
    /// - `Storage`: database connection or query failed
    fn get_event(
        &self,
        id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StoredEvent>, EventStoreError>> + Send + '_>>;

    /// Number of events recorded for `account_id`.
    ///
    /// # Errors
    ///
    /// - `Storage`: database connection or query failed
    fn count_events(
        &self,
        account_id: AccountId,
    ) -> Pin<Box<dyn Future<Output = Result<u64, EventStoreError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn stored(id: i64) -> StoredEvent {
        StoredEvent {
            id: EventId::new(id),
            account_id: AccountId::new(1),
            actor_user_id: None,
            event_type: "wallet_created".to_string(),
            payload: json!({}),
            occurred_at: Utc::now(),
            created_at: Utc::now(),
            idempotency_key: Some("k".to_string()),
        }
    }

    #[test]
    fn append_outcome_accessors() {
        let appended = AppendOutcome::Appended(stored(1));
        let duplicate = AppendOutcome::Duplicate(stored(1));

        assert!(!appended.is_duplicate());
        assert!(duplicate.is_duplicate());
        assert_eq!(appended.event(), duplicate.event());
        assert_eq!(duplicate.into_event().id, EventId::new(1));
    }

    #[test]
    fn filter_matches_types() {
        assert!(EventFilter::all().matches("anything"));

        let filter = EventFilter::all().types(["wallet_created"]).limit(10);
        assert!(filter.matches("wallet_created"));
        assert!(!filter.matches("wallet_renamed"));
        assert_eq!(filter.limit, Some(10));
    }

    proptest::proptest! {
        #[test]
        fn filter_matches_exactly_the_listed_types(
            listed in proptest::collection::vec("[a-z_]{1,12}", 0..5),
            candidate in "[a-z_]{1,12}",
        ) {
            let filter = EventFilter::all().types(listed.clone());
            proptest::prop_assert_eq!(filter.matches(&candidate), listed.contains(&candidate));
        }
    }

    #[test]
    fn validation_error_display() {
        let error = EventStoreError::Validation("event_type must not be empty".to_string());
        assert!(format!("{error}").contains("event_type must not be empty"));
    }
}

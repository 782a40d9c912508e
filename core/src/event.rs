//! Event log record types.
//!
//! Every state change in FinLedger is recorded as an append-only [`StoredEvent`].
//! Events are scoped to an account, ordered by a monotonically increasing
//! [`EventId`], and carry a JSON payload whose shape is determined by the
//! event's `event_type` string.
//!
//! # Example
//!
//! ```
//! use finledger_core::event::{AccountId, NewEvent};
//! use serde_json::json;
//!
//! let event = NewEvent::new(AccountId::new(1), "wish_created", json!({"wish_id": 7}))
//!     .with_actor(42)
//!     .with_idempotency_key("wish-create-1-7");
//!
//! assert_eq!(event.event_type, "wish_created");
//! assert!(event.validate().is_ok());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::event_store::EventStoreError;

/// Error types for converting between typed events and stored payloads.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize an event payload.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize an event payload.
    #[error("Failed to deserialize {event_type} payload: {message}")]
    DeserializationError {
        /// The event type whose payload was malformed.
        event_type: String,
        /// Description of the decoding failure.
        message: String,
    },
}

/// Position of an event in the log.
///
/// Ids are assigned by the event store, start at 1 and strictly increase in
/// append order. Ids of one account also become visible in that order, which
/// is what lets a checkpoint be a single id. [`EventId::ZERO`] is the "before the first event" position
/// used by fresh checkpoints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    /// Position before any event.
    pub const ZERO: Self = Self(0);

    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EventId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Tenant scope for events, checkpoints and read models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(i64);

impl AccountId {
    /// Wrap a raw account id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw account id.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// An event as persisted in the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Log position, unique and increasing.
    pub id: EventId,
    /// Owning account.
    pub account_id: AccountId,
    /// User who caused the event, if any.
    pub actor_user_id: Option<i64>,
    /// Discriminator for the payload shape, e.g. `"wallet_created"`.
    pub event_type: String,
    /// Event payload.
    pub payload: Value,
    /// Business time of the fact.
    pub occurred_at: DateTime<Utc>,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
    /// Client-supplied deduplication key.
    pub idempotency_key: Option<String>,
}

/// An event that has not been appended yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Owning account.
    pub account_id: AccountId,
    /// User who caused the event, if any.
    pub actor_user_id: Option<i64>,
    /// Discriminator for the payload shape.
    pub event_type: String,
    /// Event payload.
    pub payload: Value,
    /// Business time; the store uses the append time when absent.
    pub occurred_at: Option<DateTime<Utc>>,
    /// Deduplication key, unique across the whole log.
    pub idempotency_key: Option<String>,
}

impl NewEvent {
    /// Create a new event for `account_id`.
    #[must_use]
    pub fn new(account_id: AccountId, event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            account_id,
            actor_user_id: None,
            event_type: event_type.into(),
            payload,
            occurred_at: None,
            idempotency_key: None,
        }
    }

    /// Build an event from a typed [`Event`].
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the payload cannot be encoded.
    pub fn from_event<E: Event>(account_id: AccountId, event: &E) -> Result<Self, EventError> {
        Ok(Self::new(account_id, event.event_type(), event.to_payload()?))
    }

    /// Set the acting user.
    #[must_use]
    pub const fn with_actor(mut self, actor_user_id: i64) -> Self {
        self.actor_user_id = Some(actor_user_id);
        self
    }

    /// Set the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Set the business time.
    #[must_use]
    pub const fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Check the event is well-formed before it reaches storage.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Validation`] if the event type is blank, the
    /// payload is not a non-empty JSON object, or the idempotency key is blank.
    pub fn validate(&self) -> Result<(), EventStoreError> {
        if self.event_type.trim().is_empty() {
            return Err(EventStoreError::Validation(
                "event_type must not be empty".to_string(),
            ));
        }
        if !self.payload.as_object().is_some_and(|fields| !fields.is_empty()) {
            return Err(EventStoreError::Validation(format!(
                "payload for {} must be a non-empty JSON object",
                self.event_type
            )));
        }
        if self
            .idempotency_key
            .as_deref()
            .is_some_and(|key| key.trim().is_empty())
        {
            return Err(EventStoreError::Validation(
                "idempotency_key must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// A typed domain event that maps onto an `event_type` string and a JSON payload.
///
/// Decoding is total over the log: an `event_type` the implementor does not
/// know yields `Ok(None)` so consumers can skip it.
pub trait Event: Sized + Send + Sync + 'static {
    /// Stable type string written to the log.
    fn event_type(&self) -> &'static str;

    /// Encode the payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if encoding fails.
    fn to_payload(&self) -> Result<Value, EventError>;

    /// Decode a payload for `event_type`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the type is known but
    /// the payload does not match its shape.
    fn from_payload(event_type: &str, payload: &Value) -> Result<Option<Self>, EventError>;

    /// Decode a stored event.
    ///
    /// # Errors
    ///
    /// See [`Event::from_payload`].
    fn decode(event: &StoredEvent) -> Result<Option<Self>, EventError> {
        Self::from_payload(&event.event_type, &event.payload)
    }
}

/// Helper for [`Event::to_payload`] implementations.
///
/// # Errors
///
/// Returns [`EventError::SerializationError`] if `value` cannot be encoded.
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Value, EventError> {
    serde_json::to_value(value).map_err(|e| EventError::SerializationError(e.to_string()))
}

/// Helper for [`Event::from_payload`] implementations.
///
/// # Errors
///
/// Returns [`EventError::DeserializationError`] if `payload` does not match `T`.
pub fn decode_payload<T: serde::de::DeserializeOwned>(
    event_type: &str,
    payload: &Value,
) -> Result<T, EventError> {
    T::deserialize(payload).map_err(|e| EventError::DeserializationError {
        event_type: event_type.to_string(),
        message: e.to_string(),
    })
}

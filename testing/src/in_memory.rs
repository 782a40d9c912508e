//! In-memory ledger for fast, deterministic tests.
//!
//! [`InMemoryLedger`] is a single shared store that plays every storage role:
//! event log, checkpoint store, projection backend and read model source.
//! Clones share state, so one instance can be handed to an engine and kept by
//! the test for assertions.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a panicking test

use chrono::Utc;
use finledger_core::checkpoint::CheckpointStore;
use finledger_core::event::{AccountId, EventId, NewEvent, StoredEvent};
use finledger_core::event_store::{AppendOutcome, EventFilter, EventStore, EventStoreError};
use finledger_core::projection::{ProjectionBackend, ReadModelSource, ReadModelTx, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;

type LockKey = (String, AccountId);
type DocKey = (&'static str, String);

#[derive(Clone, Debug)]
struct Doc {
    account_id: AccountId,
    data: Value,
}

#[derive(Debug, Default)]
struct LedgerState {
    events: Vec<StoredEvent>,
    idempotency_keys: HashMap<String, usize>,
    checkpoints: HashMap<LockKey, EventId>,
    docs: BTreeMap<DocKey, Doc>,
}

#[derive(Debug, Default)]
struct Inner {
    state: RwLock<LedgerState>,
    locks: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Inner {
    async fn lock(&self, projector: &str, account_id: AccountId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap()
            .entry((projector.to_string(), account_id))
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

/// In-memory event log, checkpoint store and read model backend.
///
/// # Example
///
/// ```
/// use finledger_core::event::{AccountId, NewEvent};
/// use finledger_core::event_store::EventStore;
/// use finledger_testing::InMemoryLedger;
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = InMemoryLedger::new();
/// let account = AccountId::new(1);
///
/// let first = ledger
///     .append(NewEvent::new(account, "wallet_created", json!({"wallet_id": 1}))
///         .with_idempotency_key("wallet-create-1-1"))
///     .await?;
/// let again = ledger
///     .append(NewEvent::new(account, "wallet_created", json!({"wallet_id": 1}))
///         .with_idempotency_key("wallet-create-1-1"))
///     .await?;
///
/// assert!(again.is_duplicate());
/// assert_eq!(first.event().id, again.event().id);
/// assert_eq!(ledger.event_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryLedger {
    inner: Arc<Inner>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored event, in id order.
    #[must_use]
    pub fn events(&self) -> Vec<StoredEvent> {
        self.inner.state.read().unwrap().events.clone()
    }

    /// Total number of stored events across accounts.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.inner.state.read().unwrap().events.len()
    }

    /// Committed checkpoint, without taking the projector lock.
    #[must_use]
    pub fn checkpoint(&self, projector: &str, account_id: AccountId) -> EventId {
        self.inner
            .state
            .read()
            .unwrap()
            .checkpoints
            .get(&(projector.to_string(), account_id))
            .copied()
            .unwrap_or_default()
    }

    /// Number of committed rows of `model`, across accounts.
    #[must_use]
    pub fn row_count(&self, model: &str) -> usize {
        self.inner
            .state
            .read()
            .unwrap()
            .docs
            .keys()
            .filter(|(m, _)| *m == model)
            .count()
    }

    /// Committed rows of every model for `account_id`, keyed by `(model, row_key)`.
    ///
    /// Useful for comparing whole read model states.
    #[must_use]
    pub fn snapshot(&self, account_id: AccountId) -> BTreeMap<(String, String), Value> {
        self.inner
            .state
            .read()
            .unwrap()
            .docs
            .iter()
            .filter(|(_, doc)| doc.account_id == account_id)
            .map(|((model, key), doc)| (((*model).to_string(), key.clone()), doc.data.clone()))
            .collect()
    }

    fn committed_docs(&self, model: &str, account_id: AccountId) -> Vec<Value> {
        self.inner
            .state
            .read()
            .unwrap()
            .docs
            .iter()
            .filter(|((m, _), doc)| *m == model && doc.account_id == account_id)
            .map(|(_, doc)| doc.data.clone())
            .collect()
    }
}

impl EventStore for InMemoryLedger {
    fn append(
        &self,
        event: NewEvent,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<AppendOutcome, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            event.validate()?;
            let mut state = self.inner.state.write().unwrap();

            if let Some(key) = &event.idempotency_key {
                if let Some(&index) = state.idempotency_keys.get(key) {
                    return Ok(AppendOutcome::Duplicate(state.events[index].clone()));
                }
            }

            let now = Utc::now();
            let index = state.events.len();
            #[allow(clippy::cast_possible_wrap)]
            let stored = StoredEvent {
                id: EventId::new(index as i64 + 1),
                account_id: event.account_id,
                actor_user_id: event.actor_user_id,
                event_type: event.event_type,
                payload: event.payload,
                occurred_at: event.occurred_at.unwrap_or(now),
                created_at: now,
                idempotency_key: event.idempotency_key,
            };
            if let Some(key) = &stored.idempotency_key {
                state.idempotency_keys.insert(key.clone(), index);
            }
            state.events.push(stored.clone());
            Ok(AppendOutcome::Appended(stored))
        })
    }

    fn list_since(
        &self,
        account_id: AccountId,
        after: EventId,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<Vec<StoredEvent>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            let state = self.inner.state.read().unwrap();
            let matching = state
                .events
                .iter()
                .filter(|e| e.account_id == account_id && e.id > after)
                .filter(|e| filter.matches(&e.event_type))
                .take(filter.limit.unwrap_or(usize::MAX))
                .cloned()
                .collect();
            Ok(matching)
        })
    }

    fn get_event(
        &self,
        id: EventId,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<Option<StoredEvent>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            let state = self.inner.state.read().unwrap();
            Ok(state.events.iter().find(|e| e.id == id).cloned())
        })
    }

    fn count_events(
        &self,
        account_id: AccountId,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<u64, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let state = self.inner.state.read().unwrap();
            Ok(state
                .events
                .iter()
                .filter(|e| e.account_id == account_id)
                .count() as u64)
        })
    }
}

impl CheckpointStore for InMemoryLedger {
    fn get(
        &self,
        projector: &str,
        account_id: AccountId,
    ) -> Pin<Box<dyn Future<Output = Result<EventId>> + Send + '_>> {
        let value = self.checkpoint(projector, account_id);
        Box::pin(async move { Ok(value) })
    }

    fn advance(
        &self,
        projector: &str,
        account_id: AccountId,
        to: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let projector = projector.to_string();
        Box::pin(async move {
            let _guard = self.inner.lock(&projector, account_id).await;
            let mut state = self.inner.state.write().unwrap();
            let current = state
                .checkpoints
                .entry((projector, account_id))
                .or_default();
            *current = (*current).max(to);
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
            let _guard = self.inner.lock(&projector, account_id).await;
            self.inner
                .state
                .write()
                .unwrap()
                .checkpoints
                .insert((projector, account_id), EventId::ZERO);
            Ok(())
        })
    }
}

impl ProjectionBackend for InMemoryLedger {
    type Tx = InMemoryTx;

    async fn begin(&self, projector: &str, account_id: AccountId) -> Result<InMemoryTx> {
        let guard = self.inner.lock(projector, account_id).await;
        let cursor = self.checkpoint(projector, account_id);
        Ok(InMemoryTx {
            inner: Arc::clone(&self.inner),
            key: (projector.to_string(), account_id),
            cursor,
            staged_cursor: None,
            staged_docs: BTreeMap::new(),
            _guard: guard,
        })
    }
}

impl ReadModelSource for InMemoryLedger {
    async fn fetch_doc(&self, model: &'static str, row_key: &str) -> Result<Option<Value>> {
        let state = self.inner.state.read().unwrap();
        Ok(state
            .docs
            .get(&(model, row_key.to_string()))
            .map(|doc| doc.data.clone()))
    }

    async fn fetch_docs(&self, model: &'static str, account_id: AccountId) -> Result<Vec<Value>> {
        Ok(self.committed_docs(model, account_id))
    }
}

/// Unit of work over an [`InMemoryLedger`].
///
/// Writes are staged and become visible on [`ReadModelTx::commit`]. Holds the
/// `(projector, account)` lock until committed, rolled back or dropped.
#[derive(Debug)]
pub struct InMemoryTx {
    inner: Arc<Inner>,
    key: LockKey,
    cursor: EventId,
    staged_cursor: Option<EventId>,
    staged_docs: BTreeMap<DocKey, Option<Doc>>,
    _guard: OwnedMutexGuard<()>,
}

impl ReadModelTx for InMemoryTx {
    fn cursor(&self) -> EventId {
        self.cursor
    }

    async fn load_doc(&mut self, model: &'static str, row_key: &str) -> Result<Option<Value>> {
        let key = (model, row_key.to_string());
        if let Some(staged) = self.staged_docs.get(&key) {
            return Ok(staged.as_ref().map(|doc| doc.data.clone()));
        }
        let state = self.inner.state.read().unwrap();
        Ok(state.docs.get(&key).map(|doc| doc.data.clone()))
    }

    async fn store_doc(
        &mut self,
        model: &'static str,
        row_key: &str,
        account_id: AccountId,
        doc: Value,
    ) -> Result<()> {
        self.staged_docs.insert(
            (model, row_key.to_string()),
            Some(Doc {
                account_id,
                data: doc,
            }),
        );
        Ok(())
    }

    async fn delete_doc(&mut self, model: &'static str, row_key: &str) -> Result<()> {
        self.staged_docs.insert((model, row_key.to_string()), None);
        Ok(())
    }

    async fn list_docs(&mut self, model: &'static str, account_id: AccountId) -> Result<Vec<Value>> {
        let mut merged: BTreeMap<String, Value> = {
            let state = self.inner.state.read().unwrap();
            state
                .docs
                .iter()
                .filter(|((m, _), doc)| *m == model && doc.account_id == account_id)
                .map(|((_, key), doc)| (key.clone(), doc.data.clone()))
                .collect()
        };
        for ((m, key), staged) in &self.staged_docs {
            if *m != model {
                continue;
            }
            match staged {
                Some(doc) if doc.account_id == account_id => {
                    merged.insert(key.clone(), doc.data.clone());
                }
                _ => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    async fn clear_model(&mut self, model: &'static str, account_id: AccountId) -> Result<()> {
        let mut doomed: Vec<String> = {
            let state = self.inner.state.read().unwrap();
            state
                .docs
                .iter()
                .filter(|((m, _), doc)| *m == model && doc.account_id == account_id)
                .map(|((_, key), _)| key.clone())
                .collect()
        };
        doomed.extend(
            self.staged_docs
                .iter()
                .filter(|((m, _), staged)| {
                    *m == model && staged.as_ref().is_some_and(|doc| doc.account_id == account_id)
                })
                .map(|((_, key), _)| key.clone()),
        );
        for key in doomed {
            self.staged_docs.insert((model, key), None);
        }
        Ok(())
    }

    async fn advance(&mut self, to: EventId) -> Result<()> {
        let current = self.staged_cursor.unwrap_or(self.cursor);
        self.staged_cursor = Some(current.max(to));
        Ok(())
    }

    async fn reset_cursor(&mut self) -> Result<()> {
        self.staged_cursor = Some(EventId::ZERO);
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let mut state = self.inner.state.write().unwrap();
        for (key, staged) in self.staged_docs {
            match staged {
                Some(doc) => {
                    state.docs.insert(key, doc);
                }
                None => {
                    state.docs.remove(&key);
                }
            }
        }
        if let Some(cursor) = self.staged_cursor {
            state.checkpoints.insert(self.key, cursor);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(account: i64, event_type: &str) -> NewEvent {
        NewEvent::new(AccountId::new(account), event_type, json!({"n": 1}))
    }

    #[tokio::test]
    async fn ids_increase_in_append_order() {
        let ledger = InMemoryLedger::new();
        let a = ledger.append(event(1, "a")).await.unwrap();
        let b = ledger.append(event(2, "b")).await.unwrap();
        assert!(a.event().id < b.event().id);
    }

    #[tokio::test]
    async fn list_since_scopes_to_account() {
        let ledger = InMemoryLedger::new();
        ledger.append(event(1, "a")).await.unwrap();
        ledger.append(event(2, "a")).await.unwrap();
        ledger.append(event(1, "b")).await.unwrap();

        let events = ledger
            .list_since(AccountId::new(1), EventId::ZERO, EventFilter::all())
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.account_id == AccountId::new(1)));
    }

    #[tokio::test]
    async fn staged_writes_invisible_until_commit() {
        let ledger = InMemoryLedger::new();
        let account = AccountId::new(1);

        let mut tx = ledger.begin("p", account).await.unwrap();
        tx.store_doc("m", "k", account, json!({"v": 1})).await.unwrap();
        assert_eq!(tx.load_doc("m", "k").await.unwrap(), Some(json!({"v": 1})));
        assert!(ledger.fetch_doc("m", "k").await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert_eq!(ledger.fetch_doc("m", "k").await.unwrap(), Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn dropped_tx_discards_writes() {
        let ledger = InMemoryLedger::new();
        let account = AccountId::new(1);

        {
            let mut tx = ledger.begin("p", account).await.unwrap();
            tx.store_doc("m", "k", account, json!({})).await.unwrap();
            tx.advance(EventId::new(5)).await.unwrap();
        }

        assert_eq!(ledger.row_count("m"), 0);
        assert_eq!(ledger.checkpoint("p", account), EventId::ZERO);
    }

    #[tokio::test]
    async fn clear_model_only_touches_one_account() {
        let ledger = InMemoryLedger::new();
        let (one, two) = (AccountId::new(1), AccountId::new(2));

        let mut tx = ledger.begin("p", one).await.unwrap();
        tx.store_doc("m", "1/a", one, json!({})).await.unwrap();
        tx.store_doc("m", "2/a", two, json!({})).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = ledger.begin("p", one).await.unwrap();
        tx.clear_model("m", one).await.unwrap();
        assert!(tx.list_docs("m", one).await.unwrap().is_empty());
        tx.commit().await.unwrap();

        assert_eq!(ledger.row_count("m"), 1);
        assert_eq!(ledger.fetch_docs("m", two).await.unwrap().len(), 1);
    }
}

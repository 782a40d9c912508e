//! Fluent harness for projector tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use crate::InMemoryLedger;
use finledger_core::engine::{EngineConfig, ProjectorEngine};
use finledger_core::event::{AccountId, EventId, NewEvent, StoredEvent};
use finledger_core::event_store::EventStore;
use finledger_core::projection::{Projector, ReadModel, ReadModelSource, Result};
use serde_json::Value;
use std::sync::Arc;

/// Test harness wiring a projector to an [`InMemoryLedger`] for one account.
///
/// # Example
///
/// ```ignore
/// let mut harness = ProjectorTestHarness::new(WalletBalancesProjector, AccountId::new(1));
///
/// harness.given("wallet_created", json!({"wallet_id": 1, "name": "Cash"})).await;
/// harness.run().await?;
///
/// let wallet: WalletBalance = harness.row("1/1").await?.unwrap();
/// ```
pub struct ProjectorTestHarness<P: Projector> {
    ledger: InMemoryLedger,
    engine: ProjectorEngine<P, InMemoryLedger>,
    account_id: AccountId,
}

impl<P: Projector> ProjectorTestHarness<P> {
    /// Create a harness over a fresh ledger.
    #[must_use]
    pub fn new(projector: P, account_id: AccountId) -> Self {
        Self::with_ledger(projector, account_id, InMemoryLedger::new())
    }

    /// Create a harness over an existing ledger.
    #[must_use]
    pub fn with_ledger(projector: P, account_id: AccountId, ledger: InMemoryLedger) -> Self {
        let store: Arc<dyn EventStore> = Arc::new(ledger.clone());
        Self {
            engine: ProjectorEngine::new(projector, store, ledger.clone()),
            ledger,
            account_id,
        }
    }

    /// Use a different batch size.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.engine = self.engine.with_config(config);
        self
    }

    /// Append an event for the harness account.
    pub async fn given(&self, event_type: &str, payload: Value) -> StoredEvent {
        self.given_event(NewEvent::new(self.account_id, event_type, payload))
            .await
    }

    /// Append a prepared event.
    pub async fn given_event(&self, event: NewEvent) -> StoredEvent {
        self.ledger.append(event).await.unwrap().into_event()
    }

    /// Catch the projector up.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub async fn run(&self) -> Result<usize> {
        self.engine.run(self.account_id, None).await
    }

    /// Catch the projector up for a subset of event types.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub async fn run_for(&self, event_types: &[&str]) -> Result<usize> {
        self.engine.run(self.account_id, Some(event_types)).await
    }

    /// Rewind the checkpoint.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub async fn reset(&self) -> Result<()> {
        self.engine.reset(self.account_id).await
    }

    /// Clear, rewind and replay.
    ///
    /// # Errors
    ///
    /// Propagates engine errors.
    pub async fn rebuild(&self) -> Result<usize> {
        self.engine.rebuild(self.account_id).await
    }

    /// Committed checkpoint.
    #[must_use]
    pub fn checkpoint(&self) -> EventId {
        self.ledger.checkpoint(self.engine.name(), self.account_id)
    }

    /// Fetch a committed typed row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be decoded.
    pub async fn row<R: ReadModel>(&self, row_key: &str) -> Result<Option<R>> {
        self.ledger.find::<R>(row_key).await
    }

    /// Every committed typed row of the harness account.
    ///
    /// # Errors
    ///
    /// Returns an error if a row cannot be decoded.
    pub async fn rows<R: ReadModel>(&self) -> Result<Vec<R>> {
        self.ledger.find_all::<R>(self.account_id).await
    }

    /// The backing ledger.
    #[must_use]
    pub const fn ledger(&self) -> &InMemoryLedger {
        &self.ledger
    }

    /// The engine under test.
    #[must_use]
    pub const fn engine(&self) -> &ProjectorEngine<P, InMemoryLedger> {
        &self.engine
    }

    /// The harness account.
    #[must_use]
    pub const fn account_id(&self) -> AccountId {
        self.account_id
    }
}

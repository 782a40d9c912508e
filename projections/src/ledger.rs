//! Use-case façade: build an event, append it, project it inline.
//!
//! Each use case appends one event and then runs the affected projectors for
//! just that event type, so the caller reads its own write. The append is
//! never undone: if projection fails afterwards the fact stays recorded and
//! [`LedgerError::Projection`] tells the caller the read model is behind.
//!
//! # Example
//!
//! ```ignore
//! let ledger = Ledger::new(Arc::new(store), backend);
//!
//! let month = ledger.ensure_budget_month(account, 2025, 3).await?;
//! ledger
//!     .set_budget_line(account, month.budget_month_id, 12, LineKind::Expense, amount, None)
//!     .await?;
//! ```

use crate::budget::{BudgetMonth, BudgetProjector};
use crate::builders::{
    Budget, Task, Transaction, TransactionDraft, Wallet, Wish, WishChanges, WishDraft, keys,
};
use crate::events::{DomainError, DomainEvent, LineKind, Operation, WalletType};
use crate::wallet_balances::WalletBalancesProjector;
use crate::wishes::{self, WishesProjector};
use crate::xp::XpProjector;
use chrono::NaiveDate;
use finledger_core::engine::{EngineConfig, ProjectionRunner, ProjectorEngine, ProjectorOrchestrator};
use finledger_core::event::{AccountId, Event, EventId, NewEvent};
use finledger_core::event_store::{AppendOutcome, EventStore, EventStoreError};
use finledger_core::projection::{ProjectionBackend, ProjectionError, ReadModelSource};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Errors returned by [`Ledger`] use cases.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The request violates a domain rule; nothing was written.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The event could not be appended.
    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    /// The event was recorded but a projector failed afterwards.
    #[error("Event {event_id} recorded but projection failed: {source}")]
    Projection {
        /// The recorded event.
        event_id: EventId,
        /// Projector failure.
        #[source]
        source: ProjectionError,
    },

    /// Reading a read model failed.
    #[error("Failed to read {model}: {source}")]
    ReadModel {
        /// Model being read.
        model: &'static str,
        /// Backend failure.
        #[source]
        source: ProjectionError,
    },

    /// The referenced entity has no read model row.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind.
        entity: &'static str,
        /// Entity identity.
        id: i64,
    },
}

/// Result type for [`Ledger`] use cases.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Event store plus the four projectors over one backend.
pub struct Ledger<B> {
    store: Arc<dyn EventStore>,
    backend: B,
    budget: Arc<dyn ProjectionRunner>,
    wishes: Arc<dyn ProjectionRunner>,
    wallets: Arc<dyn ProjectionRunner>,
    xp: Arc<dyn ProjectionRunner>,
}

impl<B> Ledger<B>
where
    B: ProjectionBackend + ReadModelSource + Clone + 'static,
{
    /// Ledger with default engine settings.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, backend: B) -> Self {
        Self::with_config(store, backend, EngineConfig::default())
    }

    /// Ledger whose engines all use `config`.
    #[must_use]
    pub fn with_config(store: Arc<dyn EventStore>, backend: B, config: EngineConfig) -> Self {
        Self {
            budget: Arc::new(
                ProjectorEngine::new(BudgetProjector, Arc::clone(&store), backend.clone())
                    .with_config(config),
            ),
            wishes: Arc::new(
                ProjectorEngine::new(WishesProjector, Arc::clone(&store), backend.clone())
                    .with_config(config),
            ),
            wallets: Arc::new(
                ProjectorEngine::new(WalletBalancesProjector, Arc::clone(&store), backend.clone())
                    .with_config(config),
            ),
            xp: Arc::new(
                ProjectorEngine::new(XpProjector, Arc::clone(&store), backend.clone())
                    .with_config(config),
            ),
            store,
            backend,
        }
    }

    /// Read model backend, for queries.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Every projector, in a fixed order, for catch-up and maintenance.
    #[must_use]
    pub fn orchestrator(&self) -> ProjectorOrchestrator {
        ProjectorOrchestrator::new()
            .with_runner(Arc::clone(&self.budget))
            .with_runner(Arc::clone(&self.wishes))
            .with_runner(Arc::clone(&self.wallets))
            .with_runner(Arc::clone(&self.xp))
    }

    async fn record(
        &self,
        account_id: AccountId,
        event: DomainEvent,
        idempotency_key: Option<String>,
        projectors: &[&dyn ProjectionRunner],
    ) -> Result<AppendOutcome> {
        let mut new_event = NewEvent::from_event(account_id, &event).map_err(DomainError::from)?;
        if let Some(key) = idempotency_key {
            new_event = new_event.with_idempotency_key(key);
        }

        let outcome = self.store.append(new_event).await?;
        let event_id = outcome.event().id;
        if outcome.is_duplicate() {
            tracing::debug!(event_id = %event_id, account_id = %account_id, "Use case replayed");
        }

        let written = [event.event_type()];
        for projector in projectors {
            projector
                .run_account(account_id, Some(&written[..]))
                .await
                .map_err(|source| LedgerError::Projection { event_id, source })?;
        }
        Ok(outcome)
    }

    /// Open the budget month for `year`/`month` unless it exists, and return it.
    ///
    /// Safe to call concurrently: the month identity is derived from the
    /// calendar month and the append is keyed, so all callers get the same row.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Domain`] for an invalid month or year
    /// - [`LedgerError::EventStore`] if the append fails
    /// - [`LedgerError::Projection`] if the budget projector fails
    pub async fn ensure_budget_month(
        &self,
        account_id: AccountId,
        year: i32,
        month: u32,
    ) -> Result<BudgetMonth> {
        let budget_month_id = Budget::month_id(year, month);
        let event = Budget::create_month(account_id, budget_month_id, year, month)?;
        self.record(
            account_id,
            event,
            Some(keys::budget_month(account_id, year, month)),
            &[self.budget.as_ref()],
        )
        .await?;

        self.backend
            .find::<BudgetMonth>(&BudgetMonth::key(account_id, budget_month_id))
            .await
            .map_err(|source| LedgerError::ReadModel {
                model: "budget_month",
                source,
            })?
            .ok_or(LedgerError::NotFound {
                entity: "budget month",
                id: budget_month_id,
            })
    }

    /// Set the plan for one category of a month.
    ///
    /// The month must already be projected; a line for an unknown month is
    /// refused before anything is appended.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Domain`] for a negative amount
    /// - [`LedgerError::NotFound`] if the month does not exist
    pub async fn set_budget_line(
        &self,
        account_id: AccountId,
        budget_month_id: i64,
        category_id: i64,
        kind: LineKind,
        plan_amount: Decimal,
        note: Option<String>,
    ) -> Result<AppendOutcome> {
        let event = Budget::set_plan(budget_month_id, category_id, kind, plan_amount, note)?;

        self.backend
            .find::<BudgetMonth>(&BudgetMonth::key(account_id, budget_month_id))
            .await
            .map_err(|source| LedgerError::ReadModel {
                model: "budget_month",
                source,
            })?
            .ok_or(LedgerError::NotFound {
                entity: "budget month",
                id: budget_month_id,
            })?;

        self.record(account_id, event, None, &[self.budget.as_ref()])
            .await
    }

    /// Create a wish. Retrying with the same `wish_id` is a no-op.
    ///
    /// # Errors
    ///
    /// See [`Wish::create`] for validation; storage and projection errors as usual.
    pub async fn create_wish(
        &self,
        account_id: AccountId,
        wish_id: i64,
        draft: WishDraft,
    ) -> Result<AppendOutcome> {
        let event = Wish::create(account_id, wish_id, draft)?;
        self.record(
            account_id,
            event,
            Some(keys::wish_create(account_id, wish_id)),
            &[self.wishes.as_ref()],
        )
        .await
    }

    /// Change some fields of a wish.
    ///
    /// # Errors
    ///
    /// See [`Wish::update`] for validation; storage and projection errors as usual.
    pub async fn update_wish(
        &self,
        account_id: AccountId,
        wish_id: i64,
        changes: WishChanges,
    ) -> Result<AppendOutcome> {
        let event = Wish::update(wish_id, changes)?;
        self.record(account_id, event, None, &[self.wishes.as_ref()])
            .await
    }

    /// Mark a wish fulfilled. One-off wishes become `DONE`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] if the wish is unknown.
    pub async fn complete_wish(&self, account_id: AccountId, wish_id: i64) -> Result<AppendOutcome> {
        let wish = self
            .backend
            .find::<wishes::Wish>(&wishes::Wish::key(account_id, wish_id))
            .await
            .map_err(|source| LedgerError::ReadModel {
                model: "wish",
                source,
            })?
            .ok_or(LedgerError::NotFound {
                entity: "wish",
                id: wish_id,
            })?;

        let event = Wish::complete(wish_id, wish.is_recurring);
        self.record(account_id, event, None, &[self.wishes.as_ref()])
            .await
    }

    /// Open a wallet. Retrying with the same `wallet_id` is a no-op.
    ///
    /// # Errors
    ///
    /// See [`Wallet::create`] for validation; storage and projection errors as usual.
    pub async fn create_wallet(
        &self,
        account_id: AccountId,
        wallet_id: i64,
        title: &str,
        currency: &str,
        wallet_type: WalletType,
        initial_balance: Decimal,
    ) -> Result<AppendOutcome> {
        let event = Wallet::create(account_id, wallet_id, title, currency, wallet_type, initial_balance)?;
        self.record(
            account_id,
            event,
            Some(keys::wallet_create(account_id, wallet_id)),
            &[self.wallets.as_ref()],
        )
        .await
    }

    /// Archive a wallet.
    ///
    /// # Errors
    ///
    /// Storage and projection errors.
    pub async fn archive_wallet(&self, account_id: AccountId, wallet_id: i64) -> Result<AppendOutcome> {
        self.record(
            account_id,
            Wallet::archive(wallet_id),
            Some(keys::wallet_archive(account_id, wallet_id)),
            &[self.wallets.as_ref()],
        )
        .await
    }

    /// Record a transaction and update balances and XP.
    ///
    /// Retrying with the same `transaction_id` is a no-op.
    ///
    /// # Errors
    ///
    /// See [`Transaction`] for validation; storage and projection errors as usual.
    pub async fn record_transaction(
        &self,
        account_id: AccountId,
        draft: TransactionDraft,
        operation: Operation,
    ) -> Result<AppendOutcome> {
        let key = keys::transaction(account_id, draft.transaction_id);
        let event = match operation {
            Operation::Income {
                wallet_id,
                category_id,
            } => Transaction::income(account_id, draft, wallet_id, category_id)?,
            Operation::Expense {
                wallet_id,
                category_id,
            } => Transaction::expense(account_id, draft, wallet_id, category_id)?,
            Operation::Transfer {
                from_wallet_id,
                to_wallet_id,
            } => Transaction::transfer(account_id, draft, from_wallet_id, to_wallet_id)?,
        };

        self.record(
            account_id,
            event,
            Some(key),
            &[self.wallets.as_ref(), self.xp.as_ref()],
        )
        .await
    }

    /// Close a task and award XP.
    ///
    /// # Errors
    ///
    /// Storage and projection errors.
    pub async fn complete_task(
        &self,
        account_id: AccountId,
        task_id: i64,
        due_date: Option<NaiveDate>,
    ) -> Result<AppendOutcome> {
        self.record(
            account_id,
            Task::completed(task_id, due_date),
            None,
            &[self.xp.as_ref()],
        )
        .await
    }
}

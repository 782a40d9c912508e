//! Budget plan projector: months and plan lines.

use crate::events::{BudgetLineSet, BudgetMonthCreated, DomainEvent, LineKind, event_types};
use chrono::{DateTime, Utc};
use finledger_core::event::{AccountId, Event, StoredEvent};
use finledger_core::projection::{Projector, ProjectionError, ReadModel, ReadModelTx, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One budgeted month of an account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetMonth {
    /// Month identity.
    pub budget_month_id: i64,
    /// Owning account.
    pub account_id: AccountId,
    /// Budget variant, if any.
    pub budget_variant_id: Option<i64>,
    /// Calendar year.
    pub year: i32,
    /// Calendar month.
    pub month: u32,
    /// Locked months are read-only in the planner.
    pub is_locked: bool,
    /// When the month was opened.
    pub created_at: DateTime<Utc>,
}

impl BudgetMonth {
    /// Row key of a month.
    #[must_use]
    pub fn key(account_id: AccountId, budget_month_id: i64) -> String {
        format!("{account_id}/{budget_month_id}")
    }
}

impl ReadModel for BudgetMonth {
    const MODEL: &'static str = "budget_month";

    fn row_key(&self) -> String {
        Self::key(self.account_id, self.budget_month_id)
    }

    fn account_id(&self) -> AccountId {
        self.account_id
    }
}

/// Planned amount for one category and side of a month.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLine {
    /// Parent month.
    pub budget_month_id: i64,
    /// Owning account, inherited from the month.
    pub account_id: AccountId,
    /// Planned category.
    pub category_id: i64,
    /// Income or expense side.
    pub kind: LineKind,
    /// Planned amount.
    pub plan_amount: Decimal,
    /// Free-form note.
    pub note: Option<String>,
}

impl BudgetLine {
    /// Row key of a line.
    #[must_use]
    pub fn key(account_id: AccountId, budget_month_id: i64, category_id: i64, kind: LineKind) -> String {
        format!("{account_id}/{budget_month_id}/{category_id}/{kind}")
    }
}

impl ReadModel for BudgetLine {
    const MODEL: &'static str = "budget_line";

    fn row_key(&self) -> String {
        Self::key(self.account_id, self.budget_month_id, self.category_id, self.kind)
    }

    fn account_id(&self) -> AccountId {
        self.account_id
    }
}

/// Builds [`BudgetMonth`] and [`BudgetLine`] rows.
///
/// A plan line for a month that was never created fails the batch: the month
/// event must have been skipped, and guessing the owner would misfile the line.
#[derive(Clone, Copy, Debug, Default)]
pub struct BudgetProjector;

impl BudgetProjector {
    async fn month_created<T: ReadModelTx>(
        tx: &mut T,
        account_id: AccountId,
        event: BudgetMonthCreated,
    ) -> Result<()> {
        let key = BudgetMonth::key(account_id, event.budget_month_id);
        if tx.load::<BudgetMonth>(&key).await?.is_some() {
            return Ok(());
        }

        tx.save(&BudgetMonth {
            budget_month_id: event.budget_month_id,
            account_id,
            budget_variant_id: event.budget_variant_id,
            year: event.year,
            month: event.month,
            is_locked: false,
            created_at: event.created_at,
        })
        .await
    }

    async fn line_set<T: ReadModelTx>(
        tx: &mut T,
        account_id: AccountId,
        event: BudgetLineSet,
    ) -> Result<()> {
        let month_key = BudgetMonth::key(account_id, event.budget_month_id);
        if tx.load::<BudgetMonth>(&month_key).await?.is_none() {
            return Err(ProjectionError::EventProcessing(format!(
                "budget month {} not found for account {account_id}",
                event.budget_month_id
            )));
        }

        tx.save(&BudgetLine {
            budget_month_id: event.budget_month_id,
            account_id,
            category_id: event.category_id,
            kind: event.kind,
            plan_amount: event.plan_amount,
            note: event.note,
        })
        .await
    }
}

impl Projector for BudgetProjector {
    fn name(&self) -> &'static str {
        "budget"
    }

    fn handled_event_types(&self) -> &'static [&'static str] {
        &[event_types::BUDGET_MONTH_CREATED, event_types::BUDGET_LINE_SET]
    }

    async fn apply<T: ReadModelTx>(&self, tx: &mut T, event: &StoredEvent) -> Result<()> {
        match DomainEvent::decode(event)? {
            Some(DomainEvent::BudgetMonthCreated(created)) => {
                Self::month_created(tx, event.account_id, created).await
            }
            Some(DomainEvent::BudgetLineSet(line)) => Self::line_set(tx, event.account_id, line).await,
            _ => Ok(()),
        }
    }

    async fn clear<T: ReadModelTx>(&self, tx: &mut T, account_id: AccountId) -> Result<()> {
        tx.clear_model(BudgetLine::MODEL, account_id).await?;
        tx.clear_model(BudgetMonth::MODEL, account_id).await
    }
}

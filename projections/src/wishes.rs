//! Wishes projector.

use crate::events::{
    DomainEvent, WishCompleted, WishCreated, WishStatus, WishType, WishUpdated, event_types,
};
use chrono::{DateTime, NaiveDate, Utc};
use finledger_core::event::{AccountId, Event, StoredEvent};
use finledger_core::projection::{Projector, ReadModel, ReadModelTx, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A wish as shown in the backlog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wish {
    /// Wish identity.
    pub wish_id: i64,
    /// Owning account.
    pub account_id: AccountId,
    /// Short title.
    pub title: String,
    /// Kind of wish.
    pub wish_type: WishType,
    /// Current status.
    pub status: WishStatus,
    /// Exact target day.
    pub target_date: Option<NaiveDate>,
    /// Target month as `YYYY-MM`.
    pub target_month: Option<String>,
    /// Rough cost.
    pub estimated_amount: Option<Decimal>,
    /// Whether the wish stays open after completion.
    pub is_recurring: bool,
    /// Free-form notes.
    pub notes: Option<String>,
    /// When the wish was created.
    pub created_at: DateTime<Utc>,
    /// Most recent completion.
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl Wish {
    /// Row key of a wish.
    #[must_use]
    pub fn key(account_id: AccountId, wish_id: i64) -> String {
        format!("{account_id}/{wish_id}")
    }

    fn patch(&mut self, update: WishUpdated) {
        if let Some(title) = update.title {
            self.title = title;
        }
        if let Some(wish_type) = update.wish_type {
            self.wish_type = wish_type;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(target_date) = update.target_date {
            self.target_date = target_date;
        }
        if let Some(target_month) = update.target_month {
            self.target_month = target_month;
        }
        if let Some(estimated_amount) = update.estimated_amount {
            self.estimated_amount = estimated_amount;
        }
        if let Some(is_recurring) = update.is_recurring {
            self.is_recurring = is_recurring;
        }
        if let Some(notes) = update.notes {
            self.notes = notes;
        }
    }
}

impl ReadModel for Wish {
    const MODEL: &'static str = "wish";

    fn row_key(&self) -> String {
        Self::key(self.account_id, self.wish_id)
    }

    fn account_id(&self) -> AccountId {
        self.account_id
    }
}

/// Builds [`Wish`] rows.
///
/// Changes to wishes that do not exist are ignored.
#[derive(Clone, Copy, Debug, Default)]
pub struct WishesProjector;

impl WishesProjector {
    async fn created<T: ReadModelTx>(tx: &mut T, account_id: AccountId, event: WishCreated) -> Result<()> {
        if tx
            .load::<Wish>(&Wish::key(account_id, event.wish_id))
            .await?
            .is_some()
        {
            return Ok(());
        }

        tx.save(&Wish {
            wish_id: event.wish_id,
            account_id,
            title: event.title,
            wish_type: event.wish_type,
            status: event.status,
            target_date: event.target_date,
            target_month: event.target_month,
            estimated_amount: event.estimated_amount,
            is_recurring: event.is_recurring,
            notes: event.notes,
            created_at: event.created_at,
            last_completed_at: None,
        })
        .await
    }

    async fn modify<T: ReadModelTx>(
        tx: &mut T,
        account_id: AccountId,
        wish_id: i64,
        change: impl FnOnce(&mut Wish) + Send,
    ) -> Result<()> {
        let Some(mut wish) = tx.load::<Wish>(&Wish::key(account_id, wish_id)).await? else {
            tracing::debug!(wish_id, account_id = %account_id, "Change for unknown wish ignored");
            return Ok(());
        };
        change(&mut wish);
        tx.save(&wish).await
    }
}

impl Projector for WishesProjector {
    fn name(&self) -> &'static str {
        "wishes"
    }

    fn handled_event_types(&self) -> &'static [&'static str] {
        &[
            event_types::WISH_CREATED,
            event_types::WISH_UPDATED,
            event_types::WISH_COMPLETED,
            event_types::WISH_CANCELED,
        ]
    }

    async fn apply<T: ReadModelTx>(&self, tx: &mut T, event: &StoredEvent) -> Result<()> {
        let account_id = event.account_id;
        match DomainEvent::decode(event)? {
            Some(DomainEvent::WishCreated(created)) => Self::created(tx, account_id, created).await,
            Some(DomainEvent::WishUpdated(update)) => {
                Self::modify(tx, account_id, update.wish_id, |wish| wish.patch(update)).await
            }
            Some(DomainEvent::WishCompleted(WishCompleted {
                wish_id,
                status,
                last_completed_at,
            })) => {
                Self::modify(tx, account_id, wish_id, move |wish| {
                    wish.last_completed_at = Some(last_completed_at);
                    if let Some(status) = status {
                        wish.status = status;
                    }
                })
                .await
            }
            Some(DomainEvent::WishCanceled(canceled)) => {
                Self::modify(tx, account_id, canceled.wish_id, |wish| {
                    wish.status = WishStatus::Canceled;
                })
                .await
            }
            _ => Ok(()),
        }
    }

    async fn clear<T: ReadModelTx>(&self, tx: &mut T, account_id: AccountId) -> Result<()> {
        tx.clear_model(Wish::MODEL, account_id).await
    }
}

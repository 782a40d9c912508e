//! Experience points for completed tasks, habits, transactions and goals.
//!
//! | Event                        | XP                                    |
//! |------------------------------|---------------------------------------|
//! | `task_completed`             | 10, or 12 when closed before due date |
//! | `task_occurrence_completed`  | 10                                    |
//! | `habit_occurrence_completed` | 3                                     |
//! | `transaction_created`        | 5                                     |
//! | `goal_achieved`              | 200                                   |
//!
//! Level `N` takes `100 * N²` XP to complete, so level 2 starts at 100 XP,
//! level 3 at 500 and level 4 at 1400.
//!
//! Each source event yields at most one [`XpAward`]; the award row is checked
//! before [`XpState`] is touched, and both are written in the same unit of
//! work, so `total_xp` always equals the sum of the awards.

use crate::events::{DomainEvent, TaskCompleted, event_types};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use finledger_core::event::{AccountId, Event, EventId, StoredEvent};
use finledger_core::projection::{Projector, ReadModel, ReadModelTx, Result};
use serde::{Deserialize, Serialize};

/// XP for closing a task.
pub const BASE_TASK_COMPLETED_XP: i64 = 10;

/// Extra XP for closing a task before its due date.
pub const BONUS_EARLY_COMPLETE_XP: i64 = 2;

/// Due dates are calendar days in Moscow time.
const MSK_OFFSET_HOURS: i64 = 3;

/// XP for closing a task on `completed_on` (a Moscow calendar day).
///
/// Closing strictly before the due date earns the bonus.
#[must_use]
pub fn preview_task_xp(due_date: Option<NaiveDate>, completed_on: NaiveDate) -> i64 {
    match due_date {
        Some(due) if completed_on < due => BASE_TASK_COMPLETED_XP + BONUS_EARLY_COMPLETE_XP,
        _ => BASE_TASK_COMPLETED_XP,
    }
}

/// Moscow calendar day of an instant.
#[must_use]
pub fn msk_date(at: DateTime<Utc>) -> NaiveDate {
    (at.naive_utc() + TimeDelta::hours(MSK_OFFSET_HOURS)).date()
}

/// Level standing for a total.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Level {
    /// Current level, starting at 1.
    pub level: i64,
    /// XP earned inside the current level.
    pub current_level_xp: i64,
    /// XP the current level takes in total.
    pub xp_to_next_level: i64,
}

/// Level standing for `total_xp`.
#[must_use]
pub const fn compute_level(total_xp: i64) -> Level {
    let mut level = 1;
    let mut accumulated = 0;
    while total_xp >= accumulated + 100 * level * level {
        accumulated += 100 * level * level;
        level += 1;
    }
    Level {
        level,
        current_level_xp: total_xp - accumulated,
        xp_to_next_level: 100 * level * level,
    }
}

/// Running XP total and level of an account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpState {
    /// Owning account.
    pub account_id: AccountId,
    /// Sum of all awards.
    pub total_xp: i64,
    /// Current level.
    pub level: i64,
    /// XP earned inside the current level.
    pub current_level_xp: i64,
    /// XP the current level takes in total.
    pub xp_to_next_level: i64,
}

impl XpState {
    /// Row key of an account's state.
    #[must_use]
    pub fn key(account_id: AccountId) -> String {
        account_id.to_string()
    }

    fn empty(account_id: AccountId) -> Self {
        Self::with_total(account_id, 0)
    }

    fn with_total(account_id: AccountId, total_xp: i64) -> Self {
        let Level {
            level,
            current_level_xp,
            xp_to_next_level,
        } = compute_level(total_xp);
        Self {
            account_id,
            total_xp,
            level,
            current_level_xp,
            xp_to_next_level,
        }
    }
}

impl ReadModel for XpState {
    const MODEL: &'static str = "xp_state";

    fn row_key(&self) -> String {
        Self::key(self.account_id)
    }

    fn account_id(&self) -> AccountId {
        self.account_id
    }
}

/// XP granted for one source event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpAward {
    /// Event the XP was granted for.
    pub source_event_id: EventId,
    /// Owning account.
    pub account_id: AccountId,
    /// Granted amount.
    pub xp_amount: i64,
    /// Source event type.
    pub reason: String,
}

impl XpAward {
    /// Row key of an award.
    #[must_use]
    pub fn key(account_id: AccountId, source_event_id: EventId) -> String {
        format!("{account_id}/{source_event_id}")
    }
}

impl ReadModel for XpAward {
    const MODEL: &'static str = "xp_award";

    fn row_key(&self) -> String {
        Self::key(self.account_id, self.source_event_id)
    }

    fn account_id(&self) -> AccountId {
        self.account_id
    }
}

/// Builds [`XpState`] and [`XpAward`] rows.
#[derive(Clone, Copy, Debug, Default)]
pub struct XpProjector;

impl XpProjector {
    /// XP earned by a decoded event, if it earns any.
    #[must_use]
    pub fn xp_for(event: &DomainEvent, occurred_at: DateTime<Utc>) -> Option<i64> {
        match event {
            DomainEvent::TaskCompleted(TaskCompleted { due_date, .. }) => {
                Some(preview_task_xp(*due_date, msk_date(occurred_at)))
            }
            DomainEvent::TaskOccurrenceCompleted(_) => Some(10),
            DomainEvent::HabitOccurrenceCompleted(_) => Some(3),
            DomainEvent::TransactionCreated(_) => Some(5),
            DomainEvent::GoalAchieved(_) => Some(200),
            _ => None,
        }
    }
}

impl Projector for XpProjector {
    fn name(&self) -> &'static str {
        "xp"
    }

    fn handled_event_types(&self) -> &'static [&'static str] {
        &[
            event_types::TASK_COMPLETED,
            event_types::TASK_OCCURRENCE_COMPLETED,
            event_types::HABIT_OCCURRENCE_COMPLETED,
            event_types::TRANSACTION_CREATED,
            event_types::GOAL_ACHIEVED,
        ]
    }

    async fn apply<T: ReadModelTx>(&self, tx: &mut T, event: &StoredEvent) -> Result<()> {
        let Some(xp_amount) = DomainEvent::decode(event)?
            .as_ref()
            .and_then(|decoded| Self::xp_for(decoded, event.occurred_at))
        else {
            return Ok(());
        };

        let account_id = event.account_id;
        let award_key = XpAward::key(account_id, event.id);
        if tx.load::<XpAward>(&award_key).await?.is_some() {
            return Ok(());
        }

        tx.save(&XpAward {
            source_event_id: event.id,
            account_id,
            xp_amount,
            reason: event.event_type.clone(),
        })
        .await?;

        let state = tx
            .load::<XpState>(&XpState::key(account_id))
            .await?
            .unwrap_or_else(|| XpState::empty(account_id));
        let updated = XpState::with_total(account_id, state.total_xp + xp_amount);

        if updated.level > state.level {
            tracing::info!(account_id = %account_id, level = updated.level, "Level up");
        }
        tx.save(&updated).await
    }

    async fn clear<T: ReadModelTx>(&self, tx: &mut T, account_id: AccountId) -> Result<()> {
        tx.clear_model(XpAward::MODEL, account_id).await?;
        tx.clear_model(XpState::MODEL, account_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests can unwrap
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn level_thresholds() {
        let cases = [
            (0, (1, 0, 100)),
            (99, (1, 99, 100)),
            (100, (2, 0, 400)),
            (300, (2, 200, 400)),
            (500, (3, 0, 900)),
            (1400, (4, 0, 1600)),
        ];
        for (total, (level, current, next)) in cases {
            assert_eq!(
                compute_level(total),
                Level {
                    level,
                    current_level_xp: current,
                    xp_to_next_level: next
                },
                "total {total}"
            );
        }
    }

    #[test]
    fn early_completion_bonus() {
        let due = day(2025, 3, 10);
        assert_eq!(preview_task_xp(Some(due), day(2025, 3, 9)), 12);
        assert_eq!(preview_task_xp(Some(due), due), 10);
        assert_eq!(preview_task_xp(Some(due), day(2025, 3, 11)), 10);
        assert_eq!(preview_task_xp(None, due), 10);
    }

    #[test]
    fn completion_day_is_moscow_time() {
        let late_evening_utc = DateTime::parse_from_rfc3339("2025-03-09T22:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(msk_date(late_evening_utc), day(2025, 3, 10));

        let event = DomainEvent::TaskCompleted(TaskCompleted {
            task_id: 1,
            due_date: Some(day(2025, 3, 10)),
        });
        // 22:30 UTC on the 9th is already the due date in Moscow.
        assert_eq!(XpProjector::xp_for(&event, late_evening_utc), Some(10));
    }
}

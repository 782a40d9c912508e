//! Domain events recorded in the ledger log.
//!
//! Every event type has a payload struct whose JSON shape is what lands in
//! `events.payload`. [`DomainEvent`] is the closed set of all of them and
//! implements [`Event`], so projectors decode a stored event with
//! `DomainEvent::decode(&event)?`.
//!
//! Money fields are [`Decimal`] and serialize as strings (`"1500.00"`).

use chrono::{DateTime, NaiveDate, Utc};
use finledger_core::event::{AccountId, Event, EventError, decode_payload, encode_payload};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// `event_type` strings written to the log.
pub mod event_types {
    /// A budget month was opened.
    pub const BUDGET_MONTH_CREATED: &str = "budget_month_created";
    /// A budget plan line was set.
    pub const BUDGET_LINE_SET: &str = "budget_line_set";
    /// A wish was created.
    pub const WISH_CREATED: &str = "wish_created";
    /// Some wish fields changed.
    pub const WISH_UPDATED: &str = "wish_updated";
    /// A wish was fulfilled.
    pub const WISH_COMPLETED: &str = "wish_completed";
    /// A wish was dropped.
    pub const WISH_CANCELED: &str = "wish_canceled";
    /// A wallet was opened.
    pub const WALLET_CREATED: &str = "wallet_created";
    /// A wallet was renamed.
    pub const WALLET_RENAMED: &str = "wallet_renamed";
    /// A wallet was archived.
    pub const WALLET_ARCHIVED: &str = "wallet_archived";
    /// A wallet was restored from the archive.
    pub const WALLET_UNARCHIVED: &str = "wallet_unarchived";
    /// Money moved in, out of or between wallets.
    pub const TRANSACTION_CREATED: &str = "transaction_created";
    /// A one-off task was closed.
    pub const TASK_COMPLETED: &str = "task_completed";
    /// One occurrence of a recurring task was closed.
    pub const TASK_OCCURRENCE_COMPLETED: &str = "task_occurrence_completed";
    /// One occurrence of a habit was checked off.
    pub const HABIT_OCCURRENCE_COMPLETED: &str = "habit_occurrence_completed";
    /// A savings goal was reached.
    pub const GOAL_ACHIEVED: &str = "goal_achieved";
}

/// Errors raised while building domain events.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    /// Arguments violate a domain rule.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The payload could not be encoded.
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl From<EventError> for DomainError {
    fn from(error: EventError) -> Self {
        Self::Encoding(error.to_string())
    }
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// Wire representation.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(DomainError::Validation(format!(
                        "invalid {}: {other}",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

string_enum! {
    /// Side of the budget a plan line belongs to.
    LineKind {
        /// Planned earnings.
        Income => "INCOME",
        /// Planned spending.
        Expense => "EXPENSE",
    }
}

string_enum! {
    /// What a wish is about.
    WishType {
        /// Something to buy.
        Purchase => "PURCHASE",
        /// Something to attend.
        Event => "EVENT",
        /// Somewhere to go.
        Place => "PLACE",
        /// Anything else.
        Other => "OTHER",
    }
}

string_enum! {
    /// Lifecycle of a wish.
    WishStatus {
        /// Just written down.
        Idea => "IDEA",
        /// Being weighed.
        Considering => "CONSIDERING",
        /// Scheduled.
        Planned => "PLANNED",
        /// Fulfilled.
        Done => "DONE",
        /// Dropped.
        Canceled => "CANCELED",
    }
}

string_enum! {
    /// Wallet category; decides the allowed sign of the initial balance.
    WalletType {
        /// Everyday wallet, balance starts at zero or above.
        Regular => "REGULAR",
        /// Debt wallet, balance starts at zero or below.
        Credit => "CREDIT",
        /// Savings wallet, balance starts at zero or above.
        Savings => "SAVINGS",
    }
}

impl Default for WalletType {
    fn default() -> Self {
        Self::Regular
    }
}

/// Payload of `budget_month_created`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetMonthCreated {
    /// Month identity, unique per account.
    pub budget_month_id: i64,
    /// Owning account.
    pub account_id: AccountId,
    /// Budget variant the month belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_variant_id: Option<i64>,
    /// Calendar year.
    pub year: i32,
    /// Calendar month, `1..=12`.
    pub month: u32,
    /// When the month was opened.
    pub created_at: DateTime<Utc>,
}

/// Payload of `budget_line_set`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLineSet {
    /// Parent month.
    pub budget_month_id: i64,
    /// Category being planned.
    pub category_id: i64,
    /// Income or expense side.
    pub kind: LineKind,
    /// Planned amount, never negative.
    pub plan_amount: Decimal,
    /// Free-form note.
    #[serde(default)]
    pub note: Option<String>,
    /// When the plan was set.
    pub updated_at: DateTime<Utc>,
}

/// Payload of `wish_created`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishCreated {
    /// Wish identity.
    pub wish_id: i64,
    /// Owning account.
    pub account_id: AccountId,
    /// Short title.
    pub title: String,
    /// Kind of wish.
    pub wish_type: WishType,
    /// Initial status.
    pub status: WishStatus,
    /// Exact target day.
    #[serde(default)]
    pub target_date: Option<NaiveDate>,
    /// Target month as `YYYY-MM`.
    #[serde(default)]
    pub target_month: Option<String>,
    /// Rough cost.
    #[serde(default)]
    pub estimated_amount: Option<Decimal>,
    /// Recurring wishes stay open after completion.
    #[serde(default)]
    pub is_recurring: bool,
    /// Free-form notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// When the wish was created.
    pub created_at: DateTime<Utc>,
}

/// Payload of `wish_updated`.
///
/// Only fields present in the JSON are changed. Nullable fields use
/// `Option<Option<_>>`: absent means "unchanged", `null` means "clear".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishUpdated {
    /// Wish identity.
    pub wish_id: i64,
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wish_type: Option<WishType>,
    /// New status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WishStatus>,
    /// New or cleared target day.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub target_date: Option<Option<NaiveDate>>,
    /// New or cleared target month.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub target_month: Option<Option<String>>,
    /// New or cleared cost estimate.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub estimated_amount: Option<Option<Decimal>>,
    /// New recurrence flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_recurring: Option<bool>,
    /// New or cleared notes.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
    /// When the change was made.
    pub updated_at: DateTime<Utc>,
}

/// Distinguishes a present `null` from an absent field.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Payload of `wish_completed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishCompleted {
    /// Wish identity.
    pub wish_id: i64,
    /// Status to move to; absent for recurring wishes, which stay open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WishStatus>,
    /// Completion time.
    pub last_completed_at: DateTime<Utc>,
}

/// Payload of `wish_canceled`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishCanceled {
    /// Wish identity.
    pub wish_id: i64,
    /// Cancellation time.
    pub canceled_at: DateTime<Utc>,
}

/// Payload of `wallet_created`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletCreated {
    /// Wallet identity.
    pub wallet_id: i64,
    /// Owning account.
    pub account_id: AccountId,
    /// Display name.
    pub title: String,
    /// ISO 4217 code, e.g. `"RUB"`.
    pub currency: String,
    /// Wallet category.
    #[serde(default)]
    pub wallet_type: WalletType,
    /// Opening balance.
    #[serde(default)]
    pub initial_balance: Decimal,
    /// When the wallet was opened.
    pub created_at: DateTime<Utc>,
}

/// Payload of `wallet_renamed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRenamed {
    /// Wallet identity.
    pub wallet_id: i64,
    /// New display name.
    pub title: String,
    /// When the rename happened.
    pub updated_at: DateTime<Utc>,
}

/// Payload of `wallet_archived`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletArchived {
    /// Wallet identity.
    pub wallet_id: i64,
    /// When the wallet was archived.
    pub archived_at: DateTime<Utc>,
}

/// Payload of `wallet_unarchived`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletUnarchived {
    /// Wallet identity.
    pub wallet_id: i64,
    /// When the wallet was restored.
    pub unarchived_at: DateTime<Utc>,
}

/// Direction of a transaction, tagged by `operation_type` in the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// Money into a wallet.
    Income {
        /// Credited wallet.
        wallet_id: i64,
        /// Income category.
        #[serde(default)]
        category_id: Option<i64>,
    },
    /// Money out of a wallet.
    Expense {
        /// Debited wallet.
        wallet_id: i64,
        /// Expense category.
        #[serde(default)]
        category_id: Option<i64>,
    },
    /// Money between two wallets of the account.
    Transfer {
        /// Debited wallet.
        from_wallet_id: i64,
        /// Credited wallet.
        to_wallet_id: i64,
    },
}

impl Operation {
    /// Signed amounts per wallet for a transaction of `amount`.
    #[must_use]
    pub fn postings(&self, amount: Decimal) -> Vec<(i64, Decimal)> {
        match *self {
            Self::Income { wallet_id, .. } => vec![(wallet_id, amount)],
            Self::Expense { wallet_id, .. } => vec![(wallet_id, -amount)],
            Self::Transfer {
                from_wallet_id,
                to_wallet_id,
            } => vec![(from_wallet_id, -amount), (to_wallet_id, amount)],
        }
    }
}

/// Payload of `transaction_created`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCreated {
    /// Transaction identity.
    pub transaction_id: i64,
    /// Owning account.
    pub account_id: AccountId,
    /// Direction and wallets.
    #[serde(flatten)]
    pub operation: Operation,
    /// Positive amount.
    pub amount: Decimal,
    /// ISO 4217 code.
    pub currency: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Business time of the transaction.
    pub occurred_at: DateTime<Utc>,
}

/// Payload of `task_completed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompleted {
    /// Task identity.
    pub task_id: i64,
    /// Deadline the task had when it was closed.
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

/// Payload of `task_occurrence_completed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOccurrenceCompleted {
    /// Recurring task identity.
    pub task_id: i64,
    /// Day of the occurrence.
    pub occurrence_date: NaiveDate,
}

/// Payload of `habit_occurrence_completed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitOccurrenceCompleted {
    /// Habit identity.
    pub habit_id: i64,
    /// Day of the occurrence.
    pub occurrence_date: NaiveDate,
}

/// Payload of `goal_achieved`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalAchieved {
    /// Goal identity.
    pub goal_id: i64,
}

/// Every event the ledger records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainEvent {
    /// See [`BudgetMonthCreated`].
    BudgetMonthCreated(BudgetMonthCreated),
    /// See [`BudgetLineSet`].
    BudgetLineSet(BudgetLineSet),
    /// See [`WishCreated`].
    WishCreated(WishCreated),
    /// See [`WishUpdated`].
    WishUpdated(WishUpdated),
    /// See [`WishCompleted`].
    WishCompleted(WishCompleted),
    /// See [`WishCanceled`].
    WishCanceled(WishCanceled),
    /// See [`WalletCreated`].
    WalletCreated(WalletCreated),
    /// See [`WalletRenamed`].
    WalletRenamed(WalletRenamed),
    /// See [`WalletArchived`].
    WalletArchived(WalletArchived),
    /// See [`WalletUnarchived`].
    WalletUnarchived(WalletUnarchived),
    /// See [`TransactionCreated`].
    TransactionCreated(TransactionCreated),
    /// See [`TaskCompleted`].
    TaskCompleted(TaskCompleted),
    /// See [`TaskOccurrenceCompleted`].
    TaskOccurrenceCompleted(TaskOccurrenceCompleted),
    /// See [`HabitOccurrenceCompleted`].
    HabitOccurrenceCompleted(HabitOccurrenceCompleted),
    /// See [`GoalAchieved`].
    GoalAchieved(GoalAchieved),
}

impl Event for DomainEvent {
    fn event_type(&self) -> &'static str {
        use event_types as t;
        match self {
            Self::BudgetMonthCreated(_) => t::BUDGET_MONTH_CREATED,
            Self::BudgetLineSet(_) => t::BUDGET_LINE_SET,
            Self::WishCreated(_) => t::WISH_CREATED,
            Self::WishUpdated(_) => t::WISH_UPDATED,
            Self::WishCompleted(_) => t::WISH_COMPLETED,
            Self::WishCanceled(_) => t::WISH_CANCELED,
            Self::WalletCreated(_) => t::WALLET_CREATED,
            Self::WalletRenamed(_) => t::WALLET_RENAMED,
            Self::WalletArchived(_) => t::WALLET_ARCHIVED,
            Self::WalletUnarchived(_) => t::WALLET_UNARCHIVED,
            Self::TransactionCreated(_) => t::TRANSACTION_CREATED,
            Self::TaskCompleted(_) => t::TASK_COMPLETED,
            Self::TaskOccurrenceCompleted(_) => t::TASK_OCCURRENCE_COMPLETED,
            Self::HabitOccurrenceCompleted(_) => t::HABIT_OCCURRENCE_COMPLETED,
            Self::GoalAchieved(_) => t::GOAL_ACHIEVED,
        }
    }

    fn to_payload(&self) -> Result<Value, EventError> {
        match self {
            Self::BudgetMonthCreated(p) => encode_payload(p),
            Self::BudgetLineSet(p) => encode_payload(p),
            Self::WishCreated(p) => encode_payload(p),
            Self::WishUpdated(p) => encode_payload(p),
            Self::WishCompleted(p) => encode_payload(p),
            Self::WishCanceled(p) => encode_payload(p),
            Self::WalletCreated(p) => encode_payload(p),
            Self::WalletRenamed(p) => encode_payload(p),
            Self::WalletArchived(p) => encode_payload(p),
            Self::WalletUnarchived(p) => encode_payload(p),
            Self::TransactionCreated(p) => encode_payload(p),
            Self::TaskCompleted(p) => encode_payload(p),
            Self::TaskOccurrenceCompleted(p) => encode_payload(p),
            Self::HabitOccurrenceCompleted(p) => encode_payload(p),
            Self::GoalAchieved(p) => encode_payload(p),
        }
    }

    fn from_payload(event_type: &str, payload: &Value) -> Result<Option<Self>, EventError> {
        use event_types as t;
        let event = match event_type {
            t::BUDGET_MONTH_CREATED => Self::BudgetMonthCreated(decode_payload(event_type, payload)?),
            t::BUDGET_LINE_SET => Self::BudgetLineSet(decode_payload(event_type, payload)?),
            t::WISH_CREATED => Self::WishCreated(decode_payload(event_type, payload)?),
            t::WISH_UPDATED => Self::WishUpdated(decode_payload(event_type, payload)?),
            t::WISH_COMPLETED => Self::WishCompleted(decode_payload(event_type, payload)?),
            t::WISH_CANCELED => Self::WishCanceled(decode_payload(event_type, payload)?),
            t::WALLET_CREATED => Self::WalletCreated(decode_payload(event_type, payload)?),
            t::WALLET_RENAMED => Self::WalletRenamed(decode_payload(event_type, payload)?),
            t::WALLET_ARCHIVED => Self::WalletArchived(decode_payload(event_type, payload)?),
            t::WALLET_UNARCHIVED => Self::WalletUnarchived(decode_payload(event_type, payload)?),
            t::TRANSACTION_CREATED => {
                Self::TransactionCreated(decode_payload(event_type, payload)?)
            }
            t::TASK_COMPLETED => Self::TaskCompleted(decode_payload(event_type, payload)?),
            t::TASK_OCCURRENCE_COMPLETED => {
                Self::TaskOccurrenceCompleted(decode_payload(event_type, payload)?)
            }
            t::HABIT_OCCURRENCE_COMPLETED => {
                Self::HabitOccurrenceCompleted(decode_payload(event_type, payload)?)
            }
            t::GOAL_ACHIEVED => Self::GoalAchieved(decode_payload(event_type, payload)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

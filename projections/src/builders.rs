//! Validated constructors for [`DomainEvent`]s.
//!
//! Builders check the arguments against domain rules and stamp the current
//! time. They never touch storage; appending is the caller's job.
//!
//! # Example
//!
//! ```ignore
//! let event = Wallet::create(account, 7, "Cash", "RUB", WalletType::Regular, Decimal::ZERO)?;
//! let new_event = NewEvent::from_event(account, &event)?
//!     .with_idempotency_key(keys::wallet_create(account, 7));
//! ```

use crate::events::{
    BudgetLineSet, BudgetMonthCreated, DomainError, DomainEvent, GoalAchieved,
    HabitOccurrenceCompleted, LineKind, Operation, TaskCompleted, TaskOccurrenceCompleted,
    TransactionCreated, WalletArchived, WalletCreated, WalletRenamed, WalletType,
    WalletUnarchived, WishCanceled, WishCompleted, WishCreated, WishStatus, WishType, WishUpdated,
};
use chrono::{DateTime, NaiveDate, Utc};
use finledger_core::event::AccountId;
use rust_decimal::Decimal;

type Result<T> = std::result::Result<T, DomainError>;

fn invalid(message: impl Into<String>) -> DomainError {
    DomainError::Validation(message.into())
}

fn require_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(invalid("title must not be empty"));
    }
    Ok(title.to_string())
}

fn require_currency(currency: &str) -> Result<String> {
    if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(invalid(format!(
            "currency must be a 3-letter ISO code, got {currency:?}"
        )));
    }
    Ok(currency.to_string())
}

fn require_target_month(month: &str) -> Result<()> {
    NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| invalid(format!("target_month must be YYYY-MM, got {month:?}")))
}

/// Idempotency keys for appends that must happen at most once.
///
/// Keys are unique across the whole log, so every key embeds the account.
pub mod keys {
    use finledger_core::event::AccountId;

    /// Key for opening a budget month.
    #[must_use]
    pub fn budget_month(account_id: AccountId, year: i32, month: u32) -> String {
        format!("budget-month-{account_id}-{year}-{month}")
    }

    /// Key for creating a wish.
    #[must_use]
    pub fn wish_create(account_id: AccountId, wish_id: i64) -> String {
        format!("wish-create-{account_id}-{wish_id}")
    }

    /// Key for creating a wallet.
    #[must_use]
    pub fn wallet_create(account_id: AccountId, wallet_id: i64) -> String {
        format!("wallet-create-{account_id}-{wallet_id}")
    }

    /// Key for archiving a wallet.
    #[must_use]
    pub fn wallet_archive(account_id: AccountId, wallet_id: i64) -> String {
        format!("wallet-archive-{account_id}-{wallet_id}")
    }

    /// Key for recording a transaction.
    #[must_use]
    pub fn transaction(account_id: AccountId, transaction_id: i64) -> String {
        format!("transaction-{account_id}-{transaction_id}")
    }
}

/// Budget month and plan events.
pub struct Budget;

impl Budget {
    /// Month identity derived from the calendar month, e.g. `202503`.
    ///
    /// Deterministic, so every writer opening the same month agrees on it.
    #[must_use]
    pub fn month_id(year: i32, month: u32) -> i64 {
        i64::from(year) * 100 + i64::from(month)
    }

    /// `budget_month_created`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] unless `month` is in `1..=12` and
    /// `year` is at least 1970.
    pub fn create_month(
        account_id: AccountId,
        budget_month_id: i64,
        year: i32,
        month: u32,
    ) -> Result<DomainEvent> {
        if !(1..=12).contains(&month) {
            return Err(invalid(format!("month must be in 1..=12, got {month}")));
        }
        if year < 1970 {
            return Err(invalid(format!("year must be 1970 or later, got {year}")));
        }

        Ok(DomainEvent::BudgetMonthCreated(BudgetMonthCreated {
            budget_month_id,
            account_id,
            budget_variant_id: None,
            year,
            month,
            created_at: Utc::now(),
        }))
    }

    /// `budget_line_set`.
    ///
    /// Setting the same category and kind again replaces the plan.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] if `plan_amount` is negative.
    pub fn set_plan(
        budget_month_id: i64,
        category_id: i64,
        kind: LineKind,
        plan_amount: Decimal,
        note: Option<String>,
    ) -> Result<DomainEvent> {
        if plan_amount < Decimal::ZERO {
            return Err(invalid(format!(
                "plan_amount must not be negative, got {plan_amount}"
            )));
        }

        Ok(DomainEvent::BudgetLineSet(BudgetLineSet {
            budget_month_id,
            category_id,
            kind,
            plan_amount,
            note,
            updated_at: Utc::now(),
        }))
    }
}

/// Fields of a wish about to be created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WishDraft {
    /// Short title.
    pub title: String,
    /// Kind of wish.
    pub wish_type: WishType,
    /// Initial status, [`WishStatus::Idea`] by default.
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
}

impl WishDraft {
    /// A draft with defaults for everything but title and type.
    #[must_use]
    pub fn new(title: impl Into<String>, wish_type: WishType) -> Self {
        Self {
            title: title.into(),
            wish_type,
            status: WishStatus::Idea,
            target_date: None,
            target_month: None,
            estimated_amount: None,
            is_recurring: false,
            notes: None,
        }
    }

    /// Set the initial status.
    #[must_use]
    pub const fn status(mut self, status: WishStatus) -> Self {
        self.status = status;
        self
    }

    /// Target an exact day.
    #[must_use]
    pub const fn target_date(mut self, date: NaiveDate) -> Self {
        self.target_date = Some(date);
        self
    }

    /// Target a month (`YYYY-MM`).
    #[must_use]
    pub fn target_month(mut self, month: impl Into<String>) -> Self {
        self.target_month = Some(month.into());
        self
    }

    /// Set the cost estimate.
    #[must_use]
    pub const fn estimated_amount(mut self, amount: Decimal) -> Self {
        self.estimated_amount = Some(amount);
        self
    }

    /// Mark the wish as recurring.
    #[must_use]
    pub const fn recurring(mut self) -> Self {
        self.is_recurring = true;
        self
    }

    /// Attach notes.
    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// A partial change to a wish.
///
/// `None` leaves a field untouched. For nullable fields `Some(None)` clears it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WishChanges {
    /// New title.
    pub title: Option<String>,
    /// New kind.
    pub wish_type: Option<WishType>,
    /// New status.
    pub status: Option<WishStatus>,
    /// New or cleared target day.
    pub target_date: Option<Option<NaiveDate>>,
    /// New or cleared target month.
    pub target_month: Option<Option<String>>,
    /// New or cleared cost estimate.
    pub estimated_amount: Option<Option<Decimal>>,
    /// New recurrence flag.
    pub is_recurring: Option<bool>,
    /// New or cleared notes.
    pub notes: Option<Option<String>>,
}

/// Wish lifecycle events.
pub struct Wish;

impl Wish {
    /// `wish_created`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] if the title is blank, both
    /// `target_date` and `target_month` are set, or `target_month` is not `YYYY-MM`.
    pub fn create(account_id: AccountId, wish_id: i64, draft: WishDraft) -> Result<DomainEvent> {
        let title = require_title(&draft.title)?;
        if draft.target_date.is_some() && draft.target_month.is_some() {
            return Err(invalid("target_date and target_month are mutually exclusive"));
        }
        if let Some(month) = &draft.target_month {
            require_target_month(month)?;
        }

        Ok(DomainEvent::WishCreated(WishCreated {
            wish_id,
            account_id,
            title,
            wish_type: draft.wish_type,
            status: draft.status,
            target_date: draft.target_date,
            target_month: draft.target_month,
            estimated_amount: draft.estimated_amount,
            is_recurring: draft.is_recurring,
            notes: draft.notes,
            created_at: Utc::now(),
        }))
    }

    /// `wish_updated`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] if the change sets both targets, sets
    /// a blank title, or sets a malformed `target_month`.
    pub fn update(wish_id: i64, changes: WishChanges) -> Result<DomainEvent> {
        if matches!(
            (&changes.target_date, &changes.target_month),
            (Some(Some(_)), Some(Some(_)))
        ) {
            return Err(invalid("target_date and target_month are mutually exclusive"));
        }
        let title = changes.title.as_deref().map(require_title).transpose()?;
        if let Some(Some(month)) = &changes.target_month {
            require_target_month(month)?;
        }

        Ok(DomainEvent::WishUpdated(WishUpdated {
            wish_id,
            title,
            wish_type: changes.wish_type,
            status: changes.status,
            target_date: changes.target_date,
            target_month: changes.target_month,
            estimated_amount: changes.estimated_amount,
            is_recurring: changes.is_recurring,
            notes: changes.notes,
            updated_at: Utc::now(),
        }))
    }

    /// `wish_completed`. One-off wishes move to [`WishStatus::Done`];
    /// recurring wishes only record the completion time.
    #[must_use]
    pub fn complete(wish_id: i64, is_recurring: bool) -> DomainEvent {
        DomainEvent::WishCompleted(WishCompleted {
            wish_id,
            status: (!is_recurring).then_some(WishStatus::Done),
            last_completed_at: Utc::now(),
        })
    }

    /// `wish_canceled`.
    #[must_use]
    pub fn cancel(wish_id: i64) -> DomainEvent {
        DomainEvent::WishCanceled(WishCanceled {
            wish_id,
            canceled_at: Utc::now(),
        })
    }
}

/// Wallet lifecycle events.
pub struct Wallet;

impl Wallet {
    /// `wallet_created`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] if the title is blank, the currency
    /// is not a 3-letter code, or the initial balance has the wrong sign for
    /// the wallet type (credit wallets start at zero or below, others at zero
    /// or above).
    pub fn create(
        account_id: AccountId,
        wallet_id: i64,
        title: &str,
        currency: &str,
        wallet_type: WalletType,
        initial_balance: Decimal,
    ) -> Result<DomainEvent> {
        let title = require_title(title)?;
        let currency = require_currency(currency)?;

        let sign_ok = match wallet_type {
            WalletType::Credit => initial_balance <= Decimal::ZERO,
            WalletType::Regular | WalletType::Savings => initial_balance >= Decimal::ZERO,
        };
        if !sign_ok {
            return Err(invalid(format!(
                "initial balance {initial_balance} not allowed for {wallet_type} wallet"
            )));
        }

        Ok(DomainEvent::WalletCreated(WalletCreated {
            wallet_id,
            account_id,
            title,
            currency,
            wallet_type,
            initial_balance,
            created_at: Utc::now(),
        }))
    }

    /// `wallet_renamed`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] if the title is blank.
    pub fn rename(wallet_id: i64, title: &str) -> Result<DomainEvent> {
        Ok(DomainEvent::WalletRenamed(WalletRenamed {
            wallet_id,
            title: require_title(title)?,
            updated_at: Utc::now(),
        }))
    }

    /// `wallet_archived`.
    #[must_use]
    pub fn archive(wallet_id: i64) -> DomainEvent {
        DomainEvent::WalletArchived(WalletArchived {
            wallet_id,
            archived_at: Utc::now(),
        })
    }

    /// `wallet_unarchived`.
    #[must_use]
    pub fn unarchive(wallet_id: i64) -> DomainEvent {
        DomainEvent::WalletUnarchived(WalletUnarchived {
            wallet_id,
            unarchived_at: Utc::now(),
        })
    }
}

/// Fields shared by every kind of transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionDraft {
    /// Transaction identity.
    pub transaction_id: i64,
    /// Positive amount.
    pub amount: Decimal,
    /// ISO 4217 code.
    pub currency: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Business time of the transaction.
    pub occurred_at: DateTime<Utc>,
}

impl TransactionDraft {
    /// A draft dated now, without a description.
    #[must_use]
    pub fn new(transaction_id: i64, amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            transaction_id,
            amount,
            currency: currency.into(),
            description: None,
            occurred_at: Utc::now(),
        }
    }

    /// Attach a description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the business time.
    #[must_use]
    pub const fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }
}

/// Money movement events.
pub struct Transaction;

impl Transaction {
    /// `transaction_created` with `INCOME`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] if the amount is not positive or
    /// the currency is malformed.
    pub fn income(
        account_id: AccountId,
        draft: TransactionDraft,
        wallet_id: i64,
        category_id: Option<i64>,
    ) -> Result<DomainEvent> {
        Self::build(
            account_id,
            draft,
            Operation::Income {
                wallet_id,
                category_id,
            },
        )
    }

    /// `transaction_created` with `EXPENSE`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] if the amount is not positive or
    /// the currency is malformed.
    pub fn expense(
        account_id: AccountId,
        draft: TransactionDraft,
        wallet_id: i64,
        category_id: Option<i64>,
    ) -> Result<DomainEvent> {
        Self::build(
            account_id,
            draft,
            Operation::Expense {
                wallet_id,
                category_id,
            },
        )
    }

    /// `transaction_created` with `TRANSFER`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] if the wallets are the same, the
    /// amount is not positive, or the currency is malformed.
    pub fn transfer(
        account_id: AccountId,
        draft: TransactionDraft,
        from_wallet_id: i64,
        to_wallet_id: i64,
    ) -> Result<DomainEvent> {
        if from_wallet_id == to_wallet_id {
            return Err(invalid("transfer needs two different wallets"));
        }
        Self::build(
            account_id,
            draft,
            Operation::Transfer {
                from_wallet_id,
                to_wallet_id,
            },
        )
    }

    fn build(
        account_id: AccountId,
        draft: TransactionDraft,
        operation: Operation,
    ) -> Result<DomainEvent> {
        if draft.amount <= Decimal::ZERO {
            return Err(invalid(format!("amount must be positive, got {}", draft.amount)));
        }
        let currency = require_currency(&draft.currency)?;

        Ok(DomainEvent::TransactionCreated(TransactionCreated {
            transaction_id: draft.transaction_id,
            account_id,
            operation,
            amount: draft.amount,
            currency,
            description: draft.description,
            occurred_at: draft.occurred_at,
        }))
    }
}

/// Task, habit and goal events that feed XP.
pub struct Task;

impl Task {
    /// `task_completed`.
    #[must_use]
    pub const fn completed(task_id: i64, due_date: Option<NaiveDate>) -> DomainEvent {
        DomainEvent::TaskCompleted(TaskCompleted { task_id, due_date })
    }

    /// `task_occurrence_completed`.
    #[must_use]
    pub const fn occurrence_completed(task_id: i64, occurrence_date: NaiveDate) -> DomainEvent {
        DomainEvent::TaskOccurrenceCompleted(TaskOccurrenceCompleted {
            task_id,
            occurrence_date,
        })
    }

    /// `habit_occurrence_completed`.
    #[must_use]
    pub const fn habit_occurrence_completed(habit_id: i64, occurrence_date: NaiveDate) -> DomainEvent {
        DomainEvent::HabitOccurrenceCompleted(HabitOccurrenceCompleted {
            habit_id,
            occurrence_date,
        })
    }

    /// `goal_achieved`.
    #[must_use]
    pub const fn goal_achieved(goal_id: i64) -> DomainEvent {
        DomainEvent::GoalAchieved(GoalAchieved { goal_id })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests can unwrap
mod tests {
    use super::*;
    use finledger_core::event::Event;

    const ACCOUNT: AccountId = AccountId::new(1);

    #[test]
    fn budget_month_bounds() {
        assert!(Budget::create_month(ACCOUNT, 1, 2025, 0).is_err());
        assert!(Budget::create_month(ACCOUNT, 1, 2025, 13).is_err());
        assert!(Budget::create_month(ACCOUNT, 1, 1969, 5).is_err());

        let event = Budget::create_month(ACCOUNT, Budget::month_id(2025, 3), 2025, 3).unwrap();
        assert_eq!(event.event_type(), "budget_month_created");
        assert_eq!(event.to_payload().unwrap()["budget_month_id"], 202_503);
    }

    #[test]
    fn plan_amount_cannot_be_negative() {
        let result = Budget::set_plan(1, 5, LineKind::Expense, Decimal::from(-1), None);
        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert!(Budget::set_plan(1, 5, LineKind::Expense, Decimal::ZERO, None).is_ok());
    }

    #[test]
    fn wish_targets_are_exclusive() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let draft = WishDraft::new("Bike", WishType::Purchase)
            .target_date(date)
            .target_month("2025-06");
        assert!(Wish::create(ACCOUNT, 1, draft).is_err());

        let changes = WishChanges {
            target_date: Some(Some(date)),
            target_month: Some(Some("2025-06".to_string())),
            ..WishChanges::default()
        };
        assert!(Wish::update(1, changes).is_err());

        let swap = WishChanges {
            target_date: Some(None),
            target_month: Some(Some("2025-06".to_string())),
            ..WishChanges::default()
        };
        assert!(Wish::update(1, swap).is_ok());
    }

    #[test]
    fn wish_validation() {
        assert!(Wish::create(ACCOUNT, 1, WishDraft::new("  ", WishType::Other)).is_err());
        assert!(
            Wish::create(
                ACCOUNT,
                1,
                WishDraft::new("Trip", WishType::Place).target_month("June")
            )
            .is_err()
        );

        let DomainEvent::WishCreated(created) =
            Wish::create(ACCOUNT, 4, WishDraft::new(" Trip ", WishType::Place)).unwrap()
        else {
            unreachable!("Wish::create builds wish_created");
        };
        assert_eq!(created.title, "Trip");
        assert_eq!(created.status, WishStatus::Idea);
    }

    #[test]
    fn completing_one_off_and_recurring_wishes() {
        let DomainEvent::WishCompleted(one_off) = Wish::complete(1, false) else {
            unreachable!("Wish::complete builds wish_completed");
        };
        assert_eq!(one_off.status, Some(WishStatus::Done));

        let DomainEvent::WishCompleted(recurring) = Wish::complete(1, true) else {
            unreachable!("Wish::complete builds wish_completed");
        };
        assert_eq!(recurring.status, None);
    }

    #[test]
    fn wallet_initial_balance_sign() {
        let minus = Decimal::from(-500);
        assert!(Wallet::create(ACCOUNT, 1, "Card", "RUB", WalletType::Credit, minus).is_ok());
        assert!(Wallet::create(ACCOUNT, 1, "Card", "RUB", WalletType::Credit, Decimal::ONE).is_err());
        assert!(Wallet::create(ACCOUNT, 1, "Cash", "RUB", WalletType::Regular, minus).is_err());
        assert!(Wallet::create(ACCOUNT, 1, "Box", "RUB", WalletType::Savings, minus).is_err());
    }

    #[test]
    fn wallet_currency_code() {
        for bad in ["rub", "RU", "RUBL", "R1B"] {
            assert!(
                Wallet::create(ACCOUNT, 1, "Cash", bad, WalletType::Regular, Decimal::ZERO).is_err(),
                "{bad} should be rejected"
            );
        }
        assert!(Wallet::rename(1, "").is_err());
    }

    #[test]
    fn transaction_rules() {
        let draft = TransactionDraft::new(1, Decimal::ZERO, "RUB");
        assert!(Transaction::income(ACCOUNT, draft, 1, None).is_err());

        let draft = TransactionDraft::new(1, Decimal::from(10), "RUB");
        assert!(Transaction::transfer(ACCOUNT, draft.clone(), 3, 3).is_err());
        assert!(Transaction::transfer(ACCOUNT, draft.clone(), 3, 4).is_ok());
        assert!(Transaction::expense(ACCOUNT, draft, 3, Some(8)).is_ok());
    }

    #[test]
    fn idempotency_keys_embed_account() {
        assert_eq!(keys::budget_month(ACCOUNT, 2025, 3), "budget-month-1-2025-3");
        assert_eq!(keys::wish_create(ACCOUNT, 9), "wish-create-1-9");
        assert_eq!(keys::wallet_create(ACCOUNT, 2), "wallet-create-1-2");
        assert_eq!(keys::wallet_archive(ACCOUNT, 2), "wallet-archive-1-2");
        assert_eq!(keys::transaction(ACCOUNT, 5), "transaction-1-5");
    }
}

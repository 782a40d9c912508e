//! Wallet balances projector.
//!
//! Every transaction becomes one [`WalletPosting`] per affected wallet, keyed
//! by wallet and transaction. The posting row is the de-duplication record:
//! a transaction moves a balance only when its posting is first written, so
//! applying it twice cannot count it twice. Postings that arrive before their
//! wallet are folded in when the wallet is created.

use crate::events::{DomainEvent, TransactionCreated, WalletCreated, WalletType, event_types};
use chrono::{DateTime, Utc};
use finledger_core::event::{AccountId, Event, StoredEvent};
use finledger_core::projection::{Projector, ReadModel, ReadModelTx, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Current state of a wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    /// Wallet identity.
    pub wallet_id: i64,
    /// Owning account.
    pub account_id: AccountId,
    /// Display name.
    pub title: String,
    /// ISO 4217 code.
    pub currency: String,
    /// Wallet category.
    pub wallet_type: WalletType,
    /// Opening balance.
    pub initial_balance: Decimal,
    /// Opening balance plus every posting.
    pub balance: Decimal,
    /// Archived wallets are hidden from pickers.
    pub is_archived: bool,
    /// When the wallet was opened.
    pub created_at: DateTime<Utc>,
}

impl WalletBalance {
    /// Row key of a wallet.
    #[must_use]
    pub fn key(account_id: AccountId, wallet_id: i64) -> String {
        format!("{account_id}/{wallet_id}")
    }
}

impl ReadModel for WalletBalance {
    const MODEL: &'static str = "wallet_balance";

    fn row_key(&self) -> String {
        Self::key(self.account_id, self.wallet_id)
    }

    fn account_id(&self) -> AccountId {
        self.account_id
    }
}

/// Signed effect of one transaction on one wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletPosting {
    /// Affected wallet.
    pub wallet_id: i64,
    /// Source transaction.
    pub transaction_id: i64,
    /// Owning account.
    pub account_id: AccountId,
    /// Positive for money in, negative for money out.
    pub amount: Decimal,
}

impl WalletPosting {
    /// Row key of a posting.
    #[must_use]
    pub fn key(account_id: AccountId, wallet_id: i64, transaction_id: i64) -> String {
        format!("{account_id}/{wallet_id}/{transaction_id}")
    }
}

impl ReadModel for WalletPosting {
    const MODEL: &'static str = "wallet_posting";

    fn row_key(&self) -> String {
        Self::key(self.account_id, self.wallet_id, self.transaction_id)
    }

    fn account_id(&self) -> AccountId {
        self.account_id
    }
}

/// Builds [`WalletBalance`] and [`WalletPosting`] rows.
#[derive(Clone, Copy, Debug, Default)]
pub struct WalletBalancesProjector;

impl WalletBalancesProjector {
    async fn created<T: ReadModelTx>(tx: &mut T, account_id: AccountId, event: WalletCreated) -> Result<()> {
        let key = WalletBalance::key(account_id, event.wallet_id);
        if tx.load::<WalletBalance>(&key).await?.is_some() {
            return Ok(());
        }

        let mut wallet = WalletBalance {
            wallet_id: event.wallet_id,
            account_id,
            title: event.title,
            currency: event.currency,
            wallet_type: event.wallet_type,
            initial_balance: event.initial_balance,
            balance: event.initial_balance,
            is_archived: false,
            created_at: event.created_at,
        };
        tx.save(&wallet).await?;

        // Postings recorded before the wallet existed still count.
        Self::fold_early_postings(tx, &mut wallet).await
    }

    async fn modify<T: ReadModelTx>(
        tx: &mut T,
        account_id: AccountId,
        wallet_id: i64,
        change: impl FnOnce(&mut WalletBalance) + Send,
    ) -> Result<()> {
        let Some(mut wallet) = tx
            .load::<WalletBalance>(&WalletBalance::key(account_id, wallet_id))
            .await?
        else {
            tracing::debug!(wallet_id, account_id = %account_id, "Change for unknown wallet ignored");
            return Ok(());
        };
        change(&mut wallet);
        tx.save(&wallet).await
    }

    async fn transaction<T: ReadModelTx>(
        tx: &mut T,
        account_id: AccountId,
        event: TransactionCreated,
    ) -> Result<()> {
        for (wallet_id, amount) in merged_postings(&event) {
            let posting_key = WalletPosting::key(account_id, wallet_id, event.transaction_id);
            if tx.load::<WalletPosting>(&posting_key).await?.is_some() {
                tracing::debug!(
                    wallet_id,
                    transaction_id = event.transaction_id,
                    "Posting already applied"
                );
                continue;
            }

            tx.save(&WalletPosting {
                wallet_id,
                transaction_id: event.transaction_id,
                account_id,
                amount,
            })
            .await?;

            let key = WalletBalance::key(account_id, wallet_id);
            let Some(mut wallet) = tx.load::<WalletBalance>(&key).await? else {
                tracing::warn!(
                    wallet_id,
                    account_id = %account_id,
                    "Posting for unknown wallet kept until the wallet appears"
                );
                continue;
            };
            wallet.balance += amount;
            tx.save(&wallet).await?;
        }
        Ok(())
    }

    async fn fold_early_postings<T: ReadModelTx>(tx: &mut T, wallet: &mut WalletBalance) -> Result<()> {
        let posted: Decimal = tx
            .list::<WalletPosting>(wallet.account_id)
            .await?
            .iter()
            .filter(|posting| posting.wallet_id == wallet.wallet_id)
            .map(|posting| posting.amount)
            .sum();

        if posted.is_zero() {
            return Ok(());
        }
        wallet.balance = wallet.initial_balance + posted;
        tx.save(&*wallet).await
    }
}

/// Postings of a transaction, one per wallet.
fn merged_postings(event: &TransactionCreated) -> Vec<(i64, Decimal)> {
    let mut merged: Vec<(i64, Decimal)> = Vec::with_capacity(2);
    for (wallet_id, amount) in event.operation.postings(event.amount) {
        match merged.iter_mut().find(|(id, _)| *id == wallet_id) {
            Some((_, total)) => *total += amount,
            None => merged.push((wallet_id, amount)),
        }
    }
    merged
}

impl Projector for WalletBalancesProjector {
    fn name(&self) -> &'static str {
        "wallet_balances"
    }

    fn handled_event_types(&self) -> &'static [&'static str] {
        &[
            event_types::WALLET_CREATED,
            event_types::WALLET_RENAMED,
            event_types::WALLET_ARCHIVED,
            event_types::WALLET_UNARCHIVED,
            event_types::TRANSACTION_CREATED,
        ]
    }

    async fn apply<T: ReadModelTx>(&self, tx: &mut T, event: &StoredEvent) -> Result<()> {
        let account_id = event.account_id;
        match DomainEvent::decode(event)? {
            Some(DomainEvent::WalletCreated(created)) => Self::created(tx, account_id, created).await,
            Some(DomainEvent::WalletRenamed(renamed)) => {
                Self::modify(tx, account_id, renamed.wallet_id, |wallet| {
                    wallet.title = renamed.title;
                })
                .await
            }
            Some(DomainEvent::WalletArchived(archived)) => {
                Self::modify(tx, account_id, archived.wallet_id, |wallet| {
                    wallet.is_archived = true;
                })
                .await
            }
            Some(DomainEvent::WalletUnarchived(unarchived)) => {
                Self::modify(tx, account_id, unarchived.wallet_id, |wallet| {
                    wallet.is_archived = false;
                })
                .await
            }
            Some(DomainEvent::TransactionCreated(transaction)) => {
                Self::transaction(tx, account_id, transaction).await
            }
            _ => Ok(()),
        }
    }

    async fn clear<T: ReadModelTx>(&self, tx: &mut T, account_id: AccountId) -> Result<()> {
        tx.clear_model(WalletPosting::MODEL, account_id).await?;
        tx.clear_model(WalletBalance::MODEL, account_id).await
    }
}

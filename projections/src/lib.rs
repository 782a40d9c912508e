//! Domain events and read model projectors for FinLedger.
//!
//! # Overview
//!
//! - [`events`]: the typed payload of every event the ledger records
//! - [`builders`]: validated constructors and idempotency keys for those events
//! - Projectors, one per read model family:
//!   - [`budget::BudgetProjector`] (`"budget"`): budget months and plan lines
//!   - [`wishes::WishesProjector`] (`"wishes"`): the wish backlog
//!   - [`wallet_balances::WalletBalancesProjector`] (`"wallet_balances"`): wallets and balances
//!   - [`xp::XpProjector`] (`"xp"`): experience points and levels
//! - [`ledger`]: use cases that append an event and project it inline
//!
//! Projectors are backend-agnostic; they run on any
//! [`ProjectionBackend`](finledger_core::projection::ProjectionBackend), such as
//! `finledger-postgres` in production or `finledger-testing` in tests.
//!
//! # Example
//!
//! ```ignore
//! use finledger_projections::prelude::*;
//!
//! let engine = ProjectorEngine::new(WalletBalancesProjector, store, backend.clone());
//! engine.run(account, None).await?;
//!
//! let wallets: Vec<WalletBalance> = backend.find_all(account).await?;
//! ```

pub mod budget;
pub mod builders;
pub mod events;
pub mod ledger;
pub mod wallet_balances;
pub mod wishes;
pub mod xp;

pub use budget::{BudgetLine, BudgetMonth, BudgetProjector};
pub use builders::{Budget, Task, Transaction, TransactionDraft, Wallet, WishChanges, WishDraft, keys};
pub use events::{DomainError, DomainEvent, LineKind, Operation, WalletType, WishStatus, WishType};
pub use ledger::{Ledger, LedgerError};
pub use wallet_balances::{WalletBalance, WalletBalancesProjector, WalletPosting};
pub use wishes::WishesProjector;
pub use xp::{XpAward, XpProjector, XpState, compute_level, preview_task_xp};

/// Projectors, read models and builders in one import.
pub mod prelude {
    pub use crate::budget::{BudgetLine, BudgetMonth, BudgetProjector};
    pub use crate::builders::{
        Budget, Task, Transaction, TransactionDraft, Wallet, Wish, WishChanges, WishDraft, keys,
    };
    pub use crate::events::{
        DomainError, DomainEvent, LineKind, Operation, WalletType, WishStatus, WishType,
    };
    pub use crate::ledger::{Ledger, LedgerError};
    pub use crate::wallet_balances::{WalletBalance, WalletBalancesProjector, WalletPosting};
    pub use crate::wishes::WishesProjector;
    pub use crate::xp::{XpAward, XpProjector, XpState};
    pub use finledger_core::prelude::*;
}

/// Every projector name, in catch-up order.
pub const PROJECTOR_NAMES: [&str; 4] = ["budget", "wishes", "wallet_balances", "xp"];

//! # FinLedger Core
//!
//! Event log, checkpoint and projector engine abstractions for FinLedger.
//!
//! Every mutating use case appends a fact to an account-scoped, append-only
//! event log. Projectors then fold that log into denormalized read models
//! (budget lines, wishes, wallet balances, XP) and record how far they got in
//! a per-account checkpoint.
//!
//! ## Core Concepts
//!
//! - **Event Store**: append-only log with an idempotency guard ([`event_store`])
//! - **Checkpoint**: `(projector, account) → last applied event id` ([`checkpoint`])
//! - **Projector**: folds events into read models ([`projection`])
//! - **Engine**: fetch → apply → advance, in one unit of work per batch ([`engine`])
//!
//! ## Guarantees
//!
//! - Replaying an account from zero over existing read models yields the same
//!   state as incremental catch-up.
//! - A checkpoint never runs ahead of the read model writes it covers.
//! - Two runs of the same projector for the same account never interleave.
//!
//! ## Example
//!
//! ```ignore
//! use finledger_core::prelude::*;
//!
//! let outcome = store.append(NewEvent::new(account, "wallet_created", payload)).await?;
//! let applied = engine.run(account, Some(&["wallet_created"])).await?;
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod checkpoint;
pub mod engine;
pub mod event;
pub mod event_store;
pub mod projection;

/// Everything a projector or backend implementation usually needs.
pub mod prelude {
    pub use crate::checkpoint::CheckpointStore;
    pub use crate::engine::{EngineConfig, ProjectionRunner, ProjectorEngine, ProjectorOrchestrator};
    pub use crate::event::{AccountId, Event, EventError, EventId, NewEvent, StoredEvent};
    pub use crate::event_store::{AppendOutcome, EventFilter, EventStore, EventStoreError};
    pub use crate::projection::{
        ProjectionBackend, ProjectionError, Projector, ReadModel, ReadModelSource, ReadModelTx,
    };
}

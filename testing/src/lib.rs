//! # FinLedger Testing
//!
//! Testing utilities for FinLedger projectors.
//!
//! This crate provides:
//! - [`InMemoryLedger`]: event log, checkpoints and read models in one process-local store
//! - [`ProjectorTestHarness`]: given-events / run / assert-rows API for projectors
//! - [`init_tracing`]: opt-in log output for debugging a failing test
//!
//! ## Example
//!
//! ```ignore
//! use finledger_testing::ProjectorTestHarness;
//!
//! #[tokio::test]
//! async fn wallet_is_created() {
//!     let harness = ProjectorTestHarness::new(WalletBalancesProjector, AccountId::new(1));
//!     harness
//!         .given("wallet_created", json!({"wallet_id": 1, "account_id": 1, "title": "Cash", "currency": "RUB", "created_at": "2025-01-01T00:00:00Z"}))
//!         .await;
//!     assert_eq!(harness.run().await.unwrap(), 1);
//! }
//! ```

mod harness;
mod in_memory;

pub use harness::ProjectorTestHarness;
pub use in_memory::{InMemoryLedger, InMemoryTx};

/// Install a test-friendly tracing subscriber honouring `RUST_LOG`.
///
/// Safe to call from several tests; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

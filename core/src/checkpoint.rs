//! Projector checkpoints.
//!
//! A checkpoint records, per `(projector, account)`, the id of the last event
//! whose effect is reflected in that projector's read models. A missing
//! checkpoint reads as [`EventId::ZERO`].
//!
//! `advance` is monotonic: it never moves a checkpoint backwards. The only way
//! back is an explicit `reset`, which is what triggers a replay.

use crate::event::{AccountId, EventId};
use crate::projection::Result;
use std::future::Future;
use std::pin::Pin;

/// Persistent projector positions.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so it can be used as
/// `Arc<dyn CheckpointStore>` by admin tooling.
pub trait CheckpointStore: Send + Sync {
    /// Last processed event id, or [`EventId::ZERO`] if none was recorded.
    ///
    /// # Errors
    ///
    /// Returns [`crate::projection::ProjectionError::Checkpoint`] if the read fails.
    fn get(
        &self,
        projector: &str,
        account_id: AccountId,
    ) -> Pin<Box<dyn Future<Output = Result<EventId>> + Send + '_>>;

    /// Move the checkpoint to `to` if that is further than the stored value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::projection::ProjectionError::Checkpoint`] if the write fails.
    fn advance(
        &self,
        projector: &str,
        account_id: AccountId,
        to: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Set the checkpoint back to [`EventId::ZERO`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::projection::ProjectionError::Checkpoint`] if the write fails.
    fn reset(
        &self,
        projector: &str,
        account_id: AccountId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

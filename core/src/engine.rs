//! Checkpointed catch-up engine.
//!
//! # Overview
//!
//! [`ProjectorEngine`] drives one [`Projector`] for one account at a time:
//!
//! 1. Open a unit of work, which takes the `(projector, account)` lock and
//!    reads the checkpoint.
//! 2. Fetch up to `batch_size` events after the checkpoint.
//! 3. Dispatch each handled event; skip the rest.
//! 4. Stage the checkpoint advance and commit it together with the read
//!    model writes.
//!
//! Batches repeat until the log is drained. A handler failure rolls back the
//! whole batch and leaves the checkpoint where it was, so the next run redoes
//! it from the same point.
//!
//! # Narrowed runs
//!
//! Use cases re-run a projector for just the event types they wrote. The
//! engine then also fetches the projector's own handled types. The run stops
//! at the first event that is handled but outside the requested types: it is
//! not applied, nothing after it is applied, and the checkpoint stays right
//! before it. Events are therefore still applied in id order, and a later
//! unrestricted run picks up from the gap.
//!
//! # Example
//!
//! ```ignore
//! let engine = ProjectorEngine::new(BudgetProjector, store.clone(), backend.clone())
//!     .with_config(EngineConfig::new().with_batch_size(500));
//!
//! let applied = engine.run(account_id, None).await?;
//! engine.reset(account_id).await?;
//! let replayed = engine.run(account_id, None).await?;
//! ```

use crate::event::{AccountId, EventId, StoredEvent};
use crate::event_store::{EventFilter, EventStore};
use crate::projection::{ProjectionBackend, ProjectionError, Projector, ReadModelTx, Result};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Events fetched per unit of work unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Tuning for [`ProjectorEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum events applied in one unit of work.
    pub batch_size: usize,
}

impl EngineConfig {
    /// Default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the batch size. Zero is treated as one.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = if batch_size == 0 { 1 } else { batch_size };
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives a [`Projector`] over the event log.
pub struct ProjectorEngine<P, B> {
    projector: P,
    store: Arc<dyn EventStore>,
    backend: B,
    config: EngineConfig,
}

#[derive(Debug, Default)]
struct BatchOutcome {
    applied: usize,
    advance_to: Option<EventId>,
    /// Stopped at a handled event outside the requested types.
    blocked: bool,
}

impl<P, B> ProjectorEngine<P, B>
where
    P: Projector,
    B: ProjectionBackend,
{
    /// Create an engine with the default configuration.
    #[must_use]
    pub fn new(projector: P, store: Arc<dyn EventStore>, backend: B) -> Self {
        Self {
            projector,
            store,
            backend,
            config: EngineConfig::default(),
        }
    }

    /// Replace the configuration.
    #[must_use]
    pub const fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Projector name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.projector.name()
    }

    /// The wrapped projector.
    #[must_use]
    pub const fn projector(&self) -> &P {
        &self.projector
    }

    /// Current checkpoint for `account_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if the read fails.
    pub async fn checkpoint(&self, account_id: AccountId) -> Result<EventId> {
        self.backend.get(self.projector.name(), account_id).await
    }

    /// Catch the projector up for `account_id`.
    ///
    /// With `event_types` set, only those types are applied (see the module
    /// docs for how the checkpoint behaves). Returns the number of events
    /// passed to the projector.
    ///
    /// # Errors
    ///
    /// - [`ProjectionError::Handler`] if a handler fails; the failing batch is rolled back
    /// - [`ProjectionError::EventStore`] if the log cannot be read
    /// - [`ProjectionError::Storage`] / [`ProjectionError::Checkpoint`] on backend failures
    pub async fn run(&self, account_id: AccountId, event_types: Option<&[&str]>) -> Result<usize> {
        let name = self.projector.name();
        let fetch_types = event_types.map(|requested| self.fetch_types(requested));

        let mut applied = 0;
        let mut resume_after = EventId::ZERO;

        loop {
            let mut tx = self.backend.begin(name, account_id).await?;
            let cursor = tx.cursor();
            let after = cursor.max(resume_after);

            let filter = EventFilter {
                event_types: fetch_types.clone(),
                limit: Some(self.config.batch_size),
            };
            let events = match self.store.list_since(account_id, after, filter).await {
                Ok(events) => events,
                Err(e) => {
                    tx.rollback().await?;
                    return Err(e.into());
                }
            };

            let Some(last) = events.last().map(|event| event.id) else {
                tx.rollback().await?;
                break;
            };

            let outcome = match self
                .apply_batch(&mut tx, &events, event_types)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        projector = name,
                        account_id = %account_id,
                        checkpoint = %cursor,
                        error = %e,
                        "Batch rolled back"
                    );
                    metrics::counter!("projector.batch_failures", "projector" => name).increment(1);
                    tx.rollback().await?;
                    return Err(e);
                }
            };

            if let Some(to) = outcome.advance_to.filter(|to| *to > cursor) {
                tx.advance(to).await?;
            }
            tx.commit().await?;

            applied += outcome.applied;
            resume_after = last;

            tracing::debug!(
                projector = name,
                account_id = %account_id,
                fetched = events.len(),
                applied = outcome.applied,
                checkpoint = %outcome.advance_to.unwrap_or(cursor).max(cursor),
                "Batch committed"
            );

            if outcome.blocked || events.len() < self.config.batch_size {
                break;
            }
        }

        metrics::counter!("projector.events_applied", "projector" => name)
            .increment(u64::try_from(applied).unwrap_or(u64::MAX));
        tracing::info!(projector = name, account_id = %account_id, applied, "Projector run finished");

        Ok(applied)
    }

    /// Rewind the checkpoint for `account_id` to zero.
    ///
    /// Read models are left in place; the next [`ProjectorEngine::run`]
    /// replays the full history over them.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if the write fails.
    pub async fn reset(&self, account_id: AccountId) -> Result<()> {
        let name = self.projector.name();
        self.backend.reset(name, account_id).await?;
        tracing::info!(projector = name, account_id = %account_id, "Checkpoint reset");
        Ok(())
    }

    /// Drop the projector's read models for `account_id`, rewind and replay.
    ///
    /// # Errors
    ///
    /// See [`ProjectorEngine::run`].
    pub async fn rebuild(&self, account_id: AccountId) -> Result<usize> {
        let name = self.projector.name();
        tracing::info!(projector = name, account_id = %account_id, "Rebuilding read models");

        let mut tx = self.backend.begin(name, account_id).await?;
        if let Err(e) = self.projector.clear(&mut tx, account_id).await {
            tx.rollback().await?;
            return Err(e);
        }
        tx.reset_cursor().await?;
        tx.commit().await?;

        self.run(account_id, None).await
    }

    fn fetch_types(&self, requested: &[&str]) -> Vec<String> {
        let mut types: Vec<String> = requested.iter().map(ToString::to_string).collect();
        for handled in self.projector.handled_event_types() {
            if !types.iter().any(|t| t == handled) {
                types.push((*handled).to_string());
            }
        }
        types
    }

    async fn apply_batch(
        &self,
        tx: &mut B::Tx,
        events: &[StoredEvent],
        requested: Option<&[&str]>,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        for event in events {
            let event_type = event.event_type.as_str();
            let wanted = requested.is_none_or(|types| types.contains(&event_type));

            if self.projector.handles(event_type) {
                // Later events must not be applied ahead of this one.
                if !wanted {
                    outcome.blocked = true;
                    break;
                }
                self.projector
                    .apply(tx, event)
                    .await
                    .map_err(|e| self.wrap_handler_error(event, e))?;
                outcome.applied += 1;
            }

            outcome.advance_to = Some(event.id);
        }

        Ok(outcome)
    }

    fn wrap_handler_error(&self, event: &StoredEvent, error: ProjectionError) -> ProjectionError {
        match error {
            e @ (ProjectionError::Storage(_) | ProjectionError::Handler { .. }) => e,
            e => ProjectionError::Handler {
                projector: self.projector.name().to_string(),
                event_id: event.id,
                event_type: event.event_type.clone(),
                message: e.to_string(),
            },
        }
    }
}

/// Object-safe view of a [`ProjectorEngine`], so engines over different
/// projectors can be registered together.
pub trait ProjectionRunner: Send + Sync {
    /// Projector name.
    fn projector_name(&self) -> &'static str;

    /// See [`ProjectorEngine::run`].
    fn run_account<'a>(
        &'a self,
        account_id: AccountId,
        event_types: Option<&'a [&'a str]>,
    ) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + 'a>>;

    /// See [`ProjectorEngine::reset`].
    fn reset_account(
        &self,
        account_id: AccountId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// See [`ProjectorEngine::rebuild`].
    fn rebuild_account(
        &self,
        account_id: AccountId,
    ) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + '_>>;

    /// See [`ProjectorEngine::checkpoint`].
    fn checkpoint_of(
        &self,
        account_id: AccountId,
    ) -> Pin<Box<dyn Future<Output = Result<EventId>> + Send + '_>>;
}

impl<P, B> ProjectionRunner for ProjectorEngine<P, B>
where
    P: Projector,
    B: ProjectionBackend,
{
    fn projector_name(&self) -> &'static str {
        self.name()
    }

    fn run_account<'a>(
        &'a self,
        account_id: AccountId,
        event_types: Option<&'a [&'a str]>,
    ) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + 'a>> {
        Box::pin(self.run(account_id, event_types))
    }

    fn reset_account(
        &self,
        account_id: AccountId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.reset(account_id))
    }

    fn rebuild_account(
        &self,
        account_id: AccountId,
    ) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + '_>> {
        Box::pin(self.rebuild(account_id))
    }

    fn checkpoint_of(
        &self,
        account_id: AccountId,
    ) -> Pin<Box<dyn Future<Output = Result<EventId>> + Send + '_>> {
        Box::pin(self.checkpoint(account_id))
    }
}

/// Runs a set of projectors in registration order.
#[derive(Default, Clone)]
pub struct ProjectorOrchestrator {
    runners: Vec<Arc<dyn ProjectionRunner>>,
}

impl ProjectorOrchestrator {
    /// Empty orchestrator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a runner.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn ProjectionRunner>) -> Self {
        self.runners.push(runner);
        self
    }

    /// Registered projector names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.runners.iter().map(|r| r.projector_name()).collect()
    }

    /// Look up a runner by projector name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ProjectionRunner>> {
        self.runners
            .iter()
            .find(|r| r.projector_name() == name)
            .cloned()
    }

    /// Run every projector for `account_id` and report events applied per projector.
    ///
    /// Stops at the first failure.
    ///
    /// # Errors
    ///
    /// Propagates the first runner error.
    pub async fn run_all(&self, account_id: AccountId) -> Result<BTreeMap<&'static str, usize>> {
        let mut applied = BTreeMap::new();
        for runner in &self.runners {
            let count = runner.run_account(account_id, None).await?;
            applied.insert(runner.projector_name(), count);
        }
        Ok(applied)
    }

    /// Rewind every projector for `account_id`.
    ///
    /// # Errors
    ///
    /// Propagates the first runner error.
    pub async fn reset_all(&self, account_id: AccountId) -> Result<()> {
        for runner in &self.runners {
            runner.reset_account(account_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_two_hundred() {
        assert_eq!(EngineConfig::default().batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(DEFAULT_BATCH_SIZE, 200);
    }

    #[test]
    fn config_builder() {
        let config = EngineConfig::new().with_batch_size(50);
        assert_eq!(config.batch_size, 50);
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        assert_eq!(EngineConfig::new().with_batch_size(0).batch_size, 1);
    }

    #[test]
    fn empty_orchestrator_has_no_names() {
        let orchestrator = ProjectorOrchestrator::new();
        assert!(orchestrator.names().is_empty());
        assert!(orchestrator.get("budget").is_none());
    }
}

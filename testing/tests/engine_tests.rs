//! Engine behaviour against the in-memory ledger.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use finledger_core::checkpoint::CheckpointStore;
use finledger_core::engine::{EngineConfig, ProjectorEngine, ProjectorOrchestrator};
use finledger_core::event::{AccountId, EventId, NewEvent, StoredEvent};
use finledger_core::event_store::{EventFilter, EventStore};
use finledger_core::projection::{
    ProjectionBackend, ProjectionError, Projector, ReadModel, ReadModelSource, ReadModelTx, Result,
};
use finledger_testing::{InMemoryLedger, ProjectorTestHarness};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const ACCOUNT: AccountId = AccountId::new(1);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Note {
    account_id: AccountId,
    note_id: i64,
    text: String,
}

impl ReadModel for Note {
    const MODEL: &'static str = "test_notes";

    fn row_key(&self) -> String {
        format!("{}/{}", self.account_id, self.note_id)
    }

    fn account_id(&self) -> AccountId {
        self.account_id
    }
}

/// Upserts notes; replay-safe.
struct NoteProjector;

impl Projector for NoteProjector {
    fn name(&self) -> &'static str {
        "notes"
    }

    fn handled_event_types(&self) -> &'static [&'static str] {
        &["note_added", "note_removed", "boom"]
    }

    async fn apply<T: ReadModelTx>(&self, tx: &mut T, event: &StoredEvent) -> Result<()> {
        let note_id = event.payload["note_id"].as_i64().unwrap_or_default();
        match event.event_type.as_str() {
            "note_added" => {
                let note = Note {
                    account_id: event.account_id,
                    note_id,
                    text: event.payload["text"].as_str().unwrap_or_default().to_string(),
                };
                tx.save(&note).await
            }
            "note_removed" => {
                tx.delete_doc(Note::MODEL, &format!("{}/{note_id}", event.account_id))
                    .await
            }
            _ => Err(ProjectionError::EventProcessing("boom".to_string())),
        }
    }

    async fn clear<T: ReadModelTx>(&self, tx: &mut T, account_id: AccountId) -> Result<()> {
        tx.clear_model(Note::MODEL, account_id).await
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Tally {
    account_id: AccountId,
    ticks: u64,
}

impl ReadModel for Tally {
    const MODEL: &'static str = "test_tally";

    fn row_key(&self) -> String {
        self.account_id.to_string()
    }

    fn account_id(&self) -> AccountId {
        self.account_id
    }
}

/// Counts ticks by relative increment, so it double counts if a batch is applied twice.
struct TallyProjector;

impl Projector for TallyProjector {
    fn name(&self) -> &'static str {
        "tally"
    }

    fn handled_event_types(&self) -> &'static [&'static str] {
        &["tick"]
    }

    async fn apply<T: ReadModelTx>(&self, tx: &mut T, event: &StoredEvent) -> Result<()> {
        let key = event.account_id.to_string();
        let mut tally = tx.load::<Tally>(&key).await?.unwrap_or(Tally {
            account_id: event.account_id,
            ticks: 0,
        });
        tokio::task::yield_now().await;
        tally.ticks += 1;
        tx.save(&tally).await
    }

    async fn clear<T: ReadModelTx>(&self, tx: &mut T, account_id: AccountId) -> Result<()> {
        tx.clear_model(Tally::MODEL, account_id).await
    }
}

fn note_added(note_id: i64, text: &str) -> (&'static str, serde_json::Value) {
    ("note_added", json!({"note_id": note_id, "text": text}))
}

// ---------------------------------------------------------------------------
// Event store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_append_without_key_always_appends() {
    let ledger = InMemoryLedger::new();
    let event = NewEvent::new(ACCOUNT, "note_added", json!({"note_id": 1}));

    let first = ledger.append(event.clone()).await.unwrap();
    let second = ledger.append(event).await.unwrap();

    assert!(!first.is_duplicate());
    assert!(!second.is_duplicate());
    assert!(first.event().id < second.event().id);
    assert_eq!(ledger.count_events(ACCOUNT).await.unwrap(), 2);
}

#[tokio::test]
async fn test_append_with_key_is_idempotent() {
    let ledger = InMemoryLedger::new();
    let event = NewEvent::new(ACCOUNT, "note_added", json!({"note_id": 1}))
        .with_idempotency_key("note-1");

    let first = ledger.append(event.clone()).await.unwrap();
    let second = ledger.append(event).await.unwrap();

    assert!(second.is_duplicate());
    assert_eq!(first.event(), second.event());
    assert_eq!(ledger.count_events(ACCOUNT).await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_appends_with_same_key_store_one_event() {
    let ledger = InMemoryLedger::new();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .append(
                        NewEvent::new(ACCOUNT, "budget_month_created", json!({"year": 2026}))
                            .with_idempotency_key("budget-month-1-2026-2"),
                    )
                    .await
                    .unwrap()
            })
        })
        .collect();

    let outcomes = futures::future::join_all(handles).await;
    let appended = outcomes
        .iter()
        .filter(|outcome| !outcome.as_ref().unwrap().is_duplicate())
        .count();

    assert_eq!(appended, 1);
    assert_eq!(ledger.event_count(), 1);
}

#[tokio::test]
async fn test_invalid_event_is_rejected() {
    let ledger = InMemoryLedger::new();
    let result = ledger
        .append(NewEvent::new(ACCOUNT, "", json!({"seq": 1})))
        .await;

    assert!(result.is_err());
    assert_eq!(ledger.event_count(), 0);
}

#[tokio::test]
async fn test_list_since_filters_types_and_limit() {
    let ledger = InMemoryLedger::new();
    for event_type in ["a", "b", "a", "c", "a"] {
        ledger
            .append(NewEvent::new(ACCOUNT, event_type, json!({"seq": 1})))
            .await
            .unwrap();
    }

    let only_a = ledger
        .list_since(ACCOUNT, EventId::ZERO, EventFilter::all().types(["a"]).limit(2))
        .await
        .unwrap();
    assert_eq!(only_a.len(), 2);
    assert_eq!(only_a[0].id, EventId::new(1));
    assert_eq!(only_a[1].id, EventId::new(3));

    let after_three = ledger
        .list_since(ACCOUNT, EventId::new(3), EventFilter::all())
        .await
        .unwrap();
    assert_eq!(after_three.len(), 2);

    let fetched = ledger.get_event(EventId::new(4)).await.unwrap().unwrap();
    assert_eq!(fetched.event_type, "c");
    assert!(ledger.get_event(EventId::new(99)).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_checkpoint_never_moves_backwards() {
    let ledger = InMemoryLedger::new();

    assert_eq!(ledger.get("notes", ACCOUNT).await.unwrap(), EventId::ZERO);
    CheckpointStore::advance(&ledger, "notes", ACCOUNT, EventId::new(10))
        .await
        .unwrap();
    CheckpointStore::advance(&ledger, "notes", ACCOUNT, EventId::new(4))
        .await
        .unwrap();
    assert_eq!(ledger.get("notes", ACCOUNT).await.unwrap(), EventId::new(10));

    ledger.reset("notes", ACCOUNT).await.unwrap();
    assert_eq!(ledger.get("notes", ACCOUNT).await.unwrap(), EventId::ZERO);
}

#[tokio::test]
async fn test_checkpoints_are_scoped_per_account_and_projector() {
    let ledger = InMemoryLedger::new();
    CheckpointStore::advance(&ledger, "notes", ACCOUNT, EventId::new(3))
        .await
        .unwrap();

    assert_eq!(ledger.get("notes", AccountId::new(2)).await.unwrap(), EventId::ZERO);
    assert_eq!(ledger.get("tally", ACCOUNT).await.unwrap(), EventId::ZERO);
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_run_applies_events_and_advances_checkpoint() {
    let harness = ProjectorTestHarness::new(NoteProjector, ACCOUNT);
    let (t, p) = note_added(1, "first");
    harness.given(t, p).await;
    let (t, p) = note_added(2, "second");
    let last = harness.given(t, p).await;

    assert_eq!(harness.run().await.unwrap(), 2);
    assert_eq!(harness.checkpoint(), last.id);

    let notes: Vec<Note> = harness.rows().await.unwrap();
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[1].text, "second");
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let harness = ProjectorTestHarness::new(NoteProjector, ACCOUNT);
    let (t, p) = note_added(1, "first");
    harness.given(t, p).await;

    assert_eq!(harness.run().await.unwrap(), 1);
    assert_eq!(harness.run().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_event_types_are_skipped_but_passed() {
    let harness = ProjectorTestHarness::new(NoteProjector, ACCOUNT);
    let (t, p) = note_added(1, "first");
    harness.given(t, p).await;
    let unrelated = harness.given("wallet_created", json!({"wallet_id": 1})).await;

    assert_eq!(harness.run().await.unwrap(), 1);
    assert_eq!(harness.checkpoint(), unrelated.id);
    assert_eq!(harness.rows::<Note>().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reset_and_replay_reproduces_state() {
    let harness = ProjectorTestHarness::new(NoteProjector, ACCOUNT);
    for (id, text) in [(1, "a"), (2, "b"), (1, "c")] {
        let (t, p) = note_added(id, text);
        harness.given(t, p).await;
    }
    harness
        .given("note_removed", json!({"note_id": 2}))
        .await;

    harness.run().await.unwrap();
    let incremental = harness.ledger().snapshot(ACCOUNT);

    harness.reset().await.unwrap();
    assert_eq!(harness.checkpoint(), EventId::ZERO);
    assert_eq!(harness.run().await.unwrap(), 4);

    assert_eq!(harness.ledger().snapshot(ACCOUNT), incremental);
    let note: Note = harness.row("1/1").await.unwrap().unwrap();
    assert_eq!(note.text, "c");
}

#[tokio::test]
async fn test_small_batches_drain_the_log() {
    let harness = ProjectorTestHarness::new(NoteProjector, ACCOUNT)
        .with_config(EngineConfig::new().with_batch_size(2));
    let mut last = EventId::ZERO;
    for id in 1..=5 {
        let (t, p) = note_added(id, "x");
        last = harness.given(t, p).await.id;
    }

    assert_eq!(harness.run().await.unwrap(), 5);
    assert_eq!(harness.checkpoint(), last);
}

#[tokio::test]
async fn test_handler_failure_rolls_back_batch() {
    let harness = ProjectorTestHarness::new(NoteProjector, ACCOUNT);
    let (t, p) = note_added(1, "kept?");
    harness.given(t, p).await;
    let boom = harness.given("boom", json!({"reason": "test"})).await;
    let (t, p) = note_added(2, "after");
    harness.given(t, p).await;

    let error = harness.run().await.unwrap_err();
    assert!(matches!(
        &error,
        ProjectionError::Handler { projector, event_id, event_type, .. }
            if projector == "notes" && *event_id == boom.id && event_type == "boom"
    ));

    assert_eq!(harness.checkpoint(), EventId::ZERO);
    assert!(harness.rows::<Note>().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_handler_failure_keeps_earlier_batches() {
    let harness = ProjectorTestHarness::new(NoteProjector, ACCOUNT)
        .with_config(EngineConfig::new().with_batch_size(1));
    let (t, p) = note_added(1, "committed");
    let first = harness.given(t, p).await;
    harness.given("boom", json!({"reason": "test"})).await;

    assert!(harness.run().await.is_err());
    assert_eq!(harness.checkpoint(), first.id);
    assert_eq!(harness.rows::<Note>().await.unwrap().len(), 1);

    // Retrying hits the same event again.
    assert!(harness.run().await.is_err());
    assert_eq!(harness.checkpoint(), first.id);
}

#[tokio::test]
async fn test_narrowed_run_stops_before_skipped_handled_event() {
    let harness = ProjectorTestHarness::new(NoteProjector, ACCOUNT);
    harness
        .given("note_removed", json!({"note_id": 9}))
        .await;
    let (t, p) = note_added(1, "visible");
    let added = harness.given(t, p).await;

    assert_eq!(harness.run_for(&["note_added"]).await.unwrap(), 0);
    assert_eq!(harness.checkpoint(), EventId::ZERO);
    assert!(harness.row::<Note>("1/1").await.unwrap().is_none());

    assert_eq!(harness.run().await.unwrap(), 2);
    assert_eq!(harness.checkpoint(), added.id);
    assert!(harness.row::<Note>("1/1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_narrowed_run_never_applies_past_a_gap() {
    let harness = ProjectorTestHarness::new(NoteProjector, ACCOUNT);
    let (t, p) = note_added(1, "draft");
    let draft = harness.given(t, p).await;
    harness.given("note_removed", json!({"note_id": 1})).await;
    let (t, p) = note_added(1, "final");
    let last = harness.given(t, p).await;

    // Applying "final" now would run it ahead of the removal before it.
    assert_eq!(harness.run_for(&["note_added"]).await.unwrap(), 1);
    assert_eq!(harness.checkpoint(), draft.id);
    let note = harness.row::<Note>("1/1").await.unwrap().unwrap();
    assert_eq!(note.text, "draft");

    // Repeating the narrowed run does nothing new.
    assert_eq!(harness.run_for(&["note_added"]).await.unwrap(), 0);
    assert_eq!(harness.checkpoint(), draft.id);

    assert_eq!(harness.run().await.unwrap(), 2);
    assert_eq!(harness.checkpoint(), last.id);
    let note = harness.row::<Note>("1/1").await.unwrap().unwrap();
    assert_eq!(note.text, "final");
}

#[tokio::test]
async fn test_narrowed_run_stops_at_gap_across_batches() {
    let harness = ProjectorTestHarness::new(NoteProjector, ACCOUNT)
        .with_config(EngineConfig::new().with_batch_size(2));
    let (t, p) = note_added(1, "a");
    harness.given(t, p).await;
    let (t, p) = note_added(2, "b");
    let second = harness.given(t, p).await;
    harness.given("note_removed", json!({"note_id": 1})).await;
    let (t, p) = note_added(3, "c");
    harness.given(t, p).await;

    assert_eq!(harness.run_for(&["note_added"]).await.unwrap(), 2);
    assert_eq!(harness.checkpoint(), second.id);
    assert!(harness.row::<Note>("1/3").await.unwrap().is_none());
}

#[tokio::test]
async fn test_narrowed_run_advances_past_unhandled_events() {
    let harness = ProjectorTestHarness::new(NoteProjector, ACCOUNT);
    let (t, p) = note_added(1, "a");
    harness.given(t, p).await;
    harness.given("wallet_created", json!({"wallet_id": 1})).await;
    let (t, p) = note_added(2, "b");
    let last = harness.given(t, p).await;

    assert_eq!(harness.run_for(&["note_added"]).await.unwrap(), 2);
    assert_eq!(harness.checkpoint(), last.id);
}

#[tokio::test]
async fn test_accounts_are_isolated() {
    let ledger = InMemoryLedger::new();
    let one = ProjectorTestHarness::with_ledger(NoteProjector, AccountId::new(1), ledger.clone());
    let two = ProjectorTestHarness::with_ledger(NoteProjector, AccountId::new(2), ledger.clone());

    let (t, p) = note_added(1, "mine");
    one.given(t, p).await;
    let (t, p) = note_added(1, "theirs");
    two.given(t, p).await;

    assert_eq!(one.run().await.unwrap(), 1);
    assert_eq!(two.checkpoint(), EventId::ZERO);
    assert!(two.rows::<Note>().await.unwrap().is_empty());

    assert_eq!(two.run().await.unwrap(), 1);
    let theirs: Note = two.row("2/1").await.unwrap().unwrap();
    assert_eq!(theirs.text, "theirs");
}

#[tokio::test]
async fn test_rebuild_drops_rows_not_backed_by_events() {
    let harness = ProjectorTestHarness::new(NoteProjector, ACCOUNT);
    let (t, p) = note_added(1, "real");
    harness.given(t, p).await;
    harness.run().await.unwrap();

    let mut tx = harness.ledger().begin("stray", ACCOUNT).await.unwrap();
    tx.save(&Note {
        account_id: ACCOUNT,
        note_id: 99,
        text: "stray".to_string(),
    })
    .await
    .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(harness.rows::<Note>().await.unwrap().len(), 2);

    assert_eq!(harness.rebuild().await.unwrap(), 1);
    let notes: Vec<Note> = harness.rows().await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].note_id, 1);
}

#[tokio::test]
async fn test_concurrent_runs_apply_each_event_once() {
    let ledger = InMemoryLedger::new();
    for _ in 0..40 {
        ledger
            .append(NewEvent::new(ACCOUNT, "tick", json!({"seq": 1})))
            .await
            .unwrap();
    }

    let store: Arc<dyn EventStore> = Arc::new(ledger.clone());
    let engine = Arc::new(
        ProjectorEngine::new(TallyProjector, store, ledger.clone())
            .with_config(EngineConfig::new().with_batch_size(7)),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.run(ACCOUNT, None).await.unwrap() })
        })
        .collect();

    let applied: usize = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .sum();

    assert_eq!(applied, 40);
    let tally: Tally = ledger.find(&ACCOUNT.to_string()).await.unwrap().unwrap();
    assert_eq!(tally.ticks, 40);
    assert_eq!(ledger.checkpoint("tally", ACCOUNT), EventId::new(40));
}

#[tokio::test]
async fn test_orchestrator_runs_every_projector() {
    let ledger = InMemoryLedger::new();
    let store: Arc<dyn EventStore> = Arc::new(ledger.clone());
    for event_type in ["tick", "note_added", "tick"] {
        ledger
            .append(NewEvent::new(ACCOUNT, event_type, json!({"note_id": 1})))
            .await
            .unwrap();
    }

    let orchestrator = ProjectorOrchestrator::new()
        .with_runner(Arc::new(ProjectorEngine::new(
            NoteProjector,
            Arc::clone(&store),
            ledger.clone(),
        )))
        .with_runner(Arc::new(ProjectorEngine::new(
            TallyProjector,
            Arc::clone(&store),
            ledger.clone(),
        )));

    assert_eq!(orchestrator.names(), vec!["notes", "tally"]);

    let applied = orchestrator.run_all(ACCOUNT).await.unwrap();
    assert_eq!(applied.get("notes"), Some(&1));
    assert_eq!(applied.get("tally"), Some(&2));

    orchestrator.reset_all(ACCOUNT).await.unwrap();
    assert_eq!(ledger.checkpoint("notes", ACCOUNT), EventId::ZERO);
    assert_eq!(ledger.checkpoint("tally", ACCOUNT), EventId::ZERO);

    let runner = orchestrator.get("notes").unwrap();
    assert_eq!(runner.run_account(ACCOUNT, None).await.unwrap(), 1);
    assert_eq!(runner.checkpoint_of(ACCOUNT).await.unwrap(), EventId::new(3));
}

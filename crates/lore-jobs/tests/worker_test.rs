//! Integration tests for the enrichment worker.
//!
//! Every test runs against the in-memory store with the deterministic mock
//! provider, or an LLM provider over a scripted backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lore_db::{test_fixtures::ImportBuilder, EnrichmentCache, MemoryStore, Repositories};
use lore_inference::{GenerationProvider, LlmProvider, MockGenerationBackend, MockProvider};
use lore_jobs::{
    CachedClassifier, EnrichmentOptions, EnrichmentPipeline, EnrichmentService,
    EnrichmentTotals, EnrichmentWorker, Error, ImportNote, InferredType, NoteRepository,
    ProgressLookup, Result, RunPhase, RunStatus, WorkerConfig, WorkerEvent, WorkerHandle,
    WorkerState,
};
use tokio::sync::broadcast;
use uuid::Uuid;

struct Harness {
    store: MemoryStore,
    worker: WorkerHandle,
    service: EnrichmentService,
}

fn start(
    store: &MemoryStore,
    repos: Repositories,
    provider: Arc<dyn GenerationProvider>,
    config: WorkerConfig,
) -> Harness {
    let classifier = CachedClassifier::new(provider, EnrichmentCache::new(repos.cache.clone()));
    let worker = EnrichmentWorker::new(EnrichmentPipeline::new(repos.clone(), classifier), config)
        .start();
    Harness {
        store: store.clone(),
        service: EnrichmentService::new(repos.runs.clone(), worker.clone()),
        worker,
    }
}

fn mock_harness() -> (Harness, Arc<MockProvider>) {
    let store = MemoryStore::new();
    let provider = Arc::new(MockProvider::new());
    let harness = start(
        &store,
        store.repositories(),
        provider.clone(),
        WorkerConfig::default(),
    );
    (harness, provider)
}

/// Next terminal event for `run_id`.
async fn finished(events: &mut broadcast::Receiver<WorkerEvent>, run_id: Uuid) -> WorkerEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream open");
            let terminal = match &event {
                WorkerEvent::RunCompleted { run_id: id, .. }
                | WorkerEvent::RunFailed { run_id: id, .. } => *id == run_id,
                _ => false,
            };
            if terminal {
                return event;
            }
        }
    })
    .await
    .expect("run finished in time")
}

fn campaign(team_id: Uuid) -> ImportBuilder {
    let mut import = ImportBuilder::new(team_id);
    let tam = import.note("Old Tam the innkeeper", "Keeps the Rusty Flagon.");
    let quest = import.note(
        "Quest: The Lost Crown",
        "Reward offered by [[Old Tam the innkeeper]]. Search the [crypt](Crypt.md).",
    );
    import.note("Crypt", "A dungeon under the temple.");
    import.typed_note("Aria", "Our ranger.", Some("character"));
    import.link(tam, quest);
    import
}

#[tokio::test]
async fn test_zero_notes_completes_without_provider_calls() {
    let (h, provider) = mock_harness();
    let mut events = h.worker.events();

    let run_id = h
        .service
        .enqueue(Uuid::new_v4(), Uuid::new_v4(), EnrichmentOptions::default())
        .await
        .unwrap();

    match finished(&mut events, run_id).await {
        WorkerEvent::RunCompleted { totals, .. } => assert_eq!(totals, EnrichmentTotals::default()),
        other => panic!("unexpected event: {:?}", other),
    }

    let run = h.service.get_run(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.totals, Some(EnrichmentTotals::default()));
    assert_eq!(provider.classify_calls(), 0);
    assert_eq!(provider.relationship_calls(), 0);
}

#[tokio::test]
async fn test_full_run_persists_records_and_totals() {
    let (h, _) = mock_harness();
    let team = Uuid::new_v4();
    let import = campaign(team);
    let import_run_id = import.import_run_id;
    h.store.notes.insert_all(import.build());
    let mut events = h.worker.events();

    let run_id = h
        .service
        .enqueue(import_run_id, team, EnrichmentOptions::default())
        .await
        .unwrap();
    let WorkerEvent::RunCompleted { totals, .. } = finished(&mut events, run_id).await else {
        panic!("run failed");
    };

    // "Aria" is pre-classified and skipped.
    assert_eq!(totals.notes_processed, 4);
    assert_eq!(totals.classifications_created, 3);
    assert!(totals.relationships_found >= 2);

    let repos = h.store.repositories();
    let classifications = repos.classifications.list_for_run(run_id).await.unwrap();
    let relationships = repos.relationships.list_for_run(run_id).await.unwrap();
    assert_eq!(classifications.len(), 3);
    assert_eq!(relationships.len() as i32, totals.relationships_found);
    assert!(relationships.iter().all(|r| r.from_note_id != r.to_note_id));

    let run = h.service.get_run(run_id).await.unwrap();
    assert_eq!(run.totals, Some(totals));
    assert!(run.started_at.is_some() && run.completed_at.is_some());

    match h.service.progress(run_id) {
        ProgressLookup::Found(p) => {
            assert_eq!(p.phase, RunPhase::Finished);
            assert_eq!(p.status, RunStatus::Completed);
        }
        ProgressLookup::NotFound => panic!("progress should be retained"),
    }
}

#[tokio::test]
async fn test_override_reclassifies_typed_notes() {
    let (h, _) = mock_harness();
    let team = Uuid::new_v4();
    let import = campaign(team);
    let import_run_id = import.import_run_id;
    h.store.notes.insert_all(import.build());
    let mut events = h.worker.events();

    let options = EnrichmentOptions {
        override_existing_types: true,
        player_character_names: vec!["Aria".to_string()],
    };
    let run_id = h.service.enqueue(import_run_id, team, options).await.unwrap();
    finished(&mut events, run_id).await;

    let records = h
        .store
        .repositories()
        .classifications
        .list_for_run(run_id)
        .await
        .unwrap();
    assert_eq!(records.len(), 4);
    assert!(records
        .iter()
        .any(|r| r.inferred_type == InferredType::Character));
}

#[tokio::test]
async fn test_identical_content_is_classified_once() {
    let (h, provider) = mock_harness();
    let team = Uuid::new_v4();
    let first = campaign(team);
    let second = campaign(team);
    let (first_id, second_id) = (first.import_run_id, second.import_run_id);
    h.store.notes.insert_all(first.build());
    h.store.notes.insert_all(second.build());
    let mut events = h.worker.events();

    let a = h
        .service
        .enqueue(first_id, team, EnrichmentOptions::default())
        .await
        .unwrap();
    let b = h
        .service
        .enqueue(second_id, team, EnrichmentOptions::default())
        .await
        .unwrap();
    finished(&mut events, a).await;
    finished(&mut events, b).await;

    assert_eq!(provider.classify_calls(), 1);

    let repos = h.store.repositories();
    let mut first_types: Vec<_> = repos
        .classifications
        .list_for_run(a)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.inferred_type)
        .collect();
    let mut second_types: Vec<_> = repos
        .classifications
        .list_for_run(b)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.inferred_type)
        .collect();
    first_types.sort();
    second_types.sort();
    assert_eq!(first_types, second_types);
}

#[tokio::test]
async fn test_runs_execute_one_at_a_time_in_fifo_order() {
    let (h, _) = mock_harness();
    let team = Uuid::new_v4();
    let mut run_ids = Vec::new();
    let mut events = h.worker.events();

    for _ in 0..3 {
        let import = campaign(team);
        let import_run_id = import.import_run_id;
        h.store.notes.insert_all(import.build());
        run_ids.push(
            h.service
                .enqueue(import_run_id, team, EnrichmentOptions::default())
                .await
                .unwrap(),
        );
    }

    let mut order = Vec::new();
    while order.len() < 6 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event in time")
            .expect("event stream open");
        match event {
            WorkerEvent::RunStarted { run_id, .. } => order.push(("start", run_id)),
            WorkerEvent::RunCompleted { run_id, .. } => order.push(("done", run_id)),
            WorkerEvent::RunFailed { run_id, error } => panic!("run {} failed: {}", run_id, error),
            _ => {}
        }
    }

    let expected: Vec<_> = run_ids
        .iter()
        .flat_map(|&id| [("start", id), ("done", id)])
        .collect();
    assert_eq!(order, expected);
}

struct BrokenNotes;

#[async_trait]
impl NoteRepository for BrokenNotes {
    async fn get(&self, _id: Uuid) -> Result<Option<ImportNote>> {
        Err(Error::Internal("note store unavailable".into()))
    }

    async fn list_for_import(&self, _import_run_id: Uuid) -> Result<Vec<ImportNote>> {
        Err(Error::Internal("note store unavailable".into()))
    }

    async fn titles(&self, _ids: &[Uuid]) -> Result<std::collections::HashMap<Uuid, String>> {
        Err(Error::Internal("note store unavailable".into()))
    }
}

#[tokio::test]
async fn test_load_failure_fails_run_and_worker_continues() {
    let store = MemoryStore::new();
    let mut repos = store.repositories();
    repos.notes = Arc::new(BrokenNotes);
    let h = start(&store, repos, Arc::new(MockProvider::new()), WorkerConfig::default());
    let mut events = h.worker.events();

    let broken = h
        .service
        .enqueue(Uuid::new_v4(), Uuid::new_v4(), EnrichmentOptions::default())
        .await
        .unwrap();
    match finished(&mut events, broken).await {
        WorkerEvent::RunFailed { error, .. } => assert!(error.contains("note store unavailable")),
        other => panic!("unexpected event: {:?}", other),
    }

    let run = h.service.get_run(broken).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("note store unavailable")));
    assert!(run.totals.is_none());

    // The next run is still picked up.
    let next = h
        .service
        .enqueue(Uuid::new_v4(), Uuid::new_v4(), EnrichmentOptions::default())
        .await
        .unwrap();
    assert!(matches!(
        finished(&mut events, next).await,
        WorkerEvent::RunFailed { .. }
    ));
    let mut state = h.worker.state_changes();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == WorkerState::Idle),
    )
    .await
    .expect("worker idles in time")
    .unwrap();
}

#[tokio::test]
async fn test_provider_failure_still_completes_with_fallbacks() {
    let store = MemoryStore::new();
    let backend = Arc::new(MockGenerationBackend::new().failing());
    let provider = Arc::new(LlmProvider::new(backend).with_batch_delay(Duration::ZERO));
    let h = start(&store, store.repositories(), provider, WorkerConfig::default());

    let team = Uuid::new_v4();
    let import = campaign(team);
    let import_run_id = import.import_run_id;
    h.store.notes.insert_all(import.build());
    let mut events = h.worker.events();

    let run_id = h
        .service
        .enqueue(import_run_id, team, EnrichmentOptions::default())
        .await
        .unwrap();
    let WorkerEvent::RunCompleted { totals, .. } = finished(&mut events, run_id).await else {
        panic!("provider failures must not fail the run");
    };

    assert_eq!(totals.classifications_created, 3);
    assert_eq!(totals.relationships_found, 0);
    assert_eq!(totals.high_confidence_count, 0);
    assert_eq!(totals.user_review_required, 3);

    let records = h
        .store
        .repositories()
        .classifications
        .list_for_run(run_id)
        .await
        .unwrap();
    assert!(records
        .iter()
        .all(|r| r.inferred_type == InferredType::Note && (r.confidence - 0.5).abs() < 1e-6));
    // Placeholders are not cached.
    assert!(h.store.cache.entries().is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_accepting_jobs() {
    let (h, _) = mock_harness();
    h.worker.shutdown().await.unwrap();
    h.worker.stopped().await;
    assert_eq!(h.worker.state(), WorkerState::Stopped);

    let import_run_id = Uuid::new_v4();
    let err = h
        .service
        .enqueue(import_run_id, Uuid::new_v4(), EnrichmentOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Internal(_)));
}

#[tokio::test]
async fn test_disabled_worker_rejects_jobs() {
    let store = MemoryStore::new();
    let h = start(
        &store,
        store.repositories(),
        Arc::new(MockProvider::new()),
        WorkerConfig::default().with_enabled(false),
    );
    h.worker.stopped().await;

    let result = h
        .service
        .enqueue(Uuid::new_v4(), Uuid::new_v4(), EnrichmentOptions::default())
        .await;
    assert!(result.is_err());
}

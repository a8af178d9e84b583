//! Integration tests for the query engine lifecycle against the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use query::{EngineState, QueryEngine, QueryError, QueryEvent, QueryFilter, Queryable};
use record_store::{
    EntitySchema, FetchSpec, Fields, InMemoryRecordStore, Predicate, Record, RecordId,
    RecordStore, Schema, SortDescriptor, StoreError,
};
use serde_json::json;

#[derive(Debug, Clone, Default, PartialEq)]
struct TaskFilter {
    min_rank: Option<i64>,
    hide_done: bool,
    /// Orders by a field the schema does not declare.
    by_owner: bool,
}

impl QueryFilter for TaskFilter {
    fn fetch_spec(&self, schema: &Schema) -> FetchSpec {
        let mut spec = schema
            .entity("Task")
            .map(EntitySchema::default_fetch)
            .unwrap_or_else(|| FetchSpec::for_entity("Task"));
        if let Some(min) = self.min_rank {
            spec = spec.and_where(Predicate::at_least("rank", min));
        }
        if self.hide_done {
            spec = spec.and_where(Predicate::equals("done", false));
        }
        if self.by_owner {
            spec = spec.order_by(SortDescriptor::ascending("owner"));
        }
        spec
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Task {
    id: RecordId,
    rank: i64,
    title: String,
    done: bool,
}

impl Queryable for Task {
    type Filter = TaskFilter;
    type Id = RecordId;

    fn from_record(record: &Record) -> Self {
        Self {
            id: record.id(),
            rank: record.get("rank").unwrap_or_default(),
            title: record.get("title").unwrap_or_default(),
            done: record.get("done").unwrap_or_default(),
        }
    }

    fn id(&self) -> RecordId {
        self.id
    }
}

struct TestHarness {
    store: InMemoryRecordStore,
    shared: Arc<dyn RecordStore>,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryRecordStore::new(
            Schema::new().with_entity(
                EntitySchema::new("Task")
                    .field("rank")
                    .field("title")
                    .field("done")
                    .default_order(SortDescriptor::ascending("rank")),
            ),
        );
        let shared: Arc<dyn RecordStore> = Arc::new(store.clone());
        Self { store, shared }
    }

    fn with_ranks(ranks: &[i64]) -> Self {
        let h = Self::new();
        for &rank in ranks {
            h.add(rank, false);
        }
        h
    }

    fn add(&self, rank: i64, done: bool) -> RecordId {
        self.store
            .insert("Task", task_fields(rank, done))
            .unwrap()
            .id()
    }

    fn engine(&self, filter: TaskFilter) -> QueryEngine<Task> {
        let mut engine = QueryEngine::new();
        assert!(engine.bind(Arc::clone(&self.shared), filter));
        engine
    }
}

fn task_fields(rank: i64, done: bool) -> Fields {
    json!({ "rank": rank, "title": format!("task {rank}"), "done": done })
        .as_object()
        .cloned()
        .unwrap()
}

fn fields(value: serde_json::Value) -> Fields {
    value.as_object().cloned().unwrap()
}

/// Applies inbound messages until no fetch is in flight.
async fn drain(engine: &mut QueryEngine<Task>) -> Vec<QueryEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            events.extend(engine.process_pending());
            if engine.state() != EngineState::Fetching {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("engine did not settle");
    events
}

fn ranks(engine: &QueryEngine<Task>) -> Vec<i64> {
    engine
        .current_results()
        .unwrap()
        .iter()
        .map(|t| t.rank)
        .collect()
}

#[tokio::test]
async fn test_filter_compilation_is_deterministic() {
    let h = TestHarness::new();
    let filter = TaskFilter {
        min_rank: Some(2),
        hide_done: true,
        ..Default::default()
    };

    let first = filter.fetch_spec(h.shared.schema());
    let second = filter.clone().fetch_spec(h.shared.schema());
    assert_eq!(first, second);
    assert_ne!(first, TaskFilter::default().fetch_spec(h.shared.schema()));
}

#[tokio::test]
async fn test_first_fetch_publishes_ordered_snapshot_once() {
    let h = TestHarness::with_ranks(&[3, 1, 2]);
    let signals = Arc::new(AtomicUsize::new(0));

    let mut engine = h.engine(TaskFilter::default());
    let counter = Arc::clone(&signals);
    engine.on_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(engine.state(), EngineState::Fetching);
    assert!(engine.current_results().unwrap().is_empty());

    let events = drain(&mut engine).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        QueryEvent::Changed {
            revision: 1,
            count: 3
        }
    ));
    assert_eq!(signals.load(Ordering::SeqCst), 1);

    assert_eq!(ranks(&engine), vec![1, 2, 3]);
    assert_eq!(engine.state(), EngineState::Active);
    assert_eq!(h.store.subscription_count(), 1);
    assert_eq!(h.store.fetch_count(), 1);
}

#[tokio::test]
async fn test_index_access_follows_fetch_order() {
    let h = TestHarness::with_ranks(&[3, 1, 2]);
    let mut engine = h.engine(TaskFilter::default());
    drain(&mut engine).await;

    let results = engine.current_results().unwrap();
    assert_eq!(results.len(), 3);
    for (index, handle) in results.handles().iter().enumerate() {
        let task = results.get(index).unwrap();
        assert_eq!(task.id, handle.id());
        assert_eq!(task.rank, index as i64 + 1);
    }
    assert!(matches!(
        results.get(3),
        Err(QueryError::IndexOutOfBounds { index: 3, len: 3 })
    ));
}

#[tokio::test]
async fn test_rebinding_same_filter_does_not_refetch() {
    let h = TestHarness::with_ranks(&[1, 2]);
    let mut engine = h.engine(TaskFilter::default());
    drain(&mut engine).await;

    assert!(!engine.bind(Arc::clone(&h.shared), TaskFilter::default()));
    assert!(!engine.set_filter(TaskFilter::default()));

    assert!(engine.process_pending().is_empty());
    assert_eq!(h.store.fetch_count(), 1);
    assert_eq!(engine.revision(), 1);
    assert_eq!(engine.state(), EngineState::Active);
}

#[tokio::test]
async fn test_narrower_filter_with_identical_results_is_silent() {
    let h = TestHarness::with_ranks(&[1, 2, 3]);
    let mut engine = h.engine(TaskFilter::default());
    drain(&mut engine).await;
    let before = engine.current_results().unwrap();

    let narrower = TaskFilter {
        hide_done: true,
        ..Default::default()
    };
    assert!(engine.set_filter(narrower));
    let events = drain(&mut engine).await;

    assert!(events.is_empty());
    assert_eq!(h.store.fetch_count(), 2);
    assert_eq!(engine.revision(), 1);
    assert!(engine.current_results().unwrap().same_content(&before));
}

#[tokio::test]
async fn test_narrower_filter_publishes_subset() {
    let h = TestHarness::with_ranks(&[1, 2, 3]);
    h.add(4, true);
    let mut engine = h.engine(TaskFilter::default());
    drain(&mut engine).await;
    assert_eq!(ranks(&engine), vec![1, 2, 3, 4]);

    engine.set_filter(TaskFilter {
        min_rank: Some(2),
        hide_done: true,
        ..Default::default()
    });
    let events = drain(&mut engine).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        QueryEvent::Changed {
            revision: 2,
            count: 2
        }
    ));
    assert_eq!(ranks(&engine), vec![2, 3]);
    assert_eq!(h.store.fetch_count(), 2);
}

#[tokio::test]
async fn test_fetch_failure_keeps_last_snapshot() {
    let h = TestHarness::with_ranks(&[1, 2, 3]);
    let mut engine = h.engine(TaskFilter::default());
    drain(&mut engine).await;

    h.store.set_offline(true);
    engine.refetch().unwrap();
    let events = drain(&mut engine).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        QueryEvent::Failed { error } => {
            assert!(matches!(**error, StoreError::Unavailable(_)));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(ranks(&engine), vec![1, 2, 3]);
    assert_eq!(engine.revision(), 1);

    // Not retried on its own.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(engine.process_pending().is_empty());
    assert_eq!(h.store.fetch_count(), 2);

    h.store.set_offline(false);
    engine.refetch().unwrap();
    let events = drain(&mut engine).await;
    assert!(events.is_empty());
    assert_eq!(ranks(&engine), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_failed_first_fetch_recovers_on_next_write() {
    let h = TestHarness::with_ranks(&[1]);
    h.store.set_offline(true);
    let mut engine = h.engine(TaskFilter::default());

    let events = tokio::time::timeout(Duration::from_secs(5), engine.next_events())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_failure());
    assert!(engine.current_results().unwrap().is_empty());

    // The subscription outlives the failed attempt.
    assert_eq!(engine.state(), EngineState::Active);
    assert_eq!(h.store.subscription_count(), 1);

    h.store.set_offline(false);
    h.add(2, false);
    let events = drain(&mut engine).await;
    assert_eq!(events.len(), 1);
    assert!(events[0].is_change());
    assert_eq!(ranks(&engine), vec![1, 2]);
}

#[tokio::test]
async fn test_rejected_subscription_leaves_engine_idle() {
    let h = TestHarness::with_ranks(&[1]);
    let mut engine = h.engine(TaskFilter {
        by_owner: true,
        ..Default::default()
    });

    let events = engine.process_pending();
    assert_eq!(events.len(), 1);
    match &events[0] {
        QueryEvent::Failed { error } => {
            assert!(matches!(**error, StoreError::UnknownField { .. }));
        }
        other => panic!("expected failure, got {other:?}"),
    }

    assert_eq!(engine.state(), EngineState::BoundIdle);
    assert_eq!(h.store.subscription_count(), 0);
    assert_eq!(h.store.fetch_count(), 0);
    assert!(matches!(engine.next_events().await, Err(QueryError::Idle)));

    // A valid filter recovers the binding.
    engine.set_filter(TaskFilter::default());
    let events = drain(&mut engine).await;
    assert_eq!(events.len(), 1);
    assert_eq!(ranks(&engine), vec![1]);
}

#[tokio::test]
async fn test_store_write_triggers_refetch_and_signal() {
    let h = TestHarness::with_ranks(&[1, 2, 3]);
    let mut engine = h.engine(TaskFilter::default());
    drain(&mut engine).await;

    h.add(0, false);
    let events = tokio::time::timeout(Duration::from_secs(5), engine.next_events())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        QueryEvent::Changed {
            revision: 2,
            count: 4
        }
    ));
    assert_eq!(ranks(&engine), vec![0, 1, 2, 3]);
    assert_eq!(h.store.fetch_count(), 2);
}

#[tokio::test]
async fn test_write_outside_filter_is_ignored() {
    let h = TestHarness::with_ranks(&[5, 6]);
    let mut engine = h.engine(TaskFilter {
        min_rank: Some(5),
        ..Default::default()
    });
    drain(&mut engine).await;

    h.add(1, false);
    let events = drain(&mut engine).await;

    assert!(events.is_empty());
    assert_eq!(h.store.fetch_count(), 1);
    assert_eq!(ranks(&engine), vec![5, 6]);
}

#[tokio::test]
async fn test_unchanged_update_does_not_signal() {
    let h = TestHarness::with_ranks(&[1, 2]);
    let id = h.add(3, false);
    let mut engine = h.engine(TaskFilter::default());
    drain(&mut engine).await;

    h.store
        .update(id, fields(json!({ "title": "task 3" })))
        .unwrap();
    let events = drain(&mut engine).await;

    assert!(events.is_empty());
    assert_eq!(h.store.fetch_count(), 2);
    assert_eq!(engine.revision(), 1);
}

#[tokio::test]
async fn test_changed_update_signals_and_is_visible_in_place() {
    let h = TestHarness::with_ranks(&[1]);
    let id = h.add(2, false);
    let mut engine = h.engine(TaskFilter::default());
    drain(&mut engine).await;
    let held = engine.current_results().unwrap();

    h.store
        .update(id, fields(json!({ "title": "renamed" })))
        .unwrap();
    let events = drain(&mut engine).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        QueryEvent::Changed {
            revision: 2,
            count: 2
        }
    ));
    assert_eq!(engine.current_results().unwrap().get(1).unwrap().title, "renamed");
    // The held snapshot maps lazily, so it sees the new fields too.
    assert_eq!(held.get(1).unwrap().title, "renamed");
}

#[tokio::test]
async fn test_update_moving_record_out_of_filter_removes_it() {
    let h = TestHarness::with_ranks(&[1, 2]);
    let id = h.add(3, false);
    let mut engine = h.engine(TaskFilter {
        hide_done: true,
        ..Default::default()
    });
    drain(&mut engine).await;

    h.store.update(id, fields(json!({ "done": true }))).unwrap();
    drain(&mut engine).await;
    assert_eq!(ranks(&engine), vec![1, 2]);

    h.store.delete(id).unwrap();
    let events = drain(&mut engine).await;
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_unbound_read_is_an_error() {
    let mut engine = QueryEngine::<Task>::new();
    assert!(matches!(
        engine.current_results(),
        Err(QueryError::Unbound(_))
    ));
    assert!(matches!(engine.refetch(), Err(QueryError::Unbound(_))));
    assert!(matches!(
        engine.next_events().await,
        Err(QueryError::Unbound(_))
    ));
    assert_eq!(engine.state(), EngineState::Unbound);
}

#[tokio::test]
async fn test_filter_change_aborts_in_flight_fetch() {
    let h = TestHarness::with_ranks(&[1, 2]);
    h.add(3, true);
    h.store.set_latency(Some(Duration::from_millis(50)));

    let mut engine = h.engine(TaskFilter::default());
    assert!(engine.set_filter(TaskFilter {
        hide_done: true,
        ..Default::default()
    }));
    let events = drain(&mut engine).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        QueryEvent::Changed {
            revision: 1,
            count: 2
        }
    ));
    assert_eq!(ranks(&engine), vec![1, 2]);
    assert_eq!(h.store.subscription_count(), 1);
}

#[tokio::test]
async fn test_result_for_superseded_filter_is_discarded() {
    let h = TestHarness::with_ranks(&[1, 2]);
    h.add(3, true);

    let mut engine = h.engine(TaskFilter::default());
    // Let the first fetch finish and queue its result without applying it.
    tokio::time::sleep(Duration::from_millis(20)).await;

    engine.set_filter(TaskFilter {
        hide_done: true,
        ..Default::default()
    });
    let events = drain(&mut engine).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        QueryEvent::Changed {
            revision: 1,
            count: 2
        }
    ));
    assert_eq!(ranks(&engine), vec![1, 2]);
}

#[tokio::test]
async fn test_notifications_during_fetch_coalesce() {
    let h = TestHarness::with_ranks(&[1, 2, 3]);
    let mut engine = h.engine(TaskFilter::default());
    drain(&mut engine).await;

    h.store.set_latency(Some(Duration::from_millis(20)));
    h.add(4, false);
    h.add(5, false);
    let events = drain(&mut engine).await;

    // One fetch for the first write, one queued follow-up for the second.
    assert_eq!(h.store.fetch_count(), 3);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        QueryEvent::Changed {
            revision: 2,
            count: 5
        }
    ));
}

#[tokio::test]
async fn test_subscription_released_on_filter_change_and_drop() {
    let h = TestHarness::with_ranks(&[1, 2]);
    let mut engine = h.engine(TaskFilter::default());
    drain(&mut engine).await;
    assert_eq!(h.store.subscription_count(), 1);

    // The old subscription is released before the new one is made.
    engine.set_filter(TaskFilter {
        min_rank: Some(2),
        ..Default::default()
    });
    assert_eq!(h.store.subscription_count(), 1);
    drain(&mut engine).await;
    assert_eq!(h.store.subscription_count(), 1);

    drop(engine);
    assert_eq!(h.store.subscription_count(), 0);
}

#[tokio::test]
async fn test_rebinding_to_another_store_releases_old_subscription() {
    let first = TestHarness::with_ranks(&[1, 2]);
    let second = TestHarness::with_ranks(&[7]);

    let mut engine = first.engine(TaskFilter::default());
    drain(&mut engine).await;
    assert_eq!(first.store.subscription_count(), 1);

    assert!(engine.bind(Arc::clone(&second.shared), TaskFilter::default()));
    assert_eq!(first.store.subscription_count(), 0);
    let events = drain(&mut engine).await;

    assert_eq!(events.len(), 1);
    assert_eq!(ranks(&engine), vec![7]);
    assert_eq!(second.store.subscription_count(), 1);
}

#[tokio::test]
async fn test_write_from_another_thread_is_marshaled() {
    let h = TestHarness::with_ranks(&[1, 2, 3]);
    let mut engine = h.engine(TaskFilter::default());
    drain(&mut engine).await;
    let held = engine.current_results().unwrap();

    let writer = h.store.clone();
    std::thread::spawn(move || {
        writer.insert("Task", task_fields(10, false)).unwrap();
    })
    .join()
    .unwrap();

    // Nothing is applied until the owner drains the engine.
    assert_eq!(engine.current_results().unwrap().len(), 3);

    let events = drain(&mut engine).await;
    assert_eq!(events.len(), 1);
    assert_eq!(ranks(&engine), vec![1, 2, 3, 10]);
    assert_eq!(held.len(), 3);
    assert_eq!(
        held.iter().map(|t| t.rank).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

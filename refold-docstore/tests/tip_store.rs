//! Tip/calf mechanics and engine integration over the in-memory
//! document client.

use std::{sync::Arc, time::Duration};

use refold_core::{
    AccessStrategy, AppendOutcome, CachingStrategy, Category, Decider, EventContext, EventData,
    EventStore, EventType, ExpectedVersion, Fold, JsonCodec, LoadOption, StateCache, StoreError,
    StreamName,
};
use refold_docstore::{DocumentClient, DocumentStore, MemoryDocumentClient};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum CounterEvent {
    Incremented { by: i64 },
    Snapshotted { total: i64 },
}

impl EventType for CounterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Incremented { .. } => "Incremented",
            Self::Snapshotted { .. } => "Snapshotted",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Counter {
    total: i64,
}

impl Fold for Counter {
    type Event = CounterEvent;

    fn initial() -> Self {
        Self::default()
    }

    fn evolve(&mut self, event: &CounterEvent) {
        match event {
            CounterEvent::Incremented { by } => self.total += by,
            CounterEvent::Snapshotted { total } => self.total = *total,
        }
    }
}

fn is_snapshot(event: &CounterEvent) -> bool {
    matches!(event, CounterEvent::Snapshotted { .. })
}

fn snapshot(state: &Counter) -> CounterEvent {
    CounterEvent::Snapshotted { total: state.total }
}

fn stream(id: &str) -> StreamName {
    StreamName::new("Counter", id).unwrap()
}

fn ctx() -> EventContext {
    EventContext::default()
}

fn raw_event(tag: &str) -> EventData {
    EventData {
        id: Uuid::new_v4(),
        event_type: tag.to_owned(),
        data: b"{\"Incremented\":{\"by\":1}}".to_vec(),
        meta: Vec::new(),
        correlation_id: None,
        causation_id: None,
    }
}

type CounterDecider =
    Decider<DocumentStore<MemoryDocumentClient>, JsonCodec<CounterEvent>, Counter>;

fn decider(
    store: DocumentStore<MemoryDocumentClient>,
    access: AccessStrategy<Counter, CounterEvent>,
    id: &str,
) -> CounterDecider {
    let category =
        Category::new(store, JsonCodec::new(), access, CachingStrategy::NoCaching).unwrap();
    Decider::new(Arc::new(category), stream(id))
}

fn increment(by: i64) -> impl Fn(&Counter) -> Vec<CounterEvent> {
    move |_| vec![CounterEvent::Incremented { by }]
}

// ============================================================================
// Adapter primitives
// ============================================================================

#[tokio::test]
async fn append_creates_the_tip_and_mints_a_tagged_token() {
    let store = DocumentStore::new(MemoryDocumentClient::new());
    let token = store.empty_token();
    let outcome = store
        .append(
            &stream("a"),
            &token,
            ExpectedVersion::NoStream,
            vec![raw_event("Incremented")],
            vec![],
        )
        .await
        .unwrap();
    let AppendOutcome::Written(token) = outcome else {
        panic!("expected write");
    };
    assert_eq!(token.position.stream_version, 0);
    assert_eq!(token.version, 1);
    assert!(token.tag.is_some(), "token must carry the tip etag");
    assert!(token.stream_bytes > 0);
}

#[tokio::test]
async fn second_create_conflicts() {
    let store = DocumentStore::new(MemoryDocumentClient::new());
    let token = store.empty_token();
    store
        .append(
            &stream("a"),
            &token,
            ExpectedVersion::NoStream,
            vec![raw_event("Incremented")],
            vec![],
        )
        .await
        .unwrap();
    let outcome = store
        .append(
            &stream("a"),
            &token,
            ExpectedVersion::NoStream,
            vec![raw_event("Incremented")],
            vec![],
        )
        .await
        .unwrap();
    assert_eq!(outcome, AppendOutcome::Conflict);
}

#[tokio::test]
async fn stale_etag_conflicts_even_at_the_same_version() {
    let store = DocumentStore::new(MemoryDocumentClient::new());
    let empty = store.empty_token();

    // Two writers replace only unfolds: the version never moves, the etag
    // does.
    let AppendOutcome::Written(first) = store
        .append(
            &stream("roll"),
            &empty,
            ExpectedVersion::NoStream,
            vec![],
            vec![raw_event("Snapshotted")],
        )
        .await
        .unwrap()
    else {
        panic!("expected write");
    };
    assert_eq!(first.position.stream_version, -1);

    let outcome = store
        .append(
            &stream("roll"),
            &first,
            ExpectedVersion::NoStream,
            vec![],
            vec![raw_event("Snapshotted")],
        )
        .await
        .unwrap();
    assert!(matches!(outcome, AppendOutcome::Written(_)));

    // A third write based on the first token must lose.
    let outcome = store
        .append(
            &stream("roll"),
            &first,
            ExpectedVersion::NoStream,
            vec![],
            vec![raw_event("Snapshotted")],
        )
        .await
        .unwrap();
    assert_eq!(outcome, AppendOutcome::Conflict);
}

#[tokio::test]
async fn overflowing_events_migrate_to_calf_batches() {
    let client = MemoryDocumentClient::new();
    let store = DocumentStore::new(client.clone()).with_tip_max_events(4);
    let decider = decider(store.clone(), AccessStrategy::Unoptimized, "calved");

    for _ in 0..10 {
        decider.transact(&ctx(), increment(1)).await.unwrap();
    }
    assert!(client.batch_count("Counter-calved") > 0, "tip should have calved");

    // A forward replay still sees the full dense history.
    let (token, events) = store.load_forward(&stream("calved"), 0, false).await.unwrap();
    assert_eq!(token.position.stream_version, 9);
    let indices: Vec<i64> = events.iter().map(|e| e.index).collect();
    assert_eq!(indices, (0..10).collect::<Vec<i64>>());

    let total = decider.query(|c| c.total).await.unwrap();
    assert_eq!(total, 10);
}

#[tokio::test]
async fn missing_calves_surface_as_truncation() {
    let client = MemoryDocumentClient::new();
    let store = DocumentStore::new(client.clone());

    // Hand-build a tip that claims earlier events without any calf
    // backing them.
    let tip = refold_docstore::TipDocument {
        id: "Counter-cut".into(),
        etag: String::new(),
        i: 5,
        e: Vec::new(),
        u: Vec::new(),
    };
    client.try_replace_tip("Counter-cut", None, tip).await.unwrap();

    let err = store.load_forward(&stream("cut"), 0, false).await.unwrap_err();
    assert!(matches!(err, StoreError::StreamTruncated { missing_index: 0, .. }));
}

// ============================================================================
// Engine integration
// ============================================================================

#[tokio::test]
async fn snapshot_strategy_loads_from_the_tip_unfold_alone() {
    let client = MemoryDocumentClient::new();
    let store = DocumentStore::new(client.clone()).with_tip_max_events(2);
    let access = AccessStrategy::snapshot(is_snapshot, snapshot);
    let writer = decider(store.clone(), access.clone(), "snapped");

    for _ in 0..7 {
        writer.transact(&ctx(), increment(1)).await.unwrap();
    }
    // Events are in the log (several calved), yet the unfold answers the
    // load from the tip.
    let total = writer.query(|c| c.total).await.unwrap();
    assert_eq!(total, 7);

    let (token, events) = store
        .load_backward_until(&stream("snapped"), &|e| e.is_unfold, false)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_unfold);
    assert_eq!(token.position.stream_version, 6);
    assert_eq!(token.position.compaction_event_index, Some(7));
}

#[tokio::test]
async fn rolling_state_stream_holds_only_the_latest_snapshot() {
    let client = MemoryDocumentClient::new();
    let store = DocumentStore::new(client.clone());
    let writer = decider(store.clone(), AccessStrategy::rolling_state(snapshot), "latest");

    writer.transact(&ctx(), increment(3)).await.unwrap();
    writer.transact(&ctx(), increment(4)).await.unwrap();

    // No events ever take an index; state lives in the unfold.
    let tip = client.read_tip("Counter-latest").await.unwrap().unwrap();
    assert!(tip.e.is_empty());
    assert_eq!(tip.u.len(), 1);
    assert_eq!(tip.stream_version(), -1);

    let total = writer.query(|c| c.total).await.unwrap();
    assert_eq!(total, 7);
}

#[tokio::test]
async fn conflicting_rolling_writes_resync_through_the_unfold() {
    let client = MemoryDocumentClient::new();
    let store = DocumentStore::new(client.clone());
    let access = AccessStrategy::rolling_state(snapshot);

    // Writer A caches its view; writer B moves the stream (etag only, the
    // version never advances for rolling state).
    let caching = CachingStrategy::SlidingWindow {
        cache: Arc::new(StateCache::new()),
        window: Duration::from_secs(60),
    };
    let category_a =
        Category::new(store.clone(), JsonCodec::new(), access.clone(), caching).unwrap();
    let writer_a = Decider::new(Arc::new(category_a), stream("raced"));
    let writer_b = decider(store.clone(), access.clone(), "raced");

    writer_a.transact(&ctx(), increment(1)).await.unwrap();
    writer_b.transact(&ctx(), increment(10)).await.unwrap();

    // A transacts from its stale cached pair: the etag check conflicts,
    // the resync folds B's unfold, and the decision is re-run.
    writer_a
        .transact_with(LoadOption::AnyCachedValue, &ctx(), |state| {
            ((), increment(100)(state))
        })
        .await
        .unwrap();

    let total = writer_b.query(|c| c.total).await.unwrap();
    assert_eq!(total, 111);
}

#[tokio::test]
async fn unoptimized_replay_folds_trailing_unfolds_idempotently() {
    let client = MemoryDocumentClient::new();
    let store = DocumentStore::new(client.clone());
    let writer = decider(
        store.clone(),
        AccessStrategy::snapshot(is_snapshot, snapshot),
        "mixed",
    );
    writer.transact(&ctx(), increment(2)).await.unwrap();
    writer.transact(&ctx(), increment(5)).await.unwrap();

    // A forward replay sees events plus the snapshot; the snapshot fold
    // must land on the same value.
    let replayer = decider(store, AccessStrategy::Unoptimized, "mixed");
    let total = replayer.query(|c| c.total).await.unwrap();
    assert_eq!(total, 7);
}

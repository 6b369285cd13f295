//! End-to-end favorites scenarios through the facade: basic transact
//! flow, idempotent decisions, racing writers, and the latest-known-event
//! read path.

use std::{sync::Arc, time::Duration};

use refold::{
    AccessStrategy, CachingStrategy, Category, Decider, EventContext, EventType, Fold, JsonCodec,
    LoadOption, StateCache, StreamName,
    store::memory::MemoryStore,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum FavoritesEvent {
    Added { item: String },
    Removed { item: String },
}

impl EventType for FavoritesEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Added { .. } => "Added",
            Self::Removed { .. } => "Removed",
        }
    }
}

/// Favorites list, most recent first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Favorites(Vec<String>);

impl Fold for Favorites {
    type Event = FavoritesEvent;

    fn initial() -> Self {
        Self::default()
    }

    fn evolve(&mut self, event: &FavoritesEvent) {
        match event {
            FavoritesEvent::Added { item } => {
                if !self.0.contains(item) {
                    self.0.insert(0, item.clone());
                }
            }
            FavoritesEvent::Removed { item } => self.0.retain(|existing| existing != item),
        }
    }
}

fn decide_add(item: &str) -> impl Fn(&Favorites) -> Vec<FavoritesEvent> {
    let item = item.to_owned();
    move |state| {
        if state.0.contains(&item) {
            vec![]
        } else {
            vec![FavoritesEvent::Added { item: item.clone() }]
        }
    }
}

type FavoritesDecider = Decider<MemoryStore, JsonCodec<FavoritesEvent>, Favorites>;

fn client_j(store: &MemoryStore, caching: CachingStrategy<Favorites>) -> FavoritesDecider {
    let category = Category::new(
        store.clone(),
        JsonCodec::new(),
        AccessStrategy::Unoptimized,
        caching,
    )
    .unwrap();
    Decider::new(
        Arc::new(category),
        StreamName::new("Favorites", "ClientJ").unwrap(),
    )
}

fn sliding() -> CachingStrategy<Favorites> {
    CachingStrategy::SlidingWindow {
        cache: Arc::new(StateCache::new()),
        window: Duration::from_secs(60),
    }
}

fn ctx() -> EventContext {
    EventContext::default()
}

#[tokio::test]
async fn add_then_add_then_list() {
    let store = MemoryStore::new();
    let favorites = client_j(&store, sliding());

    favorites.transact(&ctx(), decide_add("a")).await.unwrap();
    let list = favorites.query(|s| s.0.clone()).await.unwrap();
    assert_eq!(list, vec!["a".to_owned()]);

    favorites.transact(&ctx(), decide_add("b")).await.unwrap();
    let list = favorites.query(|s| s.0.clone()).await.unwrap();
    assert_eq!(list, vec!["b".to_owned(), "a".to_owned()]);

    // Indices 0 and 1 were appended, nothing more.
    assert_eq!(
        store.version_of(&StreamName::new("Favorites", "ClientJ").unwrap()),
        1
    );
}

#[tokio::test]
async fn adding_an_existing_item_is_idempotent() {
    let store = MemoryStore::new();
    let favorites = client_j(&store, sliding());

    favorites.transact(&ctx(), decide_add("a")).await.unwrap();
    favorites.transact(&ctx(), decide_add("a")).await.unwrap();

    assert_eq!(
        store.version_of(&StreamName::new("Favorites", "ClientJ").unwrap()),
        0,
        "the second add must not append"
    );
    let list = favorites.query(|s| s.0.clone()).await.unwrap();
    assert_eq!(list, vec!["a".to_owned()]);
}

#[tokio::test]
async fn concurrent_adds_of_the_same_item_append_once() {
    let store = MemoryStore::new();
    // Separate deciders with separate caches, as two processes would be.
    let writer_a = client_j(&store, sliding());
    let writer_b = client_j(&store, sliding());

    writer_a.transact(&ctx(), decide_add("a")).await.unwrap();
    writer_a.transact(&ctx(), decide_add("b")).await.unwrap();

    let ctx_a = ctx();
    let ctx_b = ctx();
    let (a, b) = tokio::join!(
        writer_a.transact(&ctx_a, decide_add("c")),
        writer_b.transact(&ctx_b, decide_add("c")),
    );
    a.unwrap();
    b.unwrap();

    // Whichever writer lost the race re-decided against the winner's
    // events and appended nothing.
    assert_eq!(
        store.version_of(&StreamName::new("Favorites", "ClientJ").unwrap()),
        2
    );
    let list = writer_b.query(|s| s.0.clone()).await.unwrap();
    assert_eq!(
        list,
        vec!["c".to_owned(), "b".to_owned(), "a".to_owned()]
    );
}

#[tokio::test]
async fn stale_cache_conflict_is_recovered_by_re_deciding() {
    let store = MemoryStore::new();
    let writer_a = client_j(&store, sliding());
    let writer_b = client_j(&store, sliding());

    writer_a.transact(&ctx(), decide_add("a")).await.unwrap();
    writer_b.transact(&ctx(), decide_add("c")).await.unwrap();

    // A transacts against its stale cached view; the conflict resyncs and
    // the re-decide finds "c" already present.
    writer_a
        .transact_with(LoadOption::AnyCachedValue, &ctx(), |state| {
            ((), decide_add("c")(state))
        })
        .await
        .unwrap();

    assert_eq!(
        store.version_of(&StreamName::new("Favorites", "ClientJ").unwrap()),
        1
    );
}

#[tokio::test]
async fn latest_known_event_reads_one_event_only() {
    let store = MemoryStore::new();
    let writer = client_j(&store, CachingStrategy::NoCaching);
    for item in ["a", "b", "c"] {
        writer.transact(&ctx(), decide_add(item)).await.unwrap();
    }

    let category = Category::new(
        store.clone(),
        JsonCodec::new(),
        AccessStrategy::LatestKnownEvent,
        CachingStrategy::NoCaching,
    )
    .unwrap();
    let reader: FavoritesDecider = Decider::new(
        Arc::new(category),
        StreamName::new("Favorites", "ClientJ").unwrap(),
    );

    let reads_before = store.batch_reads();
    let list = reader.query(|s| s.0.clone()).await.unwrap();
    assert_eq!(list, vec!["c".to_owned()], "fold(initial, [last event])");
    assert_eq!(store.batch_reads() - reads_before, 1);
}

//! Per-stream caching of reconstituted state.
//!
//! The cache memoises `(token, state)` pairs keyed by stream name.
//! Replacement is gated by the token staleness predicate, so a racing
//! writer can never clobber a fresher entry with an older one. Expiry is
//! a sliding or fixed window; eviction happens lazily on lookup or via an
//! explicit [`StateCache::evict_expired`] sweep driven by the host.

use std::{
    collections::{HashMap, hash_map},
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use crate::token::StreamToken;

/// Default sliding window applied when none is configured.
pub const DEFAULT_CACHE_WINDOW: Duration = Duration::from_secs(20 * 60);

/// Caching policy selected per category.
pub enum CachingStrategy<S> {
    /// Every load goes to the store.
    NoCaching,
    /// Entries live for `window` past their most recent access.
    SlidingWindow {
        cache: Arc<StateCache<S>>,
        window: Duration,
    },
    /// Entries live for `period` past insertion, regardless of use.
    FixedTimeWindow {
        cache: Arc<StateCache<S>>,
        period: Duration,
    },
}

impl<S> CachingStrategy<S> {
    /// Sliding-window policy over `cache` with the default 20 minute
    /// window.
    #[must_use]
    pub fn sliding_default(cache: Arc<StateCache<S>>) -> Self {
        Self::SlidingWindow {
            cache,
            window: DEFAULT_CACHE_WINDOW,
        }
    }

    pub(crate) fn slot(&self) -> Option<(&Arc<StateCache<S>>, Duration, bool)> {
        match self {
            Self::NoCaching => None,
            Self::SlidingWindow { cache, window } => Some((cache, *window, true)),
            Self::FixedTimeWindow { cache, period } => Some((cache, *period, false)),
        }
    }
}

impl<S> Clone for CachingStrategy<S> {
    fn clone(&self) -> Self {
        match self {
            Self::NoCaching => Self::NoCaching,
            Self::SlidingWindow { cache, window } => Self::SlidingWindow {
                cache: Arc::clone(cache),
                window: *window,
            },
            Self::FixedTimeWindow { cache, period } => Self::FixedTimeWindow {
                cache: Arc::clone(cache),
                period: *period,
            },
        }
    }
}

impl<S> std::fmt::Debug for CachingStrategy<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NoCaching => "NoCaching",
            Self::SlidingWindow { .. } => "SlidingWindow",
            Self::FixedTimeWindow { .. } => "FixedTimeWindow",
        })
    }
}

struct CacheEntry<S> {
    token: StreamToken,
    state: S,
    /// When the pair was last confirmed against the store.
    fetched_at: Instant,
    expires_at: Instant,
}

/// A cached pair as seen by a lookup.
pub(crate) struct CachedValue<S> {
    pub token: StreamToken,
    pub state: S,
    pub age: Duration,
}

/// Process-wide `stream → (token, state)` table with per-key
/// single-flight gates.
pub struct StateCache<S> {
    entries: RwLock<HashMap<String, CacheEntry<S>>>,
    flights: RwLock<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S> StateCache<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            flights: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live (unexpired or not-yet-swept) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry whose window has elapsed.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.retain(|_, entry| entry.expires_at > now);
        let mut flights = self.flights.write().expect("cache lock poisoned");
        flights.retain(|key, gate| entries.contains_key(key) || Arc::strong_count(gate) > 1);
    }

    /// The single-flight gate for `key`; concurrent loaders of the same
    /// absent stream serialise on it and re-check the table afterwards.
    pub(crate) fn flight(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        if let Some(gate) = self
            .flights
            .read()
            .expect("cache lock poisoned")
            .get(key)
        {
            return Arc::clone(gate);
        }
        let mut flights = self.flights.write().expect("cache lock poisoned");
        Arc::clone(
            flights
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}

impl<S: Clone> StateCache<S> {
    /// Fetch the entry for `key`, evicting it if expired. When `refresh`
    /// is set (sliding window), the access pushes the expiry out.
    pub(crate) fn lookup(&self, key: &str, refresh: Option<Duration>) -> Option<CachedValue<S>> {
        let now = Instant::now();
        let mut entries = self.entries.write().expect("cache lock poisoned");
        if entries.get(key).is_some_and(|entry| entry.expires_at <= now) {
            entries.remove(key);
            tracing::trace!(stream = key, "cache entry expired");
            return None;
        }
        let entry = entries.get_mut(key)?;
        if let Some(window) = refresh {
            entry.expires_at = now + window;
        }
        Some(CachedValue {
            token: entry.token.clone(),
            state: entry.state.clone(),
            age: now.saturating_duration_since(entry.fetched_at),
        })
    }

    /// Store a pair unless the incumbent has already observed a newer
    /// version. Insertion and replacement both restart the window.
    pub(crate) fn publish(&self, key: &str, token: StreamToken, state: S, window: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().expect("cache lock poisoned");
        match entries.entry(key.to_owned()) {
            hash_map::Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if StreamToken::is_stale(&entry.token, &token) {
                    tracing::trace!(
                        stream = key,
                        incumbent = entry.token.version,
                        candidate = token.version,
                        "stale publish ignored"
                    );
                    // The incumbent was re-confirmed current by whoever
                    // raced past the candidate; keep its freshness.
                    entry.expires_at = now + window;
                } else {
                    entry.token = token;
                    entry.state = state;
                    entry.fetched_at = now;
                    entry.expires_at = now + window;
                }
            }
            hash_map::Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    token,
                    state,
                    fetched_at: now,
                    expires_at: now + window,
                });
            }
        }
    }
}

impl<S> Default for StateCache<S> {
    fn default() -> Self {
        Self::new()
    }
}

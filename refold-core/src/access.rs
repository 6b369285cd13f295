//! Access strategies.
//!
//! A strategy is consulted twice per round trip: on load it decides how
//! much of the stream must be read (forward replay versus a backward scan
//! stopped by an origin event), and on append it decides whether a
//! compaction event rides along with the write.

use std::{fmt, sync::Arc};

use crate::token::StreamToken;

/// Shared origin predicate over decoded events.
pub type OriginFn<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
/// Shared snapshot constructor from current state.
pub type SnapshotFn<S, E> = Arc<dyn Fn(&S) -> E + Send + Sync>;

/// Per-category policy controlling load reads and compaction writes.
pub enum AccessStrategy<S, E> {
    /// Forward replay from index 0; writes pass through untouched.
    Unoptimized,
    /// One backward batch; the state is folded from the last decodable
    /// event only. Incompatible with caching.
    LatestKnownEvent,
    /// Backward scan stopped by `is_origin`; every append also writes one
    /// unfold produced from the post-append state.
    Snapshot {
        is_origin: OriginFn<E>,
        to_snapshot: SnapshotFn<S, E>,
    },
    /// The stream holds only the latest state: every write is replaced by
    /// a single unfold, and any stored event is an origin.
    RollingState { to_snapshot: SnapshotFn<S, E> },
    /// Backward scan stopped by `is_origin`; a snapshot event is appended
    /// once the batch capacity recorded on the token is exhausted.
    RollingSnapshots {
        is_origin: OriginFn<E>,
        to_snapshot: SnapshotFn<S, E>,
    },
}

impl<S, E> AccessStrategy<S, E> {
    #[must_use]
    pub fn snapshot(
        is_origin: impl Fn(&E) -> bool + Send + Sync + 'static,
        to_snapshot: impl Fn(&S) -> E + Send + Sync + 'static,
    ) -> Self {
        Self::Snapshot {
            is_origin: Arc::new(is_origin),
            to_snapshot: Arc::new(to_snapshot),
        }
    }

    #[must_use]
    pub fn rolling_state(to_snapshot: impl Fn(&S) -> E + Send + Sync + 'static) -> Self {
        Self::RollingState {
            to_snapshot: Arc::new(to_snapshot),
        }
    }

    #[must_use]
    pub fn rolling_snapshots(
        is_origin: impl Fn(&E) -> bool + Send + Sync + 'static,
        to_snapshot: impl Fn(&S) -> E + Send + Sync + 'static,
    ) -> Self {
        Self::RollingSnapshots {
            is_origin: Arc::new(is_origin),
            to_snapshot: Arc::new(to_snapshot),
        }
    }

    /// Whether loads use the backward origin scan rather than a forward
    /// replay from index 0.
    #[must_use]
    pub fn loads_backward(&self) -> bool {
        !matches!(self, Self::Unoptimized)
    }

    /// Whether a decoded event terminates the backward scan.
    #[must_use]
    pub fn is_origin(&self, event: &E) -> bool {
        match self {
            Self::Unoptimized => false,
            Self::LatestKnownEvent | Self::RollingState { .. } => true,
            Self::Snapshot { is_origin, .. } | Self::RollingSnapshots { is_origin, .. } => {
                is_origin(event)
            }
        }
    }

    /// Whether this strategy may be combined with a cache.
    ///
    /// `LatestKnownEvent` reads exactly one event by design; serving stale
    /// cache hits would undermine that without saving anything.
    #[must_use]
    pub fn supports_caching(&self) -> bool {
        !matches!(self, Self::LatestKnownEvent)
    }

    /// Split a write into `(events, unfolds)` per this strategy, given the
    /// state after folding the new events and the token being written at.
    pub(crate) fn plan_write(
        &self,
        state_after: &S,
        events: Vec<E>,
        token: &StreamToken,
    ) -> (Vec<E>, Vec<E>) {
        match self {
            Self::Unoptimized | Self::LatestKnownEvent => (events, Vec::new()),
            Self::Snapshot { to_snapshot, .. } => (events, vec![to_snapshot(state_after)]),
            Self::RollingState { to_snapshot } => (Vec::new(), vec![to_snapshot(state_after)]),
            Self::RollingSnapshots { to_snapshot, .. } => {
                // An unknown capacity hint means the adapter could not
                // bound the backward scan; compact rather than risk an
                // unbounded load later.
                let capacity = token.position.batch_capacity_limit.unwrap_or(0);
                if events.len() > usize::try_from(capacity).unwrap_or(0) {
                    let unfold = to_snapshot(state_after);
                    (events, vec![unfold])
                } else {
                    (events, Vec::new())
                }
            }
        }
    }
}

impl<S, E> Clone for AccessStrategy<S, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Unoptimized => Self::Unoptimized,
            Self::LatestKnownEvent => Self::LatestKnownEvent,
            Self::Snapshot {
                is_origin,
                to_snapshot,
            } => Self::Snapshot {
                is_origin: Arc::clone(is_origin),
                to_snapshot: Arc::clone(to_snapshot),
            },
            Self::RollingState { to_snapshot } => Self::RollingState {
                to_snapshot: Arc::clone(to_snapshot),
            },
            Self::RollingSnapshots {
                is_origin,
                to_snapshot,
            } => Self::RollingSnapshots {
                is_origin: Arc::clone(is_origin),
                to_snapshot: Arc::clone(to_snapshot),
            },
        }
    }
}

impl<S, E> fmt::Debug for AccessStrategy<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unoptimized => "Unoptimized",
            Self::LatestKnownEvent => "LatestKnownEvent",
            Self::Snapshot { .. } => "Snapshot",
            Self::RollingState { .. } => "RollingState",
            Self::RollingSnapshots { .. } => "RollingSnapshots",
        })
    }
}

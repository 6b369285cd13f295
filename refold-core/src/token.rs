//! Stream position and token model.
//!
//! A [`StreamToken`] is an opaque handle carried through
//! load → decide → append → reload. Adapters are the only producers;
//! everyone else compares tokens solely through the staleness predicate.

/// Point-in-time description of a stream as observed by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Index of the last seen event, `-1` for an empty stream.
    pub stream_version: i64,
    /// Index of the most recent origin (snapshot) event observed, if any.
    pub compaction_event_index: Option<i64>,
    /// Events that may still be appended before another snapshot is
    /// warranted, per the configured batch size. `None` when the adapter
    /// does not track it.
    pub batch_capacity_limit: Option<i32>,
}

impl Position {
    /// Position of a stream with no events.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            stream_version: -1,
            compaction_event_index: None,
            batch_capacity_limit: None,
        }
    }

    /// Remaining append capacity before the backward origin scan would
    /// spill past a single batch.
    ///
    /// With a known compaction index `ci`, the events a backward load must
    /// visit are `ci..=stream_version`; without one the whole stream plus
    /// one slot for the eventual snapshot counts against the batch.
    #[must_use]
    pub fn batch_capacity(&self, batch_size: usize, unstored_pending: usize) -> i32 {
        let batch_size = i64::try_from(batch_size).unwrap_or(i64::MAX);
        let pending = i64::try_from(unstored_pending).unwrap_or(i64::MAX);
        let occupied = match self.compaction_event_index {
            Some(ci) => self.stream_version - ci + 1,
            None => self.stream_version + 1 + 1,
        };
        let capacity = (batch_size - pending - occupied).max(0);
        i32::try_from(capacity).unwrap_or(i32::MAX)
    }

    /// Recompute the stored capacity hint for a token about to be issued.
    #[must_use]
    pub fn with_capacity_hint(mut self, batch_size: usize) -> Self {
        self.batch_capacity_limit = Some(self.batch_capacity(batch_size, 0));
        self
    }
}

/// Opaque snapshot of `(position, version, size)` for a stream.
///
/// `version` is the public counter, equal to `stream_version + 1` (an
/// empty stream is version 0). `stream_bytes` is `-1` when the backend
/// does not measure it. `tag` is a backend-private concurrency handle
/// (for instance a document etag); the engine never interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamToken {
    pub position: Position,
    pub version: i64,
    pub stream_bytes: i64,
    pub tag: Option<String>,
}

impl StreamToken {
    /// Build a token from a position, deriving the public version.
    #[must_use]
    pub fn at(position: Position) -> Self {
        Self {
            version: position.stream_version + 1,
            position,
            stream_bytes: -1,
            tag: None,
        }
    }

    /// Canonical token for a stream with no events, with the capacity hint
    /// for the configured batch size.
    #[must_use]
    pub fn empty(batch_size: usize) -> Self {
        Self::at(Position::empty().with_capacity_hint(batch_size))
    }

    #[must_use]
    pub fn with_bytes(mut self, stream_bytes: i64) -> Self {
        self.stream_bytes = stream_bytes;
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Staleness predicate gating cache replacement: a candidate loses only
    /// to an incumbent that has observed a strictly newer version.
    #[must_use]
    pub fn is_stale(current: &Self, candidate: &Self) -> bool {
        current.version > candidate.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_version_zero() {
        let token = StreamToken::empty(500);
        assert_eq!(token.position.stream_version, -1);
        assert_eq!(token.version, 0);
        assert_eq!(token.stream_bytes, -1);
        assert!(token.tag.is_none());
    }

    #[test]
    fn version_is_last_index_plus_one() {
        let token = StreamToken::at(Position {
            stream_version: 11,
            compaction_event_index: None,
            batch_capacity_limit: None,
        });
        assert_eq!(token.version, 12);
    }

    #[test]
    fn capacity_with_compaction_index() {
        // 10-event batch, compaction at 12, last event 12: one slot used.
        let position = Position {
            stream_version: 12,
            compaction_event_index: Some(12),
            batch_capacity_limit: None,
        };
        assert_eq!(position.batch_capacity(10, 0), 9);
        assert_eq!(position.batch_capacity(10, 4), 5);
    }

    #[test]
    fn capacity_without_compaction_reserves_snapshot_slot() {
        let position = Position {
            stream_version: 3,
            compaction_event_index: None,
            batch_capacity_limit: None,
        };
        // 4 events plus the reserved slot leaves 5 of 10.
        assert_eq!(position.batch_capacity(10, 0), 5);
    }

    #[test]
    fn capacity_never_goes_negative() {
        let position = Position {
            stream_version: 40,
            compaction_event_index: None,
            batch_capacity_limit: None,
        };
        assert_eq!(position.batch_capacity(10, 0), 0);
        assert_eq!(position.batch_capacity(10, 100), 0);
    }

    #[test]
    fn empty_stream_capacity_counts_reserved_slot_only() {
        assert_eq!(Position::empty().batch_capacity(10, 0), 9);
    }

    #[test]
    fn staleness_compares_versions() {
        let older = StreamToken::at(Position {
            stream_version: 1,
            compaction_event_index: None,
            batch_capacity_limit: None,
        });
        let newer = StreamToken::at(Position {
            stream_version: 2,
            compaction_event_index: None,
            batch_capacity_limit: None,
        });
        assert!(StreamToken::is_stale(&newer, &older));
        assert!(!StreamToken::is_stale(&older, &newer));
        assert!(!StreamToken::is_stale(&newer, &newer.clone()));
    }
}

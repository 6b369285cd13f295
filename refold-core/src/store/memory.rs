//! In-memory event store for tests and examples.
//!
//! Thread-safe, honours conditional appends, and counts batch reads so
//! tests can assert how much of a stream a load actually touched.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::Utc;

use crate::{
    event::{EventData, TimelineEvent},
    store::{AppendOutcome, EventStore, ExpectedVersion, OriginPredicate, StoreError},
    stream::StreamName,
    token::{Position, StreamToken},
};

/// Default events-per-page, matching the engine-wide default.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// In-memory [`EventStore`] keeping each stream as a dense `Vec`.
///
/// Unfolds are appended to the log as trailing events, the way a
/// log-structured relational backend materialises them.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
    batch_size: usize,
    max_batches: Option<usize>,
}

struct Inner {
    streams: RwLock<HashMap<String, Vec<TimelineEvent>>>,
    batch_reads: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_batching(DEFAULT_BATCH_SIZE, None)
    }

    /// Store with an explicit page size and optional page-count budget.
    #[must_use]
    pub fn with_batching(batch_size: usize, max_batches: Option<usize>) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        Self {
            inner: Arc::new(Inner {
                streams: RwLock::new(HashMap::new()),
                batch_reads: AtomicU64::new(0),
            }),
            batch_size,
            max_batches,
        }
    }

    /// Total pages fetched by all loads so far.
    #[must_use]
    pub fn batch_reads(&self) -> u64 {
        self.inner.batch_reads.load(Ordering::Relaxed)
    }

    /// Last event index of a stream, `-1` when absent or empty.
    #[must_use]
    pub fn version_of(&self, stream: &StreamName) -> i64 {
        let streams = self.read_streams();
        streams
            .get(stream.as_str())
            .map_or(-1, |events| events.len() as i64 - 1)
    }

    fn read_streams(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Vec<TimelineEvent>>> {
        self.inner
            .streams
            .read()
            .expect("memory store lock poisoned")
    }

    fn charge_batches(&self, stream: &StreamName, batches: usize) -> Result<(), StoreError> {
        if let Some(max_batches) = self.max_batches
            && batches > max_batches
        {
            return Err(StoreError::BatchLimitExceeded {
                stream: stream.as_str().to_owned(),
                max_batches,
            });
        }
        self.inner
            .batch_reads
            .fetch_add(batches as u64, Ordering::Relaxed);
        Ok(())
    }

    fn token_for(&self, events: &[TimelineEvent], compaction: Option<i64>) -> StreamToken {
        let stream_bytes = events.iter().map(|e| e.size() as i64).sum();
        let position = Position {
            stream_version: events.len() as i64 - 1,
            compaction_event_index: compaction,
            batch_capacity_limit: None,
        }
        .with_capacity_hint(self.batch_size);
        StreamToken::at(position).with_bytes(stream_bytes)
    }

    fn materialise(data: EventData, index: i64) -> TimelineEvent {
        TimelineEvent {
            index,
            event_type: data.event_type,
            data: data.data,
            meta: data.meta,
            id: data.id,
            correlation_id: data.correlation_id,
            causation_id: data.causation_id,
            timestamp: Utc::now(),
            is_unfold: false,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for MemoryStore {
    fn empty_token(&self) -> StreamToken {
        StreamToken::empty(self.batch_size)
    }

    #[tracing::instrument(skip(self), fields(stream = %stream))]
    fn load_forward<'a>(
        &'a self,
        stream: &'a StreamName,
        from_index: i64,
        _require_leader: bool,
    ) -> impl Future<Output = Result<(StreamToken, Vec<TimelineEvent>), StoreError>> + Send + 'a
    {
        let result = (|| {
            let streams = self.read_streams();
            let events = streams.get(stream.as_str()).map_or(&[][..], Vec::as_slice);
            let from = usize::try_from(from_index.max(0)).unwrap_or(usize::MAX);
            let slice: Vec<TimelineEvent> =
                events.get(from.min(events.len())..).unwrap_or(&[]).to_vec();
            let batches = slice.len().div_ceil(self.batch_size).max(1);
            let token = self.token_for(events, None);
            drop(streams);
            self.charge_batches(stream, batches)?;
            tracing::trace!(events = slice.len(), version = token.version, "forward load");
            Ok((token, slice))
        })();
        std::future::ready(result)
    }

    #[tracing::instrument(skip(self, is_origin), fields(stream = %stream))]
    fn load_backward_until<'a>(
        &'a self,
        stream: &'a StreamName,
        is_origin: OriginPredicate<'a>,
        _require_leader: bool,
    ) -> impl Future<Output = Result<(StreamToken, Vec<TimelineEvent>), StoreError>> + Send + 'a
    {
        let result = (|| {
            let streams = self.read_streams();
            let events = streams.get(stream.as_str()).map_or(&[][..], Vec::as_slice);

            // Walk page-sized windows from the tail until one contains an
            // origin event.
            let mut batches = 0;
            let mut cut = 0;
            let mut compaction = None;
            let mut hi = events.len();
            while hi > 0 {
                batches += 1;
                let lo = hi.saturating_sub(self.batch_size);
                if let Some(offset) = events[lo..hi].iter().rposition(is_origin) {
                    cut = lo + offset;
                    compaction = Some(events[cut].index);
                    break;
                }
                hi = lo;
            }

            let slice = events[cut..].to_vec();
            let token = self.token_for(events, compaction);
            drop(streams);
            self.charge_batches(stream, batches.max(1))?;
            tracing::trace!(
                events = slice.len(),
                ?compaction,
                version = token.version,
                "backward load"
            );
            Ok((token, slice))
        })();
        std::future::ready(result)
    }

    #[tracing::instrument(
        skip(self, token, events, unfolds),
        fields(stream = %stream, events = events.len(), unfolds = unfolds.len())
    )]
    fn append<'a>(
        &'a self,
        stream: &'a StreamName,
        token: &'a StreamToken,
        expected: ExpectedVersion,
        events: Vec<EventData>,
        unfolds: Vec<EventData>,
    ) -> impl Future<Output = Result<AppendOutcome, StoreError>> + Send + 'a {
        let result = (|| {
            let mut streams = self
                .inner
                .streams
                .write()
                .expect("memory store lock poisoned");
            let log = streams.entry(stream.as_str().to_owned()).or_default();
            let current_version = log.len() as i64 - 1;
            if !expected.accepts(current_version) {
                tracing::debug!(?expected, current_version, "append rejected");
                return Ok(AppendOutcome::Conflict);
            }

            let mut compaction = token.position.compaction_event_index;
            for data in events {
                let index = log.len() as i64;
                log.push(Self::materialise(data, index));
            }
            for data in unfolds {
                let index = log.len() as i64;
                log.push(Self::materialise(data, index));
                compaction = Some(index);
            }
            let token = self.token_for(log, compaction);
            tracing::debug!(version = token.version, "append accepted");
            Ok(AppendOutcome::Written(token))
        })();
        std::future::ready(result)
    }
}

//! [`EventStore`] adapter over a [`DocumentClient`].
//!
//! Appends are a read-modify-write of the stream's tip, conditional on
//! its etag. Events overflowing the tip's capacity migrate to calf
//! batches; unfolds only ever live in the tip's `u` array and never take
//! an index in the event log.

use chrono::Utc;
use refold_core::{
    AppendOutcome, EventData, EventStore, ExpectedVersion, StoreError, StreamName, StreamToken,
    TimelineEvent,
    store::{Operation, OriginPredicate},
    token::Position,
};

use crate::{
    client::{DocumentClient, ReplaceOutcome},
    document::{
        BatchDocument, EventDocument, TipDocument, UnfoldDocument, timeline_event, timeline_unfold,
    },
};

/// Default number of recent events retained in the tip.
pub const DEFAULT_TIP_MAX_EVENTS: usize = 32;

/// Default events-per-page for reads.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Document-store backend.
#[derive(Clone)]
pub struct DocumentStore<C> {
    client: C,
    tip_max_events: usize,
    batch_size: usize,
    max_batches: Option<usize>,
}

impl<C> DocumentStore<C> {
    #[must_use]
    pub fn new(client: C) -> Self {
        Self {
            client,
            tip_max_events: DEFAULT_TIP_MAX_EVENTS,
            batch_size: DEFAULT_BATCH_SIZE,
            max_batches: None,
        }
    }

    /// Override the tip capacity.
    ///
    /// # Panics
    ///
    /// Panics if `tip_max_events` is zero.
    #[must_use]
    pub fn with_tip_max_events(mut self, tip_max_events: usize) -> Self {
        assert!(tip_max_events > 0, "tip_max_events must be positive");
        self.tip_max_events = tip_max_events;
        self
    }

    /// Override the read page size and optional page budget.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is zero.
    #[must_use]
    pub fn with_batching(mut self, batch_size: usize, max_batches: Option<usize>) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        self.batch_size = batch_size;
        self.max_batches = max_batches;
        self
    }

    fn token_from_tip(&self, tip: &TipDocument) -> StreamToken {
        let position = Position {
            stream_version: tip.stream_version(),
            compaction_event_index: tip.unfold_version(),
            batch_capacity_limit: None,
        }
        .with_capacity_hint(self.batch_size);
        StreamToken::at(position)
            .with_bytes(tip.size())
            .with_tag(tip.etag.clone())
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
        Ok(())
    }

    fn event_document(data: EventData) -> EventDocument {
        EventDocument {
            c: data.event_type,
            d: data.data,
            m: data.meta,
            id: data.id,
            correlation_id: data.correlation_id,
            causation_id: data.causation_id,
            t: Utc::now(),
        }
    }

    fn unfold_document(data: EventData, version: i64) -> UnfoldDocument {
        UnfoldDocument {
            i: version,
            c: data.event_type,
            d: data.data,
            m: data.meta,
            id: data.id,
            t: Utc::now(),
        }
    }
}

impl<C: DocumentClient> DocumentStore<C> {
    fn client_err(
        stream: &StreamName,
        operation: Operation,
        source: C::Error,
    ) -> StoreError {
        StoreError::unavailable(stream, operation, source)
    }

    async fn read_calves(
        &self,
        stream: &StreamName,
        from_index: i64,
    ) -> Result<Vec<BatchDocument>, StoreError> {
        self.client
            .read_batches(stream.as_str(), from_index)
            .await
            .map_err(|e| Self::client_err(stream, Operation::Load, e))
    }
}

impl<C: DocumentClient> EventStore for DocumentStore<C> {
    fn empty_token(&self) -> StreamToken {
        StreamToken::empty(self.batch_size)
    }

    #[tracing::instrument(skip(self), fields(stream = %stream))]
    async fn load_forward<'a>(
        &'a self,
        stream: &'a StreamName,
        from_index: i64,
        _require_leader: bool,
    ) -> Result<(StreamToken, Vec<TimelineEvent>), StoreError> {
        let tip = self
            .client
            .read_tip(stream.as_str())
            .await
            .map_err(|e| Self::client_err(stream, Operation::Load, e))?;
        let Some(tip) = tip else {
            return Ok((self.empty_token(), Vec::new()));
        };

        let mut batches_read = 1;
        let mut events = Vec::new();
        if from_index < tip.i {
            let calves = self.read_calves(stream, from_index).await?;
            let first_available = calves.first().map_or(tip.i, |batch| batch.i.min(tip.i));
            if from_index < first_available {
                return Err(StoreError::StreamTruncated {
                    stream: stream.as_str().to_owned(),
                    missing_index: from_index,
                });
            }
            for batch in calves {
                batches_read += 1;
                for (offset, doc) in batch.e.iter().enumerate() {
                    let index = batch.i + offset as i64;
                    if index >= from_index && index < tip.i {
                        events.push(timeline_event(index, doc));
                    }
                }
            }
        }
        for (offset, doc) in tip.e.iter().enumerate() {
            let index = tip.i + offset as i64;
            if index >= from_index {
                events.push(timeline_event(index, doc));
            }
        }
        // Unfolds at or past the requested position ride along so that an
        // incremental reload observes state changes that never took an
        // index (rolling-state writes).
        let mut unfolds: Vec<&UnfoldDocument> =
            tip.u.iter().filter(|unfold| unfold.i >= from_index).collect();
        unfolds.sort_by_key(|unfold| unfold.i);
        events.extend(unfolds.into_iter().map(timeline_unfold));

        self.charge_batches(stream, batches_read)?;
        let token = self.token_from_tip(&tip);
        tracing::trace!(events = events.len(), version = token.version, "forward load");
        Ok((token, events))
    }

    #[tracing::instrument(skip(self, is_origin), fields(stream = %stream))]
    async fn load_backward_until<'a>(
        &'a self,
        stream: &'a StreamName,
        is_origin: OriginPredicate<'a>,
        _require_leader: bool,
    ) -> Result<(StreamToken, Vec<TimelineEvent>), StoreError> {
        let tip = self
            .client
            .read_tip(stream.as_str())
            .await
            .map_err(|e| Self::client_err(stream, Operation::Load, e))?;
        let Some(tip) = tip else {
            return Ok((self.empty_token(), Vec::new()));
        };
        let token = self.token_from_tip(&tip);

        // Freshest unfold first: a matching unfold satisfies the load from
        // the tip alone.
        let mut unfolds: Vec<&UnfoldDocument> = tip.u.iter().collect();
        unfolds.sort_by_key(|unfold| std::cmp::Reverse(unfold.i));
        for unfold in unfolds {
            let candidate = timeline_unfold(unfold);
            if is_origin(&candidate) {
                self.charge_batches(stream, 1)?;
                tracing::trace!(unfold = unfold.i, "origin unfold");
                return Ok((token, vec![candidate]));
            }
        }

        // Tip events, newest first.
        let tip_events: Vec<TimelineEvent> = tip
            .e
            .iter()
            .enumerate()
            .map(|(offset, doc)| timeline_event(tip.i + offset as i64, doc))
            .collect();
        if let Some(offset) = tip_events.iter().rposition(is_origin) {
            self.charge_batches(stream, 1)?;
            return Ok((token, tip_events[offset..].to_vec()));
        }

        // Walk calf batches backward.
        let calves = self.read_calves(stream, 0).await?;
        let batches_read = 1 + calves.len();
        self.charge_batches(stream, batches_read)?;

        let mut earlier: Vec<TimelineEvent> = Vec::new();
        let mut origin_at: Option<usize> = None;
        for batch in &calves {
            for (offset, doc) in batch.e.iter().enumerate() {
                earlier.push(timeline_event(batch.i + offset as i64, doc));
            }
        }
        for (position, event) in earlier.iter().enumerate().rev() {
            if is_origin(event) {
                origin_at = Some(position);
                break;
            }
        }

        let cut = origin_at.unwrap_or(0);
        if origin_at.is_none()
            && let Some(first) = earlier.first().map(|e| e.index).or(tip_events.first().map(|e| e.index))
            && first > 0
        {
            return Err(StoreError::StreamTruncated {
                stream: stream.as_str().to_owned(),
                missing_index: 0,
            });
        }
        let mut events = earlier.split_off(cut);
        events.extend(tip_events);
        tracing::trace!(events = events.len(), "backward load");
        Ok((token, events))
    }

    #[tracing::instrument(
        skip(self, token, events, unfolds),
        fields(stream = %stream, events = events.len(), unfolds = unfolds.len())
    )]
    async fn append<'a>(
        &'a self,
        stream: &'a StreamName,
        token: &'a StreamToken,
        expected: ExpectedVersion,
        events: Vec<EventData>,
        unfolds: Vec<EventData>,
    ) -> Result<AppendOutcome, StoreError> {
        let tip = self
            .client
            .read_tip(stream.as_str())
            .await
            .map_err(|e| Self::client_err(stream, Operation::Append, e))?;
        let current_version = tip.as_ref().map_or(-1, TipDocument::stream_version);
        if !expected.accepts(current_version) {
            tracing::debug!(?expected, current_version, "append rejected on version");
            return Ok(AppendOutcome::Conflict);
        }
        // Unfold-only writes advance the etag without moving the version;
        // the tag check catches races the version check cannot see.
        if !matches!(expected, ExpectedVersion::Any)
            && let (Some(tag), Some(tip)) = (&token.tag, &tip)
            && *tag != tip.etag
        {
            tracing::debug!("append rejected on etag");
            return Ok(AppendOutcome::Conflict);
        }

        let (mut base, mut tip_events, prior_unfolds, expected_etag) = match tip {
            Some(tip) => (tip.i, tip.e, tip.u, Some(tip.etag)),
            None => (0, Vec::new(), Vec::new(), None),
        };
        let new_version = current_version + events.len() as i64;
        tip_events.extend(events.into_iter().map(Self::event_document));

        // Overflowing events migrate to a calf batch keyed by its starting
        // index; the tip keeps the most recent ones.
        if tip_events.len() > self.tip_max_events {
            let spill = tip_events.len() - self.tip_max_events;
            let calf_events: Vec<EventDocument> = tip_events.drain(..spill).collect();
            self.client
                .write_batch(BatchDocument::new(stream.as_str(), base, calf_events))
                .await
                .map_err(|e| Self::client_err(stream, Operation::Append, e))?;
            base += spill as i64;
        }

        let unfolds = if unfolds.is_empty() {
            prior_unfolds
        } else {
            unfolds
                .into_iter()
                .map(|data| Self::unfold_document(data, new_version + 1))
                .collect()
        };

        let new_tip = TipDocument {
            id: stream.as_str().to_owned(),
            etag: String::new(),
            i: base,
            e: tip_events,
            u: unfolds,
        };
        let stream_bytes = new_tip.size();
        let compaction = new_tip.unfold_version();

        match self
            .client
            .try_replace_tip(stream.as_str(), expected_etag.as_deref(), new_tip)
            .await
            .map_err(|e| Self::client_err(stream, Operation::Append, e))?
        {
            ReplaceOutcome::Replaced { etag } => {
                let position = Position {
                    stream_version: new_version,
                    compaction_event_index: compaction,
                    batch_capacity_limit: None,
                }
                .with_capacity_hint(self.batch_size);
                let token = StreamToken::at(position)
                    .with_bytes(stream_bytes)
                    .with_tag(etag);
                tracing::debug!(version = token.version, "append accepted");
                Ok(AppendOutcome::Written(token))
            }
            ReplaceOutcome::PreconditionFailed => {
                tracing::debug!("append lost the etag race");
                Ok(AppendOutcome::Conflict)
            }
        }
    }
}

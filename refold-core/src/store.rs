//! Storage adapter contract.
//!
//! An [`EventStore`] exposes three primitives over a named stream: a
//! forward batched read, a backward batched read with an early-stop origin
//! predicate, and a conditional append. Everything else (folding, caching,
//! conflict recovery) is layered on top by the category engine.

use std::future::Future;

use thiserror::Error;

use crate::{
    event::{EventData, TimelineEvent},
    stream::StreamName,
    token::StreamToken,
};

pub mod memory;

/// Which primitive an error surfaced from, for error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Load,
    Append,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::Append => "append",
        })
    }
}

/// Terminal adapter failures.
///
/// Version conflicts are not errors; they come back as
/// [`AppendOutcome::Conflict`] and are recovered by the engine's resync
/// loop. A missing stream is not an error either: reads return an empty
/// slice at version `-1`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend compacted events below the requested index. Only
    /// backends that allow compaction may report this.
    #[error("load on `{stream}`: events below index {missing_index} were truncated")]
    StreamTruncated { stream: String, missing_index: i64 },
    /// A load would exceed the adapter's configured batch budget. Fatal;
    /// the stream needs a compaction policy, not a retry.
    #[error("load on `{stream}` exceeded the limit of {max_batches} batches")]
    BatchLimitExceeded { stream: String, max_batches: usize },
    /// Transport failure that outlived the adapter's own retry policy.
    #[error("store unavailable during {operation} on `{stream}`: {source}")]
    Unavailable {
        stream: String,
        operation: Operation,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl StoreError {
    /// Wrap a transport error with its stream and operation context.
    pub fn unavailable(
        stream: &StreamName,
        operation: Operation,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable {
            stream: stream.as_str().to_owned(),
            operation,
            source: Box::new(source),
        }
    }
}

/// Version expectation for a conditional append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The stream must not exist yet.
    NoStream,
    /// The stream's last event index must equal this value.
    Exact(i64),
    /// Disable the check.
    Any,
}

impl ExpectedVersion {
    /// Expectation matching the state a token was loaded at.
    #[must_use]
    pub const fn from_token(token: &StreamToken) -> Self {
        if token.position.stream_version < 0 {
            Self::NoStream
        } else {
            Self::Exact(token.position.stream_version)
        }
    }

    /// Whether `current_version` (last index, `-1` for empty) satisfies
    /// this expectation.
    #[must_use]
    pub const fn accepts(self, current_version: i64) -> bool {
        match self {
            Self::NoStream => current_version < 0,
            Self::Exact(expected) => current_version == expected,
            Self::Any => true,
        }
    }
}

/// Result of a conditional append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Events were persisted; the token reflects the stream after the
    /// write.
    Written(StreamToken),
    /// A concurrent writer advanced the stream; nothing was persisted.
    Conflict,
}

/// Predicate over stored events driving the backward scan's early stop.
///
/// The engine composes the codec with the access strategy's origin test,
/// so adapters never decode bodies themselves.
pub type OriginPredicate<'a> = &'a (dyn Fn(&TimelineEvent) -> bool + Send + Sync);

/// Read/write primitives over a named append-only stream.
///
/// Reads always return events in ascending index order and honour the
/// batch size and optional batch-count budget configured on the adapter.
/// Indices are dense: `0..=stream_version` with no holes.
pub trait EventStore: Send + Sync {
    /// Canonical token for a stream with no events, carrying this
    /// adapter's batch capacity hint.
    fn empty_token(&self) -> StreamToken;

    /// Read every event with index ≥ `from_index`.
    ///
    /// # Errors
    ///
    /// [`StoreError::StreamTruncated`] when compaction removed events the
    /// caller asked for, [`StoreError::BatchLimitExceeded`] when the read
    /// would exceed the batch budget, [`StoreError::Unavailable`] on
    /// transport failure.
    fn load_forward<'a>(
        &'a self,
        stream: &'a StreamName,
        from_index: i64,
        require_leader: bool,
    ) -> impl Future<Output = Result<(StreamToken, Vec<TimelineEvent>), StoreError>> + Send + 'a;

    /// Read backward in batches until `is_origin` matches, then return the
    /// matching event and everything after it, ascending. With no match,
    /// returns the whole stream.
    ///
    /// # Errors
    ///
    /// As for [`load_forward`](Self::load_forward).
    fn load_backward_until<'a>(
        &'a self,
        stream: &'a StreamName,
        is_origin: OriginPredicate<'a>,
        require_leader: bool,
    ) -> impl Future<Output = Result<(StreamToken, Vec<TimelineEvent>), StoreError>> + Send + 'a;

    /// Atomically append `events` (and compaction `unfolds`) when the
    /// stream still satisfies `expected`.
    ///
    /// `token` is the handle the writer loaded at; adapters use it to
    /// carry backend-private state (etags, compaction indices) into the
    /// token they mint on success. How `unfolds` are materialised is the
    /// backend's business: log-structured stores append them as trailing
    /// events, document stores replace the tip's unfold array.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] on transport failure. A lost version
    /// race is not an error; it is [`AppendOutcome::Conflict`].
    fn append<'a>(
        &'a self,
        stream: &'a StreamName,
        token: &'a StreamToken,
        expected: ExpectedVersion,
        events: Vec<EventData>,
        unfolds: Vec<EventData>,
    ) -> impl Future<Output = Result<AppendOutcome, StoreError>> + Send + 'a;
}

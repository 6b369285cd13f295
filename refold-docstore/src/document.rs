//! Wire shapes for the document-store backend.
//!
//! A stream is one tip document plus zero or more calf batches. The tip
//! holds the most recent events (up to the configured capacity) and the
//! `u` array of unfolds; older events migrate to calf batches keyed by
//! their starting index. Field names are kept terse to match what lands
//! in the container.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use refold_core::TimelineEvent;

/// One stored event inside a tip or calf document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDocument {
    /// Event type tag.
    pub c: String,
    /// Opaque data body.
    pub d: Vec<u8>,
    /// Opaque metadata body.
    pub m: Vec<u8>,
    pub id: Uuid,
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(rename = "causationId", skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    /// Write timestamp (UTC).
    pub t: DateTime<Utc>,
}

/// A compaction snapshot stored alongside (not in) the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnfoldDocument {
    /// The stream version this unfold reflects: the index one past the
    /// last event folded into it.
    pub i: i64,
    pub c: String,
    pub d: Vec<u8>,
    pub m: Vec<u8>,
    pub id: Uuid,
    pub t: DateTime<Utc>,
}

/// The stream's head document: recent events plus current unfolds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipDocument {
    /// Document id; the rendered stream name.
    pub id: String,
    /// Concurrency tag assigned by the container on every replace.
    #[serde(rename = "_etag")]
    pub etag: String,
    /// Index of the first event held in the tip.
    pub i: i64,
    /// Recent events.
    pub e: Vec<EventDocument>,
    /// Unfolds (rolling snapshots).
    pub u: Vec<UnfoldDocument>,
}

impl TipDocument {
    /// Index of the stream's last event, `-1` when no events exist.
    #[must_use]
    pub fn stream_version(&self) -> i64 {
        self.i + self.e.len() as i64 - 1
    }

    /// The stream version the freshest unfold reflects, if any.
    #[must_use]
    pub fn unfold_version(&self) -> Option<i64> {
        self.u.iter().map(|unfold| unfold.i).max()
    }

    /// Approximate stored size of the tip.
    #[must_use]
    pub fn size(&self) -> i64 {
        let events: usize = self.e.iter().map(|e| e.d.len() + e.m.len() + e.c.len() + 80).sum();
        let unfolds: usize = self.u.iter().map(|u| u.d.len() + u.m.len() + u.c.len() + 80).sum();
        (events + unfolds) as i64
    }
}

/// An immutable batch of events that overflowed the tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDocument {
    /// Document id: `"{stream}:{i}"`.
    pub id: String,
    /// Stream this batch belongs to.
    pub stream: String,
    /// Index of the first event in the batch.
    pub i: i64,
    pub e: Vec<EventDocument>,
}

impl BatchDocument {
    #[must_use]
    pub fn new(stream: &str, base: i64, events: Vec<EventDocument>) -> Self {
        Self {
            id: format!("{stream}:{base}"),
            stream: stream.to_owned(),
            i: base,
            e: events,
        }
    }
}

pub(crate) fn timeline_event(index: i64, doc: &EventDocument) -> TimelineEvent {
    TimelineEvent {
        index,
        event_type: doc.c.clone(),
        data: doc.d.clone(),
        meta: doc.m.clone(),
        id: doc.id,
        correlation_id: doc.correlation_id.clone(),
        causation_id: doc.causation_id.clone(),
        timestamp: doc.t,
        is_unfold: false,
    }
}

pub(crate) fn timeline_unfold(doc: &UnfoldDocument) -> TimelineEvent {
    TimelineEvent {
        index: doc.i,
        event_type: doc.c.clone(),
        data: doc.d.clone(),
        meta: doc.m.clone(),
        id: doc.id,
        correlation_id: None,
        causation_id: None,
        timestamp: doc.t,
        is_unfold: true,
    }
}

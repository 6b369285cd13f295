//! Wire-level event records and the codec seam.
//!
//! Two shapes cross the adapter boundary: [`EventData`] going in (what a
//! transaction writes) and [`TimelineEvent`] coming out (what a read
//! yields). Both carry opaque bodies; mapping them to and from application
//! event types is the job of an [`EventCodec`] implementation.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Event read back from a store, positioned on the stream's timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEvent {
    /// Zero-based, dense index within the stream.
    pub index: i64,
    /// Type tag routing the opaque body back to an application event.
    pub event_type: String,
    /// Opaque data body.
    pub data: Vec<u8>,
    /// Opaque metadata body.
    pub meta: Vec<u8>,
    pub id: Uuid,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Whether this record was surfaced from a tip document's unfold array
    /// rather than the canonical event log. Unfolds carry the stream
    /// version they reflect (one past the last event folded into them).
    pub is_unfold: bool,
}

impl TimelineEvent {
    /// Approximate wire size of the record.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len() + self.meta.len() + self.event_type.len() + 80
    }
}

/// Event ready to be written to a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventData {
    pub id: Uuid,
    pub event_type: String,
    pub data: Vec<u8>,
    pub meta: Vec<u8>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
}

impl EventData {
    /// Approximate wire size of the record.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len() + self.meta.len() + self.event_type.len() + 80
    }
}

/// Correlation context threaded through [`EventCodec::encode`] when
/// transacting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
}

/// Maps application events to and from their wire form.
///
/// Decoding is total: an event whose type tag (or body) is not recognised
/// yields `None` and is skipped by the fold. Terminal conditions are the
/// codec's to raise from `encode`, in which case they propagate to the
/// caller unchanged.
pub trait EventCodec: Send + Sync {
    /// Application event type (usually an enum over the stream's cases).
    type Event;
    /// Context value threaded into [`encode`](Self::encode) by the caller.
    type Context;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Encode an application event to its wire form.
    ///
    /// # Errors
    ///
    /// Returns the codec's error if the event cannot be serialised; the
    /// engine propagates this without appending anything.
    fn encode(
        &self,
        context: &Self::Context,
        event: &Self::Event,
    ) -> Result<EventData, Self::Error>;

    /// Decode a stored event, or `None` for unknown/undecodable records.
    fn try_decode(&self, event: &TimelineEvent) -> Option<Self::Event>;
}

/// Per-instance wire type tag.
///
/// Implemented by application event enums; each variant reports the tag
/// its body is stored under.
pub trait EventType {
    fn event_type(&self) -> &'static str;
}

/// JSON codec backed by `serde_json`.
///
/// Serialises the whole event value as the data body (externally tagged
/// for enums) and stamps [`EventType::event_type`] as the wire tag.
/// Records whose body does not deserialise back into `E` decode to `None`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec<E> {
    _event: std::marker::PhantomData<fn() -> E>,
}

impl<E> JsonCodec<E> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _event: std::marker::PhantomData,
        }
    }
}

impl<E> EventCodec for JsonCodec<E>
where
    E: serde::Serialize + serde::de::DeserializeOwned + EventType + Send + Sync,
{
    type Context = EventContext;
    type Error = serde_json::Error;
    type Event = E;

    fn encode(&self, context: &EventContext, event: &E) -> Result<EventData, Self::Error> {
        Ok(EventData {
            id: Uuid::new_v4(),
            event_type: event.event_type().to_owned(),
            data: serde_json::to_vec(event)?,
            meta: Vec::new(),
            correlation_id: context.correlation_id.clone(),
            causation_id: context.causation_id.clone(),
        })
    }

    fn try_decode(&self, event: &TimelineEvent) -> Option<E> {
        serde_json::from_slice(&event.data).ok()
    }
}

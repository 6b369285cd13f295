//! State reconstitution.
//!
//! A stream's behaviour is three pure elements: an event type, an initial
//! state, and an evolve function. The engine only ever derives state by
//! left-folding decoded events over [`Fold::initial`].

/// Pure state model for one category of streams.
///
/// `evolve` must be deterministic with respect to the event sequence;
/// everything else (caching, conflict recovery, snapshot placement) relies
/// on replaying it being equivalent to having observed the writes live.
pub trait Fold: Clone + Send + Sync + 'static {
    type Event: Send + Sync + 'static;

    /// State of a stream with no events.
    fn initial() -> Self;

    /// Apply a single event.
    fn evolve(&mut self, event: &Self::Event);

    /// Left-fold a sequence of events onto this state.
    #[must_use]
    fn fold<'a, I>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = &'a Self::Event>,
        Self::Event: 'a,
    {
        for event in events {
            self.evolve(event);
        }
        self
    }
}

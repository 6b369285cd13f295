//! The category engine.
//!
//! A [`Category`] binds a store adapter, a codec, a fold, an access
//! strategy, and a caching policy into the two operations everything else
//! is built from: load current state, and try to sync a decision. The
//! sync path is an explicit two-step machine: `try_sync` either completes
//! as `Written` or hands back a [`Resync`] context that the caller runs
//! to catch up after a conflict.

use std::time::Duration;

use nonempty::NonEmpty;
use thiserror::Error;

use crate::{
    access::AccessStrategy,
    cache::{CachedValue, CachingStrategy, StateCache},
    event::{EventCodec, EventData, TimelineEvent},
    fold::Fold,
    store::{AppendOutcome, EventStore, ExpectedVersion, StoreError},
    stream::StreamName,
    token::StreamToken,
};

/// Construction-time misconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `LatestKnownEvent` loads exactly one event; a cache would serve
    /// stale hits without saving any reads.
    #[error("the LatestKnownEvent access strategy cannot be combined with caching")]
    LatestKnownEventWithCaching,
}

/// How a load may interact with the cache and with read replicas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadOption {
    /// Serve cached state only after revalidating it against the store.
    #[default]
    RequireLoad,
    /// As [`RequireLoad`](Self::RequireLoad), with reads pinned to the
    /// leader replica.
    RequireLeader,
    /// Serve a cached pair untouched when it was fetched within `max_age`;
    /// revalidate otherwise.
    AllowStale(Duration),
    /// Serve any cached pair untouched, whatever its age.
    AnyCachedValue,
}

/// Failure of the transact path.
#[derive(Debug, Error)]
pub enum TransactError {
    /// The conflict retry budget ran out.
    #[error("transact on `{stream}` gave up after {attempts} conflicted attempts")]
    MaxResyncsExhausted { stream: String, attempts: usize },
    /// The codec refused an event; nothing was appended.
    #[error("encoding events for `{stream}` failed: {source}")]
    Codec {
        stream: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one sync attempt.
#[derive(Debug)]
pub enum SyncResult<S> {
    /// The append won; the token and state reflect the write.
    Written { token: StreamToken, state: S },
    /// A concurrent writer got there first; run the contained context to
    /// catch up and decide again.
    Conflict(Resync<S>),
}

/// Owned continuation for catching up after a lost append race.
///
/// Holds the token and state the conflicted attempt was based on; running
/// it performs an incremental leader read from the token's version and
/// folds the concurrent writer's events in.
#[derive(Debug)]
pub struct Resync<S> {
    token: StreamToken,
    state: S,
}

/// Engine for one category of streams.
pub struct Category<St, C, S>
where
    C: EventCodec,
{
    store: St,
    codec: C,
    access: AccessStrategy<S, C::Event>,
    caching: CachingStrategy<S>,
}

impl<St, C, S> std::fmt::Debug for Category<St, C, S>
where
    C: EventCodec,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Category").finish_non_exhaustive()
    }
}

impl<St, C, S> Category<St, C, S>
where
    St: EventStore,
    C: EventCodec,
    S: Fold<Event = C::Event>,
{
    /// Bind the pure elements and policies for a category.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::LatestKnownEventWithCaching`] for that
    /// combination; every other pairing is valid.
    pub fn new(
        store: St,
        codec: C,
        access: AccessStrategy<S, C::Event>,
        caching: CachingStrategy<S>,
    ) -> Result<Self, ConfigError> {
        if !access.supports_caching() && !matches!(caching, CachingStrategy::NoCaching) {
            return Err(ConfigError::LatestKnownEventWithCaching);
        }
        Ok(Self {
            store,
            codec,
            access,
            caching,
        })
    }

    #[must_use]
    pub fn store(&self) -> &St {
        &self.store
    }

    /// Current `(token, state)` for a stream.
    ///
    /// Serves from the cache when the policy allows; otherwise runs the
    /// access strategy's read and publishes the result. Events the codec
    /// does not recognise are skipped.
    ///
    /// # Errors
    ///
    /// Propagates [`StoreError`] from the adapter.
    #[tracing::instrument(skip(self), fields(stream = %stream))]
    pub async fn load(
        &self,
        stream: &StreamName,
        option: LoadOption,
    ) -> Result<(StreamToken, S), StoreError> {
        let require_leader = matches!(option, LoadOption::RequireLeader);
        let Some((cache, window, sliding)) = self.caching.slot() else {
            return self.load_from_store(stream, require_leader).await;
        };

        let key = stream.as_str();
        let refresh = sliding.then_some(window);
        if let Some(hit) = cache.lookup(key, refresh) {
            tracing::trace!(version = hit.token.version, "cache hit");
            return self
                .finish_cached(stream, hit, option, cache, window)
                .await;
        }

        // Single flight: the first loader of an absent key reads the
        // store, later arrivals block here then hit the published entry.
        let gate = cache.flight(key);
        let _guard = gate.lock().await;
        if let Some(hit) = cache.lookup(key, refresh) {
            return self
                .finish_cached(stream, hit, option, cache, window)
                .await;
        }
        let (token, state) = self.load_from_store(stream, require_leader).await?;
        cache.publish(key, token.clone(), state.clone(), window);
        Ok((token, state))
    }

    async fn finish_cached(
        &self,
        stream: &StreamName,
        hit: CachedValue<S>,
        option: LoadOption,
        cache: &StateCache<S>,
        window: Duration,
    ) -> Result<(StreamToken, S), StoreError> {
        let fresh_enough = match option {
            LoadOption::AnyCachedValue => true,
            LoadOption::AllowStale(max_age) => hit.age <= max_age,
            LoadOption::RequireLoad | LoadOption::RequireLeader => false,
        };
        if fresh_enough {
            return Ok((hit.token, hit.state));
        }
        let require_leader = matches!(option, LoadOption::RequireLeader);
        let (token, state) = self
            .reload(stream, hit.token, hit.state, require_leader)
            .await?;
        cache.publish(stream.as_str(), token.clone(), state.clone(), window);
        Ok((token, state))
    }

    /// Incremental forward read from a known position, folding anything
    /// new onto the carried state.
    async fn reload(
        &self,
        stream: &StreamName,
        token: StreamToken,
        state: S,
        require_leader: bool,
    ) -> Result<(StreamToken, S), StoreError> {
        let from_index = token.position.stream_version + 1;
        let (fresh, events) = self
            .store
            .load_forward(stream, from_index, require_leader)
            .await?;
        tracing::trace!(from_index, new_events = events.len(), "revalidated");
        let state = self.fold_timeline(state, &events);
        Ok((Self::absorb(&token, fresh), state))
    }

    async fn load_from_store(
        &self,
        stream: &StreamName,
        require_leader: bool,
    ) -> Result<(StreamToken, S), StoreError> {
        let (token, events) = if self.access.loads_backward() {
            let is_origin = |event: &TimelineEvent| {
                self.codec
                    .try_decode(event)
                    .is_some_and(|decoded| self.access.is_origin(&decoded))
            };
            self.store
                .load_backward_until(stream, &is_origin, require_leader)
                .await?
        } else {
            self.store.load_forward(stream, 0, require_leader).await?
        };
        tracing::debug!(
            events = events.len(),
            version = token.version,
            "loaded from store"
        );
        let state = self.fold_timeline(S::initial(), &events);
        Ok((token, state))
    }

    fn fold_timeline(&self, mut state: S, events: &[TimelineEvent]) -> S {
        let mut skipped = 0usize;
        for event in events {
            match self.codec.try_decode(event) {
                Some(decoded) => state.evolve(&decoded),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::debug!(skipped, "events not recognised by the codec were skipped");
        }
        state
    }

    /// Attempt to append a decision at the position described by `token`.
    ///
    /// On success the new events are folded onto `state`, the pair is
    /// published to the cache, and `Written` is returned. On a version
    /// conflict nothing has been persisted and the returned [`Resync`]
    /// carries what is needed to catch up.
    ///
    /// # Errors
    ///
    /// [`TransactError::Codec`] when encoding rejects an event,
    /// [`TransactError::Store`] for adapter failures.
    #[tracing::instrument(skip_all, fields(stream = %stream, events = events.len()))]
    pub async fn try_sync(
        &self,
        stream: &StreamName,
        token: StreamToken,
        state: S,
        events: NonEmpty<C::Event>,
        context: &C::Context,
    ) -> Result<SyncResult<S>, TransactError> {
        let state_after = state.clone().fold(events.iter());
        let events: Vec<C::Event> = events.into_iter().collect();
        let (events, unfolds) = self.access.plan_write(&state_after, events, &token);

        let encoded = self.encode_all(stream, context, &events)?;
        let encoded_unfolds = self.encode_all(stream, context, &unfolds)?;

        let expected = ExpectedVersion::from_token(&token);
        match self
            .store
            .append(stream, &token, expected, encoded, encoded_unfolds)
            .await?
        {
            AppendOutcome::Written(new_token) => {
                tracing::debug!(version = new_token.version, "synced");
                self.publish(stream, &new_token, &state_after);
                Ok(SyncResult::Written {
                    token: new_token,
                    state: state_after,
                })
            }
            AppendOutcome::Conflict => {
                tracing::debug!(expected = token.version, "conflict, resync required");
                Ok(SyncResult::Conflict(Resync { token, state }))
            }
        }
    }

    /// Run a conflict continuation: leader read from the stale position,
    /// folding the concurrent writer's events onto the carried state.
    ///
    /// # Errors
    ///
    /// Propagates [`StoreError`] from the adapter.
    pub async fn resync(
        &self,
        stream: &StreamName,
        resync: Resync<S>,
    ) -> Result<(StreamToken, S), StoreError> {
        let (token, state) = self.reload(stream, resync.token, resync.state, true).await?;
        self.publish(stream, &token, &state);
        Ok((token, state))
    }

    fn publish(&self, stream: &StreamName, token: &StreamToken, state: &S) {
        if let Some((cache, window, _)) = self.caching.slot() {
            cache.publish(stream.as_str(), token.clone(), state.clone(), window);
        }
    }

    fn encode_all(
        &self,
        stream: &StreamName,
        context: &C::Context,
        events: &[C::Event],
    ) -> Result<Vec<EventData>, TransactError> {
        events
            .iter()
            .map(|event| self.codec.encode(context, event))
            .collect::<Result<_, _>>()
            .map_err(|source| TransactError::Codec {
                stream: stream.as_str().to_owned(),
                source: Box::new(source),
            })
    }

    /// Merge backend detail a forward read cannot observe (compaction
    /// index, concurrency tag) from the prior token into a fresh one.
    fn absorb(prior: &StreamToken, mut fresh: StreamToken) -> StreamToken {
        if fresh.position.compaction_event_index.is_none() {
            fresh.position.compaction_event_index = prior.position.compaction_event_index;
        }
        if fresh.tag.is_none() {
            fresh.tag = prior.tag.clone();
        }
        fresh
    }
}

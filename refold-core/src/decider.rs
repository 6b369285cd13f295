//! Public programming surface.
//!
//! A [`Decider`] pairs a category engine with one resolved stream and
//! exposes the three operations applications use: `query`, `transact`,
//! and `transact_result`. The transact loop owns conflict recovery:
//! decide, try to sync, and on a lost race catch up and decide again, up
//! to a bounded number of attempts.

use std::sync::Arc;

use nonempty::NonEmpty;

use crate::{
    category::{Category, LoadOption, SyncResult, TransactError},
    event::EventCodec,
    fold::Fold,
    store::{EventStore, StoreError},
    stream::StreamName,
};

/// Default bound on conflicted sync attempts per transact.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Facade over one stream of a category.
pub struct Decider<St, C, S>
where
    C: EventCodec,
{
    category: Arc<Category<St, C, S>>,
    stream: StreamName,
    max_attempts: usize,
}

impl<St, C, S> Decider<St, C, S>
where
    St: EventStore,
    C: EventCodec,
    S: Fold<Event = C::Event>,
{
    /// Resolve a stream of the category.
    #[must_use]
    pub fn new(category: Arc<Category<St, C, S>>, stream: StreamName) -> Self {
        Self {
            category,
            stream,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the conflict retry budget.
    ///
    /// # Panics
    ///
    /// Panics if `max_attempts` is zero; at least one sync attempt is
    /// always made.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        assert!(max_attempts > 0, "max_attempts must be at least 1");
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn stream(&self) -> &StreamName {
        &self.stream
    }

    /// Project a value from current state.
    ///
    /// # Errors
    ///
    /// Propagates [`StoreError`] from the load.
    pub async fn query<T>(&self, render: impl FnOnce(&S) -> T) -> Result<T, StoreError> {
        self.query_with(LoadOption::default(), render).await
    }

    /// As [`query`](Self::query), with an explicit load option.
    ///
    /// # Errors
    ///
    /// Propagates [`StoreError`] from the load.
    pub async fn query_with<T>(
        &self,
        option: LoadOption,
        render: impl FnOnce(&S) -> T,
    ) -> Result<T, StoreError> {
        let (_, state) = self.category.load(&self.stream, option).await?;
        Ok(render(&state))
    }

    /// Run a decision against current state and persist its events.
    ///
    /// `decide` must be pure: it is re-run against refreshed state after
    /// every lost append race. An empty decision appends nothing.
    ///
    /// # Errors
    ///
    /// [`TransactError::MaxResyncsExhausted`] when the retry budget runs
    /// out; codec and store failures otherwise.
    pub async fn transact(
        &self,
        context: &C::Context,
        decide: impl Fn(&S) -> Vec<C::Event>,
    ) -> Result<(), TransactError> {
        self.transact_result(context, |state| ((), decide(state)))
            .await
    }

    /// As [`transact`](Self::transact), returning a value computed by the
    /// decision alongside its events.
    ///
    /// # Errors
    ///
    /// As for [`transact`](Self::transact).
    pub async fn transact_result<T>(
        &self,
        context: &C::Context,
        decide: impl Fn(&S) -> (T, Vec<C::Event>),
    ) -> Result<T, TransactError> {
        self.transact_with(LoadOption::default(), context, decide)
            .await
    }

    /// Full-control transact: explicit load option, result value.
    ///
    /// # Errors
    ///
    /// As for [`transact`](Self::transact).
    pub async fn transact_with<T>(
        &self,
        option: LoadOption,
        context: &C::Context,
        decide: impl Fn(&S) -> (T, Vec<C::Event>),
    ) -> Result<T, TransactError> {
        let (mut token, mut state) = self.category.load(&self.stream, option).await?;

        for attempt in 1..=self.max_attempts {
            let (value, events) = decide(&state);
            let Some(events) = NonEmpty::from_vec(events) else {
                // Nothing to change; the token stands.
                return Ok(value);
            };

            match self
                .category
                .try_sync(&self.stream, token, state, events, context)
                .await?
            {
                SyncResult::Written { .. } => return Ok(value),
                SyncResult::Conflict(resync) => {
                    if attempt == self.max_attempts {
                        return Err(TransactError::MaxResyncsExhausted {
                            stream: self.stream.as_str().to_owned(),
                            attempts: attempt,
                        });
                    }
                    tracing::debug!(
                        stream = %self.stream,
                        attempt,
                        "append conflicted, catching up"
                    );
                    let caught_up = self.category.resync(&self.stream, resync).await?;
                    token = caught_up.0;
                    state = caught_up.1;
                }
            }
        }
        unreachable!("transact loop returns within the attempt budget")
    }
}

impl<St, C, S> Clone for Decider<St, C, S>
where
    C: EventCodec,
{
    fn clone(&self) -> Self {
        Self {
            category: Arc::clone(&self.category),
            stream: self.stream.clone(),
            max_attempts: self.max_attempts,
        }
    }
}

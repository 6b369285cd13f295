//! [`EventStore`] adapter over a message-db style PostgreSQL schema.
//!
//! Appends go through the `write_message` stored function, which enforces
//! the expected version and raises `Wrong expected version` on a lost
//! race. Reads use `get_stream_messages` and `get_last_stream_message`;
//! the backward origin scan is emulated by resolving the stream's tail
//! and walking fixed-size windows toward index 0.

mod read;
mod write;

use refold_core::{
    AppendOutcome, EventData, EventStore, ExpectedVersion, StoreError, StreamName, StreamToken,
    TimelineEvent,
    store::{Operation, OriginPredicate},
    token::Position,
};
use sqlx::PgPool;

use crate::{error::Error, retry::RetryPolicy};

/// Default events-per-page for reads.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Append-only relational backend.
#[derive(Clone)]
pub struct MessageDbStore {
    pub(crate) pool: PgPool,
    batch_size: usize,
    max_batches: Option<usize>,
    retry: RetryPolicy,
}

impl MessageDbStore {
    /// Construct a message-db event store from a connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
            max_batches: None,
            retry: RetryPolicy::default(),
        }
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

    /// Override the transient-failure retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Apply the schema and stored functions (idempotent).
    ///
    /// Uses `IF NOT EXISTS` / `CREATE OR REPLACE` DDL so it can run on
    /// startup against a fresh test database.
    ///
    /// # Errors
    ///
    /// Returns a `sqlx::Error` if any of the schema statements fail.
    #[tracing::instrument(skip(self))]
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages (
                global_position BIGSERIAL PRIMARY KEY,
                position        BIGINT NOT NULL,
                stream_name     TEXT NOT NULL,
                type            TEXT NOT NULL,
                data            JSONB,
                metadata        JSONB,
                id              UUID NOT NULL,
                time            TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (stream_name, position)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE OR REPLACE FUNCTION write_message(
                id uuid,
                stream_name text,
                type text,
                data jsonb,
                metadata jsonb,
                expected_version bigint DEFAULT NULL
            ) RETURNS bigint AS $$
            DECLARE
                current_version bigint;
                next_position bigint;
            BEGIN
                PERFORM pg_advisory_xact_lock(hashtext(write_message.stream_name));

                SELECT COALESCE(MAX(m.position), -1) INTO current_version
                FROM messages m
                WHERE m.stream_name = write_message.stream_name;

                IF write_message.expected_version IS NOT NULL
                   AND write_message.expected_version != current_version THEN
                    RAISE EXCEPTION
                        'Wrong expected version: % (Stream: %, Stream Version: %)',
                        write_message.expected_version,
                        write_message.stream_name,
                        current_version;
                END IF;

                next_position := current_version + 1;

                INSERT INTO messages (id, stream_name, type, data, metadata, position)
                VALUES (
                    write_message.id,
                    write_message.stream_name,
                    write_message.type,
                    write_message.data,
                    write_message.metadata,
                    next_position
                );

                RETURN next_position;
            END;
            $$ LANGUAGE plpgsql
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE OR REPLACE FUNCTION get_stream_messages(
                stream_name text,
                "position" bigint DEFAULT 0,
                batch_size bigint DEFAULT 1000
            ) RETURNS SETOF messages AS $$
            BEGIN
                RETURN QUERY
                SELECT * FROM messages m
                WHERE m.stream_name = get_stream_messages.stream_name
                  AND m.position >= get_stream_messages.position
                ORDER BY m.position ASC
                LIMIT get_stream_messages.batch_size;
            END;
            $$ LANGUAGE plpgsql
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE OR REPLACE FUNCTION get_last_stream_message(
                stream_name text,
                type text DEFAULT NULL
            ) RETURNS SETOF messages AS $$
            BEGIN
                RETURN QUERY
                SELECT * FROM messages m
                WHERE m.stream_name = get_last_stream_message.stream_name
                  AND (get_last_stream_message.type IS NULL
                       OR m.type = get_last_stream_message.type)
                ORDER BY m.position DESC
                LIMIT 1;
            END;
            $$ LANGUAGE plpgsql
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn token_at(&self, stream_version: i64, compaction: Option<i64>) -> StreamToken {
        let position = Position {
            stream_version,
            compaction_event_index: compaction,
            batch_capacity_limit: None,
        }
        .with_capacity_hint(self.batch_size);
        StreamToken::at(position)
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

    fn unavailable(stream: &StreamName, operation: Operation, source: Error) -> StoreError {
        StoreError::unavailable(stream, operation, source)
    }

    async fn stream_version(&self, stream: &StreamName) -> Result<i64, Error> {
        let last = self
            .retry
            .run(|| read::read_last(&self.pool, stream.as_str(), None))
            .await?;
        Ok(last.map_or(-1, |event| event.index))
    }
}

impl EventStore for MessageDbStore {
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
        let mut events: Vec<TimelineEvent> = Vec::new();
        let mut from = from_index.max(0);
        let mut batches = 0usize;
        loop {
            batches += 1;
            self.charge_batches(stream, batches)?;
            let page = self
                .retry
                .run(|| read::read_page(&self.pool, stream.as_str(), from, self.batch_size))
                .await
                .map_err(|e| Self::unavailable(stream, Operation::Load, e))?;
            let full_page = page.len() == self.batch_size;
            events.extend(page);
            match events.last() {
                Some(last) if full_page => from = last.index + 1,
                _ => break,
            }
        }

        let version = match events.last() {
            Some(last) => last.index,
            None => self
                .stream_version(stream)
                .await
                .map_err(|e| Self::unavailable(stream, Operation::Load, e))?,
        };
        tracing::trace!(events = events.len(), version, "forward load");
        Ok((self.token_at(version, None), events))
    }

    #[tracing::instrument(skip(self, is_origin), fields(stream = %stream))]
    async fn load_backward_until<'a>(
        &'a self,
        stream: &'a StreamName,
        is_origin: OriginPredicate<'a>,
        _require_leader: bool,
    ) -> Result<(StreamToken, Vec<TimelineEvent>), StoreError> {
        // Resolve the tail first; windows then walk toward index 0.
        let version = self
            .stream_version(stream)
            .await
            .map_err(|e| Self::unavailable(stream, Operation::Load, e))?;
        if version < 0 {
            return Ok((self.empty_token(), Vec::new()));
        }

        let mut windows: Vec<Vec<TimelineEvent>> = Vec::new();
        let mut compaction = None;
        let mut batches = 1usize; // the tail probe
        let mut hi = version + 1;
        while hi > 0 {
            let lo = (hi - self.batch_size as i64).max(0);
            batches += 1;
            self.charge_batches(stream, batches)?;
            let mut window = self
                .retry
                .run(|| read::read_page(&self.pool, stream.as_str(), lo, (hi - lo) as usize))
                .await
                .map_err(|e| Self::unavailable(stream, Operation::Load, e))?;
            if let Some(offset) = window.iter().rposition(is_origin) {
                compaction = Some(window[offset].index);
                windows.push(window.split_off(offset));
                break;
            }
            windows.push(window);
            hi = lo;
        }

        let events: Vec<TimelineEvent> = windows.into_iter().rev().flatten().collect();
        tracing::trace!(events = events.len(), ?compaction, version, "backward load");
        Ok((self.token_at(version, compaction), events))
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
        let wrote_compaction = !unfolds.is_empty();
        let mut combined = events;
        // Compaction events are ordinary trailing messages in a
        // log-structured store; they take indices like anything else.
        combined.extend(unfolds);
        if combined.is_empty() {
            return Ok(AppendOutcome::Written(token.clone()));
        }

        let prepared = write::prepare(&combined)
            .map_err(|e| Self::unavailable(stream, Operation::Append, e))?;
        let expected = match expected {
            ExpectedVersion::NoStream => Some(-1),
            ExpectedVersion::Exact(version) => Some(version),
            ExpectedVersion::Any => None,
        };

        let written = self
            .retry
            .run(|| write::append_once(&self.pool, stream.as_str(), expected, &prepared))
            .await
            .map_err(|e| Self::unavailable(stream, Operation::Append, e))?;

        match written {
            Some(version) => {
                let compaction = if wrote_compaction {
                    Some(version)
                } else {
                    token.position.compaction_event_index
                };
                tracing::debug!(version = version + 1, "append accepted");
                Ok(AppendOutcome::Written(self.token_at(version, compaction)))
            }
            None => {
                tracing::debug!(?expected, "append rejected by write_message");
                Ok(AppendOutcome::Conflict)
            }
        }
    }
}

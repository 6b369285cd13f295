//! Append-only relational (message-db style) backend for refold.
//!
//! Streams live in a single `messages` table; the `write_message` stored
//! function performs conditional appends (raising `Wrong expected
//! version` on a lost race), and `get_stream_messages` /
//! `get_last_stream_message` serve reads. Compaction events are ordinary
//! trailing messages, so a stream's snapshot takes an index like any
//! other event.
//!
//! Transient transport failures are retried with bounded exponential
//! backoff ([`RetryPolicy`]); version conflicts are never retried here,
//! the engine recovers them by reloading.

mod error;
mod retry;
mod store;

pub use error::Error;
pub use retry::RetryPolicy;
pub use store::{DEFAULT_BATCH_SIZE, MessageDbStore};

//! Document-store backend for refold.
//!
//! Events live in per-stream "tip" documents holding the most recent
//! events plus a `u` array of unfolds (rolling snapshots); older events
//! migrate to immutable calf batches keyed by starting index. Appends are
//! etag-conditional replaces of the tip, so optimistic concurrency rides
//! on the container's own precondition checks.
//!
//! The adapter talks to the container through the narrow
//! [`DocumentClient`] interface; [`MemoryDocumentClient`] implements it
//! in memory for tests and examples.

mod client;
mod document;
mod store;

pub use client::{DocumentClient, MemoryDocumentClient, ReplaceOutcome};
pub use document::{BatchDocument, EventDocument, TipDocument, UnfoldDocument};
pub use store::{DEFAULT_BATCH_SIZE, DEFAULT_TIP_MAX_EVENTS, DocumentStore};

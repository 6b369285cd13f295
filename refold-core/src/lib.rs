//! Core types and engine for the refold event-sourcing library.
//!
//! This crate provides the storage-agnostic machinery:
//!
//! - [`stream`] - Stream naming (`StreamName`)
//! - [`event`] - Wire records and the codec seam (`TimelineEvent`,
//!   `EventData`, `EventCodec`)
//! - [`token`] - Position and token model (`Position`, `StreamToken`)
//! - [`fold`] - Pure state reconstitution (`Fold`)
//! - [`store`] - Storage adapter contract (`EventStore`) and the
//!   in-memory reference store
//! - [`access`] - Load/write access strategies (`AccessStrategy`)
//! - [`cache`] - Per-stream state caching (`StateCache`,
//!   `CachingStrategy`)
//! - [`category`] - Load/sync engine (`Category`)
//! - [`decider`] - Public facade (`Decider`)
//!
//! Most users should depend on the `refold` crate, which re-exports these
//! together with the storage backends.

pub mod access;
pub mod cache;
pub mod category;
pub mod decider;
pub mod event;
pub mod fold;
pub mod store;
pub mod stream;
pub mod token;

pub use access::AccessStrategy;
pub use cache::{CachingStrategy, StateCache};
pub use category::{Category, ConfigError, LoadOption, SyncResult, TransactError};
pub use decider::Decider;
pub use event::{EventCodec, EventContext, EventData, EventType, JsonCodec, TimelineEvent};
pub use fold::Fold;
pub use store::{AppendOutcome, EventStore, ExpectedVersion, StoreError};
pub use stream::{StreamName, StreamNameError};
pub use token::{Position, StreamToken};

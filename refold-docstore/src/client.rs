//! The narrow container interface the adapter drives.
//!
//! A production deployment implements [`DocumentClient`] as a thin
//! wrapper over a vendor SDK; the adapter never sees more than point
//! reads, an etag-conditional replace, and batch reads/writes. The
//! in-memory [`MemoryDocumentClient`] implements the same contract for
//! tests.

use std::{
    collections::{BTreeMap, HashMap},
    convert::Infallible,
    future::Future,
    sync::{Arc, RwLock},
};

use uuid::Uuid;

use crate::document::{BatchDocument, TipDocument};

/// Result of an etag-conditional tip replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The write landed; the container assigned a fresh etag.
    Replaced { etag: String },
    /// The precondition failed: the tip moved (or already existed when a
    /// create was expected). Nothing was written.
    PreconditionFailed,
}

/// Point operations over one container of tip and batch documents.
pub trait DocumentClient: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn read_tip<'a>(
        &'a self,
        stream: &'a str,
    ) -> impl Future<Output = Result<Option<TipDocument>, Self::Error>> + Send + 'a;

    /// Replace (or create, when `expected_etag` is `None`) the stream's
    /// tip, conditional on its current etag.
    fn try_replace_tip<'a>(
        &'a self,
        stream: &'a str,
        expected_etag: Option<&'a str>,
        tip: TipDocument,
    ) -> impl Future<Output = Result<ReplaceOutcome, Self::Error>> + Send + 'a;

    /// Calf batches of a stream whose range ends at or after `from_index`,
    /// ascending by base index.
    fn read_batches<'a>(
        &'a self,
        stream: &'a str,
        from_index: i64,
    ) -> impl Future<Output = Result<Vec<BatchDocument>, Self::Error>> + Send + 'a;

    /// Write a calf batch. Batch ids are deterministic, so rewriting the
    /// same batch is idempotent.
    fn write_batch<'a>(
        &'a self,
        batch: BatchDocument,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

/// In-memory [`DocumentClient`] for tests and examples.
#[derive(Clone, Default)]
pub struct MemoryDocumentClient {
    inner: Arc<RwLock<Containers>>,
}

#[derive(Default)]
struct Containers {
    tips: HashMap<String, TipDocument>,
    batches: HashMap<String, BTreeMap<i64, BatchDocument>>,
}

impl MemoryDocumentClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calf batches stored for a stream.
    #[must_use]
    pub fn batch_count(&self, stream: &str) -> usize {
        self.inner
            .read()
            .expect("document client lock poisoned")
            .batches
            .get(stream)
            .map_or(0, BTreeMap::len)
    }
}

impl DocumentClient for MemoryDocumentClient {
    type Error = Infallible;

    fn read_tip<'a>(
        &'a self,
        stream: &'a str,
    ) -> impl Future<Output = Result<Option<TipDocument>, Infallible>> + Send + 'a {
        let tip = self
            .inner
            .read()
            .expect("document client lock poisoned")
            .tips
            .get(stream)
            .cloned();
        std::future::ready(Ok(tip))
    }

    fn try_replace_tip<'a>(
        &'a self,
        stream: &'a str,
        expected_etag: Option<&'a str>,
        mut tip: TipDocument,
    ) -> impl Future<Output = Result<ReplaceOutcome, Infallible>> + Send + 'a {
        let mut containers = self.inner.write().expect("document client lock poisoned");
        let current = containers.tips.get(stream).map(|tip| tip.etag.as_str());
        let outcome = if current == expected_etag {
            let etag = Uuid::new_v4().to_string();
            tip.etag.clone_from(&etag);
            containers.tips.insert(stream.to_owned(), tip);
            ReplaceOutcome::Replaced { etag }
        } else {
            ReplaceOutcome::PreconditionFailed
        };
        drop(containers);
        std::future::ready(Ok(outcome))
    }

    fn read_batches<'a>(
        &'a self,
        stream: &'a str,
        from_index: i64,
    ) -> impl Future<Output = Result<Vec<BatchDocument>, Infallible>> + Send + 'a {
        let containers = self.inner.read().expect("document client lock poisoned");
        let batches = containers.batches.get(stream).map_or_else(Vec::new, |all| {
            all.values()
                .filter(|batch| batch.i + batch.e.len() as i64 > from_index)
                .cloned()
                .collect()
        });
        drop(containers);
        std::future::ready(Ok(batches))
    }

    fn write_batch<'a>(
        &'a self,
        batch: BatchDocument,
    ) -> impl Future<Output = Result<(), Infallible>> + Send + 'a {
        let mut containers = self.inner.write().expect("document client lock poisoned");
        containers
            .batches
            .entry(batch.stream.clone())
            .or_default()
            .insert(batch.i, batch);
        drop(containers);
        std::future::ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tip(stream: &str, etag: &str) -> TipDocument {
        TipDocument {
            id: stream.to_owned(),
            etag: etag.to_owned(),
            i: 0,
            e: Vec::new(),
            u: Vec::new(),
        }
    }

    #[tokio::test]
    async fn create_requires_absent_tip() {
        let client = MemoryDocumentClient::new();
        let outcome = client
            .try_replace_tip("cart-1", None, tip("cart-1", ""))
            .await
            .unwrap();
        assert!(matches!(outcome, ReplaceOutcome::Replaced { .. }));

        let outcome = client
            .try_replace_tip("cart-1", None, tip("cart-1", ""))
            .await
            .unwrap();
        assert_eq!(outcome, ReplaceOutcome::PreconditionFailed);
    }

    #[tokio::test]
    async fn replace_requires_matching_etag() {
        let client = MemoryDocumentClient::new();
        let ReplaceOutcome::Replaced { etag } = client
            .try_replace_tip("cart-1", None, tip("cart-1", ""))
            .await
            .unwrap()
        else {
            panic!("create failed");
        };

        let outcome = client
            .try_replace_tip("cart-1", Some("bogus"), tip("cart-1", ""))
            .await
            .unwrap();
        assert_eq!(outcome, ReplaceOutcome::PreconditionFailed);

        let outcome = client
            .try_replace_tip("cart-1", Some(&etag), tip("cart-1", ""))
            .await
            .unwrap();
        assert!(matches!(outcome, ReplaceOutcome::Replaced { .. }));
    }

    #[tokio::test]
    async fn read_tip_returns_latest_replacement() {
        let client = MemoryDocumentClient::new();
        let ReplaceOutcome::Replaced { etag } = client
            .try_replace_tip("cart-1", None, tip("cart-1", ""))
            .await
            .unwrap()
        else {
            panic!("create failed");
        };
        let read = client.read_tip("cart-1").await.unwrap().unwrap();
        assert_eq!(read.etag, etag);
    }

    #[tokio::test]
    async fn batches_filter_by_covered_range() {
        let client = MemoryDocumentClient::new();
        // Two batches covering 0..2 and 2..4.
        let mk = |base: i64| {
            BatchDocument::new(
                "cart-1",
                base,
                (0..2)
                    .map(|_| crate::document::EventDocument {
                        c: "E".into(),
                        d: Vec::new(),
                        m: Vec::new(),
                        id: Uuid::new_v4(),
                        correlation_id: None,
                        causation_id: None,
                        t: chrono::Utc::now(),
                    })
                    .collect(),
            )
        };
        client.write_batch(mk(0)).await.unwrap();
        client.write_batch(mk(2)).await.unwrap();

        let all = client.read_batches("cart-1", 0).await.unwrap();
        assert_eq!(all.len(), 2);
        let later = client.read_batches("cart-1", 2).await.unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].i, 2);
    }
}

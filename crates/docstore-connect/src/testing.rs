//! Testing utilities.
//!
//! [`MockDocumentStore`] stands in for the real store so batching,
//! draining, and failure behavior can be exercised without a server.

use crate::client::{DocumentStore, WriteBatch};
use crate::error::{ConnectorError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// An in-memory [`DocumentStore`] that records every batch it receives.
///
/// # Example
///
/// ```rust,ignore
/// let store = Arc::new(MockDocumentStore::new().with_latency(Duration::from_millis(50)));
/// connection.connect_with_store(store.clone());
/// // ... insert documents ...
/// assert_eq!(store.written_count(), 237);
/// ```
#[derive(Default)]
pub struct MockDocumentStore {
    batches: Mutex<Vec<WriteBatch>>,
    latency: Mutex<Duration>,
    fail_remaining: AtomicUsize,
    fail_message: Mutex<String>,
}

impl MockDocumentStore {
    /// Create a mock store that acknowledges immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a network round trip of the given duration.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = latency;
        self
    }

    /// Make the next `n` batch writes fail with the given message.
    pub fn fail_times(&self, n: usize, message: impl Into<String>) {
        *self.fail_message.lock() = message.into();
        self.fail_remaining.store(n, Ordering::Release);
    }

    /// Every batch acknowledged so far, in arrival order.
    pub fn written_batches(&self) -> Vec<WriteBatch> {
        self.batches.lock().clone()
    }

    /// Number of batches acknowledged.
    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// Total documents acknowledged across all batches.
    pub fn written_count(&self) -> usize {
        self.batches.lock().iter().map(WriteBatch::len).sum()
    }

    /// URIs of every acknowledged document, in arrival order.
    pub fn written_uris(&self) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .flat_map(|b| b.documents.iter().map(|d| d.uri.clone()))
            .collect()
    }
}

#[async_trait]
impl DocumentStore for MockDocumentStore {
    async fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        let latency = { *self.latency.lock() };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self
            .fail_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ConnectorError::store(self.fail_message.lock().clone()));
        }

        self.batches.lock().push(batch.clone());
        Ok(())
    }
}

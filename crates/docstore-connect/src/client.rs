//! The store client handle and the transport seam.
//!
//! [`DocumentStore`] is the boundary to the document store: one grouped
//! write per call, acknowledged or failed as a batch. [`StoreClient`] is
//! the owned handle a connection holds between `connect()` and
//! `invalidate()` — transports (REST in production, mocks in tests) plug
//! in behind the trait.

use crate::error::Result;
use crate::metadata::DocumentMetadata;
use crate::transform::ServerTransform;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// One document queued for insertion.
#[derive(Debug, Clone)]
pub struct DocumentWrite {
    /// Destination URI of the document
    pub uri: String,
    /// Raw document content
    pub content: Bytes,
}

/// A grouped write handed to the store in one round trip.
///
/// Every document in the batch shares the batcher's metadata template,
/// transform, and temporal collection. The store may process documents in
/// any order, and a batch-level failure implies nothing about which
/// documents were persisted.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    /// The documents in this batch
    pub documents: Vec<DocumentWrite>,
    /// Metadata attached to every document
    pub metadata: Arc<DocumentMetadata>,
    /// Server-side transform applied before persistence
    pub transform: Option<ServerTransform>,
    /// Temporal collection for bitemporal stores
    pub temporal_collection: Option<String>,
}

impl WriteBatch {
    /// Number of documents in the batch
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// `true` when the batch holds no documents
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// The batch's document URIs, for failure logging
    pub fn uris(&self) -> Vec<&str> {
        self.documents.iter().map(|d| d.uri.as_str()).collect()
    }
}

/// Transport boundary to the document store.
///
/// Implementations must tolerate concurrent `write_batch` calls: the
/// batcher's worker pool drains several batches at once.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist one batch, returning once the store acknowledges or
    /// rejects it as a whole.
    async fn write_batch(&self, batch: &WriteBatch) -> Result<()>;
}

/// The client handle a connection owns.
///
/// Exists only between `connect()` success and `invalidate()`; released
/// exactly once when the connection is torn down.
#[derive(Clone)]
pub struct StoreClient {
    port: u16,
    database: Option<String>,
    store: Arc<dyn DocumentStore>,
}

impl StoreClient {
    /// Wrap a transport into a client handle.
    pub fn new(port: u16, database: Option<String>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            port,
            database,
            store,
        }
    }

    /// Port the client is bound to, used by the liveness probe
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Database the client addresses, when configured
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// The transport, shared with the batchers this client serves
    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }
}

impl std::fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClient")
            .field("port", &self.port)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_batch_uris() {
        let batch = WriteBatch {
            documents: vec![
                DocumentWrite {
                    uri: "/a.json".to_string(),
                    content: Bytes::from_static(b"{}"),
                },
                DocumentWrite {
                    uri: "/b.json".to_string(),
                    content: Bytes::from_static(b"{}"),
                },
            ],
            metadata: Arc::new(DocumentMetadata::default()),
            transform: None,
            temporal_collection: None,
        };
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
        assert_eq!(batch.uris(), vec!["/a.json", "/b.json"]);
    }
}

//! The connection manager.
//!
//! A [`Connection`] owns the store client handle, the connection
//! identity, and the batcher registry. Batchers are created lazily, one
//! per distinct write configuration, and reused for every matching
//! request. On `invalidate()` every batcher is notified and drained
//! before the client handle is released.

use crate::batcher::InsertionBatcher;
use crate::client::{DocumentStore, StoreClient};
use crate::config::{ConnectionConfig, WriteConfig};
use crate::error::{ConnectorError, Result};
use crate::rest::RestStore;
use crate::signature::BatcherSignature;
use metrics::gauge;
use parking_lot::{FairMutex, Mutex};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use validator::Validate;

/// A connection to one document store.
///
/// Constructed by the hosting framework's provider, then driven through
/// `connect()` → operations → `invalidate()`. The client handle exists
/// only between a successful `connect()` and `invalidate()`, and is
/// released exactly once.
pub struct Connection {
    id: String,
    config: ConnectionConfig,
    client: Mutex<Option<StoreClient>>,
    /// Registry of live batchers, one per distinct configuration. The
    /// fair (FIFO) lock serializes get-or-create and release; it is held
    /// across batcher construction so two callers can never build two
    /// batchers for the same signature.
    batchers: FairMutex<HashMap<BatcherSignature, Arc<InsertionBatcher>>>,
    /// Non-owning back-references for invalidation notification.
    /// Batchers register at construction and deregister at release.
    listeners: Mutex<Vec<(BatcherSignature, Weak<InsertionBatcher>)>>,
}

impl Connection {
    /// Create an unconnected connection from its parameters.
    pub fn new(config: ConnectionConfig) -> Arc<Self> {
        Arc::new(Self {
            id: config.id.clone(),
            config,
            client: Mutex::new(None),
            batchers: FairMutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Stable identifier of this connection, part of every batcher
    /// signature and log line.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Build the store client from the connection parameters.
    ///
    /// Fails synchronously when the parameters are invalid, when trust
    /// material cannot be loaded, or when authentication setup fails.
    pub fn connect(&self) -> Result<()> {
        self.config
            .validate()
            .map_err(|e| ConnectorError::config(format!("invalid connection parameters: {}", e)))?;

        let store = RestStore::connect(&self.config).map_err(|e| match e {
            e @ (ConnectorError::Tls { .. } | ConnectorError::Auth(_)) => e,
            e => ConnectorError::connection_with("error creating store connection", e),
        })?;

        let client = StoreClient::new(
            self.config.port,
            self.config.database().map(str::to_string),
            Arc::new(store),
        );
        *self.client.lock() = Some(client);

        info!(
            connection_id = %self.id,
            host = %self.config.host,
            port = self.config.port,
            auth_mode = ?self.config.auth_mode,
            connection_mode = ?self.config.connection_mode,
            "connected to document store"
        );
        Ok(())
    }

    /// Install a client over an explicit transport.
    ///
    /// Seam for tests and custom transports; production connections go
    /// through [`Connection::connect`].
    pub fn connect_with_store(&self, store: Arc<dyn DocumentStore>) {
        *self.client.lock() = Some(StoreClient::new(
            self.config.port,
            self.config.database().map(str::to_string),
            store,
        ));
        info!(connection_id = %self.id, "connected with custom store transport");
    }

    /// Liveness probe used by the hosting framework's pooling layer.
    ///
    /// Never errors: `false` when there is no client or it is bound to a
    /// different port than expected.
    pub fn is_connected(&self, expected_port: u16) -> bool {
        match self.client.lock().as_ref() {
            Some(client) if client.port() == expected_port => true,
            Some(client) => {
                warn!(
                    connection_id = %self.id,
                    expected_port,
                    actual_port = client.port(),
                    "client bound to a different port"
                );
                false
            }
            None => {
                warn!(connection_id = %self.id, "no active store client");
                false
            }
        }
    }

    /// Resolve the insertion batcher for a write configuration, creating
    /// it on first use.
    ///
    /// The whole check-construct-insert sequence runs under the fair
    /// registry lock, so 50 concurrent callers with the same
    /// configuration get the same batcher and exactly one construction.
    pub fn get_or_create_insertion_batcher(
        self: &Arc<Self>,
        config: &WriteConfig,
    ) -> Result<Arc<InsertionBatcher>> {
        let store = { self.client.lock().as_ref().map(StoreClient::store) }.ok_or_else(|| {
            ConnectorError::not_connected(
                "cannot initialize insertion batcher; client is not yet connected",
            )
        })?;

        config
            .validate()
            .map_err(|e| ConnectorError::config(format!("invalid write parameters: {}", e)))?;

        let signature = BatcherSignature::compute(&self.id, config);

        let mut registry = self.batchers.lock();
        if let Some(existing) = registry.get(&signature) {
            debug!(
                connection_id = %self.id,
                signature = %signature,
                "reusing insertion batcher"
            );
            return Ok(existing.clone());
        }

        let batcher = Arc::new(InsertionBatcher::new(
            Arc::downgrade(self),
            store,
            config,
            signature.clone(),
        )?);
        self.listeners
            .lock()
            .push((signature.clone(), Arc::downgrade(&batcher)));
        registry.insert(signature, batcher.clone());
        gauge!("docstore.batchers.live").set(registry.len() as f64);
        Ok(batcher)
    }

    /// Tear the connection down.
    ///
    /// Notifies every registered listener (order unspecified), drains and
    /// releases every batcher, then releases the client handle last.
    pub async fn invalidate(&self) {
        let listeners: Vec<Arc<InsertionBatcher>> = {
            self.listeners
                .lock()
                .iter()
                .filter_map(|(_, weak)| weak.upgrade())
                .collect()
        };
        for listener in &listeners {
            listener.on_connection_invalidated();
        }

        let batchers: Vec<Arc<InsertionBatcher>> =
            { self.batchers.lock().drain().map(|(_, b)| b).collect() };
        futures::future::join_all(batchers.iter().map(|b| b.release())).await;
        gauge!("docstore.batchers.live").set(0.0);

        match self.client.lock().take() {
            Some(client) => {
                drop(client);
                info!(
                    connection_id = %self.id,
                    batchers = batchers.len(),
                    "connection invalidated"
                );
            }
            None => {
                warn!(connection_id = %self.id, "invalidate called without an active client");
            }
        }
    }

    /// Drop the registry entry and listener registration of a released
    /// batcher. Dead listener entries are pruned on the way.
    pub(crate) fn forget_batcher(&self, signature: &BatcherSignature) {
        let mut registry = self.batchers.lock();
        registry.remove(signature);
        gauge!("docstore.batchers.live").set(registry.len() as f64);
        drop(registry);

        self.listeners
            .lock()
            .retain(|(s, weak)| s != signature && weak.strong_count() > 0);
    }

    /// Number of live batchers in the registry.
    pub fn batcher_count(&self) -> usize {
        self.batchers.lock().len()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDocumentStore;
    use bytes::Bytes;

    fn connected() -> (Arc<Connection>, Arc<MockDocumentStore>) {
        let connection = Connection::new(ConnectionConfig {
            id: "testConfig-223efe".to_string(),
            host: "localhost".to_string(),
            port: 8010,
            ..Default::default()
        });
        let store = Arc::new(MockDocumentStore::new());
        connection.connect_with_store(store.clone());
        (connection, store)
    }

    fn write_config(job_name: &str) -> WriteConfig {
        WriteConfig {
            batch_size: 10,
            flush_interval_secs: 0,
            job_name: job_name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_batcher_requires_connection() {
        let connection = Connection::new(ConnectionConfig {
            id: "test".to_string(),
            host: "localhost".to_string(),
            port: 8010,
            ..Default::default()
        });
        let err = connection
            .get_or_create_insertion_batcher(&write_config("import"))
            .unwrap_err();
        assert!(matches!(err, ConnectorError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_same_config_reuses_batcher() {
        let (connection, _store) = connected();
        let a = connection
            .get_or_create_insertion_batcher(&write_config("import"))
            .unwrap();
        let b = connection
            .get_or_create_insertion_batcher(&write_config("import"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(connection.batcher_count(), 1);
        connection.invalidate().await;
    }

    #[tokio::test]
    async fn test_different_config_gets_new_batcher() {
        let (connection, _store) = connected();
        let a = connection
            .get_or_create_insertion_batcher(&write_config("import"))
            .unwrap();
        let b = connection
            .get_or_create_insertion_batcher(&write_config("reimport"))
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(connection.batcher_count(), 2);
        connection.invalidate().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_get_or_create_builds_one_batcher() {
        let (connection, _store) = connected();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let connection = connection.clone();
            handles.push(tokio::spawn(async move {
                connection
                    .get_or_create_insertion_batcher(&write_config("import"))
                    .unwrap()
            }));
        }

        let mut batchers = Vec::new();
        for handle in handles {
            batchers.push(handle.await.unwrap());
        }
        for batcher in &batchers[1..] {
            assert!(Arc::ptr_eq(&batchers[0], batcher));
        }
        assert_eq!(connection.batcher_count(), 1);
        connection.invalidate().await;
    }

    #[tokio::test]
    async fn test_invalidate_notifies_and_drains_every_batcher() {
        let (connection, store) = connected();

        let mut batchers = Vec::new();
        for (i, job) in ["a", "b", "c"].iter().enumerate() {
            let batcher = connection
                .get_or_create_insertion_batcher(&write_config(job))
                .unwrap();
            // Partial batches only: the drain has to flush them.
            for d in 0..=i {
                batcher
                    .insert(format!("/{}/{}.json", job, d), Bytes::from_static(b"{}"))
                    .await
                    .unwrap();
            }
            batchers.push(batcher);
        }

        connection.invalidate().await;

        for batcher in &batchers {
            assert!(batcher.needs_reinitialization());
            assert!(batcher.is_released());
        }
        // 1 + 2 + 3 buffered documents, all acknowledged on drain.
        assert_eq!(store.written_count(), 6);
        assert_eq!(connection.batcher_count(), 0);
        assert!(!connection.is_connected(8010));
    }

    #[tokio::test]
    async fn test_is_connected_probes_port() {
        let (connection, _store) = connected();
        assert!(connection.is_connected(8010));
        assert!(!connection.is_connected(8011));
        connection.invalidate().await;
        assert!(!connection.is_connected(8010));
    }

    #[tokio::test]
    async fn test_released_batcher_leaves_registry() {
        let (connection, _store) = connected();
        let batcher = connection
            .get_or_create_insertion_batcher(&write_config("import"))
            .unwrap();
        assert_eq!(connection.batcher_count(), 1);

        batcher.release().await;
        assert_eq!(connection.batcher_count(), 0);

        // A fresh request after an explicit release builds a new batcher.
        let replacement = connection
            .get_or_create_insertion_batcher(&write_config("import"))
            .unwrap();
        assert!(!Arc::ptr_eq(&batcher, &replacement));
        connection.invalidate().await;
    }

    #[tokio::test]
    async fn test_invalid_transform_is_not_cached() {
        let (connection, _store) = connected();
        let config = WriteConfig {
            server_transform: Some("enrich".to_string()),
            server_transform_params: Some("odd".to_string()),
            ..write_config("import")
        };
        assert!(connection.get_or_create_insertion_batcher(&config).is_err());
        assert_eq!(connection.batcher_count(), 0);
        connection.invalidate().await;
    }
}

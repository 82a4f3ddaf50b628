//! docstore-connect - bulk-write connector for document-oriented stores
//!
//! This crate implements the write path of an integration connector:
//! documents submitted one at a time are buffered and written to the
//! store in size- and time-bounded batches, at bulk-load throughput.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Connection                                                   │
//! │  owns: StoreClient (handle), batcher registry, listeners     │
//! │  ┌──────────────────────┐   ┌──────────────────────┐         │
//! │  │ InsertionBatcher     │   │ InsertionBatcher     │  ...    │
//! │  │  signature A         │   │  signature B         │         │
//! │  │  queue → coordinator │   │  queue → coordinator │         │
//! │  │  worker pool + flush │   │  worker pool + flush │         │
//! │  └──────────┬───────────┘   └──────────┬───────────┘         │
//! └─────────────┼──────────────────────────┼─────────────────────┘
//!               └────────── DocumentStore ─┘
//! ```
//!
//! A write request resolves its [`InsertionBatcher`] through
//! [`Connection::get_or_create_insertion_batcher`]: the write
//! configuration is condensed into a [`BatcherSignature`] and the
//! connection-scoped registry returns the existing batcher or constructs
//! one under the same critical section. `insert()` enqueues without
//! blocking on the network; a background flush task and the batch-size
//! threshold trigger the physical writes. `invalidate()` notifies every
//! batcher, drains them, and releases the client handle last.
//!
//! # Example
//!
//! ```rust,ignore
//! use docstore_connect::prelude::*;
//!
//! let connection = Connection::new(ConnectionConfig {
//!     id: "orders-loader".into(),
//!     host: "store.internal".into(),
//!     port: 8010,
//!     username: "loader".into(),
//!     password: "secret".into(),
//!     ..Default::default()
//! });
//! connection.connect()?;
//!
//! let batcher = connection.get_or_create_insertion_batcher(&WriteConfig {
//!     batch_size: 100,
//!     collections: "orders".into(),
//!     ..Default::default()
//! })?;
//!
//! let ticket = batcher.insert("/orders/1.json", payload).await?;
//! // ... many more inserts ...
//!
//! connection.invalidate().await; // drains every batcher, then releases the client
//! ```

pub mod batcher;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod metadata;
pub mod rest;
pub mod signature;
pub mod testing;
pub mod tls;
pub mod transform;
pub mod types;

pub use batcher::InsertionBatcher;
pub use client::{DocumentStore, DocumentWrite, StoreClient, WriteBatch};
pub use config::{AuthMode, ConnectionConfig, ConnectionMode, WriteConfig};
pub use connection::Connection;
pub use error::{ConnectorError, Result};
pub use metadata::{Capability, DocumentMetadata, Permission};
pub use rest::RestStore;
pub use signature::BatcherSignature;
pub use tls::{TlsOptions, TrustStoreConfig, TrustStoreFormat};
pub use transform::ServerTransform;
pub use types::{JobTicket, SensitiveString};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        AuthMode, BatcherSignature, Capability, Connection, ConnectionConfig, ConnectionMode,
        ConnectorError, DocumentMetadata, DocumentStore, DocumentWrite, InsertionBatcher,
        JobTicket, Permission, Result, SensitiveString, ServerTransform, StoreClient, TlsOptions,
        WriteBatch, WriteConfig,
    };
    pub use crate::testing::MockDocumentStore;
}

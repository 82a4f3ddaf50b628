//! Error types for docstore-connect
//!
//! Errors fall into three tiers: synchronous configuration errors,
//! synchronous connection/auth/TLS errors, and asynchronous batch-write
//! errors. The first two abort the invoking flow; the third is logged by
//! the batcher and never reaches the caller of `insert()`.

use thiserror::Error;

/// Result type alias for connector operations
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Errors raised by the connector
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Configuration validation failed (malformed transform parameters,
    /// invalid batch tuning, missing required TLS material)
    #[error("configuration error: {0}")]
    Config(String),

    /// An operation required a live client handle before `connect()`
    #[error("not connected: {0}")]
    NotConnected(String),

    /// A batcher or connection was used after it was released/invalidated
    #[error("state error: {0}")]
    State(String),

    /// Connection to the document store failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Authentication setup or challenge handling failed
    #[error("authentication error: {0}")]
    Auth(String),

    /// TLS context or trust-store construction failed
    #[error("tls error: {message}")]
    Tls {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The store rejected a batch write
    #[error("store error: {0}")]
    Store(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConnectorError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a not-connected error
    pub fn not_connected(msg: impl Into<String>) -> Self {
        Self::NotConnected(msg.into())
    }

    /// Create a state error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Create a connection error without an underlying cause
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a connection error wrapping an underlying cause
    pub fn connection_with(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Create a TLS error without an underlying cause
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a TLS error wrapping an underlying cause
    pub fn tls_with(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Tls {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Check if this is a synchronous configuration error (tier a)
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::NotConnected(_) | Self::State(_)
        )
    }

    /// Check if this is a synchronous connection-setup error (tier b)
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Auth(_) | Self::Tls { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConnectorError::config("odd number of transform parameters");
        assert_eq!(
            err.to_string(),
            "configuration error: odd number of transform parameters"
        );

        let err = ConnectorError::connection("refused");
        assert_eq!(err.to_string(), "connection error: refused");
    }

    #[test]
    fn test_tier_predicates() {
        assert!(ConnectorError::config("bad").is_config());
        assert!(ConnectorError::not_connected("no client").is_config());
        assert!(ConnectorError::state("released").is_config());
        assert!(!ConnectorError::config("bad").is_connection());

        assert!(ConnectorError::auth("denied").is_connection());
        assert!(ConnectorError::tls("bad trust store").is_connection());
        assert!(ConnectorError::connection("refused").is_connection());
        assert!(!ConnectorError::store("batch rejected").is_connection());
    }

    #[test]
    fn test_connection_source_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ConnectorError::connection_with("error creating store connection", io);
        assert!(std::error::Error::source(&err).is_some());
    }
}

//! Connection and write configuration.
//!
//! All delimited-string parameters (collections, permissions, transform
//! parameters) arrive here exactly as the invoking framework supplies them
//! and are parsed once, at batcher construction, into the structured types
//! in [`crate::metadata`] and [`crate::transform`]. The core never
//! re-parses strings.

use crate::tls::TlsOptions;
use crate::types::SensitiveString;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// How the connector authenticates to the document store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// HTTP basic authentication, sent preemptively
    Basic,
    /// HTTP digest authentication (SHA-256 profile, challenge/response)
    #[default]
    Digest,
    /// TLS client-certificate authentication; requires trust material in
    /// [`TlsOptions`]
    Certificate,
}

/// How requests are routed to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Talk to a single store host directly
    #[default]
    Direct,
    /// Route through a load-balancing gateway; per-host connection
    /// pinning is disabled so requests spread across backends
    Gateway,
}

/// Parameters needed to establish a connection to the store.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, JsonSchema)]
pub struct ConnectionConfig {
    /// Stable identifier for this connection. Part of every batcher
    /// signature and every correlated log line.
    #[validate(length(min = 1, max = 255))]
    pub id: String,

    /// Store hostname
    #[validate(length(min = 1, max = 2048))]
    pub host: String,

    /// Store app-server port
    pub port: u16,

    /// Content database to address. When absent (or the `"null"`
    /// sentinel), the store resolves the database from the port.
    #[serde(default)]
    pub database: Option<String>,

    /// The named user
    #[serde(default)]
    pub username: String,

    /// The named user's password
    #[serde(default = "default_password")]
    pub password: SensitiveString,

    /// Authentication mode
    #[serde(default)]
    pub auth_mode: AuthMode,

    /// Direct vs. gateway-routed connection
    #[serde(default)]
    pub connection_mode: ConnectionMode,

    /// TLS options. Presence switches the client to `https`.
    #[serde(default)]
    pub tls: Option<TlsOptions>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,
}

fn default_password() -> SensitiveString {
    SensitiveString::new("")
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            host: String::new(),
            port: 0,
            database: None,
            username: String::new(),
            password: default_password(),
            auth_mode: AuthMode::default(),
            connection_mode: ConnectionMode::default(),
            tls: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ConnectionConfig {
    /// The database to address, with the empty/`"null"` sentinel resolved
    /// to `None`.
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref().filter(|d| is_defined(d))
    }
}

/// Write parameters and batcher tuning for one insertion stream.
///
/// Two `WriteConfig`s that normalize to the same values share one
/// insertion batcher per connection (see [`crate::BatcherSignature`]).
#[derive(Debug, Clone, Deserialize, Serialize, Validate, JsonSchema)]
pub struct WriteConfig {
    /// Documents accumulated before a physical batch write
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 100_000))]
    pub batch_size: usize,

    /// Concurrent batch writes drained by the worker pool
    #[serde(default = "default_thread_count")]
    #[validate(range(min = 1, max = 128))]
    pub thread_count: usize,

    /// Seconds between periodic flushes of a partial batch. `0` disables
    /// the periodic flush task.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Job name used for log correlation
    #[serde(default = "default_job_name")]
    #[validate(length(min = 1, max = 255))]
    pub job_name: String,

    /// Comma-delimited collection names for inserted documents. Empty or
    /// the `"null"` sentinel means no collections.
    #[serde(default)]
    pub collections: String,

    /// Comma-delimited alternating role,capability pairs granted to
    /// inserted documents (e.g. `"rest-reader,read,rest-writer,update"`).
    /// Unrecognized capability tokens are skipped with a log entry.
    #[serde(default)]
    pub permissions: String,

    /// Search-quality weight assigned to inserted documents
    #[serde(default)]
    pub quality: i32,

    /// Temporal collection for stores with bitemporal document support.
    /// Empty or `"null"` means none.
    #[serde(default)]
    pub temporal_collection: Option<String>,

    /// Name of a server-side transform applied before persistence.
    /// Empty or `"null"` means none.
    #[serde(default)]
    pub server_transform: Option<String>,

    /// Delimited alternating key,value parameter tokens for the server
    /// transform. An odd number of tokens is a configuration error.
    #[serde(default)]
    pub server_transform_params: Option<String>,

    /// Delimiter for `server_transform_params`
    #[serde(default = "default_transform_param_delimiter")]
    pub server_transform_param_delimiter: String,

    /// Prefix for composed document URIs
    #[serde(default)]
    pub uri_prefix: String,

    /// Suffix for composed document URIs
    #[serde(default)]
    pub uri_suffix: String,

    /// Insert a generated UUID between prefix and suffix when composing
    /// document URIs
    #[serde(default = "default_generate_uri_id")]
    pub generate_uri_id: bool,
}

fn default_batch_size() -> usize {
    100
}

fn default_thread_count() -> usize {
    4
}

fn default_flush_interval_secs() -> u64 {
    2
}

fn default_job_name() -> String {
    "import".to_string()
}

fn default_transform_param_delimiter() -> String {
    ",".to_string()
}

fn default_generate_uri_id() -> bool {
    true
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            thread_count: default_thread_count(),
            flush_interval_secs: default_flush_interval_secs(),
            job_name: default_job_name(),
            collections: String::new(),
            permissions: String::new(),
            quality: 0,
            temporal_collection: None,
            server_transform: None,
            server_transform_params: None,
            server_transform_param_delimiter: default_transform_param_delimiter(),
            uri_prefix: String::new(),
            uri_suffix: String::new(),
            generate_uri_id: default_generate_uri_id(),
        }
    }
}

impl WriteConfig {
    /// Compose a document URI from the configured prefix, optional
    /// generated UUID, and suffix.
    pub fn compose_uri(&self) -> String {
        let mut uri = String::with_capacity(self.uri_prefix.len() + self.uri_suffix.len() + 36);
        uri.push_str(&self.uri_prefix);
        if self.generate_uri_id {
            uri.push_str(&uuid::Uuid::new_v4().to_string());
        }
        uri.push_str(&self.uri_suffix);
        uri
    }

    /// The temporal collection, with the empty/`"null"` sentinel resolved
    /// to `None`.
    pub fn temporal_collection(&self) -> Option<&str> {
        self.temporal_collection.as_deref().filter(|t| is_defined(t))
    }

    /// The server transform name, with the empty/`"null"` sentinel
    /// resolved to `None`.
    pub fn server_transform(&self) -> Option<&str> {
        self.server_transform.as_deref().filter(|t| is_defined(t))
    }
}

/// `true` when a framework-supplied string carries a real value rather
/// than the empty/whitespace/`"null"` placeholder.
pub(crate) fn is_defined(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("null")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_config_defaults() {
        let config = WriteConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.thread_count, 4);
        assert_eq!(config.flush_interval_secs, 2);
        assert_eq!(config.job_name, "import");
        assert!(config.generate_uri_id);
    }

    #[test]
    fn test_write_config_validation() {
        let config = WriteConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = WriteConfig {
            thread_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        assert!(WriteConfig::default().validate().is_ok());
    }

    #[test]
    fn test_is_defined() {
        assert!(is_defined("documents"));
        assert!(!is_defined(""));
        assert!(!is_defined("   "));
        assert!(!is_defined("null"));
        assert!(!is_defined("NULL"));
        assert!(!is_defined(" null "));
    }

    #[test]
    fn test_sentinel_accessors() {
        let config = WriteConfig {
            temporal_collection: Some("null".to_string()),
            server_transform: Some("enrich".to_string()),
            ..Default::default()
        };
        assert_eq!(config.temporal_collection(), None);
        assert_eq!(config.server_transform(), Some("enrich"));

        let connection = ConnectionConfig {
            database: Some("null".to_string()),
            ..Default::default()
        };
        assert_eq!(connection.database(), None);
    }

    #[test]
    fn test_compose_uri() {
        let config = WriteConfig {
            uri_prefix: "/orders/".to_string(),
            uri_suffix: ".json".to_string(),
            generate_uri_id: true,
            ..Default::default()
        };
        let uri = config.compose_uri();
        assert!(uri.starts_with("/orders/"));
        assert!(uri.ends_with(".json"));
        assert_ne!(config.compose_uri(), config.compose_uri());

        let fixed = WriteConfig {
            uri_prefix: "/exact/doc.json".to_string(),
            generate_uri_id: false,
            ..Default::default()
        };
        assert_eq!(fixed.compose_uri(), "/exact/doc.json");
    }

    #[test]
    fn test_connection_config_deserialize() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{"id":"testConfig-223efe","host":"localhost","port":8010,
                "username":"admin","password":"admin","auth_mode":"digest"}"#,
        )
        .unwrap();
        assert_eq!(config.port, 8010);
        assert_eq!(config.auth_mode, AuthMode::Digest);
        assert_eq!(config.connection_mode, ConnectionMode::Direct);
        assert!(config.validate().is_ok());
    }
}

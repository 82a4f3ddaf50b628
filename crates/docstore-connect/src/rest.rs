//! REST transport for the document store.
//!
//! One bulk endpoint, one round trip per batch. Authentication is
//! selected at `connect()`: basic credentials are attached preemptively
//! as a default header; digest uses the RFC 7616 SHA-256 profile
//! (challenge, then one authenticated retry); certificate mode attaches a
//! TLS client identity. MD5-only digest challenges are rejected — there
//! is no MD5 in this crate's stack, and stores this connector targets
//! all offer the SHA-256 profile.

use crate::client::{DocumentStore, WriteBatch};
use crate::config::{AuthMode, ConnectionConfig, ConnectionMode};
use crate::error::{ConnectorError, Result};
use crate::tls;
use crate::types::SensitiveString;
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Bulk-write path on the store's REST surface.
const BULK_DOCUMENTS_PATH: &str = "/v1/documents/bulk";

enum AuthState {
    /// Credentials already attached to every request (basic, certificate)
    Preemptive,
    /// Digest challenge/response, negotiated on first 401
    Digest {
        username: String,
        password: SensitiveString,
        nonce_count: AtomicU64,
    },
}

/// reqwest-backed [`DocumentStore`].
pub struct RestStore {
    http: reqwest::Client,
    base_url: String,
    database: Option<String>,
    auth: AuthState,
}

impl RestStore {
    /// Build the transport from connection parameters.
    ///
    /// Fails fast when trust material cannot be loaded, when certificate
    /// auth lacks a client identity, or when the HTTP client cannot be
    /// constructed. No network traffic happens here.
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs));

        if let Some(options) = &config.tls {
            let material = tls::load_trust_material(options)?;
            for root in material.roots {
                builder = builder.add_root_certificate(root);
            }
            match material.identity {
                Some(identity) => builder = builder.identity(identity),
                None if config.auth_mode == AuthMode::Certificate => {
                    return Err(ConnectorError::auth(
                        "certificate authentication requires tls.client_identity",
                    ));
                }
                None => {}
            }
            if options.accept_invalid_certs {
                builder = builder.danger_accept_invalid_certs(true);
            }
        } else if config.auth_mode == AuthMode::Certificate {
            return Err(ConnectorError::auth(
                "certificate authentication requires tls options",
            ));
        }

        let auth = match config.auth_mode {
            AuthMode::Basic => {
                let credentials = format!(
                    "{}:{}",
                    config.username,
                    config.password.expose_secret()
                );
                let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
                let mut value = HeaderValue::from_str(&format!("Basic {}", encoded))
                    .map_err(|e| ConnectorError::auth(format!("invalid credentials: {}", e)))?;
                value.set_sensitive(true);

                let mut headers = HeaderMap::new();
                headers.insert(AUTHORIZATION, value);
                builder = builder.default_headers(headers);
                AuthState::Preemptive
            }
            AuthMode::Digest => AuthState::Digest {
                username: config.username.clone(),
                password: config.password.clone(),
                nonce_count: AtomicU64::new(0),
            },
            AuthMode::Certificate => AuthState::Preemptive,
        };

        if config.connection_mode == ConnectionMode::Gateway {
            // Requests behind a load balancer must not pin one backend.
            builder = builder.pool_max_idle_per_host(0);
        }

        let http = builder.build().map_err(|e| {
            ConnectorError::connection_with("error building store HTTP client", e)
        })?;

        let scheme = if config.tls.is_some() { "https" } else { "http" };
        Ok(Self {
            http,
            base_url: format!("{}://{}:{}", scheme, config.host, config.port),
            database: config.database().map(str::to_string),
            auth,
        })
    }
}

#[async_trait]
impl DocumentStore for RestStore {
    async fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        let url = format!("{}{}", self.base_url, BULK_DOCUMENTS_PATH);
        let body = BulkWriteRequest::from_batch(batch);

        let request = || {
            let mut req = self.http.post(&url).json(&body);
            if let Some(database) = &self.database {
                req = req.query(&[("database", database.as_str())]);
            }
            req
        };

        let response = request()
            .send()
            .await
            .map_err(|e| ConnectorError::connection_with("bulk write request failed", e))?;

        let response = match (&self.auth, response.status()) {
            (
                AuthState::Digest {
                    username,
                    password,
                    nonce_count,
                },
                StatusCode::UNAUTHORIZED,
            ) => {
                let challenge = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        ConnectorError::auth("store returned 401 without a digest challenge")
                    })?;
                let nc = nonce_count.fetch_add(1, Ordering::Relaxed) + 1;
                let authorization = build_digest_authorization(
                    challenge,
                    username,
                    password.expose_secret(),
                    "POST",
                    BULK_DOCUMENTS_PATH,
                    nc,
                )?;
                debug!("answering digest challenge");
                request()
                    .header(AUTHORIZATION, authorization)
                    .send()
                    .await
                    .map_err(|e| {
                        ConnectorError::connection_with("authenticated bulk write failed", e)
                    })?
            }
            _ => response,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ConnectorError::auth(
                format!("store rejected credentials ({}): {}", status, detail),
            )),
            _ => Err(ConnectorError::store(format!(
                "bulk write rejected ({}): {}",
                status, detail
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Bulk payload
// ─────────────────────────────────────────────────────────────────

fn slice_is_empty<T>(slice: &&[T]) -> bool {
    slice.is_empty()
}

#[derive(Serialize)]
struct BulkWriteRequest<'a> {
    documents: Vec<BulkDocument<'a>>,
    #[serde(skip_serializing_if = "slice_is_empty")]
    collections: &'a [String],
    #[serde(skip_serializing_if = "slice_is_empty")]
    permissions: &'a [crate::metadata::Permission],
    quality: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    transform: Option<TransformSpec<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temporal_collection: Option<&'a str>,
}

#[derive(Serialize)]
struct BulkDocument<'a> {
    uri: &'a str,
    /// Base64-encoded raw content
    content: String,
}

#[derive(Serialize)]
struct TransformSpec<'a> {
    name: &'a str,
    params: serde_json::Map<String, serde_json::Value>,
}

impl<'a> BulkWriteRequest<'a> {
    fn from_batch(batch: &'a WriteBatch) -> Self {
        let documents = batch
            .documents
            .iter()
            .map(|d| BulkDocument {
                uri: &d.uri,
                content: base64::engine::general_purpose::STANDARD.encode(&d.content),
            })
            .collect();

        let transform = batch.transform.as_ref().map(|t| TransformSpec {
            name: t.name(),
            params: t
                .params()
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        });

        Self {
            documents,
            collections: &batch.metadata.collections,
            permissions: &batch.metadata.permissions,
            quality: batch.metadata.quality,
            transform,
            temporal_collection: batch.temporal_collection.as_deref(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Digest authentication (RFC 7616, SHA-256 profile)
// ─────────────────────────────────────────────────────────────────

/// Parse a `WWW-Authenticate: Digest ...` challenge into its parameters.
fn parse_digest_challenge(header: &str) -> Option<Vec<(String, String)>> {
    let rest = header.trim().strip_prefix("Digest ")?;
    let mut params = Vec::new();
    let mut chars = rest.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }
        let mut key = String::new();
        while matches!(chars.peek(), Some(c) if *c != '=') {
            key.push(chars.next()?);
        }
        if chars.next() != Some('=') {
            break;
        }
        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                value.push(c);
            }
        } else {
            while matches!(chars.peek(), Some(c) if *c != ',') {
                value.push(chars.next()?);
            }
        }
        params.push((key.trim().to_ascii_lowercase(), value));
        if chars.peek().is_none() {
            break;
        }
    }

    if params.is_empty() {
        None
    } else {
        Some(params)
    }
}

fn h(input: &str) -> String {
    to_hex(&Sha256::digest(input.as_bytes()))
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Answer a digest challenge with an `Authorization` header value.
fn build_digest_authorization(
    challenge: &str,
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    nonce_count: u64,
) -> Result<String> {
    let params = parse_digest_challenge(challenge)
        .ok_or_else(|| ConnectorError::auth("malformed digest challenge"))?;
    let get = |key: &str| {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };

    let algorithm = get("algorithm").unwrap_or("MD5");
    if !algorithm.eq_ignore_ascii_case("SHA-256") {
        return Err(ConnectorError::auth(format!(
            "digest algorithm '{}' not supported; this connector only speaks SHA-256",
            algorithm
        )));
    }

    let realm = get("realm").unwrap_or_default().to_string();
    let nonce = get("nonce")
        .ok_or_else(|| ConnectorError::auth("digest challenge missing nonce"))?
        .to_string();
    let qop = get("qop").map(|q| q.contains("auth")).unwrap_or(false);

    let cnonce = {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        format!("{:x}{:x}", std::process::id(), nanos)
    };

    let ha1 = h(&format!("{}:{}:{}", username, realm, password));
    let ha2 = h(&format!("{}:{}", method, uri));
    let nc = format!("{:08x}", nonce_count);

    let response = if qop {
        h(&format!(
            "{}:{}:{}:{}:auth:{}",
            ha1, nonce, nc, cnonce, ha2
        ))
    } else {
        h(&format!("{}:{}:{}", ha1, nonce, ha2))
    };

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", \
         algorithm=SHA-256, response=\"{}\"",
        username, realm, nonce, uri, response
    );
    if qop {
        header.push_str(&format!(", qop=auth, nc={}, cnonce=\"{}\"", nc, cnonce));
    }
    if let Some(opaque) = get("opaque") {
        header.push_str(&format!(", opaque=\"{}\"", opaque));
    }
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::{TlsOptions, TrustStoreConfig, TrustStoreFormat};
    use std::path::PathBuf;

    #[test]
    fn test_parse_digest_challenge() {
        let header = "Digest realm=\"store@example.org\", qop=\"auth\", \
                      algorithm=SHA-256, nonce=\"abc123\", opaque=\"xyz\"";
        let params = parse_digest_challenge(header).unwrap();
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("realm"), Some("store@example.org"));
        assert_eq!(get("qop"), Some("auth"));
        assert_eq!(get("algorithm"), Some("SHA-256"));
        assert_eq!(get("nonce"), Some("abc123"));
        assert_eq!(get("opaque"), Some("xyz"));

        assert!(parse_digest_challenge("Bearer xyz").is_none());
    }

    #[test]
    fn test_digest_authorization_structure() {
        let challenge =
            "Digest realm=\"store\", qop=\"auth\", algorithm=SHA-256, nonce=\"n1\"";
        let header =
            build_digest_authorization(challenge, "admin", "admin", "POST", "/v1/x", 1).unwrap();
        assert!(header.starts_with("Digest username=\"admin\""));
        assert!(header.contains("realm=\"store\""));
        assert!(header.contains("nonce=\"n1\""));
        assert!(header.contains("uri=\"/v1/x\""));
        assert!(header.contains("algorithm=SHA-256"));
        assert!(header.contains("nc=00000001"));

        let response = header
            .split("response=\"")
            .nth(1)
            .and_then(|s| s.split('"').next())
            .unwrap();
        assert_eq!(response.len(), 64);
        assert!(response.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_md5_challenge_rejected() {
        let challenge = "Digest realm=\"store\", nonce=\"n1\", algorithm=MD5";
        let err =
            build_digest_authorization(challenge, "admin", "admin", "POST", "/v1/x", 1)
                .unwrap_err();
        assert!(matches!(err, ConnectorError::Auth(_)));

        // Absent algorithm defaults to MD5 per the RFC, also rejected.
        let challenge = "Digest realm=\"store\", nonce=\"n1\"";
        assert!(
            build_digest_authorization(challenge, "admin", "admin", "POST", "/v1/x", 1).is_err()
        );
    }

    #[test]
    fn test_connect_basic() {
        let config = ConnectionConfig {
            id: "test".to_string(),
            host: "localhost".to_string(),
            port: 8010,
            username: "admin".to_string(),
            password: "admin".into(),
            auth_mode: AuthMode::Basic,
            ..Default::default()
        };
        let store = RestStore::connect(&config).unwrap();
        assert_eq!(store.base_url, "http://localhost:8010");
        assert!(matches!(store.auth, AuthState::Preemptive));
    }

    #[test]
    fn test_connect_certificate_without_identity_fails() {
        let config = ConnectionConfig {
            id: "test".to_string(),
            host: "localhost".to_string(),
            port: 8010,
            auth_mode: AuthMode::Certificate,
            tls: Some(TlsOptions::default()),
            ..Default::default()
        };
        assert!(matches!(
            RestStore::connect(&config),
            Err(ConnectorError::Auth(_))
        ));

        let config = ConnectionConfig {
            auth_mode: AuthMode::Certificate,
            tls: None,
            ..config
        };
        assert!(matches!(
            RestStore::connect(&config),
            Err(ConnectorError::Auth(_))
        ));
    }

    #[test]
    fn test_connect_bad_trust_store_fails_fast() {
        let config = ConnectionConfig {
            id: "test".to_string(),
            host: "localhost".to_string(),
            port: 8010,
            tls: Some(TlsOptions {
                trust_store: Some(TrustStoreConfig {
                    path: PathBuf::from("/nonexistent/roots.pem"),
                    format: TrustStoreFormat::Pem,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            RestStore::connect(&config),
            Err(ConnectorError::Tls { .. })
        ));
    }
}

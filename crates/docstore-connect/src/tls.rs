//! TLS trust material for store connections.
//!
//! The connector only assembles trust material (root certificates and an
//! optional client identity); the handshake itself belongs to the HTTP
//! transport. Loading fails fast: a trust store that cannot be read or
//! parsed aborts `connect()` before any client is built.

use crate::error::{ConnectorError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk encoding of a trust store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TrustStoreFormat {
    /// PEM bundle, possibly holding several root certificates
    #[default]
    Pem,
    /// A single DER-encoded certificate
    Der,
}

/// A file of trusted root certificates.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct TrustStoreConfig {
    /// Path to the trust store file
    pub path: PathBuf,

    /// Encoding of the file
    #[serde(default)]
    pub format: TrustStoreFormat,
}

/// TLS options for a connection.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct TlsOptions {
    /// Trusted roots used to verify the store's certificate. When absent,
    /// the platform's root set is used.
    #[serde(default)]
    pub trust_store: Option<TrustStoreConfig>,

    /// PEM bundle holding the client certificate and private key.
    /// Required for [`crate::AuthMode::Certificate`].
    #[serde(default)]
    pub client_identity: Option<PathBuf>,

    /// Accept certificates that fail verification. Testing only.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Trust material loaded from [`TlsOptions`], ready to hand to the HTTP
/// client builder.
#[derive(Debug)]
pub struct TrustMaterial {
    /// Root certificates to add to the verifier
    pub roots: Vec<reqwest::Certificate>,
    /// Client identity for certificate authentication
    pub identity: Option<reqwest::Identity>,
}

/// Load root certificates and the optional client identity.
///
/// Every failure is surfaced as [`ConnectorError::Tls`] with the offending
/// path in the message.
pub fn load_trust_material(options: &TlsOptions) -> Result<TrustMaterial> {
    let mut roots = Vec::new();

    if let Some(store) = &options.trust_store {
        let bytes = read_tls_file(&store.path)?;
        match store.format {
            TrustStoreFormat::Pem => {
                let certs = reqwest::Certificate::from_pem_bundle(&bytes).map_err(|e| {
                    ConnectorError::tls_with(
                        format!("invalid PEM trust store {}", store.path.display()),
                        e,
                    )
                })?;
                if certs.is_empty() {
                    return Err(ConnectorError::tls(format!(
                        "trust store {} contains no certificates",
                        store.path.display()
                    )));
                }
                debug!(
                    path = %store.path.display(),
                    certs = certs.len(),
                    "loaded trust store"
                );
                roots.extend(certs);
            }
            TrustStoreFormat::Der => {
                let cert = reqwest::Certificate::from_der(&bytes).map_err(|e| {
                    ConnectorError::tls_with(
                        format!("invalid DER trust store {}", store.path.display()),
                        e,
                    )
                })?;
                roots.push(cert);
            }
        }
    }

    let identity = match &options.client_identity {
        Some(path) => {
            let bytes = read_tls_file(path)?;
            Some(reqwest::Identity::from_pem(&bytes).map_err(|e| {
                ConnectorError::tls_with(
                    format!("invalid client identity {}", path.display()),
                    e,
                )
            })?)
        }
        None => None,
    };

    Ok(TrustMaterial { roots, identity })
}

fn read_tls_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        ConnectorError::tls_with(format!("cannot read trust material {}", path.display()), e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_trust_store_fails_fast() {
        let options = TlsOptions {
            trust_store: Some(TrustStoreConfig {
                path: PathBuf::from("/nonexistent/truststore.pem"),
                format: TrustStoreFormat::Pem,
            }),
            ..Default::default()
        };
        let err = load_trust_material(&options).unwrap_err();
        assert!(matches!(err, ConnectorError::Tls { .. }));
        assert!(err.to_string().contains("/nonexistent/truststore.pem"));
    }

    #[test]
    fn test_garbage_pem_rejected() {
        let dir = std::env::temp_dir();
        let path = dir.join("docstore-connect-test-garbage.pem");
        std::fs::write(&path, b"not a certificate").unwrap();

        let options = TlsOptions {
            trust_store: Some(TrustStoreConfig {
                path: path.clone(),
                format: TrustStoreFormat::Pem,
            }),
            ..Default::default()
        };
        let result = load_trust_material(&options);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ConnectorError::Tls { .. })));
    }

    #[test]
    fn test_empty_options_load_nothing() {
        let material = load_trust_material(&TlsOptions::default()).unwrap();
        assert!(material.roots.is_empty());
        assert!(material.identity.is_none());
    }
}

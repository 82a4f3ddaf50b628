//! Batcher signatures.
//!
//! A signature summarizes one write configuration as a fully-comparable
//! composite key. Two configurations that normalize to the same tuple map
//! to the same insertion batcher on a given connection; any differing
//! field yields a different key. Because the key is the tuple itself and
//! not a narrow hash of it, distinct configurations can never silently
//! share a batcher.

use crate::config::{is_defined, WriteConfig};
use crate::metadata::parse_collections;

/// Composite cache key for one insertion-batcher configuration.
///
/// Derived `Eq`/`Hash` over the normalized tuple make this usable
/// directly as the registry's map key. [`BatcherSignature::digest`]
/// renders a short stable form for log correlation only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatcherSignature {
    connection_id: String,
    batch_size: usize,
    thread_count: usize,
    flush_interval_secs: u64,
    collections: Vec<String>,
    permissions: Vec<(String, String)>,
    quality: i32,
    job_name: String,
    temporal_collection: Option<String>,
    transform_name: Option<String>,
    transform_params: Vec<(String, String)>,
}

impl BatcherSignature {
    /// Compute the signature of a write configuration on a connection.
    ///
    /// Normalization: collections are trimmed, de-sentineled, and sorted
    /// (grant order is irrelevant to identity); permission tokens are
    /// trimmed with the capability lowercased; transform parameters keep
    /// their order. This function never fails — a malformed transform
    /// parameter list is caught by construction before anything is
    /// cached.
    pub fn compute(connection_id: &str, config: &WriteConfig) -> Self {
        let mut collections = parse_collections(&config.collections);
        collections.sort_unstable();

        Self {
            connection_id: connection_id.to_string(),
            batch_size: config.batch_size,
            thread_count: config.thread_count,
            flush_interval_secs: config.flush_interval_secs,
            collections,
            permissions: normalize_pairs(&config.permissions, ","),
            quality: config.quality,
            job_name: config.job_name.clone(),
            temporal_collection: config.temporal_collection().map(str::to_string),
            transform_name: config.server_transform().map(str::to_string),
            transform_params: config
                .server_transform_params
                .as_deref()
                .map(|raw| normalize_pairs(raw, &config.server_transform_param_delimiter))
                .unwrap_or_default(),
        }
    }

    /// Connection the signature is scoped to
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Job name carried by the configuration
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Short stable digest for log correlation. Not a cache key: the
    /// registry compares full signatures.
    pub fn digest(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        let mut eat = |bytes: &[u8]| {
            for &b in bytes {
                h ^= b as u64;
                h = h.wrapping_mul(0x0100_0000_01b3);
            }
            h ^= 0x1f;
            h = h.wrapping_mul(0x0100_0000_01b3);
        };

        eat(self.connection_id.as_bytes());
        eat(&self.batch_size.to_le_bytes());
        eat(&self.thread_count.to_le_bytes());
        eat(&self.flush_interval_secs.to_le_bytes());
        for c in &self.collections {
            eat(c.as_bytes());
        }
        for (role, capability) in &self.permissions {
            eat(role.as_bytes());
            eat(capability.as_bytes());
        }
        eat(&self.quality.to_le_bytes());
        eat(self.job_name.as_bytes());
        if let Some(t) = &self.temporal_collection {
            eat(t.as_bytes());
        }
        if let Some(t) = &self.transform_name {
            eat(t.as_bytes());
        }
        for (k, v) in &self.transform_params {
            eat(k.as_bytes());
            eat(v.as_bytes());
        }
        h
    }
}

impl std::fmt::Display for BatcherSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.digest())
    }
}

/// Split a delimited token list into trimmed (first, second-lowercased)
/// pairs. A trailing unpaired token is dropped, matching the parse-time
/// skip; whether the tokens are *valid* is not this function's concern.
fn normalize_pairs(raw: &str, delimiter: &str) -> Vec<(String, String)> {
    if !is_defined(raw) {
        return Vec::new();
    }
    let tokens: Vec<&str> = raw.split(delimiter).map(str::trim).collect();
    tokens
        .chunks_exact(2)
        .map(|pair| (pair[0].to_string(), pair[1].to_ascii_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> WriteConfig {
        WriteConfig {
            batch_size: 50,
            thread_count: 4,
            flush_interval_secs: 2,
            job_name: "import".to_string(),
            collections: "invoices,archive".to_string(),
            permissions: "rest-reader,read,rest-writer,update".to_string(),
            quality: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_identical_configs_identical_signatures() {
        let a = BatcherSignature::compute("conn-1", &base_config());
        let b = BatcherSignature::compute("conn-1", &base_config());
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_each_field_changes_signature() {
        let base = BatcherSignature::compute("conn-1", &base_config());

        let changed = [
            WriteConfig {
                batch_size: 51,
                ..base_config()
            },
            WriteConfig {
                thread_count: 5,
                ..base_config()
            },
            WriteConfig {
                flush_interval_secs: 3,
                ..base_config()
            },
            WriteConfig {
                job_name: "other-job".to_string(),
                ..base_config()
            },
            WriteConfig {
                collections: "invoices".to_string(),
                ..base_config()
            },
            WriteConfig {
                permissions: "rest-reader,read".to_string(),
                ..base_config()
            },
            WriteConfig {
                quality: 2,
                ..base_config()
            },
            WriteConfig {
                temporal_collection: Some("bitemporal".to_string()),
                ..base_config()
            },
            WriteConfig {
                server_transform: Some("enrich".to_string()),
                ..base_config()
            },
        ];
        for config in &changed {
            assert_ne!(base, BatcherSignature::compute("conn-1", config));
        }

        assert_ne!(base, BatcherSignature::compute("conn-2", &base_config()));
    }

    #[test]
    fn test_collection_order_is_normalized() {
        let a = BatcherSignature::compute(
            "conn-1",
            &WriteConfig {
                collections: "archive,invoices".to_string(),
                ..base_config()
            },
        );
        let b = BatcherSignature::compute("conn-1", &base_config());
        assert_eq!(a, b);
    }

    #[test]
    fn test_sentinels_normalize_to_none() {
        let a = BatcherSignature::compute(
            "conn-1",
            &WriteConfig {
                temporal_collection: Some("null".to_string()),
                ..base_config()
            },
        );
        let b = BatcherSignature::compute(
            "conn-1",
            &WriteConfig {
                temporal_collection: None,
                ..base_config()
            },
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_display_is_stable_hex() {
        let sig = BatcherSignature::compute("conn-1", &base_config());
        let rendered = sig.to_string();
        assert_eq!(rendered.len(), 16);
        assert_eq!(rendered, sig.to_string());
    }
}

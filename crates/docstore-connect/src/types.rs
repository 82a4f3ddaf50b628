//! Common types shared across the connector.

use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A string that must never appear in logs or config dumps.
///
/// Wraps `secrecy::SecretString`: `Debug`/`Display` render `[REDACTED]`,
/// serialization emits `"***REDACTED***"`, and the actual value is only
/// reachable through [`SensitiveString::expose_secret`].
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Wrap a string-like value
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    /// Expose the secret value. Use only at the authentication boundary.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

impl JsonSchema for SensitiveString {
    fn schema_name() -> String {
        "SensitiveString".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        let mut schema = gen.subschema_for::<String>();
        if let schemars::schema::Schema::Object(obj) = &mut schema {
            obj.format = Some("password".to_string());
        }
        schema
    }
}

/// Opaque handle to a running batch job.
///
/// Returned by every `insert()` so callers can correlate log lines with a
/// job; also used to request the job's stop. Carries no document-level
/// state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTicket {
    job_id: String,
    job_name: String,
}

impl JobTicket {
    /// Mint a ticket for a newly started batch job.
    pub(crate) fn new(job_name: impl Into<String>) -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros();
        Self {
            job_id: format!("docstore-{}-{}", std::process::id(), micros),
            job_name: job_name.into(),
        }
    }

    /// Unique identifier of the running job
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Caller-supplied job name used for correlation
    pub fn job_name(&self) -> &str {
        &self.job_name
    }
}

impl std::fmt::Display for JobTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.job_id)
    }
}

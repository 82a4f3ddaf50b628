//! Server-side transforms.
//!
//! A transform is applied by the store itself before a document is
//! persisted. The connector validates the transform configuration at
//! batcher construction, before the batcher is cached or any write
//! occurs; a malformed parameter list never accepts a document.

use crate::config::WriteConfig;
use crate::error::{ConnectorError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A named, parameterized transformation the store applies to content
/// before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct ServerTransform {
    name: String,
    params: Vec<(String, String)>,
}

impl ServerTransform {
    /// Build a transform from a name and a delimited alternating
    /// key,value token list.
    ///
    /// An odd number of tokens is a configuration error: every key needs
    /// a value.
    pub fn from_delimited(name: &str, params: Option<&str>, delimiter: &str) -> Result<Self> {
        let mut parsed = Vec::new();
        if let Some(raw) = params.map(str::trim).filter(|p| !p.is_empty()) {
            let tokens: Vec<&str> = raw.split(delimiter).map(str::trim).collect();
            if tokens.len() % 2 != 0 {
                return Err(ConnectorError::config(format!(
                    "server transform '{}' has an odd number of parameter tokens ({}); \
                     parameters must be {}-delimited key,value pairs",
                    name,
                    tokens.len(),
                    delimiter
                )));
            }
            parsed.reserve(tokens.len() / 2);
            for pair in tokens.chunks_exact(2) {
                parsed.push((pair[0].to_string(), pair[1].to_string()));
            }
        }
        Ok(Self {
            name: name.to_string(),
            params: parsed,
        })
    }

    /// Resolve the optional transform of a [`WriteConfig`], validating
    /// its parameter list.
    pub fn from_write_config(config: &WriteConfig) -> Result<Option<Self>> {
        match config.server_transform() {
            Some(name) => Ok(Some(Self::from_delimited(
                name,
                config.server_transform_params.as_deref(),
                &config.server_transform_param_delimiter,
            )?)),
            None => Ok(None),
        }
    }

    /// Transform name as registered on the store
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered key/value parameters
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

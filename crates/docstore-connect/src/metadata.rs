//! Document metadata templates.
//!
//! A batcher builds its metadata template exactly once, at construction,
//! from the delimited strings the invoking framework supplies. The same
//! template is attached to every document the batcher inserts.

use crate::config::is_defined;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A capability granted to a role on inserted documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Read,
    Insert,
    Update,
    Execute,
    NodeUpdate,
}

impl Capability {
    /// Parse a capability token. Unknown tokens yield `None`; the caller
    /// decides whether that is a skip or an error.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "read" => Some(Self::Read),
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "execute" => Some(Self::Execute),
            "node_update" => Some(Self::NodeUpdate),
            _ => None,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Execute => write!(f, "execute"),
            Self::NodeUpdate => write!(f, "node_update"),
        }
    }
}

/// One role/capability grant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Permission {
    pub role: String,
    pub capability: Capability,
}

/// The metadata attached to every document a batcher inserts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct DocumentMetadata {
    /// Collections new documents are put into
    pub collections: Vec<String>,
    /// Permissions new documents are granted
    pub permissions: Vec<Permission>,
    /// Search-quality weight new documents carry
    pub quality: i32,
}

impl DocumentMetadata {
    /// Build a template from the framework's delimited strings.
    ///
    /// Collections: comma-delimited; empty or the `"null"` sentinel means
    /// no collections. Permissions: comma-delimited alternating
    /// role,capability tokens; an unrecognized capability is skipped with
    /// a log entry, and a trailing unpaired role token is likewise
    /// skipped. Neither is an error.
    pub fn from_delimited(collections: &str, permissions: &str, quality: i32) -> Self {
        Self {
            collections: parse_collections(collections),
            permissions: parse_permissions(permissions),
            quality,
        }
    }
}

/// Parse a comma-delimited collection list, honoring the `"null"` sentinel.
pub(crate) fn parse_collections(raw: &str) -> Vec<String> {
    if !is_defined(raw) {
        return Vec::new();
    }
    raw.split(',')
        .map(str::trim)
        .filter(|c| is_defined(c))
        .map(str::to_string)
        .collect()
}

/// Parse comma-delimited alternating role,capability pairs.
pub(crate) fn parse_permissions(raw: &str) -> Vec<Permission> {
    if !is_defined(raw) {
        return Vec::new();
    }
    let tokens: Vec<&str> = raw.split(',').map(str::trim).collect();
    let mut permissions = Vec::with_capacity(tokens.len() / 2);

    for pair in tokens.chunks(2) {
        match pair {
            [role, capability] => match Capability::parse(capability) {
                Some(capability) => permissions.push(Permission {
                    role: role.to_string(),
                    capability,
                }),
                None => {
                    warn!(
                        role,
                        capability, "unrecognized capability token, permission skipped"
                    );
                }
            },
            [role] => {
                warn!(role, "trailing unpaired permission token skipped");
            }
            _ => unreachable!("chunks(2) yields 1- or 2-element slices"),
        }
    }

    permissions
}

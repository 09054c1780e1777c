//! Edge types - relationships between graph nodes
//!
//! Structural edges:
//! - `Contains`: repository → file, class → method
//! - `Declares`: file → function / variable / class
//! - `Imports` / `Exports`: file → import / export declarations
//! - `Extends`: class → class
//!
//! Behavioural edges:
//! - `Calls`: function → function (possibly unresolved or dynamic)
//! - `Reads` / `Writes`: function → variable

use crate::identity::{BusinessKey, Reference};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Closed set of edge types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EdgeKind {
    Contains,
    Declares,
    Calls,
    Reads,
    Writes,
    Imports,
    Exports,
    Extends,
}

impl EdgeKind {
    /// Get the string representation of the edge kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Contains => "CONTAINS",
            EdgeKind::Declares => "DECLARES",
            EdgeKind::Calls => "CALLS",
            EdgeKind::Reads => "READS",
            EdgeKind::Writes => "WRITES",
            EdgeKind::Imports => "IMPORTS",
            EdgeKind::Exports => "EXPORTS",
            EdgeKind::Extends => "EXTENDS",
        }
    }

    /// Get all edge kinds
    pub fn all() -> &'static [EdgeKind] {
        &[
            EdgeKind::Contains,
            EdgeKind::Declares,
            EdgeKind::Calls,
            EdgeKind::Reads,
            EdgeKind::Writes,
            EdgeKind::Imports,
            EdgeKind::Exports,
            EdgeKind::Extends,
        ]
    }

    /// Whether this edge kind describes access to a variable
    pub fn is_data_access(&self) -> bool {
        matches!(self, EdgeKind::Reads | EdgeKind::Writes)
    }

    /// Edge kinds whose target may legitimately be unknown at extraction time
    pub fn allows_unresolved_target(&self) -> bool {
        matches!(self, EdgeKind::Calls | EdgeKind::Imports | EdgeKind::Extends)
    }
}

impl FromStr for EdgeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "contains" | "contain" => Ok(EdgeKind::Contains),
            "declares" | "declare" => Ok(EdgeKind::Declares),
            "calls" | "call" => Ok(EdgeKind::Calls),
            "reads" | "read" => Ok(EdgeKind::Reads),
            "writes" | "write" => Ok(EdgeKind::Writes),
            "imports" | "import" => Ok(EdgeKind::Imports),
            "exports" | "export" => Ok(EdgeKind::Exports),
            "extends" | "extend" | "inherits" => Ok(EdgeKind::Extends),
            _ => Err(Error::InvalidInput(format!("Unknown edge type: {}", s))),
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where an edge points.
///
/// On the wire a resolved target is the plain node id string, an unresolved
/// one is `{"unresolved": "<symbol name>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EdgeTarget {
    Node(String),
    Unresolved { unresolved: String },
}

impl EdgeTarget {
    pub fn node_id(&self) -> Option<&str> {
        match self {
            EdgeTarget::Node(id) => Some(id),
            EdgeTarget::Unresolved { .. } => None,
        }
    }

    pub fn unresolved_name(&self) -> Option<&str> {
        match self {
            EdgeTarget::Node(_) => None,
            EdgeTarget::Unresolved { unresolved } => Some(unresolved),
        }
    }
}

/// An edge in the code graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    /// Source node id
    pub source: String,
    pub target: EdgeTarget,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col: Option<u32>,
    /// Resolved only at runtime (`require(x)`, `import(x)`, computed calls)
    #[serde(default)]
    pub dynamic: bool,
}

impl Edge {
    /// Create an edge between two node ids
    pub fn new(source: impl Into<String>, target: impl Into<String>, kind: EdgeKind) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}-{}-{}", source, kind.as_str(), target),
            source,
            target: EdgeTarget::Node(target),
            kind,
            properties: serde_json::Map::new(),
            line: None,
            col: None,
            dynamic: false,
        }
    }

    /// Create an edge whose target symbol could not be resolved
    pub fn unresolved(source: impl Into<String>, name: impl Into<String>, kind: EdgeKind) -> Self {
        let source = source.into();
        let name = name.into();
        Self {
            id: format!("{}-{}-?{}", source, kind.as_str(), name),
            source,
            target: EdgeTarget::Unresolved { unresolved: name },
            kind,
            properties: serde_json::Map::new(),
            line: None,
            col: None,
            dynamic: false,
        }
    }

    pub fn at(mut self, line: u32, col: u32) -> Self {
        self.line = Some(line);
        self.col = Some(col);
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Deterministic storage identity, given the resolved source key and target.
    ///
    /// Two edges with the same endpoints, type and call site collapse to one
    /// row on re-indexing.
    pub fn storage_key(&self, source_key: &BusinessKey, target: &Reference) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source_key.as_str().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(b"\x1f");
        match target {
            Reference::Resolved(key) => {
                hasher.update(b"R");
                hasher.update(key.as_str().as_bytes());
            }
            Reference::Unresolved(name) => {
                hasher.update(b"U");
                hasher.update(name.as_bytes());
            }
        }
        hasher.update(b"\x1f");
        hasher.update(&self.line.unwrap_or(0).to_le_bytes());
        hasher.update(&self.col.unwrap_or(0).to_le_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

//! # Hikma Graph - code graph persistence and query engine
//!
//! Persists extracted code structure (repositories, files, functions,
//! variables, commits, tests, pull requests) as a property graph with
//! attached embeddings inside a single SQLite store, and serves hybrid
//! structural + semantic queries over it.
//!
//! Hikma Graph provides:
//! - Deterministic business keys that survive surrogate-id churn between runs
//! - A validated, dependency-ordered, all-or-nothing batch loader
//! - Depth-bounded, cycle-safe traversal (call graphs, data flow, reachability)
//! - Hybrid search: vector similarity, metadata filters and text fallback

pub mod identity;
pub mod node;
pub mod edge;
pub mod graph;
pub mod validation;
pub mod resilience;
pub mod storage;
pub mod loader;
pub mod query;
pub mod search;
pub mod engine;
pub mod config;

// Re-exports for convenient access
pub use identity::{BusinessKey, Reference};
pub use node::{Node, NodeKind, NodeProperties};
pub use edge::{Edge, EdgeKind, EdgeTarget};
pub use graph::GraphBatch;
pub use storage::SqliteStore;
pub use loader::{BatchLoader, LoadReport};
pub use engine::Engine;
pub use config::EngineConfig;

use std::time::Duration;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for engine operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Store unreachable or misconfigured, surfaced after the retry budget
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Circuit breaker open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// Malformed or inconsistent batch, rejected before any write
    #[error("Data validation failed with {} error(s): {}", errors.len(), errors.join("; "))]
    DataValidation { errors: Vec<String> },

    /// A single statement failed inside a transaction
    #[error("Operation failed on {kind} '{id}': {source}")]
    Operation {
        id: String,
        kind: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Consistency check failed: {0}")]
    Consistency(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    VectorDimension { expected: usize, actual: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an error raised while writing a specific node or edge
    pub fn operation(id: impl Into<String>, kind: impl Into<String>, source: Error) -> Self {
        Self::Operation {
            id: id.into(),
            kind: kind.into(),
            source: Box::new(source),
        }
    }

    /// Whether the error came from reaching the store rather than from the data
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::CircuitOpen { .. })
    }
}

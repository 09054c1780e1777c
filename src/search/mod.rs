//! Search Layer - semantic, metadata and hybrid search
//!
//! Vector similarity is used when a query can be embedded and compared
//! against stored vectors; otherwise every entry point degrades to text
//! matching instead of failing.

pub mod embedding;
pub mod filters;
pub mod orchestrator;
pub mod ranking;

use serde::{Deserialize, Serialize};

pub use embedding::{EmbeddingProvider, embed_missing, embedding_text};
#[cfg(feature = "local-embeddings")]
pub use embedding::FastEmbedProvider;
pub use filters::MetadataFilters;
pub use orchestrator::{SearchHit, SearchMode, SearchOptions, SearchOrchestrator};
pub use ranking::MatchReason;

/// Search configuration (`[search]` in hikma.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Compare vectors in-process when the sqlite-vec extension is not loaded
    pub in_process_fallback: bool,
    pub default_limit: usize,
    pub min_similarity: f32,
    /// Rows read per vector column when scanning in-process, and the page
    /// size of the text fallback, which still scores every filtered node
    pub scan_limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            in_process_fallback: true,
            default_limit: 10,
            min_similarity: 0.0,
            scan_limit: 10_000,
        }
    }
}

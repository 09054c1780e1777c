//! Query embedding providers
//!
//! Vectors for stored nodes are produced by extraction collaborators; the
//! engine only needs to embed search queries, and optionally nodes that
//! arrive without a vector.

use crate::Result;
use crate::node::Node;

/// Turns text into vectors comparable with the stored embeddings
pub trait EmbeddingProvider {
    /// Model name, for logs
    fn name(&self) -> &str;

    /// Fixed output length, when known up front
    fn dimensions(&self) -> Option<usize>;

    /// Embed a batch of texts
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generate a single embedding for a query
    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_texts(&[query.to_string()])?;
        if embeddings.is_empty() {
            return Err(crate::Error::Embedding(format!("{} returned no vector for the query", self.name())));
        }
        Ok(embeddings.remove(0))
    }
}

/// Text a node is embedded from: name, kind, signature and a short preview
pub fn embedding_text(node: &Node) -> String {
    let mut text = format!("Symbol: {}\nKind: {}\n", node.name(), node.kind());
    if let Some(sig) = node.signature() {
        text.push_str(&format!("Signature: {}\n", sig));
    }
    let preview: String = node.searchable_text().chars().take(500).collect();
    if !preview.is_empty() {
        text.push_str(&format!("Context: {}\n", preview));
    }
    text
}

/// Fill in embeddings for nodes that arrived without one.
/// Returns how many nodes were embedded.
pub fn embed_missing(provider: &dyn EmbeddingProvider, nodes: &mut [Node]) -> Result<usize> {
    let pending: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.embedding.is_none())
        .map(|(i, _)| i)
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let inputs: Vec<String> = pending.iter().map(|&i| embedding_text(&nodes[i])).collect();
    let embeddings = provider.embed_texts(&inputs)?;
    if embeddings.len() != pending.len() {
        return Err(crate::Error::Embedding(format!(
            "{} returned {} vectors for {} inputs",
            provider.name(),
            embeddings.len(),
            pending.len()
        )));
    }

    for (i, embedding) in pending.iter().zip(embeddings) {
        nodes[*i].embedding = Some(embedding);
    }
    tracing::info!("embedded {} node(s) with {}", pending.len(), provider.name());
    Ok(pending.len())
}

#[cfg(feature = "local-embeddings")]
pub use local::FastEmbedProvider;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::EmbeddingProvider;
    use crate::{Error, Result};
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    /// Local transformer model (all-MiniLM-L6-v2, 384 dimensions)
    pub struct FastEmbedProvider {
        model: TextEmbedding,
    }

    impl FastEmbedProvider {
        pub const DIMENSIONS: usize = 384;

        /// Load the default model, downloading it on first use
        pub fn new() -> Result<Self> {
            let mut options = InitOptions::default();
            options.model_name = EmbeddingModel::AllMiniLML6V2;
            options.show_download_progress = true;

            let model = TextEmbedding::try_new(options)
                .map_err(|e| Error::Embedding(format!("Failed to load embedding model: {}", e)))?;

            Ok(Self { model })
        }
    }

    impl EmbeddingProvider for FastEmbedProvider {
        fn name(&self) -> &str {
            "all-MiniLM-L6-v2"
        }

        fn dimensions(&self) -> Option<usize> {
            Some(Self::DIMENSIONS)
        }

        fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(vec![]);
            }
            self.model
                .embed(texts.to_vec(), None)
                .map_err(|e| Error::Embedding(format!("Embedding generation failed: {}", e)))
        }
    }
}

/// Deterministic bag-of-words vectors for tests
#[cfg(test)]
pub(crate) mod testing {
    use super::EmbeddingProvider;
    use crate::{Error, Result};

    pub struct KeywordEmbeddings {
        pub dims: usize,
    }

    impl KeywordEmbeddings {
        pub fn new(dims: usize) -> Self {
            Self { dims }
        }

        pub fn vector(&self, text: &str) -> Vec<f32> {
            let mut v = vec![0.0f32; self.dims];
            for token in crate::search::ranking::tokenize(text) {
                let slot = blake3::hash(token.as_bytes()).as_bytes()[0] as usize % self.dims;
                v[slot] += 1.0;
            }
            v
        }
    }

    impl EmbeddingProvider for KeywordEmbeddings {
        fn name(&self) -> &str {
            "keywords"
        }

        fn dimensions(&self) -> Option<usize> {
            Some(self.dims)
        }

        fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| self.vector(t)).collect())
        }
    }

    /// Always fails, like a model that cannot be loaded
    pub struct BrokenEmbeddings;

    impl EmbeddingProvider for BrokenEmbeddings {
        fn name(&self) -> &str {
            "broken"
        }

        fn dimensions(&self) -> Option<usize> {
            None
        }

        fn embed_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::Embedding("model unavailable".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{BrokenEmbeddings, KeywordEmbeddings};
    use super::*;
    use crate::identity;
    use crate::node::{FunctionProps, NodeProperties};

    fn function(name: &str) -> Node {
        let file = identity::file(&identity::repository("acme", "billing"), "abc", "src/a.ts");
        Node::new(
            name,
            identity::function(&file, name, 1),
            NodeProperties::Function(FunctionProps {
                file,
                name: name.into(),
                signature: Some(format!("function {}(a: number, b: number)", name)),
                is_async: false,
                is_exported: true,
                start_line: 1,
                end_line: 3,
                loc: None,
                doc: None,
            }),
        )
    }

    #[test]
    fn test_embedding_text_mentions_signature() {
        let text = embedding_text(&function("calculateSum"));
        assert!(text.starts_with("Symbol: calculateSum\nKind: Function\n"));
        assert!(text.contains("Signature: function calculateSum(a: number, b: number)"));
    }

    #[test]
    fn test_embed_missing_skips_existing_vectors() {
        let provider = KeywordEmbeddings::new(16);
        let mut nodes = vec![function("a").with_embedding(vec![1.0; 16]), function("b")];
        assert_eq!(embed_missing(&provider, &mut nodes).unwrap(), 1);
        assert_eq!(nodes[0].embedding, Some(vec![1.0; 16]));
        assert_eq!(nodes[1].embedding.as_ref().map(Vec::len), Some(16));
        assert_eq!(embed_missing(&provider, &mut nodes).unwrap(), 0);
    }

    #[test]
    fn test_provider_failure_surfaces() {
        let mut nodes = vec![function("a")];
        assert!(matches!(
            embed_missing(&BrokenEmbeddings, &mut nodes),
            Err(crate::Error::Embedding(_))
        ));
        assert!(BrokenEmbeddings.embed_query("x").is_err());
    }
}

//! Hybrid search: vector similarity scoped by metadata filters, with a text
//! fallback whenever vectors cannot be used

use std::collections::{BTreeSet, HashMap};
use chrono::Utc;
use rusqlite::OptionalExtension;
use rusqlite::types::Value;
use serde::Serialize;
use crate::identity::BusinessKey;
use crate::node::{Node, NodeKind, NodeProperties};
use crate::storage::{SqliteStore, VectorColumn};
use crate::{Error, Result};
use super::SearchSettings;
use super::embedding::EmbeddingProvider;
use super::filters::MetadataFilters;
use super::ranking::{self, MatchReason};

/// Per-call search options
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    pub limit: usize,
    /// Results below this similarity are dropped; within [-1, 1]
    pub min_similarity: f32,
    /// Restrict to these kinds; empty means all
    pub node_types: Vec<NodeKind>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            min_similarity: 0.0,
            node_types: Vec::new(),
        }
    }
}

impl SearchOptions {
    pub fn from_settings(settings: &SearchSettings) -> Self {
        Self {
            limit: settings.default_limit,
            min_similarity: settings.min_similarity,
            node_types: Vec::new(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn with_node_types(mut self, kinds: &[NodeKind]) -> Self {
        self.node_types = kinds.to_vec();
        self
    }
}

/// How a hit was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Text,
}

/// A ranked, explained search result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub node: Node,
    /// Cosine similarity, or the text score when found by text
    pub similarity: f32,
    /// Similarity plus every bonus in `reasons`
    pub score: f32,
    pub reasons: Vec<MatchReason>,
    pub mode: SearchMode,
}

/// Search over one store
pub struct SearchOrchestrator<'a> {
    store: &'a SqliteStore,
    provider: Option<&'a dyn EmbeddingProvider>,
    settings: &'a SearchSettings,
}

impl<'a> SearchOrchestrator<'a> {
    pub fn new(
        store: &'a SqliteStore,
        provider: Option<&'a dyn EmbeddingProvider>,
        settings: &'a SearchSettings,
    ) -> Self {
        Self { store, provider, settings }
    }

    /// Whether similarity search can run at all against this store
    pub fn is_vector_search_available(&self) -> bool {
        self.provider.is_some()
            && (self.store.is_vector_search_available() || self.settings.in_process_fallback)
    }

    /// Nearest neighbours of `query`, sorted by non-increasing similarity.
    /// Falls back to text matching when vectors cannot be used.
    pub fn semantic_search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchHit>> {
        validate(query, options)?;
        let filters = MetadataFilters::default().with_node_types(&options.node_types);

        let mut hits = match self.vector_hits(query, &filters, options)? {
            Some(hits) => hits,
            None => self.text_hits(query, &filters)?,
        };
        sort_by_similarity(&mut hits);
        hits.truncate(options.limit);
        Ok(hits)
    }

    /// Nodes matching every filter, ordered by business key
    pub fn metadata_search(&self, filters: &MetadataFilters, limit: Option<usize>) -> Result<Vec<Node>> {
        let (predicate, values) = filters.to_sql(1);
        self.store.query_nodes(&predicate, &values, limit)
    }

    /// Semantic search scoped by `filters`, ranked by similarity plus bonuses.
    /// Falls back to filtered text matching when vectors cannot be used.
    pub fn hybrid_search(
        &self,
        query: &str,
        filters: &MetadataFilters,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        validate(query, options)?;
        let mut filters = filters.clone();
        if filters.node_types.is_empty() {
            filters.node_types = options.node_types.clone();
        }

        let mut hits = match self.vector_hits(query, &filters, options)? {
            Some(hits) => hits,
            None => self.text_hits(query, &filters)?,
        };
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.node.business_key.cmp(&b.node.business_key))
        });
        hits.truncate(options.limit);
        Ok(hits)
    }

    /// `Ok(None)` means vectors are unusable and the caller should degrade;
    /// only store failures while fetching nodes surface as errors.
    fn vector_hits(
        &self,
        query: &str,
        filters: &MetadataFilters,
        options: &SearchOptions,
    ) -> Result<Option<Vec<SearchHit>>> {
        let Some(provider) = self.provider else {
            tracing::warn!("no embedding provider configured, falling back to text search");
            return Ok(None);
        };
        if !self.store.is_vector_search_available() && !self.settings.in_process_fallback {
            tracing::warn!("vector search unavailable and in-process fallback disabled, falling back to text search");
            return Ok(None);
        }

        let embedded = provider.embed_query(query).and_then(|vector| {
            match self.store.embedding_dimensions() {
                Some(expected) if expected != vector.len() => Err(Error::VectorDimension {
                    expected,
                    actual: vector.len(),
                }),
                _ => Ok(vector),
            }
        });
        let query_vector = match embedded {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("query embedding with {} failed, falling back to text search: {}", provider.name(), e);
                return Ok(None);
            }
        };

        let mut similarities: HashMap<BusinessKey, f32> = HashMap::new();
        for column in columns_for(&filters.node_types) {
            let neighbors = match self.store.nearest_neighbors(
                column,
                &query_vector,
                self.settings.scan_limit,
                options.min_similarity,
                self.settings.scan_limit,
            ) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!("vector search on {} failed, falling back to text search: {}", column, e);
                    return Ok(None);
                }
            };
            for neighbor in neighbors {
                let entry = similarities.entry(neighbor.business_key).or_insert(neighbor.similarity);
                *entry = entry.max(neighbor.similarity);
            }
        }

        if similarities.is_empty() && self.store.count_embeddings()? == 0 {
            tracing::warn!("no embeddings stored, falling back to text search");
            return Ok(None);
        }

        let keys: Vec<&str> = similarities.keys().map(BusinessKey::as_str).collect();
        let (filter_sql, mut values) = filters.to_sql(2);
        values.insert(0, Value::Text(serde_json::to_string(&keys)?));
        let nodes = self.store.query_nodes(
            &format!("n.business_key IN (SELECT value FROM json_each(?1)) AND {}", filter_sql),
            &values,
            None,
        )?;

        let now = Utc::now();
        let mut hits = Vec::with_capacity(nodes.len());
        for node in nodes {
            let Some(&similarity) = similarities.get(&node.business_key) else {
                continue;
            };
            let mut reasons = vec![MatchReason::SemanticSimilarity { score: similarity }];
            let language = self.file_language(&node)?;
            reasons.extend(ranking::bonuses(&node, query, language.as_deref(), now));
            hits.push(build_hit(node, similarity, reasons, SearchMode::Semantic));
        }
        tracing::debug!("semantic search for {:?} matched {} node(s)", query, hits.len());
        Ok(Some(hits))
    }

    /// Substring/token scoring over every filtered candidate. Candidates are
    /// read in business-key pages of `scan_limit` rows so the whole filtered
    /// set is scored before the caller ranks and truncates.
    fn text_hits(&self, query: &str, filters: &MetadataFilters) -> Result<Vec<SearchHit>> {
        let (filter_sql, filter_values) = filters.to_sql(2);
        let predicate = format!("n.business_key > ?1 AND {}", filter_sql);
        let page = self.settings.scan_limit.max(1);
        let now = Utc::now();
        let mut hits = Vec::new();
        let mut after = String::new();
        loop {
            let mut values = Vec::with_capacity(filter_values.len() + 1);
            values.push(Value::Text(after.clone()));
            values.extend(filter_values.iter().cloned());
            let candidates = self.store.query_nodes(&predicate, &values, Some(page))?;
            let exhausted = candidates.len() < page;
            if let Some(last) = candidates.last() {
                after = last.business_key.as_str().to_string();
            }

            for node in candidates {
                let score = ranking::text_score(&node, query);
                if score <= 0.0 {
                    continue;
                }
                let mut reasons = vec![MatchReason::TextMatch { score }];
                let language = self.file_language(&node)?;
                reasons.extend(ranking::bonuses(&node, query, language.as_deref(), now));
                hits.push(build_hit(node, score, reasons, SearchMode::Text));
            }
            if exhausted {
                break;
            }
        }
        tracing::debug!("text search for {:?} matched {} node(s)", query, hits.len());
        Ok(hits)
    }

    /// Language recorded on the node's file row
    fn file_language(&self, node: &Node) -> Result<Option<String>> {
        let file_key = match &node.properties {
            NodeProperties::File(p) => return Ok(p.language.as_deref().map(str::to_lowercase)),
            NodeProperties::Function(p) | NodeProperties::ArrowFunction(p) => &p.file,
            NodeProperties::Variable(p) => &p.file,
            NodeProperties::Class(p) => &p.file,
            NodeProperties::Import(p) => &p.file,
            NodeProperties::Export(p) => &p.file,
            NodeProperties::Test(p) => &p.file,
            NodeProperties::Repository(_) | NodeProperties::Commit(_) | NodeProperties::PullRequest(_) => {
                return Ok(None);
            }
        };
        let language: Option<Option<String>> = self
            .store
            .conn()
            .query_row(
                "SELECT language FROM files WHERE business_key = ?1",
                [file_key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(language.flatten())
    }
}

fn validate(query: &str, options: &SearchOptions) -> Result<()> {
    if query.trim().is_empty() {
        return Err(Error::InvalidInput("search query is empty".to_string()));
    }
    if !(-1.0..=1.0).contains(&options.min_similarity) {
        return Err(Error::InvalidInput(format!(
            "min_similarity must be within [-1, 1], got {}",
            options.min_similarity
        )));
    }
    Ok(())
}

/// Distinct vector columns holding the given kinds, in a stable order
fn columns_for(kinds: &[NodeKind]) -> Vec<VectorColumn> {
    let kinds = if kinds.is_empty() { NodeKind::all() } else { kinds };
    let wanted: BTreeSet<&'static str> = kinds.iter().map(|k| VectorColumn::for_kind(*k).table).collect();
    VectorColumn::all()
        .iter()
        .copied()
        .filter(|c| wanted.contains(c.table))
        .collect()
}

fn build_hit(node: Node, similarity: f32, reasons: Vec<MatchReason>, mode: SearchMode) -> SearchHit {
    let bonus: f32 = reasons.iter().skip(1).map(MatchReason::value).sum();
    SearchHit {
        node,
        similarity,
        score: similarity + bonus,
        reasons,
        mode,
    }
}

fn sort_by_similarity(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.node.business_key.cmp(&b.node.business_key))
    });
}

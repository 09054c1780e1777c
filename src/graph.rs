//! Graph batch - the in-memory node/edge set produced by one indexing run
//!
//! Extraction collaborators build a batch, the validation layer gates it and
//! the loader persists it. The batch keeps lookup indexes so validation and
//! key resolution do not rescan the node list.

use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use crate::Result;
use crate::edge::Edge;
use crate::identity::BusinessKey;
use crate::node::{Node, NodeKind};

/// One run's worth of nodes and edges.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct GraphBatch {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    /// Node position indexed by surrogate id (first occurrence wins)
    #[serde(skip)]
    by_id: HashMap<String, usize>,
}

impl GraphBatch {
    /// Create a new empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a batch from already-extracted nodes and edges
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let mut batch = Self::new();
        for node in nodes {
            batch.add_node(node);
        }
        batch.edges = edges;
        batch
    }

    /// Parse the JSON ingestion format: `{"nodes": [...], "edges": [...]}`
    pub fn from_json(json: &str) -> Result<Self> {
        let parsed: GraphBatch = serde_json::from_str(json)?;
        Ok(Self::from_parts(parsed.nodes, parsed.edges))
    }

    /// Add a node to the batch
    pub fn add_node(&mut self, node: Node) {
        self.by_id.entry(node.id.clone()).or_insert(self.nodes.len());
        self.nodes.push(node);
    }

    /// Add an edge to the batch
    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Mutable access for late enrichment (e.g. attaching embeddings)
    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.by_id.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Business key of a node in this batch
    pub fn business_key_of(&self, id: &str) -> Option<&BusinessKey> {
        self.get_node(id).map(|n| &n.business_key)
    }

    /// Nodes in dependency order: repositories, files, other entities,
    /// then functions. Order within a rank follows insertion order.
    pub fn nodes_in_load_order(&self) -> Vec<&Node> {
        let mut ordered: Vec<&Node> = self.nodes.iter().collect();
        ordered.sort_by_key(|n| n.kind().load_rank());
        ordered
    }

    /// Repositories touched by this batch, with the commit recorded for each
    pub fn repositories(&self) -> Vec<(BusinessKey, Option<String>)> {
        let mut repos: HashMap<BusinessKey, Option<String>> = HashMap::new();
        for node in &self.nodes {
            let repo = match node.kind() {
                NodeKind::Repository => Some(node.business_key.clone()),
                _ => node.repo_id.clone(),
            };
            if let Some(repo) = repo {
                let entry = repos.entry(repo).or_default();
                if entry.is_none() {
                    *entry = node.commit_sha.clone();
                }
            }
        }
        let mut repos: Vec<_> = repos.into_iter().collect();
        repos.sort_by(|a, b| a.0.cmp(&b.0));
        repos
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Get statistics about the batch
    pub fn stats(&self) -> BatchStats {
        let mut nodes_by_kind: HashMap<NodeKind, usize> = HashMap::new();
        for node in &self.nodes {
            *nodes_by_kind.entry(node.kind()).or_default() += 1;
        }
        BatchStats {
            nodes: self.nodes.len(),
            edges: self.edges.len(),
            embeddings: self.nodes.iter().filter(|n| n.embedding.is_some()).count(),
            unresolved_edges: self.edges.iter().filter(|e| e.target.node_id().is_none()).count(),
            nodes_by_kind,
        }
    }
}

/// Statistics about a graph batch
#[derive(Debug, Clone)]
pub struct BatchStats {
    pub nodes: usize,
    pub edges: usize,
    pub embeddings: usize,
    pub unresolved_edges: usize,
    pub nodes_by_kind: HashMap<NodeKind, usize>,
}

impl std::fmt::Display for BatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Batch Statistics:")?;
        writeln!(f, "  Nodes: {} ({} with embeddings)", self.nodes, self.embeddings)?;
        writeln!(f, "  Edges: {} ({} unresolved)", self.edges, self.unresolved_edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeKind;
    use crate::identity;
    use crate::node::{FileProps, FunctionProps, NodeProperties, RepositoryProps};

    fn repo_node() -> Node {
        Node::new(
            "r1",
            identity::repository("acme", "billing"),
            NodeProperties::Repository(RepositoryProps {
                org: "acme".into(),
                name: "billing".into(),
                url: None,
                default_branch: None,
            }),
        )
    }

    fn file_node() -> Node {
        let repo = identity::repository("acme", "billing");
        Node::new(
            "f1",
            identity::file(&repo, "abc", "src/a.ts"),
            NodeProperties::File(FileProps {
                path: "src/a.ts".into(),
                name: "a.ts".into(),
                extension: Some("ts".into()),
                language: Some("typescript".into()),
                size_bytes: None,
                content_hash: None,
                modified_at: None,
            }),
        )
        .with_repo(repo)
        .with_commit("abc")
    }

    fn function_node() -> Node {
        let repo = identity::repository("acme", "billing");
        let file = identity::file(&repo, "abc", "src/a.ts");
        Node::new(
            "fn1",
            identity::function(&file, "run", 1),
            NodeProperties::Function(FunctionProps {
                file,
                name: "run".into(),
                signature: None,
                is_async: false,
                is_exported: false,
                start_line: 1,
                end_line: 3,
                loc: None,
                doc: None,
            }),
        )
        .with_repo(repo)
    }

    #[test]
    fn test_load_order() {
        let batch = GraphBatch::from_parts(vec![function_node(), file_node(), repo_node()], vec![]);
        let kinds: Vec<_> = batch.nodes_in_load_order().iter().map(|n| n.kind()).collect();
        assert_eq!(kinds, vec![NodeKind::Repository, NodeKind::File, NodeKind::Function]);
    }

    #[test]
    fn test_lookup_by_id() {
        let batch = GraphBatch::from_parts(vec![repo_node(), file_node()], vec![]);
        assert!(batch.contains_node("f1"));
        assert_eq!(batch.business_key_of("r1"), Some(&identity::repository("acme", "billing")));
        assert!(batch.get_node("missing").is_none());
    }

    #[test]
    fn test_repositories_and_stats() {
        let mut batch = GraphBatch::from_parts(vec![repo_node(), file_node(), function_node()], vec![]);
        batch.add_edge(Edge::new("f1", "fn1", EdgeKind::Declares));
        batch.add_edge(Edge::unresolved("fn1", "lodash.map", EdgeKind::Calls));

        let repos = batch.repositories();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].1.as_deref(), Some("abc"));

        let stats = batch.stats();
        assert_eq!(stats.nodes, 3);
        assert_eq!(stats.edges, 2);
        assert_eq!(stats.unresolved_edges, 1);
        assert_eq!(stats.nodes_by_kind[&NodeKind::File], 1);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "nodes": [
                {"id": "r1", "businessKey": "repo:acme#billing", "type": "Repository",
                 "properties": {"org": "acme", "name": "billing"}}
            ],
            "edges": []
        }"#;
        let batch = GraphBatch::from_json(json).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch.contains_node("r1"));
    }
}

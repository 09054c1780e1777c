//! Validation layer - pre-write structural and referential checks
//!
//! All checks run and accumulate; nothing short-circuits. A batch with any
//! error is rejected as a whole by the loader before a connection is even
//! opened. A batch must be self-contained: edges may only name nodes of the
//! same batch, since surrogate ids mean nothing across runs.

use std::collections::{HashMap, HashSet};
use serde::Serialize;
use crate::edge::{Edge, EdgeTarget};
use crate::graph::GraphBatch;
use crate::node::{Node, NodeProperties};

/// Outcome of validating a batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self { valid: errors.is_empty(), errors }
    }

    /// Convert into the error the loader raises
    pub fn into_result(self) -> crate::Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(crate::Error::DataValidation { errors: self.errors })
        }
    }
}

/// Validate a whole batch
pub fn validate_batch(batch: &GraphBatch) -> ValidationReport {
    let mut errors = Vec::new();

    for (i, node) in batch.nodes().iter().enumerate() {
        validate_node(i, node, &mut errors);
    }
    for (i, edge) in batch.edges().iter().enumerate() {
        validate_edge(i, edge, &mut errors);
    }
    check_consistency(batch, &mut errors);

    ValidationReport::from_errors(errors)
}

fn validate_node(index: usize, node: &Node, errors: &mut Vec<String>) {
    let label = if node.id.trim().is_empty() {
        format!("node[{}]", index)
    } else {
        format!("node '{}'", node.id)
    };

    if node.id.trim().is_empty() {
        errors.push(format!("{}: id must be a non-empty string", label));
    }
    if node.business_key.is_empty() {
        errors.push(format!("{}: businessKey must be a non-empty string", label));
    }
    if node.kind().requires_repo() && node.repo_id.as_ref().is_none_or(|r| r.is_empty()) {
        errors.push(format!("{}: {} nodes must carry a repoId", label, node.kind()));
    }

    if let Some(embedding) = &node.embedding {
        if embedding.is_empty() {
            errors.push(format!("{}: embedding must be a non-empty array", label));
        } else if let Some(pos) = embedding.iter().position(|v| !v.is_finite()) {
            errors.push(format!("{}: embedding contains a non-finite value at index {}", label, pos));
        }
    }

    validate_properties(&label, &node.properties, errors);
}

fn validate_properties(label: &str, properties: &NodeProperties, errors: &mut Vec<String>) {
    if properties.name().trim().is_empty() {
        errors.push(format!("{}: properties.name must be non-empty", label));
    }
    match properties {
        NodeProperties::Function(p) | NodeProperties::ArrowFunction(p) => {
            if p.start_line > p.end_line {
                errors.push(format!(
                    "{}: startLine {} is after endLine {}",
                    label, p.start_line, p.end_line
                ));
            }
            if p.file.is_empty() {
                errors.push(format!("{}: properties.file must reference a file business key", label));
            }
        }
        NodeProperties::File(p) if p.path.trim().is_empty() => {
            errors.push(format!("{}: properties.path must be non-empty", label));
        }
        NodeProperties::Commit(p) if p.message.trim().is_empty() => {
            errors.push(format!("{}: properties.message must be non-empty", label));
        }
        _ => {}
    }
}

fn validate_edge(index: usize, edge: &Edge, errors: &mut Vec<String>) {
    let label = format!("edge[{}] ({})", index, edge.kind);

    if edge.source.trim().is_empty() {
        errors.push(format!("{}: source must be a non-empty string", label));
    }
    match &edge.target {
        EdgeTarget::Node(id) if id.trim().is_empty() => {
            errors.push(format!("{}: target must be a non-empty string", label));
        }
        EdgeTarget::Unresolved { unresolved } => {
            if unresolved.trim().is_empty() {
                errors.push(format!("{}: unresolved target must name a symbol", label));
            }
            if !edge.kind.allows_unresolved_target() {
                errors.push(format!("{}: {} edges cannot have an unresolved target", label, edge.kind));
            }
        }
        _ => {}
    }
}

fn check_consistency(batch: &GraphBatch, errors: &mut Vec<String>) {
    let mut seen_ids: HashSet<&str> = HashSet::new();
    let mut seen_keys: HashMap<&str, &str> = HashMap::new();

    for node in batch.nodes() {
        if !node.id.is_empty() && !seen_ids.insert(node.id.as_str()) {
            errors.push(format!("duplicate node id '{}'", node.id));
        }
        if !node.business_key.is_empty() {
            if let Some(first) = seen_keys.insert(node.business_key.as_str(), node.id.as_str()) {
                errors.push(format!(
                    "duplicate businessKey '{}' on nodes '{}' and '{}'",
                    node.business_key, first, node.id
                ));
            }
        }
    }

    for (i, edge) in batch.edges().iter().enumerate() {
        if !edge.source.is_empty() && !batch.contains_node(&edge.source) {
            errors.push(format!(
                "edge[{}] ({}): source '{}' does not reference a node in the batch",
                i, edge.kind, edge.source
            ));
        }
        if let Some(target) = edge.target.node_id() {
            if !target.is_empty() && !batch.contains_node(target) {
                errors.push(format!(
                    "edge[{}] ({}): target '{}' does not reference a node in the batch",
                    i, edge.kind, target
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeKind;
    use crate::identity;
    use crate::node::{FunctionProps, RepositoryProps};

    fn function(id: &str, name: &str, line: u32) -> Node {
        let repo = identity::repository("acme", "billing");
        let file = identity::file(&repo, "abc", "src/a.ts");
        Node::new(
            id,
            identity::function(&file, name, line),
            NodeProperties::Function(FunctionProps {
                file,
                name: name.into(),
                signature: None,
                is_async: false,
                is_exported: false,
                start_line: line,
                end_line: line + 2,
                loc: None,
                doc: None,
            }),
        )
        .with_repo(repo)
    }

    #[test]
    fn test_valid_batch() {
        let batch = GraphBatch::from_parts(
            vec![function("a", "a", 1), function("b", "b", 10)],
            vec![Edge::new("a", "b", EdgeKind::Calls), Edge::unresolved("a", "fetch", EdgeKind::Calls)],
        );
        let report = validate_batch(&batch);
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_dangling_edge_rejects_whole_batch() {
        let nodes: Vec<Node> = (0..10).map(|i| function(&format!("n{}", i), &format!("f{}", i), i * 10 + 1)).collect();
        let batch = GraphBatch::from_parts(nodes, vec![Edge::new("n0", "ghost", EdgeKind::Calls)]);

        let report = validate_batch(&batch);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("ghost"));
    }

    #[test]
    fn test_errors_accumulate() {
        let mut bad = function("", "", 10);
        bad.embedding = Some(vec![0.1, f32::NAN]);
        if let NodeProperties::Function(p) = &mut bad.properties {
            p.start_line = 20;
        }
        let batch = GraphBatch::from_parts(
            vec![bad, function("x", "x", 1), function("x", "y", 5)],
            vec![Edge::new("", "x", EdgeKind::Reads), Edge::unresolved("x", "v", EdgeKind::Reads)],
        );

        let report = validate_batch(&batch);
        assert!(!report.valid);
        let all = report.errors.join("\n");
        assert!(all.contains("id must be a non-empty string"));
        assert!(all.contains("properties.name"));
        assert!(all.contains("non-finite"));
        assert!(all.contains("startLine"));
        assert!(all.contains("duplicate node id 'x'"));
        assert!(all.contains("source must be a non-empty string"));
        assert!(all.contains("cannot have an unresolved target"));
    }

    #[test]
    fn test_empty_embedding_rejected() {
        let node = function("a", "a", 1).with_embedding(vec![]);
        let report = validate_batch(&GraphBatch::from_parts(vec![node], vec![]));
        assert!(report.errors.iter().any(|e| e.contains("non-empty array")));
    }

    #[test]
    fn test_duplicate_business_key() {
        let first = function("a", "same", 1);
        let mut second = function("b", "other", 9);
        second.business_key = first.business_key.clone();
        let report = validate_batch(&GraphBatch::from_parts(vec![first, second], vec![]));
        assert!(report.errors.iter().any(|e| e.contains("duplicate businessKey")));
    }

    #[test]
    fn test_repo_required_for_files_and_history() {
        let repo = Node::new(
            "r",
            identity::repository("acme", "billing"),
            NodeProperties::Repository(RepositoryProps {
                org: "acme".into(),
                name: "billing".into(),
                url: None,
                default_branch: None,
            }),
        );
        assert!(validate_batch(&GraphBatch::from_parts(vec![repo], vec![])).valid);

        let mut orphan = function("f", "f", 1);
        orphan.repo_id = None;
        // functions locate their repository through the file key
        assert!(validate_batch(&GraphBatch::from_parts(vec![orphan], vec![])).valid);
    }

    #[test]
    fn test_error_message_lists_everything() {
        let batch = GraphBatch::from_parts(vec![], vec![Edge::new("a", "b", EdgeKind::Calls)]);
        let err = validate_batch(&batch).into_result().unwrap_err();
        match err {
            crate::Error::DataValidation { errors } => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error {:?}", other),
        }
    }
}

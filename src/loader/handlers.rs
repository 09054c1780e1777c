//! Per-kind node writers
//!
//! Each node kind is persisted by exactly one handler, looked up through a
//! typed registry instead of branching on type strings.

use std::collections::HashMap;
use crate::node::{Node, NodeKind, NodeProperties};
use crate::storage::GraphWriter;
use crate::{Error, Result};

/// Writes one kind of node: its typed table row (if the kind has one) and
/// its generic `graph_nodes` row.
pub trait NodeHandler: Send + Sync {
    /// Kinds this handler is responsible for
    fn kinds(&self) -> &[NodeKind];

    fn write(&self, writer: &GraphWriter<'_>, node: &Node) -> Result<()>;
}

/// Registry of node handlers keyed by kind
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<NodeKind, std::sync::Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every kind it declares, replacing earlier ones
    pub fn register(&mut self, handler: impl NodeHandler + 'static) {
        let handler: std::sync::Arc<dyn NodeHandler> = std::sync::Arc::new(handler);
        for kind in handler.kinds() {
            self.handlers.insert(*kind, handler.clone());
        }
    }

    pub fn handler_for(&self, kind: NodeKind) -> Result<&dyn NodeHandler> {
        self.handlers
            .get(&kind)
            .map(|h| h.as_ref())
            .ok_or_else(|| Error::NotFound(format!("no handler registered for {} nodes", kind)))
    }

    /// Write a node through its handler
    pub fn write(&self, writer: &GraphWriter<'_>, node: &Node) -> Result<()> {
        self.handler_for(node.kind())?.write(writer, node)
    }
}

/// Create a registry covering every node kind
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(RepositoryHandler);
    registry.register(FileHandler);
    registry.register(FunctionHandler);
    registry.register(CommitHandler);
    registry.register(TestHandler);
    registry.register(PullRequestHandler);
    registry.register(GenericHandler);
    registry
}

fn mismatch(node: &Node, expected: &str) -> Error {
    Error::InvalidInput(format!(
        "node '{}' reached the {} handler with {} properties",
        node.id,
        expected,
        node.kind()
    ))
}

pub struct RepositoryHandler;

impl NodeHandler for RepositoryHandler {
    fn kinds(&self) -> &[NodeKind] {
        &[NodeKind::Repository]
    }

    fn write(&self, writer: &GraphWriter<'_>, node: &Node) -> Result<()> {
        let NodeProperties::Repository(props) = &node.properties else {
            return Err(mismatch(node, "repository"));
        };
        writer.upsert_repository(node, props)?;
        writer.upsert_graph_node(node)
    }
}

pub struct FileHandler;

impl NodeHandler for FileHandler {
    fn kinds(&self) -> &[NodeKind] {
        &[NodeKind::File]
    }

    fn write(&self, writer: &GraphWriter<'_>, node: &Node) -> Result<()> {
        let NodeProperties::File(props) = &node.properties else {
            return Err(mismatch(node, "file"));
        };
        writer.upsert_file(node, props)?;
        writer.upsert_graph_node(node)
    }
}

/// Functions and arrow functions share the `functions` table
pub struct FunctionHandler;

impl NodeHandler for FunctionHandler {
    fn kinds(&self) -> &[NodeKind] {
        &[NodeKind::Function, NodeKind::ArrowFunction]
    }

    fn write(&self, writer: &GraphWriter<'_>, node: &Node) -> Result<()> {
        let (NodeProperties::Function(props) | NodeProperties::ArrowFunction(props)) = &node.properties else {
            return Err(mismatch(node, "function"));
        };
        writer.upsert_function(node, props)?;
        writer.upsert_graph_node(node)
    }
}

pub struct CommitHandler;

impl NodeHandler for CommitHandler {
    fn kinds(&self) -> &[NodeKind] {
        &[NodeKind::Commit]
    }

    fn write(&self, writer: &GraphWriter<'_>, node: &Node) -> Result<()> {
        let NodeProperties::Commit(props) = &node.properties else {
            return Err(mismatch(node, "commit"));
        };
        writer.upsert_commit(node, props)?;
        writer.upsert_graph_node(node)
    }
}

pub struct TestHandler;

impl NodeHandler for TestHandler {
    fn kinds(&self) -> &[NodeKind] {
        &[NodeKind::Test]
    }

    fn write(&self, writer: &GraphWriter<'_>, node: &Node) -> Result<()> {
        let NodeProperties::Test(props) = &node.properties else {
            return Err(mismatch(node, "test"));
        };
        writer.upsert_test(node, props)?;
        writer.upsert_graph_node(node)
    }
}

pub struct PullRequestHandler;

impl NodeHandler for PullRequestHandler {
    fn kinds(&self) -> &[NodeKind] {
        &[NodeKind::PullRequest]
    }

    fn write(&self, writer: &GraphWriter<'_>, node: &Node) -> Result<()> {
        let NodeProperties::PullRequest(props) = &node.properties else {
            return Err(mismatch(node, "pull request"));
        };
        writer.upsert_pull_request(node, props)?;
        writer.upsert_graph_node(node)
    }
}

/// Kinds without a typed table only get the generic node row
pub struct GenericHandler;

impl NodeHandler for GenericHandler {
    fn kinds(&self) -> &[NodeKind] {
        &[NodeKind::Variable, NodeKind::Class, NodeKind::Import, NodeKind::Export]
    }

    fn write(&self, writer: &GraphWriter<'_>, node: &Node) -> Result<()> {
        writer.upsert_graph_node(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl NodeHandler for Noop {
        fn kinds(&self) -> &[NodeKind] {
            &[NodeKind::Variable]
        }

        fn write(&self, _writer: &GraphWriter<'_>, _node: &Node) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_registry_covers_every_kind() {
        let registry = default_registry();
        for kind in NodeKind::all() {
            assert!(registry.handler_for(*kind).is_ok(), "no handler for {}", kind);
        }
    }

    #[test]
    fn test_register_replaces_handler() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.handler_for(NodeKind::Variable).is_err());
        registry.register(GenericHandler);
        registry.register(Noop);
        let handler = registry.handler_for(NodeKind::Variable).unwrap();
        assert_eq!(handler.kinds(), &[NodeKind::Variable]);
        // other kinds keep the earlier registration
        assert_eq!(registry.handler_for(NodeKind::Class).unwrap().kinds().len(), 4);
    }
}

//! Node types - typed graph entities
//!
//! Every node carries a surrogate `id` (valid within one indexing run), a
//! stable [`BusinessKey`], and a typed property record selected by its
//! variant. The variant *is* the node type, so the two can never disagree:
//! - `Repository`, `File` - the organisational units
//! - `Function`, `ArrowFunction`, `Class`, `Variable` - code entities
//! - `Import`, `Export` - module boundary declarations
//! - `Commit`, `PullRequest` - history
//! - `Test` - test cases discovered in test files

use crate::identity::BusinessKey;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Closed set of node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Repository,
    File,
    Function,
    ArrowFunction,
    Variable,
    Class,
    Import,
    Export,
    Commit,
    Test,
    PullRequest,
}

impl NodeKind {
    /// Get the string representation of the node kind
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Repository => "Repository",
            NodeKind::File => "File",
            NodeKind::Function => "Function",
            NodeKind::ArrowFunction => "ArrowFunction",
            NodeKind::Variable => "Variable",
            NodeKind::Class => "Class",
            NodeKind::Import => "Import",
            NodeKind::Export => "Export",
            NodeKind::Commit => "Commit",
            NodeKind::Test => "Test",
            NodeKind::PullRequest => "PullRequest",
        }
    }

    /// Get all node kinds
    pub fn all() -> &'static [NodeKind] {
        &[
            NodeKind::Repository,
            NodeKind::File,
            NodeKind::Function,
            NodeKind::ArrowFunction,
            NodeKind::Variable,
            NodeKind::Class,
            NodeKind::Import,
            NodeKind::Export,
            NodeKind::Commit,
            NodeKind::Test,
            NodeKind::PullRequest,
        ]
    }

    /// Position in the insertion order. Lower ranks are written first so
    /// that typed-table foreign keys always point at existing rows.
    pub fn load_rank(&self) -> u8 {
        match self {
            NodeKind::Repository => 0,
            NodeKind::File => 1,
            NodeKind::Variable
            | NodeKind::Class
            | NodeKind::Import
            | NodeKind::Export
            | NodeKind::Commit
            | NodeKind::Test
            | NodeKind::PullRequest => 2,
            NodeKind::Function | NodeKind::ArrowFunction => 3,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, NodeKind::Function | NodeKind::ArrowFunction)
    }

    /// Whether nodes of this kind must name the repository they belong to
    pub fn requires_repo(&self) -> bool {
        matches!(
            self,
            NodeKind::File | NodeKind::Commit | NodeKind::Test | NodeKind::PullRequest
        )
    }
}

impl FromStr for NodeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "repository" | "repo" => Ok(NodeKind::Repository),
            "file" => Ok(NodeKind::File),
            "function" | "fn" | "method" => Ok(NodeKind::Function),
            "arrowfunction" | "arrow" => Ok(NodeKind::ArrowFunction),
            "variable" | "var" => Ok(NodeKind::Variable),
            "class" => Ok(NodeKind::Class),
            "import" => Ok(NodeKind::Import),
            "export" => Ok(NodeKind::Export),
            "commit" => Ok(NodeKind::Commit),
            "test" => Ok(NodeKind::Test),
            "pullrequest" | "pr" => Ok(NodeKind::PullRequest),
            _ => Err(Error::InvalidInput(format!("Unknown node type: {}", s))),
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryProps {
    pub org: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProps {
    pub path: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

/// Shared by `Function` and `ArrowFunction` nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionProps {
    /// Business key of the declaring file
    pub file: BusinessKey,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub is_exported: bool,
    pub start_line: u32,
    pub end_line: u32,
    /// Lines of code; derived from the line range when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl FunctionProps {
    pub fn lines_of_code(&self) -> u32 {
        self.loc
            .unwrap_or_else(|| self.end_line.saturating_sub(self.start_line) + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclarationKind {
    Const,
    Let,
    Var,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableProps {
    pub file: BusinessKey,
    pub name: String,
    #[serde(default)]
    pub declaration: DeclarationKind,
    #[serde(default)]
    pub is_exported: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassProps {
    pub file: BusinessKey,
    pub name: String,
    #[serde(default)]
    pub is_exported: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superclass: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProps {
    pub file: BusinessKey,
    /// Module specifier as written (`./util`, `lodash`)
    pub source: String,
    #[serde(default)]
    pub specifiers: Vec<String>,
    #[serde(default)]
    pub is_dynamic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProps {
    pub file: BusinessKey,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitProps {
    pub sha: String,
    pub author: String,
    pub committed_at: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_changed: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestProps {
    pub file: BusinessKey,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestProps {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Typed properties; the variant determines the node type.
///
/// On the wire this is the `type` + `properties` pair of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "properties")]
pub enum NodeProperties {
    Repository(RepositoryProps),
    File(FileProps),
    Function(FunctionProps),
    ArrowFunction(FunctionProps),
    Variable(VariableProps),
    Class(ClassProps),
    Import(ImportProps),
    Export(ExportProps),
    Commit(CommitProps),
    Test(TestProps),
    PullRequest(PullRequestProps),
}

impl NodeProperties {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeProperties::Repository(_) => NodeKind::Repository,
            NodeProperties::File(_) => NodeKind::File,
            NodeProperties::Function(_) => NodeKind::Function,
            NodeProperties::ArrowFunction(_) => NodeKind::ArrowFunction,
            NodeProperties::Variable(_) => NodeKind::Variable,
            NodeProperties::Class(_) => NodeKind::Class,
            NodeProperties::Import(_) => NodeKind::Import,
            NodeProperties::Export(_) => NodeKind::Export,
            NodeProperties::Commit(_) => NodeKind::Commit,
            NodeProperties::Test(_) => NodeKind::Test,
            NodeProperties::PullRequest(_) => NodeKind::PullRequest,
        }
    }

    /// Display name of the entity
    pub fn name(&self) -> &str {
        match self {
            NodeProperties::Repository(p) => &p.name,
            NodeProperties::File(p) => &p.name,
            NodeProperties::Function(p) | NodeProperties::ArrowFunction(p) => &p.name,
            NodeProperties::Variable(p) => &p.name,
            NodeProperties::Class(p) => &p.name,
            NodeProperties::Import(p) => &p.source,
            NodeProperties::Export(p) => &p.name,
            NodeProperties::Commit(p) => &p.sha,
            NodeProperties::Test(p) => &p.name,
            NodeProperties::PullRequest(p) => &p.title,
        }
    }

    /// Serialize only the inner record (the `properties` column)
    pub fn to_json(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        Ok(value
            .get("properties")
            .map(|p| p.to_string())
            .unwrap_or_else(|| "{}".to_string()))
    }

    /// Rebuild typed properties from a stored `node_type` + `properties` pair
    pub fn from_json(kind: NodeKind, properties: &str) -> Result<Self> {
        let inner: serde_json::Value = serde_json::from_str(properties)?;
        let tagged = serde_json::json!({ "type": kind.as_str(), "properties": inner });
        Ok(serde_json::from_value(tagged)?)
    }
}

/// A node in the code graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Surrogate id, unique within one indexing run
    pub id: String,
    /// Stable identity across runs
    pub business_key: BusinessKey,
    #[serde(flatten)]
    pub properties: NodeProperties,
    /// Business key of the owning repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<BusinessKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_hash: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Extension fields that have no typed home (extractor-specific metadata)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Node {
    /// Create a node with the required fields
    pub fn new(id: impl Into<String>, business_key: BusinessKey, properties: NodeProperties) -> Self {
        Self {
            id: id.into(),
            business_key,
            properties,
            repo_id: None,
            commit_sha: None,
            file_path: None,
            line: None,
            col: None,
            signature_hash: None,
            labels: BTreeSet::new(),
            embedding: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.properties.kind()
    }

    pub fn name(&self) -> &str {
        self.properties.name()
    }

    pub fn with_repo(mut self, repo_id: BusinessKey) -> Self {
        self.repo_id = Some(repo_id);
        self
    }

    pub fn with_commit(mut self, sha: impl Into<String>) -> Self {
        self.commit_sha = Some(sha.into());
        self
    }

    pub fn with_location(mut self, file_path: impl Into<String>, line: u32, col: u32) -> Self {
        self.file_path = Some(file_path.into());
        self.line = Some(line);
        self.col = Some(col);
        self
    }

    pub fn with_file_path(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    /// Set the signature hash from the function signature, if there is one
    pub fn with_computed_signature_hash(mut self) -> Self {
        if let Some(sig) = self.signature() {
            self.signature_hash = Some(crate::identity::signature_hash(sig));
        }
        self
    }

    pub fn signature(&self) -> Option<&str> {
        match &self.properties {
            NodeProperties::Function(p) | NodeProperties::ArrowFunction(p) => p.signature.as_deref(),
            _ => None,
        }
    }

    /// Language of the node's file, when the node itself records it
    pub fn language(&self) -> Option<&str> {
        match &self.properties {
            NodeProperties::File(p) => p.language.as_deref(),
            _ => None,
        }
    }

    /// Best-known modification time, used for date filters and recency ranking
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        match &self.properties {
            NodeProperties::File(p) => p.modified_at,
            NodeProperties::Commit(p) => Some(p.committed_at),
            NodeProperties::PullRequest(p) => Some(p.merged_at.unwrap_or(p.created_at)),
            _ => None,
        }
    }

    /// Author for history nodes
    pub fn author(&self) -> Option<&str> {
        match &self.properties {
            NodeProperties::Commit(p) => Some(&p.author),
            NodeProperties::PullRequest(p) => Some(&p.author),
            _ => None,
        }
    }

    /// Text used for substring matching when vector search is unavailable
    pub fn searchable_text(&self) -> String {
        let mut parts = vec![self.name().to_string()];
        match &self.properties {
            NodeProperties::Function(p) | NodeProperties::ArrowFunction(p) => {
                parts.extend(p.signature.clone());
                parts.extend(p.doc.clone());
            }
            NodeProperties::File(p) => parts.push(p.path.clone()),
            NodeProperties::Commit(p) => parts.push(p.message.clone()),
            NodeProperties::PullRequest(p) => parts.extend(p.body.clone()),
            NodeProperties::Import(p) => parts.extend(p.specifiers.iter().cloned()),
            _ => {}
        }
        if let Some(path) = &self.file_path {
            parts.push(path.clone());
        }
        parts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity;

    fn sample_function(name: &str, start: u32, end: u32) -> Node {
        let repo = identity::repository("acme", "billing");
        let file = identity::file(&repo, "abc", "src/math.ts");
        Node::new(
            "n1",
            identity::function(&file, name, start),
            NodeProperties::Function(FunctionProps {
                file,
                name: name.to_string(),
                signature: Some(format!("function {}(a, b)", name)),
                is_async: false,
                is_exported: true,
                start_line: start,
                end_line: end,
                loc: None,
                doc: None,
            }),
        )
        .with_repo(repo)
    }

    #[test]
    fn test_node_kind_roundtrip() {
        for kind in NodeKind::all() {
            let parsed: NodeKind = kind.as_str().parse().unwrap();
            assert_eq!(*kind, parsed);
        }
    }

    #[test]
    fn test_node_kind_aliases() {
        assert_eq!(NodeKind::from_str("fn").unwrap(), NodeKind::Function);
        assert_eq!(NodeKind::from_str("arrow_function").unwrap(), NodeKind::ArrowFunction);
        assert_eq!(NodeKind::from_str("PR").unwrap(), NodeKind::PullRequest);
        assert!(NodeKind::from_str("module").is_err());
    }

    #[test]
    fn test_load_rank_orders_dependencies() {
        assert!(NodeKind::Repository.load_rank() < NodeKind::File.load_rank());
        assert!(NodeKind::File.load_rank() < NodeKind::Commit.load_rank());
        assert!(NodeKind::Commit.load_rank() < NodeKind::Function.load_rank());
        assert_eq!(NodeKind::Function.load_rank(), NodeKind::ArrowFunction.load_rank());
    }

    #[test]
    fn test_loc_defaults_to_line_range() {
        let node = sample_function("calculateSum", 10, 24);
        match &node.properties {
            NodeProperties::Function(p) => assert_eq!(p.lines_of_code(), 15),
            other => panic!("unexpected properties {:?}", other),
        }
    }

    #[test]
    fn test_wire_format() {
        let node = sample_function("calculateSum", 10, 24).with_embedding(vec![0.5, 0.5]);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "Function");
        assert_eq!(json["properties"]["name"], "calculateSum");
        assert_eq!(json["properties"]["startLine"], 10);
        assert!(json["businessKey"].as_str().unwrap().starts_with("fn:"));

        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), NodeKind::Function);
        assert_eq!(back.embedding, Some(vec![0.5, 0.5]));
    }

    #[test]
    fn test_properties_column_roundtrip() {
        let node = sample_function("calculateSum", 10, 24);
        let stored = node.properties.to_json().unwrap();
        assert!(!stored.contains("\"type\""));
        let restored = NodeProperties::from_json(NodeKind::Function, &stored).unwrap();
        assert_eq!(restored, node.properties);
    }

    #[test]
    fn test_signature_hash_from_signature() {
        let node = sample_function("calculateSum", 1, 2).with_computed_signature_hash();
        assert!(node.signature_hash.is_some());
    }
}

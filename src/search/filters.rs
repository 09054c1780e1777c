//! Metadata filters compiled to a SQL predicate over `graph_nodes n`

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use crate::identity::BusinessKey;
use crate::node::NodeKind;
use crate::storage::sqlite::timestamp;

/// Row of `files` describing node `n`: the node itself, or the file its
/// properties point at
const FILE_OF_NODE: &str =
    "fl.business_key = n.business_key OR fl.business_key = json_extract(n.properties, '$.file')";

/// Structured filters; every set field must match
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetadataFilters {
    pub node_types: Vec<NodeKind>,
    /// Repository business key
    pub repository: Option<BusinessKey>,
    /// Without the leading dot (`ts`, `py`)
    pub file_extension: Option<String>,
    pub language: Option<String>,
    pub author: Option<String>,
    pub path_contains: Option<String>,
    pub modified_after: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
}

impl MetadataFilters {
    pub fn is_empty(&self) -> bool {
        self.node_types.is_empty()
            && self.repository.is_none()
            && self.file_extension.is_none()
            && self.language.is_none()
            && self.author.is_none()
            && self.path_contains.is_none()
            && self.modified_after.is_none()
            && self.modified_before.is_none()
    }

    pub fn with_node_types(mut self, kinds: &[NodeKind]) -> Self {
        self.node_types = kinds.to_vec();
        self
    }

    /// Compile to a predicate plus positional parameters. `first_param` is
    /// the number of the first `?N` placeholder to use.
    pub fn to_sql(&self, first_param: usize) -> (String, Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        let next = |values: &mut Vec<Value>, value: Value| -> String {
            values.push(value);
            format!("?{}", first_param + values.len() - 1)
        };

        if !self.node_types.is_empty() {
            let placeholders: Vec<String> = self
                .node_types
                .iter()
                .map(|k| next(&mut values, Value::Text(k.as_str().to_string())))
                .collect();
            clauses.push(format!("n.node_type IN ({})", placeholders.join(", ")));
        }
        if let Some(repo) = &self.repository {
            let p = next(&mut values, Value::Text(repo.as_str().to_string()));
            clauses.push(format!("(n.repo_id = {p} OR n.business_key = {p})"));
        }
        if let Some(ext) = &self.file_extension {
            let ext = ext.trim_start_matches('.').to_lowercase();
            let p = next(&mut values, Value::Text(ext));
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM files fl WHERE ({FILE_OF_NODE}) AND lower(fl.extension) = {p})"
            ));
        }
        if let Some(language) = &self.language {
            let p = next(&mut values, Value::Text(language.to_lowercase()));
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM files fl WHERE ({FILE_OF_NODE}) AND fl.language = {p})"
            ));
        }
        if let Some(author) = &self.author {
            let p = next(&mut values, Value::Text(author.to_lowercase()));
            clauses.push(format!("lower(json_extract(n.properties, '$.author')) = {p}"));
        }
        if let Some(fragment) = &self.path_contains {
            let p = next(&mut values, Value::Text(like_contains(fragment)));
            clauses.push(format!(
                "(n.file_path LIKE {p} ESCAPE '\\' OR EXISTS (SELECT 1 FROM files fl WHERE ({FILE_OF_NODE}) AND fl.path LIKE {p} ESCAPE '\\'))"
            ));
        }
        if let Some(after) = self.modified_after {
            let p = next(&mut values, Value::Text(timestamp(after)));
            clauses.push(format!("n.modified_at >= {p}"));
        }
        if let Some(before) = self.modified_before {
            let p = next(&mut values, Value::Text(timestamp(before)));
            clauses.push(format!("n.modified_at <= {p}"));
        }

        if clauses.is_empty() {
            ("1 = 1".to_string(), values)
        } else {
            (clauses.join(" AND "), values)
        }
    }
}

/// `%fragment%` with LIKE wildcards in the fragment escaped
pub(crate) fn like_contains(fragment: &str) -> String {
    let escaped = fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filters_match_everything() {
        let filters = MetadataFilters::default();
        assert!(filters.is_empty());
        let (sql, values) = filters.to_sql(1);
        assert_eq!(sql, "1 = 1");
        assert!(values.is_empty());
    }

    #[test]
    fn test_placeholders_are_numbered_from_offset() {
        let filters = MetadataFilters {
            node_types: vec![NodeKind::Function, NodeKind::ArrowFunction],
            author: Some("Ada".into()),
            ..MetadataFilters::default()
        };
        let (sql, values) = filters.to_sql(3);
        assert!(sql.contains("n.node_type IN (?3, ?4)"));
        assert!(sql.contains("= ?5"));
        assert_eq!(values.len(), 3);
        assert_eq!(values[2], Value::Text("ada".into()));
    }

    #[test]
    fn test_repository_reuses_one_parameter() {
        let filters = MetadataFilters {
            repository: Some(crate::identity::repository("acme", "billing")),
            ..MetadataFilters::default()
        };
        let (sql, values) = filters.to_sql(1);
        assert_eq!(sql, "(n.repo_id = ?1 OR n.business_key = ?1)");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_like_escaping() {
        assert_eq!(like_contains("a_b%"), "%a\\_b\\%%");
    }
}

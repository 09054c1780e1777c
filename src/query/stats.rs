//! Aggregate graph statistics

use std::collections::BTreeMap;
use rusqlite::Connection;
use serde::Serialize;
use crate::Result;
use crate::storage::SqliteStore;

/// Lines-of-code summary over all functions
#[derive(Debug, Clone, Default, Serialize)]
pub struct FunctionComplexity {
    pub count: usize,
    pub average_loc: f64,
    pub max_loc: u32,
}

/// Counts by type, repository and language
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub unresolved_edges: usize,
    pub nodes_by_type: BTreeMap<String, usize>,
    pub edges_by_type: BTreeMap<String, usize>,
    pub nodes_by_repository: BTreeMap<String, usize>,
    pub files_by_language: BTreeMap<String, usize>,
    pub functions: FunctionComplexity,
}

/// Collect statistics for the whole store
pub fn graph_stats(store: &SqliteStore) -> Result<GraphStats> {
    let conn = store.conn();
    let nodes_by_type = grouped(conn, "SELECT node_type, COUNT(*) FROM graph_nodes GROUP BY node_type")?;
    let edges_by_type = grouped(conn, "SELECT edge_type, COUNT(*) FROM graph_edges GROUP BY edge_type")?;
    let nodes_by_repository = grouped(
        conn,
        "SELECT COALESCE(repo_id, CASE WHEN node_type = 'Repository' THEN business_key END), COUNT(*)
         FROM graph_nodes
         WHERE repo_id IS NOT NULL OR node_type = 'Repository'
         GROUP BY 1",
    )?;
    let files_by_language = grouped(
        conn,
        "SELECT COALESCE(language, 'unknown'), COUNT(*) FROM files GROUP BY 1",
    )?;

    let functions = conn.query_row(
        "SELECT COUNT(*), COALESCE(AVG(loc), 0.0), COALESCE(MAX(loc), 0) FROM functions",
        [],
        |row| {
            Ok(FunctionComplexity {
                count: row.get::<_, i64>(0)? as usize,
                average_loc: row.get(1)?,
                max_loc: row.get(2)?,
            })
        },
    )?;
    let unresolved: i64 = conn.query_row(
        "SELECT COUNT(*) FROM graph_edges WHERE target_business_key IS NULL",
        [],
        |row| row.get(0),
    )?;

    Ok(GraphStats {
        total_nodes: nodes_by_type.values().sum(),
        total_edges: edges_by_type.values().sum(),
        unresolved_edges: unresolved as usize,
        nodes_by_type,
        edges_by_type,
        nodes_by_repository,
        files_by_language,
        functions,
    })
}

fn grouped(conn: &Connection, sql: &str) -> Result<BTreeMap<String, usize>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
    })?;
    let mut map = BTreeMap::new();
    for row in rows {
        let (key, count) = row?;
        map.insert(key, count);
    }
    Ok(map)
}

impl std::fmt::Display for GraphStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph Statistics:")?;
        writeln!(f, "  Nodes: {}", self.total_nodes)?;
        for (kind, count) in &self.nodes_by_type {
            writeln!(f, "    {}: {}", kind, count)?;
        }
        writeln!(f, "  Edges: {} ({} unresolved)", self.total_edges, self.unresolved_edges)?;
        for (kind, count) in &self.edges_by_type {
            writeln!(f, "    {}: {}", kind, count)?;
        }
        if !self.nodes_by_repository.is_empty() {
            writeln!(f, "  Repositories:")?;
            for (repo, count) in &self.nodes_by_repository {
                writeln!(f, "    {}: {} nodes", repo, count)?;
            }
        }
        if !self.files_by_language.is_empty() {
            writeln!(f, "  Files by language:")?;
            for (language, count) in &self.files_by_language {
                writeln!(f, "    {}: {}", language, count)?;
            }
        }
        writeln!(
            f,
            "  Functions: {} (avg {:.1} LOC, max {})",
            self.functions.count, self.functions.average_loc, self.functions.max_loc
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{Edge, EdgeKind};
    use crate::graph::GraphBatch;
    use crate::identity;
    use crate::loader::BatchLoader;
    use crate::node::{FileProps, FunctionProps, Node, NodeProperties, RepositoryProps};

    #[test]
    fn test_empty_store() {
        let store = SqliteStore::open_in_memory().unwrap();
        let stats = graph_stats(&store).unwrap();
        assert_eq!(stats.total_nodes, 0);
        assert_eq!(stats.functions.count, 0);
        assert_eq!(stats.functions.average_loc, 0.0);
    }

    #[test]
    fn test_counts_and_complexity() {
        let repo = identity::repository("acme", "billing");
        let file = identity::file(&repo, "abc", "src/a.ts");
        let function = |id: &str, start: u32, end: u32| {
            Node::new(
                id,
                identity::function(&file, id, start),
                NodeProperties::Function(FunctionProps {
                    file: file.clone(),
                    name: id.into(),
                    signature: None,
                    is_async: false,
                    is_exported: false,
                    start_line: start,
                    end_line: end,
                    loc: None,
                    doc: None,
                }),
            )
            .with_repo(repo.clone())
        };
        let batch = GraphBatch::from_parts(
            vec![
                Node::new(
                    "r",
                    repo.clone(),
                    NodeProperties::Repository(RepositoryProps {
                        org: "acme".into(),
                        name: "billing".into(),
                        url: None,
                        default_branch: None,
                    }),
                ),
                Node::new(
                    "f",
                    file.clone(),
                    NodeProperties::File(FileProps {
                        path: "src/a.ts".into(),
                        name: "a.ts".into(),
                        extension: Some("ts".into()),
                        language: Some("TypeScript".into()),
                        size_bytes: None,
                        content_hash: None,
                        modified_at: None,
                    }),
                )
                .with_repo(repo.clone()),
                function("small", 1, 2),
                function("large", 10, 19),
            ],
            vec![
                Edge::new("small", "large", EdgeKind::Calls),
                Edge::unresolved("large", "fetch", EdgeKind::Calls),
            ],
        );
        let mut store = SqliteStore::open_in_memory().unwrap();
        BatchLoader::detached(10).load_into(&mut store, &batch).unwrap();

        let stats = graph_stats(&store).unwrap();
        assert_eq!(stats.total_nodes, 4);
        assert_eq!(stats.nodes_by_type["Function"], 2);
        assert_eq!(stats.edges_by_type["CALLS"], 2);
        assert_eq!(stats.unresolved_edges, 1);
        assert_eq!(stats.nodes_by_repository[repo.as_str()], 4);
        assert_eq!(stats.files_by_language["typescript"], 1);
        assert_eq!(stats.functions.count, 2);
        assert_eq!(stats.functions.max_loc, 10);
        assert!((stats.functions.average_loc - 6.0).abs() < 1e-9);
        assert!(stats.to_string().contains("Functions: 2"));
    }
}

//! Graph traversal over the persisted edge table
//!
//! Every traversal is bounded by a maximum depth and guards against cycles,
//! so recursive call chains (`a -> b -> a`) terminate. Call graphs run as
//! recursive CTEs; reachability and data flow expand breadth-first.

use std::collections::{HashMap, HashSet, VecDeque};
use rusqlite::params;
use rusqlite::types::Value;
use serde::Serialize;
use crate::Result;
use crate::edge::EdgeKind;
use crate::identity::{BusinessKey, Reference};
use crate::node::{Node, NodeKind};
use crate::storage::SqliteStore;

/// Forward call graph. A row whose target is already on its path is
/// reported but not expanded (`cycle = 1`).
const CALLEES_SQL: &str = "\
WITH RECURSIVE calls(source, target, target_name, line, col, dynamic, depth, path, cycle) AS (
    SELECT e.source_business_key, e.target_business_key, e.target_name, e.line, e.col, e.dynamic, 1,
           '|' || e.source_business_key || '|' || COALESCE(e.target_business_key, '?' || e.target_name) || '|',
           COALESCE(e.target_business_key = e.source_business_key, 0)
    FROM graph_edges e
    WHERE e.source_business_key = ?1 AND e.edge_type = 'CALLS'

    UNION ALL

    SELECT e.source_business_key, e.target_business_key, e.target_name, e.line, e.col, e.dynamic, c.depth + 1,
           c.path || COALESCE(e.target_business_key, '?' || e.target_name) || '|',
           COALESCE(instr(c.path, '|' || e.target_business_key || '|') > 0, 0)
    FROM calls c
    JOIN graph_edges e ON e.source_business_key = c.target AND e.edge_type = 'CALLS'
    WHERE c.depth < ?2 AND c.cycle = 0
)
SELECT source, target, target_name, line, col, MAX(dynamic), MIN(depth) AS depth
FROM calls
GROUP BY source, target, target_name, line, col
ORDER BY depth, source, COALESCE(target, target_name), line";

/// Backward call graph (who calls the start node, transitively)
const CALLERS_SQL: &str = "\
WITH RECURSIVE callers(source, target, line, col, dynamic, depth, path, cycle) AS (
    SELECT e.source_business_key, e.target_business_key, e.line, e.col, e.dynamic, 1,
           '|' || e.target_business_key || '|' || e.source_business_key || '|',
           e.source_business_key = e.target_business_key
    FROM graph_edges e
    WHERE e.target_business_key = ?1 AND e.edge_type = 'CALLS'

    UNION ALL

    SELECT e.source_business_key, e.target_business_key, e.line, e.col, e.dynamic, c.depth + 1,
           c.path || e.source_business_key || '|',
           instr(c.path, '|' || e.source_business_key || '|') > 0
    FROM callers c
    JOIN graph_edges e ON e.target_business_key = c.source AND e.edge_type = 'CALLS'
    WHERE c.depth < ?2 AND c.cycle = 0
)
SELECT source, target, NULL, line, col, MAX(dynamic), MIN(depth) AS depth
FROM callers
GROUP BY source, target, line, col
ORDER BY depth, source, target, line";

/// Direction for edge traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// A node found by reachability, annotated with its distance from the start
#[derive(Debug, Clone, Serialize)]
pub struct ReachedNode {
    pub node: Node,
    pub depth: u32,
    /// Edge type that first led to this node
    pub via: EdgeKind,
}

/// One CALLS edge of a call graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallGraphEntry {
    pub caller: BusinessKey,
    pub callee: Reference,
    pub line: Option<u32>,
    pub col: Option<u32>,
    pub dynamic: bool,
    pub depth: u32,
}

/// A node reached while following data access from a variable
#[derive(Debug, Clone, Serialize)]
pub struct DataFlowStep {
    pub node: BusinessKey,
    pub kind: NodeKind,
    pub name: String,
    pub via: EdgeKind,
    pub depth: u32,
    /// Keys from the variable up to and including `node`
    pub path: Vec<BusinessKey>,
}

/// A function reading or writing a variable
#[derive(Debug, Clone, Serialize)]
pub struct VariableAccess {
    pub accessor: BusinessKey,
    pub accessor_name: Option<String>,
    pub access: EdgeKind,
    pub line: Option<u32>,
    pub col: Option<u32>,
}

/// Bounded traversals over a store
pub struct TraversalEngine<'a> {
    store: &'a SqliteStore,
    default_max_depth: u32,
}

impl<'a> TraversalEngine<'a> {
    pub const DEFAULT_MAX_DEPTH: u32 = 3;

    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store, default_max_depth: Self::DEFAULT_MAX_DEPTH }
    }

    pub fn with_default_depth(mut self, depth: u32) -> Self {
        self.default_max_depth = depth;
        self
    }

    fn depth_or_default(&self, max_depth: Option<u32>) -> u32 {
        max_depth.unwrap_or(self.default_max_depth)
    }

    /// Look up a node by business key
    pub fn get_node(&self, key: &BusinessKey) -> Result<Option<Node>> {
        self.store.get_node(key)
    }

    /// Forward call graph: what does `start` call, transitively.
    /// Unresolved callees are reported as such and never expanded.
    pub fn callees(&self, start: &BusinessKey, max_depth: Option<u32>) -> Result<Vec<CallGraphEntry>> {
        self.call_graph(CALLEES_SQL, start, self.depth_or_default(max_depth))
    }

    /// Backward call graph: who calls `start`, transitively
    pub fn callers(&self, start: &BusinessKey, max_depth: Option<u32>) -> Result<Vec<CallGraphEntry>> {
        self.call_graph(CALLERS_SQL, start, self.depth_or_default(max_depth))
    }

    fn call_graph(&self, sql: &str, start: &BusinessKey, max_depth: u32) -> Result<Vec<CallGraphEntry>> {
        if max_depth == 0 {
            return Ok(Vec::new());
        }
        let mut stmt = self.store.conn().prepare_cached(sql)?;
        let rows = stmt.query_map(params![start.as_str(), max_depth], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<u32>>(3)?,
                row.get::<_, Option<u32>>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, u32>(6)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (caller, target, target_name, line, col, dynamic, depth) = row?;
            let callee = match (target, target_name) {
                (Some(key), _) => Reference::Resolved(key.parse()?),
                (None, name) => Reference::Unresolved(name.unwrap_or_default()),
            };
            entries.push(CallGraphEntry {
                caller: caller.parse()?,
                callee,
                line,
                col,
                dynamic,
                depth,
            });
        }
        Ok(entries)
    }

    /// Resolved neighbours of a node over the given edge types, ordered by key
    fn neighbors(
        &self,
        key: &BusinessKey,
        kinds: &[EdgeKind],
        direction: Direction,
    ) -> Result<Vec<(BusinessKey, EdgeKind)>> {
        let mut values = vec![Value::Text(key.as_str().to_string())];
        let kind_filter = if kinds.is_empty() {
            String::new()
        } else {
            let placeholders: Vec<String> = kinds
                .iter()
                .map(|k| {
                    values.push(Value::Text(k.as_str().to_string()));
                    format!("?{}", values.len())
                })
                .collect();
            format!(" AND edge_type IN ({})", placeholders.join(", "))
        };

        let mut branches = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            branches.push(format!(
                "SELECT target_business_key, edge_type FROM graph_edges
                 WHERE source_business_key = ?1 AND target_business_key IS NOT NULL{}",
                kind_filter
            ));
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            branches.push(format!(
                "SELECT source_business_key, edge_type FROM graph_edges
                 WHERE target_business_key = ?1{}",
                kind_filter
            ));
        }
        let sql = format!("{} ORDER BY 1, 2", branches.join(" UNION "));

        let mut stmt = self.store.conn().prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(key, kind)| Ok((key.parse()?, kind.parse()?)))
            .collect()
    }

    /// Breadth-first reachability from `start`.
    ///
    /// An empty `kinds` slice follows every edge type. The start node itself
    /// is not part of the result.
    pub fn reachable(
        &self,
        start: &BusinessKey,
        kinds: &[EdgeKind],
        direction: Direction,
        max_depth: Option<u32>,
    ) -> Result<Vec<ReachedNode>> {
        let max_depth = self.depth_or_default(max_depth);
        let mut visited: HashSet<BusinessKey> = HashSet::from([start.clone()]);
        let mut queue = VecDeque::from([(start.clone(), 0u32)]);
        let mut results = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for (next, via) in self.neighbors(&current, kinds, direction)? {
                if !visited.insert(next.clone()) {
                    continue;
                }
                if let Some(node) = self.store.get_node(&next)? {
                    results.push(ReachedNode { node, depth: depth + 1, via });
                }
                queue.push_back((next, depth + 1));
            }
        }

        results.sort_by(|a, b| {
            a.depth
                .cmp(&b.depth)
                .then_with(|| a.node.business_key.cmp(&b.node.business_key))
        });
        Ok(results)
    }

    /// Follow READS/WRITES edges in either direction from a variable: to
    /// the functions touching it, then to the variables those functions
    /// touch, and so on. Each node is reported once, on its shortest path.
    pub fn find_data_flow(&self, variable: &BusinessKey, max_depth: Option<u32>) -> Result<Vec<DataFlowStep>> {
        let max_depth = self.depth_or_default(max_depth);
        let access = [EdgeKind::Reads, EdgeKind::Writes];

        let mut parents: HashMap<BusinessKey, BusinessKey> = HashMap::new();
        let mut visited: HashSet<BusinessKey> = HashSet::from([variable.clone()]);
        let mut queue = VecDeque::from([(variable.clone(), 0u32)]);
        let mut steps = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for (next, via) in self.neighbors(&current, &access, Direction::Both)? {
                if !visited.insert(next.clone()) {
                    continue;
                }
                parents.insert(next.clone(), current.clone());
                let Some(node) = self.store.get_node(&next)? else {
                    continue;
                };
                steps.push(DataFlowStep {
                    path: path_to(&parents, variable, &next),
                    node: next.clone(),
                    kind: node.kind(),
                    name: node.name().to_string(),
                    via,
                    depth: depth + 1,
                });
                queue.push_back((next, depth + 1));
            }
        }

        steps.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.node.cmp(&b.node)));
        Ok(steps)
    }

    /// Functions and arrow functions declared in a file, by start line
    pub fn find_functions_in_file(&self, path: &str) -> Result<Vec<Node>> {
        let path = path.replace('\\', "/");
        let path = path.trim_start_matches("./").to_string();
        let mut nodes = self.store.query_nodes(
            "n.node_type IN ('Function', 'ArrowFunction') AND (
                n.file_path = ?1
                OR n.business_key IN (
                    SELECT f.business_key FROM functions f
                    JOIN files fl ON fl.business_key = f.file_business_key
                    WHERE fl.path = ?1))",
            &[Value::Text(path)],
            None,
        )?;
        nodes.sort_by_key(|n| (function_start(n), n.business_key.clone()));
        Ok(nodes)
    }

    /// Every read and write of a variable
    pub fn find_variable_access(&self, variable: &BusinessKey) -> Result<Vec<VariableAccess>> {
        let mut stmt = self.store.conn().prepare_cached(
            "SELECT CASE WHEN e.target_business_key = ?1 THEN e.source_business_key ELSE e.target_business_key END AS accessor,
                    n.name, e.edge_type, e.line, e.col
             FROM graph_edges e
             LEFT JOIN graph_nodes n
                    ON n.business_key = CASE WHEN e.target_business_key = ?1
                                             THEN e.source_business_key ELSE e.target_business_key END
             WHERE e.edge_type IN ('READS', 'WRITES')
               AND (e.target_business_key = ?1 OR e.source_business_key = ?1)
             ORDER BY accessor, e.line, e.edge_type",
        )?;
        let rows = stmt
            .query_map([variable.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<u32>>(3)?,
                    row.get::<_, Option<u32>>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(accessor, accessor_name, access, line, col)| {
                Ok(VariableAccess {
                    accessor: accessor.parse()?,
                    accessor_name,
                    access: access.parse()?,
                    line,
                    col,
                })
            })
            .collect()
    }
}

fn function_start(node: &Node) -> u32 {
    match &node.properties {
        crate::node::NodeProperties::Function(p) | crate::node::NodeProperties::ArrowFunction(p) => p.start_line,
        _ => node.line.unwrap_or(0),
    }
}

fn path_to(parents: &HashMap<BusinessKey, BusinessKey>, root: &BusinessKey, node: &BusinessKey) -> Vec<BusinessKey> {
    let mut path = vec![node.clone()];
    let mut current = node;
    while current != root {
        match parents.get(current) {
            Some(parent) => {
                path.push(parent.clone());
                current = parent;
            }
            None => break,
        }
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::graph::GraphBatch;
    use crate::identity;
    use crate::loader::BatchLoader;
    use crate::node::{DeclarationKind, FileProps, FunctionProps, NodeProperties, RepositoryProps, VariableProps};

    fn repo_key() -> BusinessKey {
        identity::repository("acme", "billing")
    }

    fn file_key() -> BusinessKey {
        identity::file(&repo_key(), "abc", "src/a.ts")
    }

    fn base_nodes() -> Vec<Node> {
        vec![
            Node::new(
                "r",
                repo_key(),
                NodeProperties::Repository(RepositoryProps {
                    org: "acme".into(),
                    name: "billing".into(),
                    url: None,
                    default_branch: None,
                }),
            ),
            Node::new(
                "f",
                file_key(),
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
            .with_repo(repo_key()),
        ]
    }

    fn function(id: &str, line: u32) -> Node {
        Node::new(
            id,
            identity::function(&file_key(), id, line),
            NodeProperties::Function(FunctionProps {
                file: file_key(),
                name: id.into(),
                signature: None,
                is_async: false,
                is_exported: false,
                start_line: line,
                end_line: line + 1,
                loc: None,
                doc: None,
            }),
        )
        .with_repo(repo_key())
    }

    fn variable(id: &str, line: u32) -> Node {
        Node::new(
            id,
            identity::variable(&file_key(), id, line),
            NodeProperties::Variable(VariableProps {
                file: file_key(),
                name: id.into(),
                declaration: DeclarationKind::Let,
                is_exported: false,
            }),
        )
        .with_repo(repo_key())
    }

    fn load(nodes: Vec<Node>, edges: Vec<Edge>) -> SqliteStore {
        let mut all = base_nodes();
        all.extend(nodes);
        let mut store = SqliteStore::open_in_memory().unwrap();
        BatchLoader::detached(100)
            .load_into(&mut store, &GraphBatch::from_parts(all, edges))
            .unwrap();
        store
    }

    fn key(id: &str, line: u32) -> BusinessKey {
        identity::function(&file_key(), id, line)
    }

    #[test]
    fn test_cyclic_call_graph_terminates() {
        let store = load(
            vec![function("a", 1), function("b", 10)],
            vec![Edge::new("a", "b", EdgeKind::Calls).at(2, 4), Edge::new("b", "a", EdgeKind::Calls).at(11, 4)],
        );
        let engine = TraversalEngine::new(&store);

        let callees = engine.callees(&key("a", 1), Some(3)).unwrap();
        assert_eq!(callees.len(), 2);
        assert_eq!(callees[0].caller, key("a", 1));
        assert_eq!(callees[0].callee, Reference::Resolved(key("b", 10)));
        assert_eq!(callees[0].depth, 1);
        assert_eq!(callees[1].callee, Reference::Resolved(key("a", 1)));
        assert_eq!(callees[1].depth, 2);

        let callers = engine.callers(&key("a", 1), Some(3)).unwrap();
        assert_eq!(callers.len(), 2);
        assert!(callers.iter().all(|c| c.depth <= 3));
    }

    #[test]
    fn test_self_recursion_terminates() {
        let store = load(vec![function("fact", 1)], vec![Edge::new("fact", "fact", EdgeKind::Calls)]);
        let engine = TraversalEngine::new(&store);
        let callees = engine.callees(&key("fact", 1), Some(5)).unwrap();
        assert_eq!(callees.len(), 1);
        assert_eq!(callees[0].callee, Reference::Resolved(key("fact", 1)));
    }

    #[test]
    fn test_call_graph_depth_bound_and_unresolved() {
        let store = load(
            vec![function("a", 1), function("b", 10), function("c", 20), function("d", 30)],
            vec![
                Edge::new("a", "b", EdgeKind::Calls),
                Edge::new("b", "c", EdgeKind::Calls),
                Edge::new("c", "d", EdgeKind::Calls),
                Edge::unresolved("a", "fetch", EdgeKind::Calls).at(3, 2),
            ],
        );
        let engine = TraversalEngine::new(&store);

        let two = engine.callees(&key("a", 1), Some(2)).unwrap();
        assert_eq!(two.len(), 3);
        assert!(two.iter().all(|e| e.depth <= 2));
        assert!(two.iter().any(|e| e.callee == Reference::Unresolved("fetch".into())));
        assert!(!two.iter().any(|e| e.callee == Reference::Resolved(key("d", 30))));

        let all = engine.callees(&key("a", 1), None).unwrap();
        assert!(all.iter().any(|e| e.callee == Reference::Resolved(key("d", 30)) && e.depth == 3));

        let callers = engine.callers(&key("d", 30), Some(2)).unwrap();
        let names: Vec<_> = callers.iter().map(|c| c.caller.clone()).collect();
        assert_eq!(names, vec![key("c", 20), key("b", 10)]);

        assert!(engine.callees(&key("a", 1), Some(0)).unwrap().is_empty());
    }

    #[test]
    fn test_reachable_breadth_first() {
        let store = load(
            vec![function("a", 1), function("b", 10), function("c", 20)],
            vec![
                Edge::new("f", "a", EdgeKind::Contains),
                Edge::new("f", "b", EdgeKind::Contains),
                Edge::new("a", "c", EdgeKind::Calls),
                Edge::new("c", "a", EdgeKind::Calls),
            ],
        );
        let engine = TraversalEngine::new(&store);

        let reached = engine.reachable(&file_key(), &[], Direction::Outgoing, Some(3)).unwrap();
        let depths: Vec<(String, u32)> = reached.iter().map(|r| (r.node.name().to_string(), r.depth)).collect();
        assert_eq!(depths, vec![("a".into(), 1), ("b".into(), 1), ("c".into(), 2)]);

        let contains_only = engine
            .reachable(&file_key(), &[EdgeKind::Contains], Direction::Outgoing, Some(3))
            .unwrap();
        assert_eq!(contains_only.len(), 2);

        let incoming = engine.reachable(&key("c", 20), &[EdgeKind::Calls], Direction::Incoming, Some(1)).unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].via, EdgeKind::Calls);
    }

    #[test]
    fn test_data_flow_and_variable_access() {
        let store = load(
            vec![function("reader", 1), function("writer", 10), variable("total", 0), variable("report", 0)],
            vec![
                Edge::new("reader", "total", EdgeKind::Reads).at(2, 8),
                Edge::new("writer", "total", EdgeKind::Writes).at(11, 4),
                Edge::new("reader", "report", EdgeKind::Writes).at(3, 4),
            ],
        );
        let engine = TraversalEngine::new(&store);
        let total = identity::variable(&file_key(), "total", 0);

        let flow = engine.find_data_flow(&total, Some(2)).unwrap();
        let reached: Vec<(&str, u32)> = flow.iter().map(|s| (s.name.as_str(), s.depth)).collect();
        assert_eq!(reached, vec![("reader", 1), ("writer", 1), ("report", 2)]);
        let report = flow.iter().find(|s| s.name == "report").unwrap();
        assert_eq!(report.path.len(), 3);
        assert_eq!(report.path[0], total);

        let access = engine.find_variable_access(&total).unwrap();
        assert_eq!(access.len(), 2);
        assert!(access.iter().any(|a| a.access == EdgeKind::Reads && a.accessor_name.as_deref() == Some("reader")));
        assert!(access.iter().any(|a| a.access == EdgeKind::Writes && a.line == Some(11)));
    }

    #[test]
    fn test_functions_in_file_ordered_by_line() {
        let store = load(vec![function("late", 40), function("early", 2)], vec![]);
        let engine = TraversalEngine::new(&store);
        let names: Vec<String> = engine
            .find_functions_in_file("./src/a.ts")
            .unwrap()
            .iter()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(names, vec!["early", "late"]);
        assert!(engine.find_functions_in_file("src/other.ts").unwrap().is_empty());
        assert!(engine.get_node(&key("late", 40)).unwrap().is_some());
    }
}

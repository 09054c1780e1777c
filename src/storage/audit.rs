//! Read-only consistency audit over a committed store

use rusqlite::{Connection, Params};
use serde::Serialize;
use crate::identity::BusinessKey;
use crate::{Error, Result};

/// Typed tables whose every row must have a `graph_nodes` counterpart
const TYPED_TABLES: &[&str] = &[
    "repositories",
    "files",
    "functions",
    "commits",
    "test_nodes",
    "pull_requests",
];

/// Findings of an audit. Nothing is repaired; the report only describes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    /// Edge keys whose source or resolved target has no node row
    pub orphaned_edges: Vec<String>,
    /// `table:business_key` of typed rows without a generic node row
    pub missing_nodes: Vec<String>,
    /// Surrogate ids shared by more than one business key written by the
    /// audited load
    pub duplicate_ids: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_edges.is_empty() && self.missing_nodes.is_empty() && self.duplicate_ids.is_empty()
    }

    pub fn findings(&self) -> usize {
        self.orphaned_edges.len() + self.missing_nodes.len() + self.duplicate_ids.len()
    }

    /// Escalate findings to an error
    pub fn into_result(self) -> Result<()> {
        if self.is_clean() {
            return Ok(());
        }
        let mut parts = Vec::new();
        if !self.orphaned_edges.is_empty() {
            parts.push(format!("{} orphaned edge(s)", self.orphaned_edges.len()));
        }
        if !self.missing_nodes.is_empty() {
            parts.push(format!("{} typed row(s) without a node", self.missing_nodes.len()));
        }
        if !self.duplicate_ids.is_empty() {
            parts.push(format!("{} duplicated surrogate id(s)", self.duplicate_ids.len()));
        }
        Err(Error::Consistency(parts.join(", ")))
    }
}

impl std::fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_clean() {
            return writeln!(f, "Consistency audit: clean");
        }
        writeln!(f, "Consistency audit: {} finding(s)", self.findings())?;
        for key in &self.orphaned_edges {
            writeln!(f, "  orphaned edge {}", key)?;
        }
        for key in &self.missing_nodes {
            writeln!(f, "  missing node for {}", key)?;
        }
        for id in &self.duplicate_ids {
            writeln!(f, "  duplicate id {}", id)?;
        }
        Ok(())
    }
}

/// Audit the whole store for orphaned edges and typed rows without a node.
///
/// Surrogate ids are reused by later runs, so the store alone cannot tell a
/// duplicate from a legitimate reuse; see [`audit_batch`].
pub fn audit_store(conn: &Connection) -> Result<ConsistencyReport> {
    let mut report = ConsistencyReport::default();

    report.orphaned_edges = collect_strings(
        conn,
        "SELECT e.edge_key FROM graph_edges e
         WHERE NOT EXISTS (SELECT 1 FROM graph_nodes n WHERE n.business_key = e.source_business_key)
            OR (e.target_business_key IS NOT NULL
                AND NOT EXISTS (SELECT 1 FROM graph_nodes n WHERE n.business_key = e.target_business_key))
         ORDER BY e.edge_key",
        [],
    )?;

    for table in TYPED_TABLES {
        let sql = format!(
            "SELECT '{table}:' || t.business_key FROM {table} t
             WHERE NOT EXISTS (SELECT 1 FROM graph_nodes n WHERE n.business_key = t.business_key)
             ORDER BY t.business_key",
        );
        report.missing_nodes.extend(collect_strings(conn, &sql, [])?);
    }

    Ok(report)
}

/// [`audit_store`] plus a duplicate-id check over the nodes one load wrote.
/// Only rows whose business key is in `written` are compared.
pub fn audit_batch<'k>(
    conn: &Connection,
    written: impl IntoIterator<Item = &'k BusinessKey>,
) -> Result<ConsistencyReport> {
    let mut report = audit_store(conn)?;
    let keys: Vec<&str> = written.into_iter().map(BusinessKey::as_str).collect();
    if keys.is_empty() {
        return Ok(report);
    }

    report.duplicate_ids = collect_strings(
        conn,
        "SELECT id FROM graph_nodes
         WHERE business_key IN (SELECT value FROM json_each(?1))
         GROUP BY id
         HAVING COUNT(DISTINCT business_key) > 1
         ORDER BY id",
        [serde_json::to_string(&keys)?],
    )?;

    Ok(report)
}

fn collect_strings(conn: &Connection, sql: &str, params: impl Params) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

//! SQLite storage implementation

use std::path::{Path, PathBuf};
use std::time::Duration;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, params, params_from_iter};
use crate::{Result, Error};
use crate::edge::Edge;
use crate::identity::{BusinessKey, Reference};
use crate::node::{
    CommitProps, FileProps, FunctionProps, Node, NodeKind, NodeProperties, PullRequestProps,
    RepositoryProps, TestProps,
};
use super::schema;
use super::vector::{self, Neighbor, VectorColumn};

/// Columns selected whenever a full node is read back from `graph_nodes`
pub(crate) const NODE_COLUMNS: &str = "n.business_key, n.id, n.node_type, n.repo_id, n.commit_sha, n.file_path, \
     n.line, n.col, n.signature_hash, n.labels, n.properties, n.extra";

/// How a store connection is opened
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Optional sqlite-vec extension; failing to load it only disables native vector search
    pub vector_extension: Option<PathBuf>,
    pub busy_timeout: Duration,
    /// Expected embedding length; vectors of any other length are rejected
    pub embedding_dimensions: Option<usize>,
    /// Open without creating the file
    pub must_exist: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            vector_extension: None,
            busy_timeout: Duration::from_secs(5),
            embedding_dimensions: None,
            must_exist: false,
        }
    }
}

/// SQLite-backed storage for the code graph
pub struct SqliteStore {
    conn: Connection,
    vector_native: bool,
    embedding_dimensions: Option<usize>,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, &StoreOptions::default())
    }

    /// Open a database file with explicit options
    pub fn open_with(path: &Path, options: &StoreOptions) -> Result<Self> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
        if !options.must_exist {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        let conn = Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(options.busy_timeout)?;
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!("opened {} (journal_mode={})", path.display(), journal);
        Self::finish_open(conn, options)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with(&StoreOptions::default())
    }

    pub fn open_in_memory_with(options: &StoreOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::finish_open(conn, options)
    }

    fn finish_open(conn: Connection, options: &StoreOptions) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;

        let mut vector_native = false;
        if let Some(ext) = &options.vector_extension {
            match vector::load_vector_extension(&conn, ext) {
                Ok(()) => vector_native = vector::probe_native_support(&conn),
                Err(e) => tracing::warn!(
                    "vector extension {} unavailable, using in-process similarity: {}",
                    ext.display(),
                    e
                ),
            }
        }

        let store = Self {
            conn,
            vector_native,
            embedding_dimensions: options.embedding_dimensions,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&self) -> Result<()> {
        for stmt in schema::all_schema_statements() {
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    /// Cheap round trip used to verify a connection before a load
    pub fn health_check(&self) -> Result<()> {
        let one: i64 = self.conn.query_row("SELECT 1", [], |row| row.get(0))?;
        if one != 1 {
            return Err(Error::Connection("health probe returned an unexpected value".to_string()));
        }
        Ok(())
    }

    /// Close the connection, surfacing any error SQLite reports on close
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e.into())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn embedding_dimensions(&self) -> Option<usize> {
        self.embedding_dimensions
    }

    /// Whether the native vector-search capability (sqlite-vec) is loaded
    pub fn is_vector_search_available(&self) -> bool {
        self.vector_native
    }

    /// Begin a transaction for a batch load
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Writer over the store's own connection (autocommit)
    pub fn writer(&self) -> GraphWriter<'_> {
        GraphWriter::new(&self.conn, self.embedding_dimensions)
    }

    // ========== Vector Operations ==========

    pub fn store_vector(&self, column: VectorColumn, key: &BusinessKey, vector: &[f32]) -> Result<()> {
        vector::store_vector(&self.conn, column, key, vector, self.embedding_dimensions)
    }

    pub fn get_vector(&self, column: VectorColumn, key: &BusinessKey) -> Result<Option<Vec<f32>>> {
        vector::get_vector(&self.conn, column, key)
    }

    pub fn nearest_neighbors(
        &self,
        column: VectorColumn,
        query: &[f32],
        k: usize,
        min_similarity: f32,
        scan_limit: usize,
    ) -> Result<Vec<Neighbor>> {
        vector::nearest_neighbors(&self.conn, self.vector_native, column, query, k, min_similarity, scan_limit)
    }

    // ========== Node Operations ==========

    /// Get a node by business key
    pub fn get_node(&self, key: &BusinessKey) -> Result<Option<Node>> {
        let sql = format!("SELECT {} FROM graph_nodes n WHERE n.business_key = ?1", NODE_COLUMNS);
        self.conn
            .query_row(&sql, [key.as_str()], row_to_node)
            .optional()
            .map_err(Into::into)
    }

    /// Get the most recently written node carrying a surrogate id
    pub fn find_node_by_id(&self, id: &str) -> Result<Option<Node>> {
        let sql = format!(
            "SELECT {} FROM graph_nodes n WHERE n.id = ?1 ORDER BY n.updated_at DESC LIMIT 1",
            NODE_COLUMNS
        );
        self.conn
            .query_row(&sql, [id], row_to_node)
            .optional()
            .map_err(Into::into)
    }

    /// Find nodes of one kind
    pub fn find_nodes_by_kind(&self, kind: NodeKind) -> Result<Vec<Node>> {
        self.query_nodes("n.node_type = ?1", &[Value::Text(kind.as_str().to_string())], None)
    }

    /// Find all nodes located in a file
    pub fn find_nodes_in_file(&self, path: &str) -> Result<Vec<Node>> {
        self.query_nodes("n.file_path = ?1", &[Value::Text(path.to_string())], None)
    }

    /// Run a node query with a caller-built predicate over `graph_nodes n`.
    /// Results are ordered by business key.
    pub(crate) fn query_nodes(&self, predicate: &str, values: &[Value], limit: Option<usize>) -> Result<Vec<Node>> {
        let mut sql = format!(
            "SELECT {} FROM graph_nodes n WHERE {} ORDER BY n.business_key",
            NODE_COLUMNS, predicate
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        let mut stmt = self.conn.prepare(&sql)?;
        let nodes = stmt
            .query_map(params_from_iter(values.iter()), row_to_node)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// Count all nodes
    pub fn count_nodes(&self) -> Result<usize> {
        self.count_rows("graph_nodes")
    }

    /// Count all edges
    pub fn count_edges(&self) -> Result<usize> {
        self.count_rows("graph_edges")
    }

    /// Count rows in one of the schema's tables
    pub fn count_rows(&self, table: &str) -> Result<usize> {
        if !schema::ALL_TABLES.contains(&table) {
            return Err(Error::InvalidInput(format!("unknown table: {}", table)));
        }
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Count stored vectors across all designated columns
    pub fn count_embeddings(&self) -> Result<usize> {
        let mut total = 0usize;
        for column in VectorColumn::all() {
            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE {} IS NOT NULL",
                column.table, column.column
            );
            let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
            total += count as usize;
        }
        Ok(total)
    }

    /// Completion marker of the last successful load for a repository
    pub fn index_state(&self, repo_id: &BusinessKey) -> Result<Option<IndexState>> {
        self.conn
            .query_row(
                "SELECT repo_id, last_indexed_commit, last_indexed_at, node_count, edge_count
                 FROM index_state WHERE repo_id = ?1",
                [repo_id.as_str()],
                |row| {
                    Ok(IndexState {
                        repo_id: row.get(0)?,
                        last_indexed_commit: row.get(1)?,
                        last_indexed_at: row.get(2)?,
                        node_count: row.get::<_, i64>(3)? as usize,
                        edge_count: row.get::<_, i64>(4)? as usize,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Delete all data (the only way rows ever leave the store)
    pub fn reset(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        for table in schema::ALL_TABLES {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
        }
        tx.commit()?;
        tracing::info!("store reset: all graph tables cleared");
        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        Ok(DbStats {
            nodes: self.count_nodes()?,
            edges: self.count_edges()?,
            embeddings: self.count_embeddings()?,
            repositories: self.count_rows("repositories")?,
            files: self.count_rows("files")?,
            functions: self.count_rows("functions")?,
            vector_search_native: self.vector_native,
        })
    }
}

/// Per-statement writes against any connection or open transaction.
///
/// Every write is an upsert keyed by business key: re-indexing replaces the
/// row's properties and surrogate id but never its identity, and leaves a
/// previously stored embedding in place.
pub struct GraphWriter<'a> {
    conn: &'a Connection,
    embedding_dimensions: Option<usize>,
}

impl<'a> GraphWriter<'a> {
    pub fn new(conn: &'a Connection, embedding_dimensions: Option<usize>) -> Self {
        Self { conn, embedding_dimensions }
    }

    /// Insert or update the generic `graph_nodes` row for a node
    pub fn upsert_graph_node(&self, node: &Node) -> Result<()> {
        let labels = serde_json::to_string(&node.labels)?;
        let extra = serde_json::to_string(&node.extra)?;
        self.conn.execute(
            r#"
            INSERT INTO graph_nodes (business_key, id, node_type, name, repo_id, commit_sha, file_path,
                                     line, col, signature_hash, labels, properties, extra, modified_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(business_key) DO UPDATE SET
                id = excluded.id,
                name = excluded.name,
                repo_id = excluded.repo_id,
                commit_sha = excluded.commit_sha,
                file_path = excluded.file_path,
                line = excluded.line,
                col = excluded.col,
                signature_hash = excluded.signature_hash,
                labels = excluded.labels,
                properties = excluded.properties,
                extra = excluded.extra,
                modified_at = excluded.modified_at,
                updated_at = excluded.updated_at
            "#,
            params![
                node.business_key.as_str(),
                node.id,
                node.kind().as_str(),
                node.name(),
                node.repo_id.as_ref().map(|r| r.as_str()),
                node.commit_sha,
                node.file_path,
                node.line,
                node.col,
                node.signature_hash,
                labels,
                node.properties.to_json()?,
                extra,
                node.modified_at().map(timestamp),
                now(),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_repository(&self, node: &Node, props: &RepositoryProps) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO repositories (business_key, node_id, org, name, url, default_branch, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(business_key) DO UPDATE SET
                node_id = excluded.node_id,
                org = excluded.org,
                name = excluded.name,
                url = excluded.url,
                default_branch = excluded.default_branch,
                updated_at = excluded.updated_at
            "#,
            params![
                node.business_key.as_str(),
                node.id,
                props.org,
                props.name,
                props.url,
                props.default_branch,
                now(),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_file(&self, node: &Node, props: &FileProps) -> Result<()> {
        let repo_id = required_repo(node)?;
        self.conn.execute(
            r#"
            INSERT INTO files (business_key, node_id, repo_id, commit_sha, path, name, extension, language,
                               size_bytes, content_hash, modified_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(business_key) DO UPDATE SET
                node_id = excluded.node_id,
                repo_id = excluded.repo_id,
                commit_sha = excluded.commit_sha,
                path = excluded.path,
                name = excluded.name,
                extension = excluded.extension,
                language = excluded.language,
                size_bytes = excluded.size_bytes,
                content_hash = excluded.content_hash,
                modified_at = excluded.modified_at,
                updated_at = excluded.updated_at
            "#,
            params![
                node.business_key.as_str(),
                node.id,
                repo_id,
                node.commit_sha,
                props.path,
                props.name,
                props.extension,
                props.language.as_ref().map(|l| l.to_lowercase()),
                props.size_bytes.map(|s| s as i64),
                props.content_hash,
                props.modified_at.map(timestamp),
                now(),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_function(&self, node: &Node, props: &FunctionProps) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO functions (business_key, node_id, file_business_key, name, signature, is_async,
                                   is_arrow, is_exported, start_line, end_line, loc, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(business_key) DO UPDATE SET
                node_id = excluded.node_id,
                file_business_key = excluded.file_business_key,
                name = excluded.name,
                signature = excluded.signature,
                is_async = excluded.is_async,
                is_arrow = excluded.is_arrow,
                is_exported = excluded.is_exported,
                start_line = excluded.start_line,
                end_line = excluded.end_line,
                loc = excluded.loc,
                updated_at = excluded.updated_at
            "#,
            params![
                node.business_key.as_str(),
                node.id,
                props.file.as_str(),
                props.name,
                props.signature,
                props.is_async,
                node.kind() == NodeKind::ArrowFunction,
                props.is_exported,
                props.start_line,
                props.end_line,
                props.lines_of_code(),
                now(),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_commit(&self, node: &Node, props: &CommitProps) -> Result<()> {
        let repo_id = required_repo(node)?;
        self.conn.execute(
            r#"
            INSERT INTO commits (business_key, node_id, repo_id, sha, author, committed_at, message,
                                 files_changed, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(business_key) DO UPDATE SET
                node_id = excluded.node_id,
                author = excluded.author,
                committed_at = excluded.committed_at,
                message = excluded.message,
                files_changed = excluded.files_changed,
                updated_at = excluded.updated_at
            "#,
            params![
                node.business_key.as_str(),
                node.id,
                repo_id,
                props.sha,
                props.author,
                timestamp(props.committed_at),
                props.message,
                props.files_changed,
                now(),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_test(&self, node: &Node, props: &TestProps) -> Result<()> {
        let repo_id = required_repo(node)?;
        self.conn.execute(
            r#"
            INSERT INTO test_nodes (business_key, node_id, repo_id, file_business_key, name, framework, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(business_key) DO UPDATE SET
                node_id = excluded.node_id,
                file_business_key = excluded.file_business_key,
                name = excluded.name,
                framework = excluded.framework,
                updated_at = excluded.updated_at
            "#,
            params![
                node.business_key.as_str(),
                node.id,
                repo_id,
                props.file.as_str(),
                props.name,
                props.framework,
                now(),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_pull_request(&self, node: &Node, props: &PullRequestProps) -> Result<()> {
        let repo_id = required_repo(node)?;
        self.conn.execute(
            r#"
            INSERT INTO pull_requests (business_key, node_id, repo_id, number, title, author, state,
                                       created_at, merged_at, url, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(business_key) DO UPDATE SET
                node_id = excluded.node_id,
                title = excluded.title,
                author = excluded.author,
                state = excluded.state,
                merged_at = excluded.merged_at,
                url = excluded.url,
                updated_at = excluded.updated_at
            "#,
            params![
                node.business_key.as_str(),
                node.id,
                repo_id,
                props.number as i64,
                props.title,
                props.author,
                props.state,
                timestamp(props.created_at),
                props.merged_at.map(timestamp),
                props.url,
                now(),
            ],
        )?;
        Ok(())
    }

    /// Type of a persisted node
    pub fn node_kind(&self, key: &BusinessKey) -> Result<Option<NodeKind>> {
        let kind: Option<String> = self
            .conn
            .query_row(
                "SELECT node_type FROM graph_nodes WHERE business_key = ?1",
                [key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        kind.map(|k| k.parse()).transpose()
    }

    /// Insert or update an edge whose endpoints are already resolved
    pub fn upsert_edge(&self, edge: &Edge, source: &BusinessKey, target: &Reference) -> Result<()> {
        let (target_key, target_name) = match target {
            Reference::Resolved(key) => (Some(key.as_str()), None),
            Reference::Unresolved(name) => (None, Some(name.as_str())),
        };
        let properties = serde_json::to_string(&edge.properties)?;
        self.conn.execute(
            r#"
            INSERT INTO graph_edges (edge_key, id, edge_type, source_business_key, target_business_key,
                                     target_name, properties, line, col, dynamic, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(edge_key) DO UPDATE SET
                id = excluded.id,
                properties = excluded.properties,
                dynamic = excluded.dynamic,
                updated_at = excluded.updated_at
            "#,
            params![
                edge.storage_key(source, target),
                edge.id,
                edge.kind.as_str(),
                source.as_str(),
                target_key,
                target_name,
                properties,
                edge.line,
                edge.col,
                edge.dynamic,
                now(),
            ],
        )?;
        Ok(())
    }

    /// Store a node's embedding in the column designated for its kind
    pub fn store_embedding(&self, kind: NodeKind, key: &BusinessKey, embedding: &[f32]) -> Result<()> {
        vector::store_vector(
            self.conn,
            VectorColumn::for_kind(kind),
            key,
            embedding,
            self.embedding_dimensions,
        )
    }

    /// Record the completion marker for one repository
    pub fn record_index_state(
        &self,
        repo_id: &BusinessKey,
        commit: Option<&str>,
        node_count: usize,
        edge_count: usize,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO index_state (repo_id, last_indexed_commit, last_indexed_at, node_count, edge_count)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(repo_id) DO UPDATE SET
                last_indexed_commit = COALESCE(excluded.last_indexed_commit, index_state.last_indexed_commit),
                last_indexed_at = excluded.last_indexed_at,
                node_count = excluded.node_count,
                edge_count = excluded.edge_count
            "#,
            params![repo_id.as_str(), commit, now(), node_count as i64, edge_count as i64],
        )?;
        Ok(())
    }
}

fn required_repo(node: &Node) -> Result<&str> {
    node.repo_id
        .as_ref()
        .map(|r| r.as_str())
        .ok_or_else(|| Error::InvalidInput(format!("{} node '{}' has no repoId", node.kind(), node.id)))
}

/// Timestamps are stored as RFC 3339 UTC strings so that text comparison is
/// chronological
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn now() -> String {
    timestamp(Utc::now())
}

/// Helper to convert a `graph_nodes` row (selected with [`NODE_COLUMNS`]) to a Node
pub(crate) fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<Node> {
    fn conversion<E: std::error::Error + Send + Sync + 'static>(idx: usize, e: E) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    }

    let key: String = row.get(0)?;
    let kind_str: String = row.get(2)?;
    let repo_id: Option<String> = row.get(3)?;
    let labels: String = row.get(9)?;
    let properties: String = row.get(10)?;
    let extra: String = row.get(11)?;

    let kind: NodeKind = kind_str.parse().map_err(|e: Error| conversion(2, e))?;
    let properties = NodeProperties::from_json(kind, &properties).map_err(|e| conversion(10, e))?;

    Ok(Node {
        id: row.get(1)?,
        business_key: key.parse().map_err(|e: Error| conversion(0, e))?,
        properties,
        repo_id: repo_id
            .map(|r| r.parse())
            .transpose()
            .map_err(|e: Error| conversion(3, e))?,
        commit_sha: row.get(4)?,
        file_path: row.get(5)?,
        line: row.get(6)?,
        col: row.get(7)?,
        signature_hash: row.get(8)?,
        labels: serde_json::from_str(&labels).map_err(|e| conversion(9, e))?,
        embedding: None,
        extra: serde_json::from_str(&extra).map_err(|e| conversion(11, e))?,
    })
}

/// Completion marker for a repository
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexState {
    pub repo_id: String,
    pub last_indexed_commit: Option<String>,
    pub last_indexed_at: String,
    pub node_count: usize,
    pub edge_count: usize,
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DbStats {
    pub nodes: usize,
    pub edges: usize,
    pub embeddings: usize,
    pub repositories: usize,
    pub files: usize,
    pub functions: usize,
    pub vector_search_native: bool,
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Repositories: {}", self.repositories)?;
        writeln!(f, "  Files: {}", self.files)?;
        writeln!(f, "  Functions: {}", self.functions)?;
        writeln!(f, "  Nodes: {}", self.nodes)?;
        writeln!(f, "  Edges: {}", self.edges)?;
        writeln!(f, "  Embeddings: {}", self.embeddings)?;
        writeln!(f, "  Native vector search: {}", if self.vector_search_native { "yes" } else { "no" })
    }
}

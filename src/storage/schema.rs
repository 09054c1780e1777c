//! Database schema definitions
//!
//! Typed tables hold the columns each entity kind is queried by and one
//! vector column each. `graph_nodes`/`graph_edges` hold every node and edge
//! keyed by business key, which is what traversal joins on.

/// SQL to create the repositories table
pub const CREATE_REPOSITORIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
    business_key TEXT PRIMARY KEY,
    node_id TEXT NOT NULL,
    org TEXT NOT NULL,
    name TEXT NOT NULL,
    url TEXT,
    default_branch TEXT,
    description_embedding BLOB,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the files table
pub const CREATE_FILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    business_key TEXT PRIMARY KEY,
    node_id TEXT NOT NULL,
    repo_id TEXT NOT NULL REFERENCES repositories(business_key),
    commit_sha TEXT,
    path TEXT NOT NULL,
    name TEXT NOT NULL,
    extension TEXT,
    language TEXT,
    size_bytes INTEGER,
    content_hash TEXT,
    modified_at TEXT,
    content_embedding BLOB,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the functions table (Function and ArrowFunction nodes)
pub const CREATE_FUNCTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS functions (
    business_key TEXT PRIMARY KEY,
    node_id TEXT NOT NULL,
    file_business_key TEXT NOT NULL REFERENCES files(business_key),
    name TEXT NOT NULL,
    signature TEXT,
    is_async INTEGER NOT NULL DEFAULT 0,
    is_arrow INTEGER NOT NULL DEFAULT 0,
    is_exported INTEGER NOT NULL DEFAULT 0,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    loc INTEGER NOT NULL,
    signature_embedding BLOB,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the commits table
pub const CREATE_COMMITS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS commits (
    business_key TEXT PRIMARY KEY,
    node_id TEXT NOT NULL,
    repo_id TEXT NOT NULL REFERENCES repositories(business_key),
    sha TEXT NOT NULL,
    author TEXT NOT NULL,
    committed_at TEXT NOT NULL,
    message TEXT NOT NULL,
    files_changed INTEGER,
    message_embedding BLOB,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the test_nodes table
pub const CREATE_TEST_NODES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS test_nodes (
    business_key TEXT PRIMARY KEY,
    node_id TEXT NOT NULL,
    repo_id TEXT NOT NULL REFERENCES repositories(business_key),
    file_business_key TEXT NOT NULL,
    name TEXT NOT NULL,
    framework TEXT,
    test_embedding BLOB,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the pull_requests table
pub const CREATE_PULL_REQUESTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS pull_requests (
    business_key TEXT PRIMARY KEY,
    node_id TEXT NOT NULL,
    repo_id TEXT NOT NULL REFERENCES repositories(business_key),
    number INTEGER NOT NULL,
    title TEXT NOT NULL,
    author TEXT NOT NULL,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    merged_at TEXT,
    url TEXT,
    body_embedding BLOB,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the generic node table
pub const CREATE_GRAPH_NODES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS graph_nodes (
    business_key TEXT PRIMARY KEY,
    id TEXT NOT NULL,
    node_type TEXT NOT NULL,
    name TEXT NOT NULL,
    repo_id TEXT,
    commit_sha TEXT,
    file_path TEXT,
    line INTEGER,
    col INTEGER,
    signature_hash TEXT,
    labels TEXT NOT NULL DEFAULT '[]',
    properties TEXT NOT NULL,
    extra TEXT NOT NULL DEFAULT '{}',
    modified_at TEXT,
    embedding BLOB,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the generic edge table.
/// `target_business_key` is NULL exactly when `target_name` holds an
/// unresolved symbol.
pub const CREATE_GRAPH_EDGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS graph_edges (
    edge_key TEXT PRIMARY KEY,
    id TEXT NOT NULL,
    edge_type TEXT NOT NULL,
    source_business_key TEXT NOT NULL,
    target_business_key TEXT,
    target_name TEXT,
    properties TEXT NOT NULL DEFAULT '{}',
    line INTEGER,
    col INTEGER,
    dynamic INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    CHECK ((target_business_key IS NULL) <> (target_name IS NULL))
)
"#;

/// SQL to create the run completion marker table
pub const CREATE_INDEX_STATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS index_state (
    repo_id TEXT PRIMARY KEY,
    last_indexed_commit TEXT,
    last_indexed_at TEXT NOT NULL,
    node_count INTEGER NOT NULL,
    edge_count INTEGER NOT NULL
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_files_repo ON files(repo_id)",
    "CREATE INDEX IF NOT EXISTS idx_files_path ON files(path)",
    "CREATE INDEX IF NOT EXISTS idx_functions_file ON functions(file_business_key)",
    "CREATE INDEX IF NOT EXISTS idx_functions_name ON functions(name)",
    "CREATE INDEX IF NOT EXISTS idx_commits_author ON commits(author)",
    "CREATE INDEX IF NOT EXISTS idx_graph_nodes_id ON graph_nodes(id)",
    "CREATE INDEX IF NOT EXISTS idx_graph_nodes_type ON graph_nodes(node_type)",
    "CREATE INDEX IF NOT EXISTS idx_graph_nodes_file ON graph_nodes(file_path)",
    "CREATE INDEX IF NOT EXISTS idx_graph_nodes_repo ON graph_nodes(repo_id)",
    "CREATE INDEX IF NOT EXISTS idx_graph_edges_source ON graph_edges(source_business_key, edge_type)",
    "CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target_business_key, edge_type)",
    "CREATE INDEX IF NOT EXISTS idx_graph_edges_type ON graph_edges(edge_type)",
];

/// Tables cleared by a full reset, children first
pub const ALL_TABLES: &[&str] = &[
    "graph_edges",
    "graph_nodes",
    "functions",
    "test_nodes",
    "pull_requests",
    "commits",
    "files",
    "repositories",
    "index_state",
];

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_REPOSITORIES_TABLE,
        CREATE_FILES_TABLE,
        CREATE_FUNCTIONS_TABLE,
        CREATE_COMMITS_TABLE,
        CREATE_TEST_NODES_TABLE,
        CREATE_PULL_REQUESTS_TABLE,
        CREATE_GRAPH_NODES_TABLE,
        CREATE_GRAPH_EDGES_TABLE,
        CREATE_INDEX_STATE_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}

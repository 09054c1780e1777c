//! Storage Layer - SQLite-backed persistence
//!
//! System of record is SQLite with tables:
//! - repositories, files, functions, commits, test_nodes, pull_requests
//!   (typed rows, one vector column each)
//! - graph_nodes(business_key, id, node_type, properties, ..., embedding)
//! - graph_edges(edge_key, edge_type, source/target business keys, target_name)
//! - index_state(repo_id, last_indexed_commit, counts)

pub mod audit;
pub mod connection;
pub mod schema;
pub mod sqlite;
pub mod vector;

pub use audit::{ConsistencyReport, audit_batch, audit_store};
pub use connection::ConnectionManager;
pub use sqlite::{DbStats, GraphWriter, IndexState, SqliteStore, StoreOptions};
pub use vector::{Neighbor, VectorColumn};

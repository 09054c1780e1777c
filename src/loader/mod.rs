//! Transactional Batch Loader
//!
//! Applies a validated [`GraphBatch`] atomically:
//! 1. Validate (before any connection is opened)
//! 2. Connect through the [`ConnectionManager`] (retry + circuit breaker)
//! 3. One transaction: nodes in dependency order, edges, embeddings,
//!    completion markers
//! 4. Commit, or roll back everything on the first failure
//! 5. Read-only consistency audit of the committed store

pub mod handlers;

pub use handlers::{HandlerRegistry, NodeHandler, default_registry};

use std::time::Instant;
use rusqlite::Connection;
use serde::Serialize;
use crate::edge::{Edge, EdgeTarget};
use crate::graph::GraphBatch;
use crate::identity::{BusinessKey, Reference};
use crate::node::NodeKind;
use crate::storage::{ConnectionManager, ConsistencyReport, GraphWriter, SqliteStore, audit_batch};
use crate::validation::validate_batch;
use crate::{Error, Result};

/// Loader lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoaderState {
    Idle,
    Validating,
    Connecting,
    Transacting,
    Committed,
    RolledBack,
    Disconnected,
}

/// What one committed load wrote
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreLoadResult {
    pub nodes_written: usize,
    pub edges_written: usize,
    /// Edges persisted with an unresolved target
    pub unresolved_edges: usize,
    pub embeddings_written: usize,
    pub repositories_marked: usize,
    pub duration_ms: u64,
    pub audit: ConsistencyReport,
    /// Set when the audit itself could not run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub success: bool,
    pub sqlite: StoreLoadResult,
}

/// Persists graph batches, one transaction per batch.
///
/// Callers must not overlap loads against the same store.
pub struct BatchLoader {
    connections: Option<ConnectionManager>,
    registry: HandlerRegistry,
    batch_size: usize,
    state: LoaderState,
}

impl BatchLoader {
    /// Loader that opens a fresh connection for every load
    pub fn new(connections: ConnectionManager, batch_size: usize) -> Self {
        Self {
            connections: Some(connections),
            registry: default_registry(),
            batch_size: batch_size.max(1),
            state: LoaderState::Idle,
        }
    }

    /// Loader without a connection manager; only [`BatchLoader::load_into`]
    /// and [`BatchLoader::attach_embeddings_into`] are usable
    pub fn detached(batch_size: usize) -> Self {
        Self {
            connections: None,
            registry: default_registry(),
            batch_size: batch_size.max(1),
            state: LoaderState::Idle,
        }
    }

    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    fn transition(&mut self, next: LoaderState) {
        tracing::debug!("loader {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn connect(&mut self) -> Result<SqliteStore> {
        self.transition(LoaderState::Connecting);
        let connections = self
            .connections
            .as_ref()
            .ok_or_else(|| Error::Connection("loader has no connection manager".to_string()))?;
        connections.connect()
    }

    /// Validate and persist a batch through a freshly acquired connection.
    /// The connection is released whatever the outcome.
    pub fn load(&mut self, batch: &GraphBatch) -> Result<LoadReport> {
        self.validate(batch)?;

        let mut store = match self.connect() {
            Ok(store) => store,
            Err(e) => {
                tracing::error!("cannot reach store: {}", e);
                self.transition(LoaderState::Disconnected);
                return Err(e);
            }
        };
        let result = self.apply(&mut store, batch);
        drop(store);
        self.transition(LoaderState::Disconnected);
        result
    }

    /// Validate and persist a batch into an already open store
    pub fn load_into(&mut self, store: &mut SqliteStore, batch: &GraphBatch) -> Result<LoadReport> {
        self.validate(batch)?;
        let result = self.apply(store, batch);
        self.transition(LoaderState::Disconnected);
        result
    }

    fn validate(&mut self, batch: &GraphBatch) -> Result<()> {
        self.transition(LoaderState::Validating);
        let report = validate_batch(batch);
        if !report.valid {
            tracing::warn!("batch rejected with {} validation error(s)", report.errors.len());
            for error in &report.errors {
                tracing::debug!("  {}", error);
            }
            self.transition(LoaderState::RolledBack);
            self.transition(LoaderState::Disconnected);
        }
        report.into_result()
    }

    fn apply(&mut self, store: &mut SqliteStore, batch: &GraphBatch) -> Result<LoadReport> {
        let started = Instant::now();
        let dims = store.embedding_dimensions();
        tracing::info!("loading batch: {} nodes, {} edges", batch.len(), batch.edges().len());

        self.transition(LoaderState::Transacting);
        let tx = store.transaction()?;
        let written = write_batch(&tx, dims, &self.registry, self.batch_size, batch);
        let mut result = match written {
            Ok(result) => {
                tx.commit()?;
                self.transition(LoaderState::Committed);
                result
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::error!("rollback failed: {}", rollback);
                }
                self.transition(LoaderState::RolledBack);
                tracing::error!("batch rolled back: {}", e);
                return Err(e);
            }
        };

        result.duration_ms = started.elapsed().as_millis() as u64;
        match audit_batch(store.conn(), batch.nodes().iter().map(|n| &n.business_key)) {
            Ok(report) => {
                if !report.is_clean() {
                    tracing::warn!("post-load audit: {} finding(s)", report.findings());
                }
                result.audit = report;
            }
            Err(e) => {
                tracing::warn!("post-load audit failed: {}", e);
                result.audit_error = Some(e.to_string());
            }
        }

        tracing::info!(
            "committed {} nodes, {} edges, {} embeddings in {}ms",
            result.nodes_written,
            result.edges_written,
            result.embeddings_written,
            result.duration_ms
        );
        Ok(LoadReport { success: true, sqlite: result })
    }

    /// Attach embeddings to nodes persisted by an earlier load, in one
    /// transaction. Returns how many vectors were written.
    pub fn attach_embeddings(&mut self, embeddings: &[(BusinessKey, Vec<f32>)]) -> Result<usize> {
        let mut store = match self.connect() {
            Ok(store) => store,
            Err(e) => {
                self.transition(LoaderState::Disconnected);
                return Err(e);
            }
        };
        let result = self.attach_embeddings_into(&mut store, embeddings);
        drop(store);
        self.transition(LoaderState::Disconnected);
        result
    }

    pub fn attach_embeddings_into(
        &mut self,
        store: &mut SqliteStore,
        embeddings: &[(BusinessKey, Vec<f32>)],
    ) -> Result<usize> {
        if let Some((key, _)) = embeddings.iter().find(|(_, v)| v.is_empty() || v.iter().any(|x| !x.is_finite())) {
            return Err(Error::DataValidation {
                errors: vec![format!("embedding for '{}' must be a non-empty array of finite numbers", key)],
            });
        }

        let dims = store.embedding_dimensions();
        self.transition(LoaderState::Transacting);
        let tx = store.transaction()?;
        let written = (|| -> Result<usize> {
            let writer = GraphWriter::new(&tx, dims);
            for (key, embedding) in embeddings {
                let kind = writer
                    .node_kind(key)
                    .and_then(|kind| kind.ok_or_else(|| Error::NotFound(format!("no node with business key {}", key))))
                    .map_err(|e| Error::operation(key.as_str(), "embedding", e))?;
                writer
                    .store_embedding(kind, key, embedding)
                    .map_err(|e| Error::operation(key.as_str(), kind.as_str(), e))?;
            }
            Ok(embeddings.len())
        })();

        match written {
            Ok(count) => {
                tx.commit()?;
                self.transition(LoaderState::Committed);
                tracing::info!("attached {} embedding(s)", count);
                Ok(count)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::error!("rollback failed: {}", rollback);
                }
                self.transition(LoaderState::RolledBack);
                Err(e)
            }
        }
    }
}

/// Every write of a batch, against an open transaction
fn write_batch(
    conn: &Connection,
    dims: Option<usize>,
    registry: &HandlerRegistry,
    batch_size: usize,
    batch: &GraphBatch,
) -> Result<StoreLoadResult> {
    let writer = GraphWriter::new(conn, dims);
    let mut result = StoreLoadResult::default();

    // ========== Nodes ==========
    let ordered = batch.nodes_in_load_order();
    let chunks = ordered.len().div_ceil(batch_size);
    for (i, chunk) in ordered.chunks(batch_size).enumerate() {
        for node in chunk {
            registry.write(&writer, node).map_err(|e| {
                tracing::error!("failed to write {} node '{}': {}", node.kind(), node.id, e);
                Error::operation(&node.id, node.kind().as_str(), e)
            })?;
            result.nodes_written += 1;
        }
        tracing::debug!("nodes chunk {}/{} written ({} total)", i + 1, chunks, result.nodes_written);
    }

    // ========== Edges ==========
    for edge in batch.edges() {
        let (source, target) = resolve_endpoints(batch, edge)?;
        writer.upsert_edge(edge, &source, &target).map_err(|e| {
            tracing::error!("failed to write {} edge '{}': {}", edge.kind, edge.id, e);
            Error::operation(&edge.id, edge.kind.as_str(), e)
        })?;
        result.edges_written += 1;
        if !target.is_resolved() {
            result.unresolved_edges += 1;
        }
    }

    // ========== Embeddings ==========
    for node in batch.nodes() {
        let Some(embedding) = &node.embedding else {
            continue;
        };
        writer
            .store_embedding(node.kind(), &node.business_key, embedding)
            .map_err(|e| {
                tracing::error!("failed to store embedding for '{}': {}", node.id, e);
                Error::operation(&node.id, node.kind().as_str(), e)
            })?;
        result.embeddings_written += 1;
    }

    // ========== Completion markers ==========
    for (repo, commit) in batch.repositories() {
        let in_repo = |kind: NodeKind, key: &BusinessKey, repo_id: Option<&BusinessKey>| {
            if kind == NodeKind::Repository {
                *key == repo
            } else {
                repo_id == Some(&repo)
            }
        };
        let node_count = batch
            .nodes()
            .iter()
            .filter(|n| in_repo(n.kind(), &n.business_key, n.repo_id.as_ref()))
            .count();
        let edge_count = batch
            .edges()
            .iter()
            .filter(|e| {
                batch
                    .get_node(&e.source)
                    .is_some_and(|n| in_repo(n.kind(), &n.business_key, n.repo_id.as_ref()))
            })
            .count();
        writer.record_index_state(&repo, commit.as_deref(), node_count, edge_count)?;
        result.repositories_marked += 1;
    }

    Ok(result)
}

fn resolve_endpoints(batch: &GraphBatch, edge: &Edge) -> Result<(BusinessKey, Reference)> {
    let lookup = |id: &str| {
        batch.business_key_of(id).cloned().ok_or_else(|| {
            Error::operation(
                &edge.id,
                edge.kind.as_str(),
                Error::NotFound(format!("edge endpoint '{}' is not in the batch", id)),
            )
        })
    };
    let source = lookup(&edge.source)?;
    let target = match &edge.target {
        EdgeTarget::Node(id) => Reference::Resolved(lookup(id)?),
        EdgeTarget::Unresolved { unresolved } => Reference::Unresolved(unresolved.clone()),
    };
    Ok((source, target))
}

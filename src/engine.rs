//! Engine context: one configured store, its loader and an optional
//! embedding provider, with an explicit open/close lifecycle

use crate::config::EngineConfig;
use crate::graph::GraphBatch;
use crate::identity::BusinessKey;
use crate::loader::{BatchLoader, LoadReport};
use crate::node::Node;
use crate::query::{
    CallGraphEntry, DataFlowStep, Direction, GraphStats, ReachedNode, TraversalEngine, VariableAccess,
    graph_stats,
};
use crate::edge::EdgeKind;
use crate::search::{
    EmbeddingProvider, MetadataFilters, SearchHit, SearchOptions, SearchOrchestrator, embed_missing,
};
use crate::storage::{ConnectionManager, ConsistencyReport, DbStats, SqliteStore, audit_store};
use crate::Result;

/// Owns everything a caller needs to load and query one store.
///
/// File stores are written through a [`ConnectionManager`] (one fresh,
/// health-checked connection per load) and read through a long-lived
/// connection; in-memory stores use the single connection for both.
pub struct Engine {
    config: EngineConfig,
    store: SqliteStore,
    loader: BatchLoader,
    provider: Option<Box<dyn EmbeddingProvider>>,
}

impl Engine {
    pub fn open(config: EngineConfig) -> Result<Self> {
        let options = config.store_options();
        let (store, loader) = if config.is_in_memory() {
            let store = SqliteStore::open_in_memory_with(&options)?;
            (store, BatchLoader::detached(config.batch_size))
        } else {
            let manager = ConnectionManager::new(
                config.database.clone(),
                options,
                config.retry.clone(),
                config.circuit_breaker.clone(),
            );
            let store = manager.connect()?;
            (store, BatchLoader::new(manager, config.batch_size))
        };

        tracing::info!(
            "engine opened on {} (native vector search: {})",
            config.database.display(),
            store.is_vector_search_available()
        );
        Ok(Self { config, store, loader, provider: None })
    }

    pub fn with_provider(mut self, provider: Box<dyn EmbeddingProvider>) -> Self {
        tracing::info!("using embedding provider {}", provider.name());
        self.provider = Some(provider);
        self
    }

    pub fn close(self) -> Result<()> {
        tracing::info!("engine closed on {}", self.config.database.display());
        self.store.close()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn provider(&self) -> Option<&dyn EmbeddingProvider> {
        self.provider.as_deref()
    }

    // ========== Loading ==========

    pub fn load(&mut self, batch: &GraphBatch) -> Result<LoadReport> {
        if self.config.is_in_memory() {
            self.loader.load_into(&mut self.store, batch)
        } else {
            self.loader.load(batch)
        }
    }

    /// Embed nodes that arrived without a vector (when a provider is set),
    /// then load
    pub fn load_with_embeddings(&mut self, mut batch: GraphBatch) -> Result<LoadReport> {
        if let Some(provider) = self.provider.as_deref() {
            embed_missing(provider, batch.nodes_mut())?;
        }
        self.load(&batch)
    }

    pub fn load_json(&mut self, json: &str) -> Result<LoadReport> {
        let batch = GraphBatch::from_json(json)?;
        self.load(&batch)
    }

    pub fn attach_embeddings(&mut self, embeddings: &[(BusinessKey, Vec<f32>)]) -> Result<usize> {
        if self.config.is_in_memory() {
            self.loader.attach_embeddings_into(&mut self.store, embeddings)
        } else {
            self.loader.attach_embeddings(embeddings)
        }
    }

    /// Clear every graph table
    pub fn reset(&mut self) -> Result<()> {
        self.store.reset()
    }

    // ========== Search ==========

    pub fn search(&self) -> SearchOrchestrator<'_> {
        SearchOrchestrator::new(&self.store, self.provider.as_deref(), &self.config.search)
    }

    /// Options seeded from the configured defaults
    pub fn search_options(&self) -> SearchOptions {
        SearchOptions::from_settings(&self.config.search)
    }

    pub fn semantic_search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchHit>> {
        self.search().semantic_search(query, options)
    }

    pub fn hybrid_search(
        &self,
        query: &str,
        filters: &MetadataFilters,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        self.search().hybrid_search(query, filters, options)
    }

    pub fn metadata_search(&self, filters: &MetadataFilters, limit: Option<usize>) -> Result<Vec<Node>> {
        self.search().metadata_search(filters, limit)
    }

    // ========== Traversal ==========

    pub fn traversal(&self) -> TraversalEngine<'_> {
        TraversalEngine::new(&self.store).with_default_depth(self.config.traversal.default_max_depth)
    }

    pub fn get_node(&self, key: &BusinessKey) -> Result<Option<Node>> {
        self.store.get_node(key)
    }

    /// Callees (`Outgoing`), callers (`Incoming`) or both, ordered by
    /// depth then keys
    pub fn call_graph(
        &self,
        start: &BusinessKey,
        direction: Direction,
        max_depth: Option<u32>,
    ) -> Result<Vec<CallGraphEntry>> {
        let traversal = self.traversal();
        match direction {
            Direction::Outgoing => traversal.callees(start, max_depth),
            Direction::Incoming => traversal.callers(start, max_depth),
            Direction::Both => {
                let mut entries = traversal.callees(start, max_depth)?;
                entries.extend(traversal.callers(start, max_depth)?);
                entries.sort_by(|a, b| {
                    a.depth
                        .cmp(&b.depth)
                        .then_with(|| a.caller.cmp(&b.caller))
                        .then_with(|| a.callee.to_string().cmp(&b.callee.to_string()))
                        .then_with(|| a.line.cmp(&b.line))
                });
                entries.dedup();
                Ok(entries)
            }
        }
    }

    pub fn reachable(
        &self,
        start: &BusinessKey,
        kinds: &[EdgeKind],
        direction: Direction,
        max_depth: Option<u32>,
    ) -> Result<Vec<ReachedNode>> {
        self.traversal().reachable(start, kinds, direction, max_depth)
    }

    pub fn find_data_flow(&self, variable: &BusinessKey, max_depth: Option<u32>) -> Result<Vec<DataFlowStep>> {
        self.traversal().find_data_flow(variable, max_depth)
    }

    pub fn find_functions_in_file(&self, path: &str) -> Result<Vec<Node>> {
        self.traversal().find_functions_in_file(path)
    }

    pub fn find_variable_access(&self, variable: &BusinessKey) -> Result<Vec<VariableAccess>> {
        self.traversal().find_variable_access(variable)
    }

    // ========== Maintenance ==========

    pub fn get_graph_stats(&self) -> Result<GraphStats> {
        graph_stats(&self.store)
    }

    pub fn db_stats(&self) -> Result<DbStats> {
        self.store.stats()
    }

    pub fn audit(&self) -> Result<ConsistencyReport> {
        audit_store(self.store.conn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::identity;
    use crate::node::{FileProps, FunctionProps, NodeKind, NodeProperties, RepositoryProps};
    use crate::search::SearchMode;
    use crate::search::embedding::testing::KeywordEmbeddings;

    const DIMS: usize = 32;

    fn calculate_sum_batch(embedding: Option<Vec<f32>>) -> GraphBatch {
        let repo = identity::repository("acme", "billing");
        let file = identity::file(&repo, "abc", "src/math.ts");
        let mut function = Node::new(
            "Fn1",
            identity::function(&file, "calculateSum", 1),
            NodeProperties::Function(FunctionProps {
                file: file.clone(),
                name: "calculateSum".into(),
                signature: Some("function calculateSum(a: number, b: number): number".into()),
                is_async: false,
                is_exported: true,
                start_line: 1,
                end_line: 3,
                loc: None,
                doc: None,
            }),
        )
        .with_repo(repo.clone())
        .with_location("src/math.ts", 1, 0);
        function.embedding = embedding;

        GraphBatch::from_parts(
            vec![
                Node::new(
                    "R1",
                    repo.clone(),
                    NodeProperties::Repository(RepositoryProps {
                        org: "acme".into(),
                        name: "billing".into(),
                        url: None,
                        default_branch: Some("main".into()),
                    }),
                ),
                Node::new(
                    "F1",
                    file,
                    NodeProperties::File(FileProps {
                        path: "src/math.ts".into(),
                        name: "math.ts".into(),
                        extension: Some("ts".into()),
                        language: Some("typescript".into()),
                        size_bytes: Some(120),
                        content_hash: None,
                        modified_at: None,
                    }),
                )
                .with_repo(repo.clone())
                .with_commit("abc"),
                function,
            ],
            vec![Edge::new("F1", "Fn1", EdgeKind::Contains)],
        )
    }

    #[test]
    fn test_end_to_end_semantic_search() {
        let provider = KeywordEmbeddings::new(DIMS);
        let config = EngineConfig {
            embedding_dimensions: Some(DIMS),
            ..EngineConfig::in_memory()
        };
        let mut engine = Engine::open(config).unwrap().with_provider(Box::new(KeywordEmbeddings::new(DIMS)));

        let report = engine.load(&calculate_sum_batch(Some(provider.vector("calculateSum")))).unwrap();
        assert!(report.success);
        assert_eq!(report.sqlite.embeddings_written, 1);

        let options = SearchOptions::default()
            .with_node_types(&[NodeKind::Function])
            .with_min_similarity(0.1);
        let hits = engine.semantic_search("calculate sum", &options).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.id, "Fn1");
        assert_eq!(hits[0].mode, SearchMode::Semantic);

        let functions = engine.find_functions_in_file("src/math.ts").unwrap();
        assert_eq!(functions.len(), 1);
        assert!(engine.audit().unwrap().is_clean());
        engine.close().unwrap();
    }

    #[test]
    fn test_load_with_embeddings_uses_provider() {
        let mut engine = Engine::open(EngineConfig::in_memory())
            .unwrap()
            .with_provider(Box::new(KeywordEmbeddings::new(DIMS)));
        let report = engine.load_with_embeddings(calculate_sum_batch(None)).unwrap();
        assert_eq!(report.sqlite.embeddings_written, 3);
        assert_eq!(engine.store().count_embeddings().unwrap(), 3);
    }

    #[test]
    fn test_attach_embeddings_after_load() {
        let mut engine = Engine::open(EngineConfig::in_memory()).unwrap();
        engine.load(&calculate_sum_batch(None)).unwrap();
        assert_eq!(engine.store().count_embeddings().unwrap(), 0);

        let key = engine.store().find_node_by_id("Fn1").unwrap().unwrap().business_key;
        assert_eq!(engine.attach_embeddings(&[(key, vec![0.5; DIMS])]).unwrap(), 1);
        assert_eq!(engine.store().count_embeddings().unwrap(), 1);
    }

    #[test]
    fn test_file_engine_reads_committed_loads() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            database: dir.path().join("graph.db"),
            ..EngineConfig::default()
        };
        let mut engine = Engine::open(config.clone()).unwrap();
        engine.load(&calculate_sum_batch(None)).unwrap();

        let stats = engine.get_graph_stats().unwrap();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.edges_by_type["CONTAINS"], 1);
        engine.close().unwrap();

        let mut reopened = Engine::open(config).unwrap();
        assert_eq!(reopened.db_stats().unwrap().nodes, 3);
        reopened.reset().unwrap();
        assert_eq!(reopened.store().count_nodes().unwrap(), 0);
    }

    #[test]
    fn test_call_graph_both_directions() {
        let mut engine = Engine::open(EngineConfig::in_memory()).unwrap();
        let mut batch = calculate_sum_batch(None);
        let file = batch.business_key_of("F1").unwrap().clone();
        batch.add_node(Node::new(
            "Fn2",
            identity::function(&file, "total", 10),
            NodeProperties::Function(FunctionProps {
                file,
                name: "total".into(),
                signature: None,
                is_async: false,
                is_exported: false,
                start_line: 10,
                end_line: 12,
                loc: None,
                doc: None,
            }),
        ));
        batch.add_edge(Edge::new("Fn2", "Fn1", EdgeKind::Calls).at(11, 4));
        engine.load(&batch).unwrap();

        let fn1 = batch.business_key_of("Fn1").unwrap().clone();
        let callers = engine.call_graph(&fn1, Direction::Incoming, None).unwrap();
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].line, Some(11));
        assert!(engine.call_graph(&fn1, Direction::Outgoing, None).unwrap().is_empty());
        assert_eq!(engine.call_graph(&fn1, Direction::Both, None).unwrap(), callers);
    }
}

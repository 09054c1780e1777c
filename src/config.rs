use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::resilience::{CircuitConfig, RetryPolicy};
use crate::search::SearchSettings;
use crate::storage::StoreOptions;

/// Database path that selects a private in-memory store
pub const IN_MEMORY: &str = ":memory:";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database: PathBuf,
    /// sqlite-vec loadable extension; vector search runs in-process without it
    pub vector_extension: Option<PathBuf>,
    /// Nodes written per chunk inside the load transaction
    pub batch_size: usize,
    pub embedding_dimensions: Option<usize>,
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitConfig,
    pub search: SearchSettings,
    pub traversal: TraversalSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: default_database_path_in(Path::new(".")),
            vector_extension: None,
            batch_size: 500,
            embedding_dimensions: None,
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitConfig::default(),
            search: SearchSettings::default(),
            traversal: TraversalSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Configuration for a throwaway in-memory store
    pub fn in_memory() -> Self {
        Self {
            database: PathBuf::from(IN_MEMORY),
            retry: RetryPolicy::immediate(1),
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database.as_os_str() == IN_MEMORY
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            vector_extension: self.vector_extension.clone(),
            embedding_dimensions: self.embedding_dimensions,
            ..StoreOptions::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalSettings {
    pub default_max_depth: u32,
}

impl Default for TraversalSettings {
    fn default() -> Self {
        Self { default_max_depth: 3 }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("hikma.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".hikma").join("hikma.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<EngineConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: EngineConfig = toml::from_str(&contents)?;
    if config.batch_size == 0 {
        anyhow::bail!("batch_size in {} must be positive", path.display());
    }
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &EngineConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

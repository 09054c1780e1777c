//! Connection acquisition with retry and circuit breaking

use std::path::{Path, PathBuf};
use crate::resilience::{BreakerState, CircuitBreaker, CircuitConfig, RetryPolicy};
use crate::Result;
use super::sqlite::{SqliteStore, StoreOptions};

/// Hands out health-checked store connections.
///
/// Every attempt opens a fresh connection and probes it; failures count
/// against the shared breaker, so a store that keeps failing is refused
/// without waiting on the retry budget.
pub struct ConnectionManager {
    path: PathBuf,
    options: StoreOptions,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ConnectionManager {
    pub fn new(path: impl Into<PathBuf>, options: StoreOptions, retry: RetryPolicy, circuit: CircuitConfig) -> Self {
        Self {
            path: path.into(),
            options,
            retry,
            breaker: CircuitBreaker::new(circuit),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Open and probe a connection
    pub fn connect(&self) -> Result<SqliteStore> {
        let what = format!("connect to {}", self.path.display());
        self.retry.execute(&self.breaker, &what, |attempt| {
            tracing::debug!("opening {} (attempt {})", self.path.display(), attempt + 1);
            let store = SqliteStore::open_with(&self.path, &self.options)?;
            store.health_check()?;
            Ok(store)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn manager(path: PathBuf, threshold: u32) -> ConnectionManager {
        ConnectionManager::new(
            path,
            StoreOptions::default(),
            RetryPolicy::immediate(2),
            CircuitConfig {
                failure_threshold: threshold,
                open_duration_ms: 60_000,
                ..CircuitConfig::default()
            },
        )
    }

    #[test]
    fn test_connect_creates_store() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path().join("graph.db"), 5);
        let store = mgr.connect().unwrap();
        assert_eq!(store.count_nodes().unwrap(), 0);
        assert_eq!(mgr.breaker_state(), BreakerState::Closed);
    }

    #[test]
    fn test_unreachable_store_surfaces_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path().join("missing").join("graph.db"), 5);
        let err = mgr.connect().err().unwrap();
        assert!(err.is_connection());
        assert!(matches!(err, Error::Connection(ref m) if m.contains("2 attempt")));
    }

    #[test]
    fn test_breaker_opens_on_repeated_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path().join("missing").join("graph.db"), 1);
        assert!(mgr.connect().is_err());
        assert_eq!(mgr.breaker_state(), BreakerState::Open);
        assert!(matches!(mgr.connect(), Err(Error::CircuitOpen { .. })));
    }
}

//! Database backend implementations.
//!
//! Each backend is implemented in its own file and gated behind a feature flag.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ReportingConfig, ResolvedDatasourceConfig};
use crate::dialect::Dialect;
use crate::error::{Result, ReportingError};
use crate::executor::QueryResult;

/// Unified interface for all database backends.
#[async_trait]
pub trait BackendConnection: Send + Sync {
    fn dialect(&self) -> &(dyn Dialect + Send + Sync);
    async fn execute_sql(&self, sql: &str) -> Result<QueryResult>;
}

/// Minimal connection manager keyed by data source name.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    connections: HashMap<String, Arc<dyn BackendConnection>>,
    config: Option<ReportingConfig>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            config: None,
        }
    }

    /// Create a connection manager with configuration.
    pub fn with_config(config: ReportingConfig) -> Self {
        Self {
            connections: HashMap::new(),
            config: Some(config),
        }
    }

    /// Tuning for one data source: its own section over the global defaults.
    pub fn config_for(&self, name: &str) -> ResolvedDatasourceConfig {
        match &self.config {
            Some(cfg) => cfg.for_datasource(name),
            None => ReportingConfig::default().for_datasource(name),
        }
    }

    /// Open a DuckDB database for `name` (in memory when `path` is `None`),
    /// limited by that data source's `duckdb.max_concurrency`, and register it.
    #[cfg(feature = "duckdb")]
    pub fn open_duckdb(
        &mut self,
        name: &str,
        path: Option<&std::path::Path>,
    ) -> Result<DuckDbConnection> {
        let tuning = self.config_for(name);
        let conn = match path {
            Some(path) => DuckDbConnection::open(path)?,
            None => DuckDbConnection::open_in_memory()?,
        }
        .with_config(&tuning.duckdb);
        self.insert(name, Arc::new(conn.clone()));
        Ok(conn)
    }

    /// Connect a PostgreSQL pool for `name` sized by `postgres.pool_size`,
    /// with `query.timeout_ms` as the statement timeout, and register it.
    #[cfg(feature = "postgres")]
    pub fn connect_postgres(&mut self, name: &str, connection_string: &str) -> Result<()> {
        let tuning = self.config_for(name);
        let conn =
            PostgresConnection::with_config(connection_string, &tuning.postgres, &tuning.query)?;
        self.insert(name, Arc::new(conn));
        Ok(())
    }

    pub fn insert(&mut self, name: impl Into<String>, conn: Arc<dyn BackendConnection>) {
        self.connections.insert(name.into(), conn);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn BackendConnection>> {
        self.connections.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&Arc<dyn BackendConnection>> {
        self.get(name).ok_or_else(|| {
            ReportingError::Config(format!("data source '{name}' has no connection"))
        })
    }
}

// Feature-gated backend implementations
#[cfg(feature = "duckdb")]
mod duckdb;
#[cfg(feature = "duckdb")]
pub use duckdb::DuckDbConnection;

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::PostgresConnection;

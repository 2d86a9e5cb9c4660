//! DuckDB backend implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};

use crate::config::DuckDbConfig;
use crate::dialect::DuckDbDialect;
use crate::error::{Result, ReportingError};
use crate::executor::{ColumnMeta, QueryResult};

use super::BackendConnection;

/// DuckDB connection implementing the unified backend trait.
///
/// Pooled connections are cloned from one root connection so they share a
/// single database instance, including in-memory databases.
#[derive(Clone)]
pub struct DuckDbConnection {
    root: Arc<std::sync::Mutex<duckdb::Connection>>,
    dialect: DuckDbDialect,
    limiter: Arc<Semaphore>,
    pool: Arc<Mutex<Vec<duckdb::Connection>>>,
}

impl DuckDbConnection {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening DuckDB database");
        let conn = duckdb::Connection::open(path)
            .map_err(|e| ReportingError::Execution(format!("open duckdb: {e}")))?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = duckdb::Connection::open_in_memory()
            .map_err(|e| ReportingError::Execution(format!("open duckdb: {e}")))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: duckdb::Connection) -> Self {
        let defaults = DuckDbConfig::default();
        Self {
            root: Arc::new(std::sync::Mutex::new(conn)),
            dialect: DuckDbDialect,
            limiter: Arc::new(Semaphore::new(defaults.max_concurrency)),
            pool: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Configure maximum concurrent executions; callers can tune based on hardware.
    pub fn with_max_concurrency(mut self, max_in_flight: usize) -> Self {
        tracing::debug!(max_concurrency = max_in_flight, "configuring DuckDB concurrency");
        self.limiter = Arc::new(Semaphore::new(max_in_flight));
        self
    }

    pub fn with_config(self, config: &DuckDbConfig) -> Self {
        self.with_max_concurrency(config.max_concurrency)
    }

    /// Run statements that return no rows (DDL, fixture loading).
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        let _permit = self.acquire_slot().await?;
        let conn = self.checkout_connection().await?;
        let conn = tokio::task::spawn_blocking(move || -> Result<duckdb::Connection> {
            conn.execute_batch(&sql)?;
            Ok(conn)
        })
        .await
        .map_err(|e| ReportingError::Execution(format!("task join error: {e}")))??;
        self.pool.lock().await.push(conn);
        Ok(())
    }

    async fn acquire_slot(&self) -> Result<SemaphorePermit<'_>> {
        let available = self.limiter.available_permits();
        if available == 0 {
            tracing::debug!("all DuckDB slots in use, waiting for permit");
        }
        self.limiter
            .acquire()
            .await
            .map_err(|e| ReportingError::Execution(format!("limiter closed: {e}")))
    }

    async fn checkout_connection(&self) -> Result<duckdb::Connection> {
        let mut guard = self.pool.lock().await;
        if let Some(conn) = guard.pop() {
            let pool_size = guard.len();
            drop(guard);
            tracing::trace!(pool_remaining = pool_size, "reusing pooled DuckDB connection");
            return Ok(conn);
        }
        drop(guard);
        tracing::debug!("cloning new DuckDB connection");
        let root = self
            .root
            .lock()
            .map_err(|_| ReportingError::Execution("duckdb root connection poisoned".to_string()))?;
        root.try_clone()
            .map_err(|e| ReportingError::Execution(format!("clone duckdb connection: {e}")))
    }
}

#[async_trait]
impl BackendConnection for DuckDbConnection {
    fn dialect(&self) -> &(dyn crate::dialect::Dialect + Send + Sync) {
        &self.dialect
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        let sql = sql.to_string();
        let _permit = self.acquire_slot().await?;
        let conn = self.checkout_connection().await?;
        let pool = self.pool.clone();
        let result =
            tokio::task::spawn_blocking(move || -> Result<(QueryResult, duckdb::Connection)> {
                let start = Instant::now();
                let result = {
                    let mut stmt = conn.prepare(&sql)?;
                    let mut rows_iter = stmt.query([])?;
                    let stmt_ref = rows_iter.as_ref().ok_or_else(|| {
                        ReportingError::Execution("statement missing".to_string())
                    })?;
                    let mut column_names = Vec::new();
                    for idx in 0..stmt_ref.column_count() {
                        let name = stmt_ref
                            .column_name(idx)
                            .map_err(|e| ReportingError::Execution(e.to_string()))?;
                        column_names.push(name.to_string());
                    }
                    let mut rows = Vec::new();
                    while let Some(row) = rows_iter.next()? {
                        let mut map = serde_json::Map::new();
                        for (idx, name) in column_names.iter().enumerate() {
                            let value =
                                crate::executor::duck_value_to_json(row.get_ref(idx)?.to_owned());
                            map.insert(name.clone(), value);
                        }
                        rows.push(map);
                    }
                    let columns: Vec<_> = column_names
                        .into_iter()
                        .map(|name| ColumnMeta { name })
                        .collect();
                    QueryResult { columns, rows }
                };
                tracing::debug!(
                    rows = result.rows.len(),
                    columns = result.columns.len(),
                    ms = start.elapsed().as_millis(),
                    "duckdb execute_sql"
                );
                Ok((result, conn))
            })
            .await
            .map_err(|e| ReportingError::Execution(format!("task join error: {e}")))?;

        let (result, conn) = result?;
        pool.lock().await.push(conn);
        Ok(result)
    }
}

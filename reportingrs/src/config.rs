//! Configuration system for reporting.
//!
//! Supports TOML-based configuration with global defaults and per-datasource overrides.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ReportingError};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// Global defaults applied to all facts and datasources unless overridden.
    pub defaults: GlobalDefaults,

    /// Per-datasource configuration (keyed by datasource name).
    #[serde(default)]
    pub datasources: HashMap<String, DatasourceConfig>,
}

/// Global default settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalDefaults {
    pub reporting: ReportingDefaults,
    pub query: QueryConfig,
}

/// Declaration defaults for facts and reports.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportingDefaults {
    /// Measure column used when a fact does not declare one (default: "value").
    pub default_measure: String,
    /// Label column used when a fact is a dimension of another fact (default: "name").
    pub default_dimension_label: String,
    /// Treat undeclared dimension filters as search terms on every fact.
    pub search_fallback: bool,
    /// Select and group by related-fact identifiers (default: true).
    pub dimension_identifiers: bool,
}

/// Query execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Statement timeout in milliseconds (default: 30000, 0 = none).
    pub timeout_ms: u64,
}

/// Per-datasource configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DatasourceConfig {
    /// Backend adapter name, e.g. "PostgreSQL", "MySQL", "DuckDB".
    pub dialect: Option<String>,

    pub query: Option<QueryConfig>,

    /// DuckDB-specific options.
    pub duckdb: Option<DuckDbConfig>,

    /// PostgreSQL-specific options.
    pub postgres: Option<PostgresConfig>,
}

/// DuckDB-specific configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DuckDbConfig {
    /// Maximum concurrent queries (default: 16).
    pub max_concurrency: usize,
}

/// PostgreSQL-specific configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// Connection pool size (default: 16).
    pub pool_size: usize,
}

// Default implementations

impl Default for ReportingDefaults {
    fn default() -> Self {
        Self {
            default_measure: "value".to_string(),
            default_dimension_label: "name".to_string(),
            search_fallback: false,
            dimension_identifiers: true,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl Default for DuckDbConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self { pool_size: 16 }
    }
}

impl ReportingConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ReportingError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| ReportingError::Config(format!("failed to parse config: {e}")))
    }

    /// Load from default locations (env var, cwd, user config dir, or defaults).
    ///
    /// Search order:
    /// 1. `REPORTING_CONFIG` environment variable
    /// 2. `./reporting.toml` (current directory)
    /// 3. `~/.config/reporting/config.toml` (user config dir)
    /// 4. Built-in defaults
    pub fn load_default() -> Self {
        if let Ok(path) = std::env::var("REPORTING_CONFIG") {
            match Self::from_file(&path) {
                Ok(cfg) => {
                    tracing::info!(path = %path, "loaded config from REPORTING_CONFIG");
                    return cfg;
                }
                Err(e) => tracing::warn!(path = %path, error = %e, "ignoring REPORTING_CONFIG"),
            }
        }

        if let Ok(cfg) = Self::from_file("reporting.toml") {
            tracing::info!("loaded config from ./reporting.toml");
            return cfg;
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("reporting").join("config.toml");
            if let Ok(cfg) = Self::from_file(&user_config) {
                tracing::info!(path = %user_config.display(), "loaded config from user config dir");
                return cfg;
            }
        }

        tracing::debug!("no config file found, using defaults");
        Self::default()
    }

    /// Dialect names declared per datasource.
    pub fn dialects(&self) -> impl Iterator<Item = (&str, &str)> {
        self.datasources
            .iter()
            .filter_map(|(name, ds)| ds.dialect.as_deref().map(|d| (name.as_str(), d)))
    }

    /// Get resolved config for a specific datasource (merges global defaults).
    pub fn for_datasource(&self, name: &str) -> ResolvedDatasourceConfig {
        let ds_config = self.datasources.get(name);
        ResolvedDatasourceConfig::merge(&self.defaults, ds_config)
    }
}

/// Fully resolved configuration for a datasource (no Option fields).
#[derive(Debug, Clone)]
pub struct ResolvedDatasourceConfig {
    pub dialect: Option<String>,
    pub query: QueryConfig,
    pub duckdb: DuckDbConfig,
    pub postgres: PostgresConfig,
}

impl ResolvedDatasourceConfig {
    fn merge(defaults: &GlobalDefaults, override_cfg: Option<&DatasourceConfig>) -> Self {
        match override_cfg {
            Some(ds) => Self {
                dialect: ds.dialect.clone(),
                query: ds.query.clone().unwrap_or_else(|| defaults.query.clone()),
                duckdb: ds.duckdb.clone().unwrap_or_default(),
                postgres: ds.postgres.clone().unwrap_or_default(),
            },
            None => Self {
                dialect: None,
                query: defaults.query.clone(),
                duckdb: DuckDbConfig::default(),
                postgres: PostgresConfig::default(),
            },
        }
    }
}

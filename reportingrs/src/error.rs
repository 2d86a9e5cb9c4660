use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReportingError>;

#[derive(Debug, Error)]
pub enum ReportingError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unknown aggregate '{0}'")]
    UnknownAggregate(String),
    #[error("unsupported aggregate expression: {0}")]
    UnsupportedAggregateExpression(String),
    #[error("unknown fact '{0}'")]
    UnknownFact(String),
    #[error("dimension '{dimension}' not found on fact '{fact}'")]
    UnknownDimension { fact: String, dimension: String },
    #[error("dimension filter '{filter}' not found on fact '{fact}'")]
    UnknownDimensionFilter { fact: String, filter: String },
    #[error("scope '{scope}' is not registered on fact '{fact}'")]
    UnknownScope { fact: String, scope: String },
    #[error("search-term filters requested but no search evaluator is available ({0})")]
    SearchBackendUnavailable(String),
    #[error("invalid search term '{0}'")]
    InvalidSearchTerm(String),
    #[error("dimension '{0}' requested with conflicting definitions")]
    AmbiguousDimension(String),
    #[error("invalid dimension label: {0}")]
    InvalidDimensionLabel(String),
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),
    #[error("unsupported precision '{precision}' for {adapter}")]
    UnsupportedPrecision { precision: String, adapter: String },
    #[error("execution error: {0}")]
    Execution(String),
    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub mod backends;
pub mod config;
pub mod date_trunc;
pub mod dialect;
pub mod dimension;
pub mod error;
pub mod executor;
pub mod filters;
pub mod metric;
pub mod registry;
pub mod report;
pub mod runtime;
pub mod schema;
pub mod sql_ast;

use std::path::Path;

use crate::error::Result;

/// Load fact and metric definitions from disk using the default config locations.
pub fn load_registry<P: AsRef<Path>>(schema_dir: P) -> Result<SchemaRegistry> {
    let config = ReportingConfig::load_default();
    SchemaRegistry::builder()
        .config(&config)
        .search_evaluator(std::sync::Arc::new(filters::PredicateSearch))
        .load_dir(schema_dir)?
        .build()
}

pub use backends::{BackendConnection, ConnectionManager};
pub use config::ReportingConfig;
pub use date_trunc::{adapter_for, DateTruncAdapter, Precision};
pub use dimension::{DimensionRequest, ReportingDimension};
pub use error::ReportingError;
pub use executor::{QueryResult, ResultRow};
pub use filters::{PredicateSearch, QueryScope, ScopeFn, SearchTermEvaluator};
pub use metric::{Aggregate, Metric, MetricDefinition, MetricFilterOp, SortDirection};
pub use registry::{SchemaRegistry, SchemaRegistryBuilder};
pub use report::{Report, ReportOptions};
pub use schema::{Fact, FactBuilder};

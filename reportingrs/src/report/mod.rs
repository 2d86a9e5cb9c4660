//! Reports: a metric plus invocation-time dimensions, filters, and ordering,
//! compiled to SQL and executed once.

mod plan;
mod planner;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde_json::Value;

pub use plan::{BaseRelation, ReportPlan, DERIVED_ALIAS, FACT_ID_ALIAS, MEASURE_ALIAS};

use crate::backends::BackendConnection;
use crate::dialect::Dialect;
use crate::dimension::{merge_dimensions, DimensionRequest, ReportingDimension};
use crate::error::{Result, ReportingError};
use crate::executor::ResultRow;
use crate::filters::{filter_argument, FilterKind, PartitionedFilters, SearchTermEvaluator};
use crate::metric::{DimensionOrder, Metric, MetricFilterOp, SortDirection};
use crate::registry::SchemaRegistry;
use crate::schema::Fact;
use crate::sql_ast::SqlRenderer;

use planner::{build_plan, PlanInput};

/// Invocation-time additions to a metric.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportOptions {
    /// Overrides `defaults.reporting.dimension_identifiers`.
    pub dimension_identifiers: Option<bool>,
    pub dimensions: Vec<DimensionRequest>,
    /// Merged over the metric's filters; values given here win.
    pub dimension_filter: BTreeMap<String, Value>,
    pub metric_filter: BTreeMap<MetricFilterOp, f64>,
    /// Appended to the metric's ordering; a dimension already ordered by the
    /// metric takes the direction given here.
    pub order_by_dimension: Vec<DimensionOrder>,
}

impl ReportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimension_identifiers(mut self, enabled: bool) -> Self {
        self.dimension_identifiers = Some(enabled);
        self
    }

    pub fn dimension(mut self, request: impl Into<DimensionRequest>) -> Self {
        self.dimensions.push(request.into());
        self
    }

    pub fn dimension_filter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.dimension_filter.insert(name.into(), value);
        self
    }

    pub fn metric_filter(mut self, op: MetricFilterOp, value: f64) -> Self {
        self.metric_filter.insert(op, value);
        self
    }

    pub fn order_by(mut self, dimension: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by_dimension
            .push(DimensionOrder::new(dimension, direction));
        self
    }
}

pub struct Report {
    metric: Metric,
    fact: Arc<Fact>,
    dimension_identifiers: bool,
    dimensions: Vec<ReportingDimension>,
    metric_filter: BTreeMap<MetricFilterOp, f64>,
    ordering: Vec<DimensionOrder>,
    filters: PartitionedFilters,
    search: Option<Arc<dyn SearchTermEvaluator>>,
    data: Option<Vec<ResultRow>>,
}

impl std::fmt::Debug for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Report")
            .field("metric", &self.metric.name())
            .field("dimensions", &self.dimensions)
            .field("metric_filter", &self.metric_filter)
            .field("ordering", &self.ordering)
            .field("cached", &self.data.is_some())
            .finish()
    }
}

impl Report {
    pub fn new(registry: &SchemaRegistry, metric: &Metric, options: ReportOptions) -> Result<Self> {
        let fact = metric.fact().clone();

        let mut extra = Vec::with_capacity(options.dimensions.len());
        for request in &options.dimensions {
            extra.push(ReportingDimension::resolve(registry, &fact, request)?);
        }
        let dimensions = merge_dimensions(metric.dimensions(), extra)?;

        let mut requested = metric.dimension_filter().clone();
        requested.extend(options.dimension_filter);
        let mut filters = PartitionedFilters::default();
        for (name, value) in requested {
            let filter = registry.dimension_filter(&fact, &name)?;
            match filter.kind {
                FilterKind::Scope => {
                    let scope = fact.scopes.get(&name).ok_or_else(|| {
                        ReportingError::UnknownScope {
                            fact: fact.name.clone(),
                            scope: name.clone(),
                        }
                    })?;
                    scope.check_argument(&name, filter_argument(&value))?;
                    filters.scopes.push((scope.clone(), value));
                }
                FilterKind::Custom(f) => filters.custom.push((f, value)),
                FilterKind::Search => {
                    filters.search.insert(name, value);
                }
            }
        }

        let mut metric_filter = metric.metric_filter().clone();
        metric_filter.extend(options.metric_filter);

        let mut ordering = metric.order_by_dimension().to_vec();
        for order in options.order_by_dimension {
            match ordering.iter_mut().find(|o| o.dimension == order.dimension) {
                Some(existing) => existing.direction = order.direction,
                None => ordering.push(order),
            }
        }

        let dimension_identifiers = options
            .dimension_identifiers
            .unwrap_or(registry.defaults().dimension_identifiers);

        tracing::debug!(
            metric = %metric.name(),
            dimensions = dimensions.len(),
            filters = !filters.is_empty(),
            "report prepared"
        );

        Ok(Self {
            metric: metric.clone(),
            fact,
            dimension_identifiers,
            dimensions,
            metric_filter,
            ordering,
            filters,
            search: registry.search_evaluator().cloned(),
            data: None,
        })
    }

    /// Build a report for a metric registered by name.
    pub fn for_metric(
        registry: &SchemaRegistry,
        metric_name: &str,
        options: ReportOptions,
    ) -> Result<Self> {
        let metric = registry.metric(metric_name)?;
        Self::new(registry, metric, options)
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    pub fn fact(&self) -> &Fact {
        &self.fact
    }

    pub fn dimensions(&self) -> &[ReportingDimension] {
        &self.dimensions
    }

    pub fn metric_filter(&self) -> &BTreeMap<MetricFilterOp, f64> {
        &self.metric_filter
    }

    pub fn ordering(&self) -> &[DimensionOrder] {
        &self.ordering
    }

    pub fn plan(&self) -> Result<ReportPlan> {
        build_plan(&PlanInput {
            fact: &self.fact,
            metric_name: self.metric.name(),
            aggregate: self.metric.aggregate(),
            aggregate_expression: self.metric.aggregate_expression(),
            dimensions: &self.dimensions,
            identifiers: self.dimension_identifiers,
            metric_filter: &self.metric_filter,
            ordering: &self.ordering,
            filters: &self.filters,
            search: self.search.as_deref(),
        })
    }

    /// SQL for this report in the given dialect.
    pub fn statement(&self, dialect: &dyn Dialect) -> Result<String> {
        let query = self.plan()?.into_select_query();
        SqlRenderer::new(dialect).render_select(&query)
    }

    /// Execute once and cache the rows; later calls return the cached rows.
    pub async fn run(&mut self, conn: &dyn BackendConnection) -> Result<&[ResultRow]> {
        if self.data.is_none() {
            let sql = self.statement(conn.dialect())?;
            let start = Instant::now();
            tracing::debug!(metric = %self.metric.name(), sql_len = sql.len(), "executing report");
            tracing::trace!(sql = %sql, "report sql");
            let result = conn.execute_sql(&sql).await?;
            let mut rows = result.rows;
            self.apply_label_callbacks(&mut rows);
            tracing::info!(
                metric = %self.metric.name(),
                rows = rows.len(),
                ms = start.elapsed().as_millis(),
                "report executed"
            );
            self.data = Some(rows);
        }
        Ok(self.data.as_deref().unwrap_or_default())
    }

    pub fn is_cached(&self) -> bool {
        self.data.is_some()
    }

    fn apply_label_callbacks(&self, rows: &mut [ResultRow]) {
        for dim in &self.dimensions {
            let Some(callback) = dim.label_callback() else {
                continue;
            };
            for row in rows.iter_mut() {
                if let Some(value) = row.get_mut(&dim.name) {
                    *value = callback.call(value);
                }
            }
        }
    }
}

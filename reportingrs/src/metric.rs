//! Metrics: a named aggregate over a fact with default dimensions, filters,
//! thresholds, and ordering.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dimension::{merge_dimensions, DimensionRequest, ReportingDimension};
use crate::error::{Result, ReportingError};
use crate::registry::SchemaRegistry;
use crate::schema::Fact;
use crate::sql_ast::SqlBinaryOperator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Count,
    Sum,
    Max,
    Min,
    Avg,
}

impl Aggregate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Max => "max",
            Aggregate::Min => "min",
            Aggregate::Avg => "avg",
        }
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            Aggregate::Count => "COUNT",
            Aggregate::Sum => "SUM",
            Aggregate::Max => "MAX",
            Aggregate::Min => "MIN",
            Aggregate::Avg => "AVG",
        }
    }

    /// Aggregates that accept a fact aggregate expression.
    pub fn accepts_expression(&self) -> bool {
        matches!(self, Aggregate::Count | Aggregate::Sum)
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregate {
    type Err = ReportingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(Aggregate::Count),
            "sum" => Ok(Aggregate::Sum),
            "max" => Ok(Aggregate::Max),
            "min" => Ok(Aggregate::Min),
            "avg" => Ok(Aggregate::Avg),
            _ => Err(ReportingError::UnknownAggregate(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Comparison applied to the aggregate in HAVING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricFilterOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl MetricFilterOp {
    pub fn sql_operator(&self) -> SqlBinaryOperator {
        match self {
            MetricFilterOp::Eq => SqlBinaryOperator::Eq,
            MetricFilterOp::Gt => SqlBinaryOperator::Gt,
            MetricFilterOp::Gte => SqlBinaryOperator::Gte,
            MetricFilterOp::Lt => SqlBinaryOperator::Lt,
            MetricFilterOp::Lte => SqlBinaryOperator::Lte,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionOrder {
    pub dimension: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl DimensionOrder {
    pub fn new(dimension: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            dimension: dimension.into(),
            direction,
        }
    }
}

fn default_aggregate() -> String {
    "count".to_string()
}

/// Metric declaration, as written in YAML or built in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricDefinition {
    pub name: String,
    pub fact: String,
    #[serde(default = "default_aggregate")]
    pub aggregate: String,
    /// Alias of an aggregate expression declared on the fact.
    pub aggregate_expression: Option<String>,
    #[serde(default)]
    pub dimensions: Vec<DimensionRequest>,
    #[serde(default)]
    pub dimension_filter: BTreeMap<String, Value>,
    #[serde(default)]
    pub metric_filter: BTreeMap<MetricFilterOp, f64>,
    #[serde(default)]
    pub order_by_dimension: Vec<DimensionOrder>,
}

impl MetricDefinition {
    pub fn new(name: impl Into<String>, fact: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fact: fact.into(),
            aggregate: default_aggregate(),
            aggregate_expression: None,
            dimensions: Vec::new(),
            dimension_filter: BTreeMap::new(),
            metric_filter: BTreeMap::new(),
            order_by_dimension: Vec::new(),
        }
    }

    pub fn aggregate(mut self, aggregate: impl Into<String>) -> Self {
        self.aggregate = aggregate.into();
        self
    }

    pub fn aggregate_expression(mut self, alias: impl Into<String>) -> Self {
        self.aggregate_expression = Some(alias.into());
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

/// A fact aggregate expression selected by a metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateExpression {
    pub alias: String,
    pub sql: String,
}

#[derive(Debug, Clone)]
pub struct Metric {
    name: String,
    fact: Arc<Fact>,
    aggregate: Aggregate,
    aggregate_expression: Option<AggregateExpression>,
    dimensions: Vec<ReportingDimension>,
    dimension_filter: BTreeMap<String, Value>,
    metric_filter: BTreeMap<MetricFilterOp, f64>,
    order_by_dimension: Vec<DimensionOrder>,
}

impl Metric {
    /// Validate a definition against the registry's facts.
    pub fn new(registry: &SchemaRegistry, def: MetricDefinition) -> Result<Self> {
        let fact = registry.fact(&def.fact)?.clone();

        let mut resolved = Vec::with_capacity(def.dimensions.len());
        for request in &def.dimensions {
            resolved.push(ReportingDimension::resolve(registry, &fact, request)?);
        }
        let dimensions = merge_dimensions(&[], resolved)?;

        let aggregate: Aggregate = def.aggregate.parse()?;

        let aggregate_expression = match def.aggregate_expression {
            None => None,
            Some(_) if !aggregate.accepts_expression() => {
                return Err(ReportingError::UnsupportedAggregateExpression(format!(
                    "metric '{}' uses {aggregate}; aggregate expressions need count or sum",
                    def.name
                )))
            }
            Some(alias) => {
                let sql = fact.aggregate_expressions.get(&alias).ok_or_else(|| {
                    ReportingError::UnsupportedAggregateExpression(format!(
                        "'{alias}' is not an aggregate expression of fact '{}'",
                        fact.name
                    ))
                })?;
                Some(AggregateExpression {
                    sql: sql.clone(),
                    alias,
                })
            }
        };

        for name in def.dimension_filter.keys() {
            registry.dimension_filter(&fact, name)?;
        }

        tracing::debug!(
            metric = %def.name,
            fact = %fact.name,
            aggregate = %aggregate,
            dimensions = dimensions.len(),
            "metric validated"
        );

        Ok(Self {
            name: def.name,
            fact,
            aggregate,
            aggregate_expression,
            dimensions,
            dimension_filter: def.dimension_filter,
            metric_filter: def.metric_filter,
            order_by_dimension: def.order_by_dimension,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fact(&self) -> &Arc<Fact> {
        &self.fact
    }

    pub fn aggregate(&self) -> Aggregate {
        self.aggregate
    }

    pub fn aggregate_expression(&self) -> Option<&AggregateExpression> {
        self.aggregate_expression.as_ref()
    }

    pub fn dimensions(&self) -> &[ReportingDimension] {
        &self.dimensions
    }

    pub fn dimension_filter(&self) -> &BTreeMap<String, Value> {
        &self.dimension_filter
    }

    pub fn metric_filter(&self) -> &BTreeMap<MetricFilterOp, f64> {
        &self.metric_filter
    }

    pub fn order_by_dimension(&self) -> &[DimensionOrder] {
        &self.order_by_dimension
    }
}

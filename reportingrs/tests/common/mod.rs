#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;

use reporting::backends::{BackendConnection, DuckDbConnection};
use reporting::dialect::Dialect;
use reporting::error::Result;
use reporting::executor::QueryResult;
use reporting::sql_ast::{Join, SqlBinaryOperator, SqlExpr, SqlJoinType, TableRef};
use reporting::{
    FactBuilder, MetricDefinition, MetricFilterOp, PredicateSearch, SchemaRegistry,
    SchemaRegistryBuilder, ScopeFn, SortDirection,
};

pub const FIXTURES: &str = "
CREATE TABLE series (id INTEGER PRIMARY KEY, name VARCHAR, universe VARCHAR);
CREATE TABLE figures (
    id INTEGER PRIMARY KEY,
    name VARCHAR,
    kind VARCHAR,
    price DOUBLE,
    series_id INTEGER,
    released_on TIMESTAMP,
    retired BOOLEAN
);
CREATE TABLE figure_tags (id INTEGER PRIMARY KEY, figure_id INTEGER, name VARCHAR);
INSERT INTO series VALUES
    (1, 'Zelda', 'Hyrule'),
    (2, 'Mario', 'Mushroom Kingdom'),
    (3, 'Splatoon', 'Inkopolis');
INSERT INTO figures VALUES
    (1, 'Link', 'amiibo figure', 15.0, 1, '2018-01-15 10:00:00', false),
    (2, 'Zelda', 'amiibo card', 5.0, 1, '2018-04-02 00:00:00', false),
    (3, 'Ganon', 'amiibo card', 5.0, 1, '2018-07-20 08:30:00', true),
    (4, 'Mario', 'amiibo figure', 12.0, 2, '2018-07-01 00:00:00', false),
    (5, 'Luigi', 'amiibo card', 5.0, 2, '2018-10-11 00:00:00', false),
    (6, 'Inkling', 'amiibo figure', 14.0, 3, '2019-02-03 00:00:00', false);
INSERT INTO figure_tags VALUES
    (1, 1, 'hero'),
    (2, 1, 'sword'),
    (3, 2, 'princess'),
    (4, 4, 'hero'),
    (5, 4, 'plumber'),
    (6, 6, 'squid'),
    (7, 3, 'villain'),
    (8, 3, 'boss');
";

/// Joins figure_tags and keeps figures carrying any of the given tag names.
pub fn tagged_filter() -> ScopeFn {
    ScopeFn::new(|scope, arg| {
        let names = match arg {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        };
        let join = Join {
            join_type: SqlJoinType::Inner,
            table: TableRef::table("figure_tags"),
            on: vec![SqlExpr::binary(
                SqlBinaryOperator::Eq,
                scope.column("id"),
                SqlExpr::column("figure_tags", "figure_id"),
            )],
        };
        Ok(scope.join(join).filter(SqlExpr::InList {
            expr: Box::new(SqlExpr::column("figure_tags", "name")),
            list: names.into_iter().map(SqlExpr::Literal).collect(),
            negated: false,
        }))
    })
}

pub fn figures() -> FactBuilder {
    FactBuilder::new("figures")
        .data_source("warehouse")
        .measure("price")
        .columns(["name", "kind", "price"])
        .column_dimension("kind", "kind")
        .time_dimension("released_on", "released_on")
        .belongs_to("series", "series", "series_id")
        .has_many("tags", "figure_tags", "figure_id")
        .aggregate_expression(
            "kind_is_card",
            "CASE WHEN figures.kind = 'amiibo card' THEN 1 ELSE NULL END",
        )
        .aggregate_expression(
            "twenty_when_card",
            "CASE WHEN figures.kind = 'amiibo card' THEN 20 ELSE NULL END",
        )
        .aggregate_expression(
            "twenty_or_zero_when_card",
            "CASE WHEN figures.kind = 'amiibo card' THEN 20 ELSE 0 END",
        )
        .scope_sql("active", "figures.retired = false")
        .scope_sql("of_kind", "figures.kind = :value")
        .scope_filter("active")
        .scope_filter("of_kind")
        .custom_filter("tagged", tagged_filter())
        .search_filter("name_cont")
        .search_filter("price_gteq")
}

pub fn series() -> FactBuilder {
    FactBuilder::new("series")
        .data_source("warehouse")
        .columns(["name", "universe"])
        .column_dimension("universe", "universe")
}

pub fn figure_tags() -> FactBuilder {
    FactBuilder::new("figure_tags")
        .data_source("warehouse")
        .column_dimension("name", "name")
}

pub fn metrics() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition::new("figure_count", "figures"),
        MetricDefinition::new("figures_by_kind", "figures").dimension("kind"),
        MetricDefinition::new("card_count", "figures").aggregate_expression("kind_is_card"),
        MetricDefinition::new("card_value", "figures")
            .aggregate("sum")
            .aggregate_expression("twenty_when_card"),
        MetricDefinition::new("total_price", "figures").aggregate("sum"),
        MetricDefinition::new("max_price", "figures").aggregate("max"),
        MetricDefinition::new("card_value_by_kind", "figures")
            .aggregate("sum")
            .aggregate_expression("twenty_or_zero_when_card")
            .dimension("kind")
            .order_by("kind", SortDirection::Asc),
        MetricDefinition::new("card_count_by_kind", "figures")
            .aggregate_expression("kind_is_card")
            .dimension("kind")
            .order_by("kind", SortDirection::Asc),
        MetricDefinition::new("cards_by_kind", "figures")
            .dimension("kind")
            .dimension_filter("of_kind", Value::from("amiibo card")),
        MetricDefinition::new("busy_series", "figures")
            .dimension("series")
            .metric_filter(MetricFilterOp::Gt, 1.0)
            .order_by("series", SortDirection::Asc),
    ]
}

pub fn registry_builder() -> SchemaRegistryBuilder {
    let mut builder = SchemaRegistry::builder()
        .data_source("warehouse", "DuckDB")
        .search_evaluator(Arc::new(PredicateSearch))
        .fact(series())
        .fact(figure_tags())
        .fact(figures());
    for metric in metrics() {
        builder = builder.metric(metric);
    }
    builder
}

pub fn registry() -> SchemaRegistry {
    registry_builder().build().expect("fixture registry builds")
}

pub async fn duckdb() -> DuckDbConnection {
    let conn = DuckDbConnection::open_in_memory().expect("open in-memory duckdb");
    conn.execute_batch(FIXTURES).await.expect("load fixtures");
    conn
}

/// Wraps a connection and counts executed statements.
pub struct CountingConnection<C> {
    pub inner: C,
    pub executions: AtomicUsize,
}

impl<C> CountingConnection<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            executions: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl<C: BackendConnection> BackendConnection for CountingConnection<C> {
    fn dialect(&self) -> &(dyn Dialect + Send + Sync) {
        self.inner.dialect()
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.inner.execute_sql(sql).await
    }
}

/// Pull `(dimension, metric)` pairs out of report rows.
pub fn pairs(rows: &[serde_json::Map<String, Value>], dimension: &str, metric: &str) -> Vec<(Value, Value)> {
    rows.iter()
        .map(|row| {
            (
                row.get(dimension).cloned().unwrap_or(Value::Null),
                row.get(metric).cloned().unwrap_or(Value::Null),
            )
        })
        .collect()
}

mod common;

use serde_json::json;

use reporting::error::ReportingError;
use reporting::{
    DimensionRequest, FactBuilder, Metric, MetricDefinition, Report, ReportOptions,
    SchemaRegistry,
};

fn metric(def: MetricDefinition) -> Result<Metric, ReportingError> {
    Metric::new(&common::registry(), def)
}

#[test]
fn unknown_aggregate_is_rejected() {
    let err = metric(MetricDefinition::new("m", "figures").aggregate("median")).unwrap_err();
    assert!(matches!(err, ReportingError::UnknownAggregate(a) if a == "median"));
}

#[test]
fn expressions_are_limited_to_count_and_sum() {
    let err = metric(
        MetricDefinition::new("m", "figures")
            .aggregate("max")
            .aggregate_expression("kind_is_card"),
    )
    .unwrap_err();
    assert!(matches!(err, ReportingError::UnsupportedAggregateExpression(_)));

    assert!(metric(
        MetricDefinition::new("m", "figures")
            .aggregate("sum")
            .aggregate_expression("kind_is_card"),
    )
    .is_ok());
}

#[test]
fn undeclared_aggregate_expression_is_rejected() {
    let err = metric(MetricDefinition::new("m", "figures").aggregate_expression("nope"))
        .unwrap_err();
    assert!(matches!(err, ReportingError::UnsupportedAggregateExpression(_)));
}

#[test]
fn unknown_fact_and_dimension_are_rejected() {
    assert!(matches!(
        metric(MetricDefinition::new("m", "toys")),
        Err(ReportingError::UnknownFact(_))
    ));
    assert!(matches!(
        metric(MetricDefinition::new("m", "figures").dimension("colour")),
        Err(ReportingError::UnknownDimension { dimension, .. }) if dimension == "colour"
    ));
}

#[test]
fn undeclared_dimension_filter_is_rejected() {
    let err = metric(MetricDefinition::new("m", "figures").dimension_filter("bogus", json!(1)))
        .unwrap_err();
    assert!(matches!(err, ReportingError::UnknownDimensionFilter { filter, .. } if filter == "bogus"));

    let registry = common::registry();
    let err = Report::for_metric(
        &registry,
        "figure_count",
        ReportOptions::new().dimension_filter("bogus", json!(1)),
    )
    .unwrap_err();
    assert!(matches!(err, ReportingError::UnknownDimensionFilter { .. }));
}

#[test]
fn global_search_fallback_accepts_undeclared_filters() {
    let config = reporting::ReportingConfig::from_toml(
        "[defaults.reporting]\nsearch_fallback = true\n",
    )
    .unwrap();
    let registry = common::registry_builder()
        .config(&config)
        .data_source("warehouse", "DuckDB")
        .build()
        .unwrap();
    let report = Report::for_metric(
        &registry,
        "figure_count",
        ReportOptions::new().dimension_filter("kind_eq", json!("amiibo card")),
    )
    .unwrap();
    let sql = report
        .statement(&reporting::dialect::PostgresDialect)
        .unwrap();
    assert!(sql.ends_with(r#"WHERE ("figures"."kind" = 'amiibo card')"#));
}

#[test]
fn non_time_dimension_rejects_a_precision_label() {
    let err = metric(
        MetricDefinition::new("m", "figures").dimension(DimensionRequest::labeled("kind", "month")),
    )
    .unwrap_err();
    assert!(matches!(err, ReportingError::InvalidDimensionLabel(_)));
}

#[test]
fn unknown_precision_is_rejected() {
    let err = metric(
        MetricDefinition::new("m", "figures")
            .dimension(DimensionRequest::labeled("released_on", "fortnight")),
    )
    .unwrap_err();
    assert!(matches!(err, ReportingError::InvalidDimensionLabel(_)));
}

#[test]
fn related_label_must_be_a_column_of_the_related_fact() {
    let err = metric(
        MetricDefinition::new("m", "figures")
            .dimension(DimensionRequest::labeled("series", "budget")),
    )
    .unwrap_err();
    assert!(matches!(err, ReportingError::InvalidDimensionLabel(_)));
}

fn registry_on(dialect: &str) -> SchemaRegistry {
    SchemaRegistry::builder()
        .data_source("legacy", dialect)
        .fact(
            FactBuilder::new("events")
                .data_source("legacy")
                .time_dimension("created_at", "created_at"),
        )
        .build()
        .unwrap()
}

#[test]
fn sqlite_cannot_group_by_time_precision() {
    let registry = registry_on("SQLite");
    let err = Metric::new(
        &registry,
        MetricDefinition::new("events_by_month", "events")
            .dimension(DimensionRequest::labeled("created_at", "month")),
    )
    .unwrap_err();
    assert!(matches!(err, ReportingError::InvalidDimensionLabel(_)));
}

#[test]
fn mysql_cannot_group_by_decade() {
    let registry = registry_on("MySQL");
    let err = Metric::new(
        &registry,
        MetricDefinition::new("events_by_decade", "events")
            .dimension(DimensionRequest::labeled("created_at", "decade")),
    )
    .unwrap_err();
    assert!(matches!(err, ReportingError::InvalidDimensionLabel(_)));

    assert!(Metric::new(
        &registry,
        MetricDefinition::new("events_by_year", "events")
            .dimension(DimensionRequest::labeled("created_at", "year")),
    )
    .is_ok());
}

#[test]
fn conflicting_dimension_requests_are_ambiguous() {
    let registry = common::registry();
    let monthly = Metric::new(
        &registry,
        MetricDefinition::new("monthly", "figures")
            .dimension(DimensionRequest::labeled("released_on", "month")),
    )
    .unwrap();

    let err = Report::new(
        &registry,
        &monthly,
        ReportOptions::new().dimension(DimensionRequest::labeled("released_on", "quarter")),
    )
    .unwrap_err();
    assert!(matches!(err, ReportingError::AmbiguousDimension(name) if name == "released_on"));

    let same = Report::new(
        &registry,
        &monthly,
        ReportOptions::new().dimension(DimensionRequest::labeled("released_on", "month")),
    )
    .unwrap();
    assert_eq!(same.dimensions().len(), 1);
}

#[test]
fn unknown_metric_is_rejected() {
    let registry = common::registry();
    let err = Report::for_metric(&registry, "nope", ReportOptions::new()).unwrap_err();
    assert!(matches!(err, ReportingError::UnknownMetric(_)));
}

#[test]
fn argumentless_scope_rejects_a_false_argument() {
    let registry = common::registry();
    let err = Report::for_metric(
        &registry,
        "figure_count",
        ReportOptions::new().dimension_filter("active", json!(false)),
    )
    .unwrap_err();
    assert!(matches!(err, ReportingError::Validation(_)));

    assert!(Report::for_metric(
        &registry,
        "figure_count",
        ReportOptions::new().dimension_filter("active", json!("true")),
    )
    .is_ok());
}

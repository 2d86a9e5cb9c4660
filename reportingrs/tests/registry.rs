//! Integration tests for loading facts and metrics from YAML.

use std::fs;
use std::path::Path;

use reporting::dialect::DuckDbDialect;
use reporting::error::ReportingError;
use reporting::{Report, ReportOptions, ReportingConfig, SchemaRegistry};

const FIGURES: &str = r#"
name: figures
data_source: warehouse
measure: price
columns: [name, kind]
dimensions:
  kind: kind
  released_on: { column: released_on, time: true }
  series: { belongs_to: series, foreign_key: series_id }
dimension_filters:
  of_kind: scope
scopes:
  of_kind: "figures.kind = :value"
aggregate_expressions:
  kind_is_card: "CASE WHEN figures.kind = 'amiibo card' THEN 1 ELSE NULL END"
"#;

const SERIES: &str = r#"
name: series
data_source: warehouse
dimension_label: title
columns: [title]
"#;

const CARDS_BY_SERIES: &str = r#"
name: cards_by_series
fact: figures
aggregate: count
aggregate_expression: kind_is_card
dimensions: [series, {released_on: year}]
metric_filter: { gte: 1 }
order_by_dimension:
  - { dimension: series, direction: desc }
"#;

fn write_schema(root: &Path, metric: &str) {
    fs::create_dir_all(root.join("facts")).unwrap();
    fs::create_dir_all(root.join("metrics")).unwrap();
    fs::write(root.join("facts/figures.yml"), FIGURES).unwrap();
    fs::write(root.join("facts/series.yaml"), SERIES).unwrap();
    fs::write(root.join("metrics/cards.yml"), metric).unwrap();
}

fn config() -> ReportingConfig {
    ReportingConfig::from_toml("[datasources.warehouse]\ndialect = \"DuckDB\"\n").unwrap()
}

#[test]
fn loads_facts_and_metrics_from_yaml() {
    let dir = tempfile::tempdir().unwrap();
    write_schema(dir.path(), CARDS_BY_SERIES);

    let registry = SchemaRegistry::load_from_dir(dir.path(), &config()).unwrap();
    assert_eq!(registry.facts().count(), 2);

    let series = registry.fact("series").unwrap();
    assert_eq!(series.dimension_label, "title");
    assert_eq!(series.measure, "value");

    let metric = registry.metric("cards_by_series").unwrap();
    assert_eq!(metric.dimensions().len(), 2);

    let report = Report::new(&registry, metric, ReportOptions::new()).unwrap();
    let sql = report.statement(&DuckDbDialect).unwrap();
    assert!(sql.contains(r#""series"."title" AS "series""#));
    assert!(sql.contains(r#"date_trunc('year', "figures"."released_on") AS "released_on""#));
    assert!(sql.ends_with(r#"ORDER BY "series"."title" DESC"#));
}

#[test]
fn report_options_deserialize_from_json() {
    let options: ReportOptions = serde_json::from_str(
        r#"{
            "dimensions": ["kind"],
            "dimension_filter": {"of_kind": "amiibo card"},
            "metric_filter": {"lt": 10},
            "dimension_identifiers": false
        }"#,
    )
    .unwrap();
    assert_eq!(options.dimensions.len(), 1);
    assert_eq!(options.dimension_identifiers, Some(false));
    assert_eq!(
        options.metric_filter.get(&reporting::MetricFilterOp::Lt),
        Some(&10.0)
    );
}

#[test]
fn metric_referencing_missing_dimension_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    write_schema(
        dir.path(),
        "name: broken\nfact: figures\ndimensions: [colour]\n",
    );
    let err = SchemaRegistry::load_from_dir(dir.path(), &config()).unwrap_err();
    assert!(matches!(err, ReportingError::UnknownDimension { .. }));
}

#[test]
fn missing_directories_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = SchemaRegistry::load_from_dir(dir.path(), &config()).unwrap_err();
    assert!(matches!(err, ReportingError::Validation(_)));
}

#[test]
fn malformed_yaml_is_a_yaml_error() {
    let dir = tempfile::tempdir().unwrap();
    write_schema(dir.path(), "name: [unterminated\n");
    let err = SchemaRegistry::load_from_dir(dir.path(), &config()).unwrap_err();
    assert!(matches!(err, ReportingError::Yaml(_)));
}

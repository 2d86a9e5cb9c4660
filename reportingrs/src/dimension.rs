//! Dimensions as requested by a metric or report, resolved against a fact.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::date_trunc::{adapter_for, Precision};
use crate::error::{Result, ReportingError};
use crate::metric::SortDirection;
use crate::registry::SchemaRegistry;
use crate::schema::{DimensionKind, Fact, Relation};
use crate::sql_ast::{Join, OrderItem, SelectItem, SqlBinaryOperator, SqlExpr, TableRef};

type LabelFn = dyn Fn(&Value) -> Value + Send + Sync;

/// Rewrites a dimension value in each result row after execution.
#[derive(Clone)]
pub struct LabelCallback(Arc<LabelFn>);

impl LabelCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, value: &Value) -> Value {
        (self.0)(value)
    }
}

impl fmt::Debug for LabelCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LabelCallback(..)")
    }
}

/// `"2018-07-01 00:00:00"` -> `"Q3"`. Non-date values pass through.
pub fn quarter_label(value: &Value) -> Value {
    let parsed = value
        .as_str()
        .and_then(|s| s.get(..10))
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
    match parsed {
        Some(date) => Value::String(format!("Q{}", (date.month() - 1) / 3 + 1)),
        None => value.clone(),
    }
}

fn default_label_callback(precision: Precision) -> Option<LabelCallback> {
    match precision {
        Precision::Quarter => Some(LabelCallback::new(quarter_label)),
        _ => None,
    }
}

/// A dimension as named in a metric, report, or YAML file:
/// `kind`, `{released_on: quarter}`, or `{series: title}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionRequest {
    pub name: String,
    pub label: Option<String>,
}

impl DimensionRequest {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
        }
    }

    pub fn labeled(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: Some(label.into()),
        }
    }
}

impl From<&str> for DimensionRequest {
    fn from(name: &str) -> Self {
        Self::name(name)
    }
}

impl<'de> Deserialize<'de> for DimensionRequest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            Labeled(BTreeMap<String, String>),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Name(name) => Ok(Self::name(name)),
            Raw::Labeled(map) => {
                let mut entries = map.into_iter();
                match (entries.next(), entries.next()) {
                    (Some((name, label)), None) => Ok(Self::labeled(name, label)),
                    _ => Err(de::Error::custom(
                        "labeled dimension must be a single-entry map",
                    )),
                }
            }
        }
    }
}

/// Where a resolved dimension's values come from.
#[derive(Debug, Clone, PartialEq)]
pub enum DimensionSource {
    Column {
        table: String,
        column: String,
    },
    Truncated {
        table: String,
        column: String,
        precision: Precision,
    },
    Related {
        join: Join,
        label: String,
        primary_key: String,
    },
}

#[derive(Debug, Clone)]
pub struct ReportingDimension {
    pub name: String,
    pub source: DimensionSource,
    label_callback: Option<LabelCallback>,
}

// Callbacks are not comparable; two dimensions are the same when they
// select the same thing under the same name.
impl PartialEq for ReportingDimension {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.source == other.source
    }
}

impl ReportingDimension {
    /// Resolve a requested dimension against a fact's declarations.
    pub fn resolve(
        registry: &SchemaRegistry,
        fact: &Fact,
        request: &DimensionRequest,
    ) -> Result<Self> {
        let decl = fact.dimension(&request.name)?;
        let (source, callback) = match &decl.kind {
            DimensionKind::Column { column, time } => match &request.label {
                None => (
                    DimensionSource::Column {
                        table: fact.table.clone(),
                        column: column.clone(),
                    },
                    decl.label_callback.clone(),
                ),
                Some(label) => {
                    if !time {
                        return Err(ReportingError::InvalidDimensionLabel(format!(
                            "'{label}' requested for dimension '{}', which is not a time column",
                            request.name
                        )));
                    }
                    let precision: Precision = label.parse().map_err(|_| {
                        ReportingError::InvalidDimensionLabel(format!(
                            "unknown precision '{label}' for dimension '{}'",
                            request.name
                        ))
                    })?;
                    check_date_trunc(registry, fact, &request.name, precision)?;
                    (
                        DimensionSource::Truncated {
                            table: fact.table.clone(),
                            column: column.clone(),
                            precision,
                        },
                        decl.label_callback
                            .clone()
                            .or_else(|| default_label_callback(precision)),
                    )
                }
            },
            DimensionKind::Related {
                fact: related_name,
                relation,
                join_type,
            } => {
                let related = registry.fact(related_name)?;
                let label = request
                    .label
                    .clone()
                    .unwrap_or_else(|| related.dimension_label.clone());
                if !related.is_label_field(&label) {
                    return Err(ReportingError::InvalidDimensionLabel(format!(
                        "'{label}' is not a column of '{}' for dimension '{}'",
                        related.name, request.name
                    )));
                }
                let alias = request.name.clone();
                let on = match relation {
                    Relation::BelongsTo { foreign_key } => SqlExpr::binary(
                        SqlBinaryOperator::Eq,
                        SqlExpr::column(fact.table.clone(), foreign_key.clone()),
                        SqlExpr::column(alias.clone(), related.primary_key.clone()),
                    ),
                    Relation::HasMany { foreign_key } => SqlExpr::binary(
                        SqlBinaryOperator::Eq,
                        SqlExpr::column(fact.table.clone(), fact.primary_key.clone()),
                        SqlExpr::column(alias.clone(), foreign_key.clone()),
                    ),
                };
                let join = Join {
                    join_type: (*join_type).into(),
                    table: TableRef {
                        name: related.table.clone(),
                        alias: Some(alias),
                        subquery: None,
                    },
                    on: vec![on],
                };
                (
                    DimensionSource::Related {
                        join,
                        label,
                        primary_key: related.primary_key.clone(),
                    },
                    decl.label_callback.clone(),
                )
            }
        };
        Ok(Self {
            name: request.name.clone(),
            source,
            label_callback: callback,
        })
    }

    pub fn label_callback(&self) -> Option<&LabelCallback> {
        self.label_callback.as_ref()
    }

    pub fn precision(&self) -> Option<Precision> {
        match &self.source {
            DimensionSource::Truncated { precision, .. } => Some(*precision),
            _ => None,
        }
    }

    pub fn join(&self) -> Option<&Join> {
        match &self.source {
            DimensionSource::Related { join, .. } => Some(join),
            _ => None,
        }
    }

    pub fn identifier_alias(&self) -> String {
        format!("{}_identifier", self.name)
    }

    pub fn label_expr(&self) -> SqlExpr {
        match &self.source {
            DimensionSource::Column { table, column } => {
                SqlExpr::column(table.clone(), column.clone())
            }
            DimensionSource::Truncated {
                table,
                column,
                precision,
            } => SqlExpr::DateTrunc {
                precision: *precision,
                expr: Box::new(SqlExpr::column(table.clone(), column.clone())),
            },
            DimensionSource::Related { label, .. } => {
                SqlExpr::column(self.name.clone(), label.clone())
            }
        }
    }

    /// Related-fact primary key, selected beside the label.
    pub fn identifier_expr(&self) -> Option<SqlExpr> {
        match &self.source {
            DimensionSource::Related { primary_key, .. } => {
                Some(SqlExpr::column(self.name.clone(), primary_key.clone()))
            }
            _ => None,
        }
    }

    fn aliases(&self, identifiers: bool) -> Vec<String> {
        let mut names = vec![self.name.clone()];
        if identifiers && self.identifier_expr().is_some() {
            names.push(self.identifier_alias());
        }
        names
    }

    /// Select expressions, aliased to the dimension name.
    pub fn select_items(&self, identifiers: bool) -> Vec<SelectItem> {
        let mut items = vec![SelectItem {
            expr: self.label_expr(),
            alias: Some(self.name.clone()),
        }];
        if identifiers {
            if let Some(expr) = self.identifier_expr() {
                items.push(SelectItem {
                    expr,
                    alias: Some(self.identifier_alias()),
                });
            }
        }
        items
    }

    pub fn group_by(&self, identifiers: bool) -> Vec<SqlExpr> {
        let mut exprs = vec![self.label_expr()];
        if identifiers {
            exprs.extend(self.identifier_expr());
        }
        exprs
    }

    pub fn order_by(&self, direction: SortDirection) -> OrderItem {
        OrderItem {
            expr: self.label_expr(),
            direction,
        }
    }

    /// Select expressions against a derived table that already exposes
    /// this dimension under its aliases.
    pub fn derived_select_items(&self, identifiers: bool, derived: &str) -> Vec<SelectItem> {
        self.aliases(identifiers)
            .into_iter()
            .map(|alias| SelectItem {
                expr: SqlExpr::column(derived, alias.clone()),
                alias: Some(alias),
            })
            .collect()
    }

    pub fn derived_group_by(&self, identifiers: bool, derived: &str) -> Vec<SqlExpr> {
        self.aliases(identifiers)
            .into_iter()
            .map(|alias| SqlExpr::column(derived, alias))
            .collect()
    }

    pub fn derived_order_by(&self, direction: SortDirection, derived: &str) -> OrderItem {
        OrderItem {
            expr: SqlExpr::column(derived, self.name.clone()),
            direction,
        }
    }
}

fn check_date_trunc(
    registry: &SchemaRegistry,
    fact: &Fact,
    dimension: &str,
    precision: Precision,
) -> Result<()> {
    // Unknown data sources are checked when the statement is rendered.
    let Some(dialect) = registry.dialect_name_for(fact) else {
        return Ok(());
    };
    match adapter_for(dialect) {
        None => Err(ReportingError::InvalidDimensionLabel(format!(
            "cannot group '{dimension}' by {precision} on database {dialect}"
        ))),
        Some(adapter) if !adapter.supports(precision) => {
            Err(ReportingError::InvalidDimensionLabel(format!(
                "{dialect} cannot truncate '{dimension}' to {precision}"
            )))
        }
        Some(_) => Ok(()),
    }
}

/// Append dimensions not already present, keeping first-seen order.
///
/// A name requested twice with different definitions is an error.
pub fn merge_dimensions(
    base: &[ReportingDimension],
    extra: impl IntoIterator<Item = ReportingDimension>,
) -> Result<Vec<ReportingDimension>> {
    let mut merged: Vec<ReportingDimension> = Vec::with_capacity(base.len());
    for dim in base.iter().cloned().chain(extra) {
        match merged.iter().find(|d| d.name == dim.name) {
            Some(existing) if *existing == dim => {}
            Some(_) => return Err(ReportingError::AmbiguousDimension(dim.name)),
            None => merged.push(dim),
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column(name: &str) -> ReportingDimension {
        ReportingDimension {
            name: name.to_string(),
            source: DimensionSource::Column {
                table: "figures".to_string(),
                column: name.to_string(),
            },
            label_callback: None,
        }
    }

    #[test]
    fn quarter_label_formats_dates() {
        assert_eq!(quarter_label(&json!("2018-07-01 00:00:00")), json!("Q3"));
        assert_eq!(quarter_label(&json!("2018-01-01")), json!("Q1"));
        assert_eq!(quarter_label(&json!("2018-12-01T00:00:00")), json!("Q4"));
        assert_eq!(quarter_label(&json!(42)), json!(42));
        assert_eq!(quarter_label(&json!("soon")), json!("soon"));
    }

    #[test]
    fn parses_dimension_requests() {
        let reqs: Vec<DimensionRequest> =
            serde_yaml::from_str("[kind, {released_on: quarter}]").unwrap();
        assert_eq!(
            reqs,
            vec![
                DimensionRequest::name("kind"),
                DimensionRequest::labeled("released_on", "quarter"),
            ]
        );
        assert!(serde_yaml::from_str::<DimensionRequest>("{a: b, c: d}").is_err());
    }

    #[test]
    fn merge_keeps_order_and_drops_duplicates() {
        let merged = merge_dimensions(&[column("kind")], vec![column("name"), column("kind")])
            .unwrap();
        let names: Vec<_> = merged.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["kind", "name"]);
    }

    #[test]
    fn merge_rejects_conflicting_definitions() {
        let mut truncated = column("kind");
        truncated.source = DimensionSource::Truncated {
            table: "figures".to_string(),
            column: "kind".to_string(),
            precision: Precision::Month,
        };
        let err = merge_dimensions(&[column("kind")], vec![truncated]).unwrap_err();
        assert!(matches!(err, ReportingError::AmbiguousDimension(name) if name == "kind"));
    }

    #[test]
    fn derived_items_reference_aliases() {
        let dim = column("kind");
        let items = dim.derived_select_items(true, "T");
        assert_eq!(
            items,
            vec![SelectItem {
                expr: SqlExpr::column("T", "kind"),
                alias: Some("kind".to_string()),
            }]
        );
    }
}

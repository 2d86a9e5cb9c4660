//! Fact declarations: what a fact table exposes for reporting.

use std::collections::{BTreeMap, BTreeSet};

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::ReportingDefaults;
use crate::dimension::LabelCallback;
use crate::error::{Result, ReportingError};
use crate::filters::{DimensionFilter, NamedScope, ScopeFn};
use crate::report::{FACT_ID_ALIAS, MEASURE_ALIAS};
use crate::sql_ast::SqlJoinType;

/// How a related fact is reached from the fact being reported on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// `fact.foreign_key = related.primary_key`
    BelongsTo { foreign_key: String },
    /// `fact.primary_key = related.foreign_key`
    HasMany { foreign_key: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
}

impl From<JoinType> for SqlJoinType {
    fn from(value: JoinType) -> Self {
        match value {
            JoinType::Inner => SqlJoinType::Inner,
            JoinType::Left => SqlJoinType::Left,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimensionKind {
    /// Degenerate dimension stored on the fact table itself.
    Column { column: String, time: bool },
    /// Standard dimension backed by another fact.
    Related {
        fact: String,
        relation: Relation,
        join_type: JoinType,
    },
}

#[derive(Debug, Clone)]
pub struct DimensionDecl {
    pub name: String,
    pub kind: DimensionKind,
    pub label_callback: Option<LabelCallback>,
}

impl DimensionDecl {
    pub fn is_time(&self) -> bool {
        matches!(self.kind, DimensionKind::Column { time: true, .. })
    }
}

#[derive(Debug, Clone)]
pub struct Fact {
    pub name: String,
    pub data_source: String,
    pub table: String,
    pub primary_key: String,
    /// Default column summed/averaged when a metric has no aggregate expression.
    pub measure: String,
    /// Label selected when this fact is a dimension of another fact.
    pub dimension_label: String,
    /// Additional columns usable as labels.
    pub columns: BTreeSet<String>,
    pub dimensions: BTreeMap<String, DimensionDecl>,
    pub dimension_filters: BTreeMap<String, DimensionFilter>,
    /// Alias -> SQL expression.
    pub aggregate_expressions: BTreeMap<String, String>,
    pub scopes: BTreeMap<String, NamedScope>,
    pub search_fallback: bool,
}

impl Fact {
    pub fn dimension(&self, name: &str) -> Result<&DimensionDecl> {
        self.dimensions
            .get(name)
            .ok_or_else(|| ReportingError::UnknownDimension {
                fact: self.name.clone(),
                dimension: name.to_string(),
            })
    }

    /// Declared filter, or a search filter when fallback applies.
    pub fn dimension_filter(&self, name: &str, fallback: bool) -> Result<DimensionFilter> {
        if let Some(filter) = self.dimension_filters.get(name) {
            return Ok(filter.clone());
        }
        if fallback || self.search_fallback {
            return Ok(DimensionFilter::search(name));
        }
        Err(ReportingError::UnknownDimensionFilter {
            fact: self.name.clone(),
            filter: name.to_string(),
        })
    }

    /// Columns that may be selected as the label of this fact.
    pub fn is_label_field(&self, field: &str) -> bool {
        field == self.dimension_label
            || field == self.primary_key
            || self.columns.contains(field)
            || self.dimensions.values().any(|d| match &d.kind {
                DimensionKind::Column { column, .. } => column == field,
                DimensionKind::Related { .. } => false,
            })
    }

    pub fn uses_search(&self) -> bool {
        self.search_fallback
            || self
                .dimension_filters
                .values()
                .any(|f| matches!(f.kind, crate::filters::FilterKind::Search))
    }
}

/// Programmatic fact declaration.
#[derive(Debug, Clone)]
pub struct FactBuilder {
    name: String,
    data_source: Option<String>,
    table: Option<String>,
    primary_key: Option<String>,
    measure: Option<String>,
    dimension_label: Option<String>,
    columns: BTreeSet<String>,
    dimensions: Vec<DimensionDecl>,
    dimension_filters: Vec<DimensionFilter>,
    aggregate_expressions: BTreeMap<String, String>,
    scopes: BTreeMap<String, NamedScope>,
    label_callbacks: Vec<(String, LabelCallback)>,
    search_fallback: bool,
}

impl FactBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_source: None,
            table: None,
            primary_key: None,
            measure: None,
            dimension_label: None,
            columns: BTreeSet::new(),
            dimensions: Vec::new(),
            dimension_filters: Vec::new(),
            aggregate_expressions: BTreeMap::new(),
            scopes: BTreeMap::new(),
            label_callbacks: Vec::new(),
            search_fallback: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_source(mut self, name: impl Into<String>) -> Self {
        self.data_source = Some(name.into());
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = Some(column.into());
        self
    }

    pub fn measure(mut self, column: impl Into<String>) -> Self {
        self.measure = Some(column.into());
        self
    }

    pub fn dimension_label(mut self, column: impl Into<String>) -> Self {
        self.dimension_label = Some(column.into());
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn dimension(mut self, decl: DimensionDecl) -> Self {
        self.dimensions.push(decl);
        self
    }

    /// Degenerate dimension on a column of the fact table.
    pub fn column_dimension(self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.dimension(DimensionDecl {
            name: name.into(),
            kind: DimensionKind::Column {
                column: column.into(),
                time: false,
            },
            label_callback: None,
        })
    }

    /// Degenerate dimension on a timestamp column; accepts a precision label.
    pub fn time_dimension(self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.dimension(DimensionDecl {
            name: name.into(),
            kind: DimensionKind::Column {
                column: column.into(),
                time: true,
            },
            label_callback: None,
        })
    }

    pub fn belongs_to(
        self,
        name: impl Into<String>,
        fact: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.related(
            name,
            fact,
            Relation::BelongsTo {
                foreign_key: foreign_key.into(),
            },
            JoinType::Inner,
        )
    }

    pub fn has_many(
        self,
        name: impl Into<String>,
        fact: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.related(
            name,
            fact,
            Relation::HasMany {
                foreign_key: foreign_key.into(),
            },
            JoinType::Inner,
        )
    }

    pub fn related(
        self,
        name: impl Into<String>,
        fact: impl Into<String>,
        relation: Relation,
        join_type: JoinType,
    ) -> Self {
        self.dimension(DimensionDecl {
            name: name.into(),
            kind: DimensionKind::Related {
                fact: fact.into(),
                relation,
                join_type,
            },
            label_callback: None,
        })
    }

    /// Post-process a dimension's values in report rows.
    pub fn label_callback<F>(mut self, dimension: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.label_callbacks
            .push((dimension.into(), LabelCallback::new(f)));
        self
    }

    pub fn scope_sql(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.scopes
            .insert(name.into(), NamedScope::Predicate(sql.into()));
        self
    }

    pub fn scope_fn(mut self, name: impl Into<String>, f: ScopeFn) -> Self {
        self.scopes.insert(name.into(), NamedScope::Function(f));
        self
    }

    pub fn scope_filter(mut self, name: impl Into<String>) -> Self {
        self.dimension_filters.push(DimensionFilter::scope(name));
        self
    }

    pub fn search_filter(mut self, name: impl Into<String>) -> Self {
        self.dimension_filters.push(DimensionFilter::search(name));
        self
    }

    pub fn custom_filter(mut self, name: impl Into<String>, f: ScopeFn) -> Self {
        self.dimension_filters.push(DimensionFilter::custom(name, f));
        self
    }

    pub fn aggregate_expression(mut self, alias: impl Into<String>, sql: impl Into<String>) -> Self {
        self.aggregate_expressions.insert(alias.into(), sql.into());
        self
    }

    pub fn search_fallback(mut self, enabled: bool) -> Self {
        self.search_fallback = enabled;
        self
    }

    /// Validate local declarations and fill in defaults.
    ///
    /// Cross-fact checks (related facts exist) happen in the registry.
    pub fn build(self, defaults: &ReportingDefaults) -> Result<Fact> {
        let mut dimensions = BTreeMap::new();
        for decl in self.dimensions {
            if decl.name == FACT_ID_ALIAS || decl.name == MEASURE_ALIAS {
                return Err(ReportingError::Validation(format!(
                    "dimension name '{}' on fact '{}' is reserved for report queries",
                    decl.name, self.name
                )));
            }
            if dimensions.contains_key(&decl.name) {
                return Err(ReportingError::Validation(format!(
                    "dimension '{}' declared twice on fact '{}'",
                    decl.name, self.name
                )));
            }
            dimensions.insert(decl.name.clone(), decl);
        }

        for (dimension, callback) in self.label_callbacks {
            let decl = dimensions
                .get_mut(&dimension)
                .ok_or_else(|| ReportingError::UnknownDimension {
                    fact: self.name.clone(),
                    dimension: dimension.clone(),
                })?;
            decl.label_callback = Some(callback);
        }

        let mut dimension_filters = BTreeMap::new();
        for filter in self.dimension_filters {
            if matches!(filter.kind, crate::filters::FilterKind::Scope)
                && !self.scopes.contains_key(&filter.name)
            {
                return Err(ReportingError::UnknownScope {
                    fact: self.name.clone(),
                    scope: filter.name,
                });
            }
            if dimension_filters.contains_key(&filter.name) {
                return Err(ReportingError::Validation(format!(
                    "dimension filter '{}' declared twice on fact '{}'",
                    filter.name, self.name
                )));
            }
            dimension_filters.insert(filter.name.clone(), filter);
        }

        Ok(Fact {
            data_source: self.data_source.unwrap_or_else(|| "default".to_string()),
            table: self.table.unwrap_or_else(|| self.name.clone()),
            primary_key: self.primary_key.unwrap_or_else(|| "id".to_string()),
            measure: self
                .measure
                .unwrap_or_else(|| defaults.default_measure.clone()),
            dimension_label: self
                .dimension_label
                .unwrap_or_else(|| defaults.default_dimension_label.clone()),
            columns: self.columns,
            dimensions,
            dimension_filters,
            aggregate_expressions: self.aggregate_expressions,
            scopes: self.scopes,
            search_fallback: self.search_fallback,
            name: self.name,
        })
    }
}

/// Fact declaration as written in YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FactDefinition {
    pub name: String,
    pub data_source: Option<String>,
    pub table: Option<String>,
    pub primary_key: Option<String>,
    pub measure: Option<String>,
    pub dimension_label: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub dimensions: BTreeMap<String, DimensionDefinition>,
    #[serde(default)]
    pub dimension_filters: BTreeMap<String, FilterDefinition>,
    #[serde(default)]
    pub scopes: BTreeMap<String, String>,
    #[serde(default)]
    pub aggregate_expressions: BTreeMap<String, String>,
    #[serde(default)]
    pub search_fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterDefinition {
    Scope,
    Search,
}

/// Dimension declaration: a bare column name, a column with `time: true`,
/// or a `belongs_to` / `has_many` relation.
#[derive(Debug, Clone, PartialEq)]
pub enum DimensionDefinition {
    Column { column: String, time: bool },
    BelongsTo {
        fact: String,
        foreign_key: String,
        join: JoinType,
    },
    HasMany {
        fact: String,
        foreign_key: String,
        join: JoinType,
    },
}

impl<'de> Deserialize<'de> for DimensionDefinition {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(column) => Ok(DimensionDefinition::Column {
                column,
                time: false,
            }),
            other => {
                #[derive(Deserialize)]
                #[serde(deny_unknown_fields)]
                struct Full {
                    column: Option<String>,
                    #[serde(default)]
                    time: bool,
                    belongs_to: Option<String>,
                    has_many: Option<String>,
                    foreign_key: Option<String>,
                    #[serde(default)]
                    join: JoinType,
                }
                let full = Full::deserialize(other).map_err(de::Error::custom)?;
                let foreign_key = || -> std::result::Result<String, D::Error> {
                    full.foreign_key
                        .clone()
                        .ok_or_else(|| de::Error::missing_field("foreign_key"))
                };
                match (&full.column, &full.belongs_to, &full.has_many) {
                    (Some(column), None, None) => Ok(DimensionDefinition::Column {
                        column: column.clone(),
                        time: full.time,
                    }),
                    (None, Some(fact), None) => Ok(DimensionDefinition::BelongsTo {
                        fact: fact.clone(),
                        foreign_key: foreign_key()?,
                        join: full.join,
                    }),
                    (None, None, Some(fact)) => Ok(DimensionDefinition::HasMany {
                        fact: fact.clone(),
                        foreign_key: foreign_key()?,
                        join: full.join,
                    }),
                    _ => Err(de::Error::custom(
                        "dimension needs exactly one of column, belongs_to, has_many",
                    )),
                }
            }
        }
    }
}

impl FactDefinition {
    pub fn into_builder(self) -> FactBuilder {
        let mut builder = FactBuilder::new(self.name).columns(self.columns);
        builder.data_source = self.data_source;
        builder.table = self.table;
        builder.primary_key = self.primary_key;
        builder.measure = self.measure;
        builder.dimension_label = self.dimension_label;
        builder.search_fallback = self.search_fallback;
        builder.aggregate_expressions = self.aggregate_expressions;

        for (name, sql) in self.scopes {
            builder = builder.scope_sql(name, sql);
        }
        for (name, def) in self.dimensions {
            builder = match def {
                DimensionDefinition::Column { column, time: false } => {
                    builder.column_dimension(name, column)
                }
                DimensionDefinition::Column { column, time: true } => {
                    builder.time_dimension(name, column)
                }
                DimensionDefinition::BelongsTo {
                    fact,
                    foreign_key,
                    join,
                } => builder.related(name, fact, Relation::BelongsTo { foreign_key }, join),
                DimensionDefinition::HasMany {
                    fact,
                    foreign_key,
                    join,
                } => builder.related(name, fact, Relation::HasMany { foreign_key }, join),
            };
        }
        for (name, kind) in self.dimension_filters {
            builder = match kind {
                FilterDefinition::Scope => builder.scope_filter(name),
                FilterDefinition::Search => builder.search_filter(name),
            };
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_defaults_from_config() {
        let fact = FactBuilder::new("figures")
            .build(&ReportingDefaults::default())
            .unwrap();
        assert_eq!(fact.table, "figures");
        assert_eq!(fact.primary_key, "id");
        assert_eq!(fact.measure, "value");
        assert_eq!(fact.dimension_label, "name");
        assert_eq!(fact.data_source, "default");
    }

    #[test]
    fn scope_filter_requires_registered_scope() {
        let err = FactBuilder::new("figures")
            .scope_filter("active")
            .build(&ReportingDefaults::default())
            .unwrap_err();
        assert!(matches!(err, ReportingError::UnknownScope { .. }));
    }

    #[test]
    fn derived_column_names_are_reserved() {
        for name in ["_fact_id", "_measure"] {
            let err = FactBuilder::new("figures")
                .column_dimension(name, "kind")
                .build(&ReportingDefaults::default())
                .unwrap_err();
            assert!(matches!(err, ReportingError::Validation(_)));
        }
    }

    #[test]
    fn label_callback_requires_declared_dimension() {
        let err = FactBuilder::new("figures")
            .label_callback("kind", |v| v.clone())
            .build(&ReportingDefaults::default())
            .unwrap_err();
        assert!(matches!(err, ReportingError::UnknownDimension { .. }));
    }

    #[test]
    fn undeclared_filter_falls_back_to_search_when_enabled() {
        let fact = FactBuilder::new("figures")
            .search_fallback(true)
            .build(&ReportingDefaults::default())
            .unwrap();
        let filter = fact.dimension_filter("kind_eq", false).unwrap();
        assert_eq!(filter.kind_name(), "search");

        let strict = FactBuilder::new("series")
            .build(&ReportingDefaults::default())
            .unwrap();
        assert!(matches!(
            strict.dimension_filter("kind_eq", false),
            Err(ReportingError::UnknownDimensionFilter { .. })
        ));
        assert!(strict.dimension_filter("kind_eq", true).is_ok());
    }

    #[test]
    fn parses_yaml_fact_definition() {
        let yaml = r#"
name: figures
data_source: warehouse
measure: price
columns: [name, kind]
dimensions:
  kind: kind
  released_on: { column: released_on, time: true }
  series: { belongs_to: series, foreign_key: series_id }
  tags: { has_many: figure_tags, foreign_key: figure_id, join: left }
dimension_filters:
  card_kind: scope
  name_cont: search
scopes:
  card_kind: "figures.kind = :value"
aggregate_expressions:
  kind_is_card: "CASE WHEN figures.kind = 'amiibo card' THEN 1 ELSE NULL END"
"#;
        let def: FactDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            def.dimensions["tags"],
            DimensionDefinition::HasMany {
                fact: "figure_tags".to_string(),
                foreign_key: "figure_id".to_string(),
                join: JoinType::Left,
            }
        );

        let fact = def
            .into_builder()
            .build(&ReportingDefaults::default())
            .unwrap();
        assert_eq!(fact.measure, "price");
        assert!(fact.dimension("released_on").unwrap().is_time());
        assert!(fact.uses_search());
        assert!(fact.is_label_field("kind"));
        assert!(!fact.is_label_field("price"));
    }

    #[test]
    fn rejects_ambiguous_yaml_dimension() {
        let yaml = "name: figures\ndimensions:\n  odd: { column: kind, belongs_to: series }\n";
        assert!(serde_yaml::from_str::<FactDefinition>(yaml).is_err());
    }
}

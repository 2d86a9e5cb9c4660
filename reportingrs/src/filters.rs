//! Dimension filters: named scopes, caller-supplied filter functions, and
//! search-term predicates.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Result, ReportingError};
use crate::sql_ast::{Join, SqlBinaryOperator, SqlExpr, VALUE_PLACEHOLDER};

/// Filtered view of a fact's base relation, threaded through each filter in turn.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryScope {
    table: String,
    predicates: Vec<SqlExpr>,
    joins: Vec<Join>,
}

impl QueryScope {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            predicates: Vec::new(),
            joins: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Column of the fact table.
    pub fn column(&self, name: impl Into<String>) -> SqlExpr {
        SqlExpr::column(self.table.clone(), name)
    }

    pub fn filter(mut self, predicate: SqlExpr) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn filter_sql(self, sql: impl Into<String>) -> Self {
        self.filter(SqlExpr::Raw(sql.into()))
    }

    pub fn filter_eq(self, column: &str, value: Value) -> Self {
        let predicate = SqlExpr::binary(
            SqlBinaryOperator::Eq,
            self.column(column),
            SqlExpr::Literal(value),
        );
        self.filter(predicate)
    }

    pub fn join(mut self, join: Join) -> Self {
        if !self.joins.contains(&join) {
            self.joins.push(join);
        }
        self
    }

    pub fn predicates(&self) -> &[SqlExpr] {
        &self.predicates
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub(crate) fn into_parts(self) -> (Vec<Join>, Vec<SqlExpr>) {
        (self.joins, self.predicates)
    }
}

type ScopeFnInner = dyn Fn(QueryScope, Option<&Value>) -> Result<QueryScope> + Send + Sync;

/// A filter function narrowing a scope, optionally taking the filter value.
#[derive(Clone)]
pub struct ScopeFn(Arc<ScopeFnInner>);

impl ScopeFn {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(QueryScope, Option<&Value>) -> Result<QueryScope> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, scope: QueryScope, arg: Option<&Value>) -> Result<QueryScope> {
        (self.0)(scope, arg)
    }
}

impl fmt::Debug for ScopeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScopeFn(..)")
    }
}

/// A scope declared on a fact.
#[derive(Debug, Clone)]
pub enum NamedScope {
    /// SQL predicate; `:value` is replaced with the filter value.
    Predicate(String),
    Function(ScopeFn),
}

impl NamedScope {
    /// A predicate without `:value` takes no argument; anything but
    /// `true`/`"true"` for it is rejected rather than ignored.
    pub fn check_argument(&self, name: &str, arg: Option<&Value>) -> Result<()> {
        match (self, arg) {
            (NamedScope::Predicate(sql), Some(value)) if !sql.contains(VALUE_PLACEHOLDER) => {
                Err(ReportingError::Validation(format!(
                    "scope '{name}' takes no argument, got {value}"
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn apply(&self, scope: QueryScope, arg: Option<&Value>) -> Result<QueryScope> {
        match self {
            NamedScope::Predicate(sql) => {
                self.check_argument(sql, arg)?;
                Ok(scope.filter(SqlExpr::Template {
                    sql: sql.clone(),
                    value: arg.cloned(),
                }))
            }
            NamedScope::Function(f) => f.call(scope, arg),
        }
    }
}

#[derive(Debug, Clone)]
pub enum FilterKind {
    /// Applies the fact scope with the same name.
    Scope,
    /// Passed to the search evaluator as a search term.
    Search,
    Custom(ScopeFn),
}

#[derive(Debug, Clone)]
pub struct DimensionFilter {
    pub name: String,
    pub kind: FilterKind,
}

impl DimensionFilter {
    pub fn scope(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FilterKind::Scope,
        }
    }

    pub fn search(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FilterKind::Search,
        }
    }

    pub fn custom(name: impl Into<String>, f: ScopeFn) -> Self {
        Self {
            name: name.into(),
            kind: FilterKind::Custom(f),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            FilterKind::Scope => "scope",
            FilterKind::Search => "search",
            FilterKind::Custom(_) => "custom",
        }
    }
}

/// `true` and `"true"` mean "apply without an argument".
pub fn filter_argument(value: &Value) -> Option<&Value> {
    match value {
        Value::Bool(true) => None,
        Value::String(s) if s == "true" => None,
        other => Some(other),
    }
}

/// Evaluates all search terms of a report in one call.
pub trait SearchTermEvaluator: Send + Sync {
    fn evaluate(&self, scope: QueryScope, terms: &BTreeMap<String, Value>) -> Result<QueryScope>;
}

/// Built-in evaluator for `<column>_<predicate>` terms against fact columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct PredicateSearch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Predicate {
    Eq,
    NotEq,
    Gt,
    Gteq,
    Lt,
    Lteq,
    Cont,
    NotCont,
    Start,
    End,
    In,
    NotIn,
    Null,
    NotNull,
    True,
    False,
}

// Longest suffix first: `_not_eq` must win over `_eq`.
const PREDICATES: [(&str, Predicate); 18] = [
    ("not_null", Predicate::NotNull),
    ("not_cont", Predicate::NotCont),
    ("not_eq", Predicate::NotEq),
    ("not_in", Predicate::NotIn),
    ("start", Predicate::Start),
    ("false", Predicate::False),
    ("gteq", Predicate::Gteq),
    ("lteq", Predicate::Lteq),
    ("cont", Predicate::Cont),
    ("null", Predicate::Null),
    ("true", Predicate::True),
    ("gte", Predicate::Gteq),
    ("lte", Predicate::Lteq),
    ("end", Predicate::End),
    ("eq", Predicate::Eq),
    ("gt", Predicate::Gt),
    ("lt", Predicate::Lt),
    ("in", Predicate::In),
];

fn split_term(term: &str) -> Result<(&str, Predicate)> {
    for (suffix, predicate) in PREDICATES {
        let Some(column) = term
            .strip_suffix(suffix)
            .and_then(|rest| rest.strip_suffix('_'))
        else {
            continue;
        };
        let valid = !column.is_empty()
            && column
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            return Ok((column, predicate));
        }
    }
    Err(ReportingError::InvalidSearchTerm(term.to_string()))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.as_str(), "true" | "t" | "1" | "yes"),
        _ => false,
    }
}

fn blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

const LIKE_ESCAPE: char = '!';

/// The search value with LIKE wildcards escaped, and whether any were.
fn like_text(value: &Value) -> (String, bool) {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut escaped = String::with_capacity(raw.len());
    let mut needs_escape = false;
    for c in raw.chars() {
        if c == '%' || c == '_' || c == LIKE_ESCAPE {
            escaped.push(LIKE_ESCAPE);
            needs_escape = true;
        }
        escaped.push(c);
    }
    (escaped, needs_escape)
}

fn like(column: SqlExpr, value: &Value, prefix: &str, suffix: &str, negated: bool) -> SqlExpr {
    let op = if negated {
        SqlBinaryOperator::NotLike
    } else {
        SqlBinaryOperator::Like
    };
    let (text, escaped) = like_text(value);
    let pattern = Value::String(format!("{prefix}{text}{suffix}"));
    let pattern = if escaped {
        SqlExpr::Template {
            sql: format!("{VALUE_PLACEHOLDER} ESCAPE '{LIKE_ESCAPE}'"),
            value: Some(pattern),
        }
    } else {
        SqlExpr::Literal(pattern)
    };
    SqlExpr::binary(op, column, pattern)
}

fn in_list(column: SqlExpr, value: &Value, negated: bool) -> SqlExpr {
    let list = match value {
        Value::Array(items) => items.iter().cloned().map(SqlExpr::Literal).collect(),
        other => vec![SqlExpr::Literal(other.clone())],
    };
    SqlExpr::InList {
        expr: Box::new(column),
        list,
        negated,
    }
}

impl PredicateSearch {
    fn predicate(column: SqlExpr, predicate: Predicate, value: &Value) -> SqlExpr {
        let compare = |op, column| SqlExpr::binary(op, column, SqlExpr::Literal(value.clone()));
        match predicate {
            Predicate::Eq => compare(SqlBinaryOperator::Eq, column),
            Predicate::NotEq => compare(SqlBinaryOperator::Neq, column),
            Predicate::Gt => compare(SqlBinaryOperator::Gt, column),
            Predicate::Gteq => compare(SqlBinaryOperator::Gte, column),
            Predicate::Lt => compare(SqlBinaryOperator::Lt, column),
            Predicate::Lteq => compare(SqlBinaryOperator::Lte, column),
            Predicate::Cont => like(column, value, "%", "%", false),
            Predicate::NotCont => like(column, value, "%", "%", true),
            Predicate::Start => like(column, value, "", "%", false),
            Predicate::End => like(column, value, "%", "", false),
            Predicate::In => in_list(column, value, false),
            Predicate::NotIn => in_list(column, value, true),
            Predicate::Null => SqlExpr::IsNull {
                expr: Box::new(column),
                negated: !truthy(value),
            },
            Predicate::NotNull => SqlExpr::IsNull {
                expr: Box::new(column),
                negated: truthy(value),
            },
            Predicate::True => SqlExpr::binary(
                SqlBinaryOperator::Eq,
                column,
                SqlExpr::Literal(Value::Bool(truthy(value))),
            ),
            Predicate::False => SqlExpr::binary(
                SqlBinaryOperator::Eq,
                column,
                SqlExpr::Literal(Value::Bool(!truthy(value))),
            ),
        }
    }
}

impl SearchTermEvaluator for PredicateSearch {
    fn evaluate(&self, scope: QueryScope, terms: &BTreeMap<String, Value>) -> Result<QueryScope> {
        let mut scope = scope;
        for (term, value) in terms {
            let (column, predicate) = split_term(term)?;
            // Blank values are ignored, like an empty search form field.
            if blank(value) {
                continue;
            }
            let expr = Self::predicate(scope.column(column), predicate, value);
            scope = scope.filter(expr);
        }
        Ok(scope)
    }
}

/// Requested filters grouped by how they are applied.
#[derive(Debug, Clone, Default)]
pub(crate) struct PartitionedFilters {
    pub scopes: Vec<(NamedScope, Value)>,
    pub custom: Vec<(ScopeFn, Value)>,
    pub search: BTreeMap<String, Value>,
}

impl PartitionedFilters {
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty() && self.custom.is_empty() && self.search.is_empty()
    }

    /// Apply scopes, then custom filters, then the batched search terms.
    pub fn apply(
        &self,
        scope: QueryScope,
        search: Option<&dyn SearchTermEvaluator>,
    ) -> Result<QueryScope> {
        let mut scope = scope;
        for (named, value) in &self.scopes {
            scope = named.apply(scope, filter_argument(value))?;
        }
        for (f, value) in &self.custom {
            scope = f.call(scope, filter_argument(value))?;
        }
        if !self.search.is_empty() {
            let evaluator = search.ok_or_else(|| {
                let terms: Vec<&str> = self.search.keys().map(String::as_str).collect();
                ReportingError::SearchBackendUnavailable(terms.join(", "))
            })?;
            scope = evaluator.evaluate(scope, &self.search)?;
        }
        Ok(scope)
    }
}

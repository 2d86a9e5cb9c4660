use serde_json::Value;

use crate::date_trunc::Precision;
use crate::dialect::Dialect;
use crate::error::{Result, ReportingError};
use crate::metric::{Aggregate, SortDirection};

/// Placeholder substituted in templated predicates.
pub const VALUE_PLACEHOLDER: &str = ":value";

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Column {
        table: Option<String>,
        name: String,
    },
    Literal(Value),
    /// Caller-authored SQL, emitted verbatim.
    Raw(String),
    /// Caller-authored SQL with `:value` replaced by a dialect literal.
    Template {
        sql: String,
        value: Option<Value>,
    },
    DateTrunc {
        precision: Precision,
        expr: Box<SqlExpr>,
    },
    BinaryOp {
        op: SqlBinaryOperator,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    Aggregate {
        agg: Aggregate,
        distinct: bool,
        args: Vec<SqlExpr>,
    },
    InList {
        expr: Box<SqlExpr>,
        list: Vec<SqlExpr>,
        negated: bool,
    },
    IsNull {
        expr: Box<SqlExpr>,
        negated: bool,
    },
}

impl SqlExpr {
    pub fn column(table: impl Into<String>, name: impl Into<String>) -> Self {
        SqlExpr::Column {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    pub fn binary(op: SqlBinaryOperator, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlBinaryOperator {
    And,
    Or,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: SqlExpr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
    /// Derived table; rendered as `(SELECT ...) AS alias` instead of `name`.
    pub subquery: Option<Box<SelectQuery>>,
}

impl TableRef {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            subquery: None,
        }
    }

    /// Name other clauses use to qualify columns of this table.
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlJoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: SqlJoinType,
    pub table: TableRef,
    pub on: Vec<SqlExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: SqlExpr,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQuery {
    pub distinct: bool,
    pub select: Vec<SelectItem>,
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub filters: Vec<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub having: Vec<SqlExpr>,
    pub order_by: Vec<OrderItem>,
}

pub struct SqlRenderer<'d> {
    dialect: &'d dyn Dialect,
}

impl<'d> SqlRenderer<'d> {
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self { dialect }
    }

    pub fn render_select(&self, query: &SelectQuery) -> Result<String> {
        let mut select_items = Vec::with_capacity(query.select.len());
        for item in &query.select {
            let expr_sql = self.render_expr(&item.expr)?;
            select_items.push(match &item.alias {
                Some(alias) => format!("{expr_sql} AS {}", self.dialect.quote_ident(alias)),
                None => expr_sql,
            });
        }

        let distinct = if query.distinct { "DISTINCT " } else { "" };
        let mut sql = format!(
            "SELECT {distinct}{} FROM {}",
            select_items.join(", "),
            self.render_table_ref(&query.from)?
        );

        for join in &query.joins {
            let join_kw = match join.join_type {
                SqlJoinType::Inner => "INNER JOIN",
                SqlJoinType::Left => "LEFT OUTER JOIN",
            };
            let on_clause = self.render_list(&join.on)?;
            sql.push_str(&format!(
                " {join_kw} {} ON {}",
                self.render_table_ref(&join.table)?,
                on_clause.join(" AND ")
            ));
        }

        if !query.filters.is_empty() {
            let filters = self.render_list(&query.filters)?;
            sql.push_str(&format!(" WHERE {}", filters.join(" AND ")));
        }

        if !query.group_by.is_empty() {
            let groups = self.render_list(&query.group_by)?;
            sql.push_str(&format!(" GROUP BY {}", groups.join(", ")));
        }

        if !query.having.is_empty() {
            let having = self.render_list(&query.having)?;
            sql.push_str(&format!(" HAVING {}", having.join(" AND ")));
        }

        if !query.order_by.is_empty() {
            let mut orders = Vec::with_capacity(query.order_by.len());
            for o in &query.order_by {
                let expr = self.render_expr(&o.expr)?;
                orders.push(format!("{expr} {}", o.direction.sql_keyword()));
            }
            sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        }

        Ok(sql)
    }

    fn render_list(&self, exprs: &[SqlExpr]) -> Result<Vec<String>> {
        exprs.iter().map(|e| self.render_expr(e)).collect()
    }

    fn render_table_ref(&self, table: &TableRef) -> Result<String> {
        if let Some(subquery) = &table.subquery {
            let inner = self.render_select(subquery)?;
            let alias = table.alias.as_deref().unwrap_or(&table.name);
            return Ok(format!("({inner}) AS {}", self.dialect.quote_ident(alias)));
        }
        Ok(match &table.alias {
            Some(alias) => format!(
                "{} {}",
                self.dialect.quote_ident(&table.name),
                self.dialect.quote_ident(alias)
            ),
            None => self.dialect.quote_ident(&table.name),
        })
    }

    pub fn render_expr(&self, expr: &SqlExpr) -> Result<String> {
        Ok(match expr {
            SqlExpr::Column { table, name } => match table {
                Some(t) => format!(
                    "{}.{}",
                    self.dialect.quote_ident(t),
                    self.dialect.quote_ident(name)
                ),
                None => self.dialect.quote_ident(name),
            },
            SqlExpr::Literal(v) => self.dialect.render_literal(v),
            SqlExpr::Raw(sql) => sql.clone(),
            SqlExpr::Template { sql, value } => match value {
                Some(v) if sql.contains(VALUE_PLACEHOLDER) => {
                    sql.replace(VALUE_PLACEHOLDER, &self.dialect.render_literal(v))
                }
                Some(_) => {
                    return Err(ReportingError::Validation(format!(
                        "predicate '{sql}' takes no value"
                    )))
                }
                None if sql.contains(VALUE_PLACEHOLDER) => {
                    return Err(ReportingError::Validation(format!(
                        "predicate '{sql}' expects a value"
                    )))
                }
                None => sql.clone(),
            },
            SqlExpr::DateTrunc { precision, expr } => {
                let adapter = self.dialect.date_trunc().ok_or_else(|| {
                    ReportingError::InvalidDimensionLabel(format!(
                        "no date truncation adapter for {}",
                        self.dialect.name()
                    ))
                })?;
                adapter.truncate(*precision, &self.render_expr(expr)?)?
            }
            SqlExpr::BinaryOp { op, left, right } => {
                let op_sql = match op {
                    SqlBinaryOperator::And => "AND",
                    SqlBinaryOperator::Or => "OR",
                    SqlBinaryOperator::Eq => "=",
                    SqlBinaryOperator::Neq => "!=",
                    SqlBinaryOperator::Gt => ">",
                    SqlBinaryOperator::Gte => ">=",
                    SqlBinaryOperator::Lt => "<",
                    SqlBinaryOperator::Lte => "<=",
                    SqlBinaryOperator::Like => "LIKE",
                    SqlBinaryOperator::NotLike => "NOT LIKE",
                };
                format!(
                    "({} {} {})",
                    self.render_expr(left)?,
                    op_sql,
                    self.render_expr(right)?
                )
            }
            SqlExpr::Aggregate {
                agg,
                distinct,
                args,
            } => {
                let rendered = self.render_list(args)?;
                self.dialect.render_aggregate(*agg, *distinct, &rendered)
            }
            SqlExpr::InList {
                expr,
                list,
                negated,
            } => {
                let rendered_values = self.render_list(list)?;
                let not_kw = if *negated { "NOT " } else { "" };
                format!(
                    "{} {}IN ({})",
                    self.render_expr(expr)?,
                    not_kw,
                    rendered_values.join(", ")
                )
            }
            SqlExpr::IsNull { expr, negated } => {
                let not_kw = if *negated { "NOT " } else { "" };
                format!("{} IS {not_kw}NULL", self.render_expr(expr)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{DuckDbDialect, MySqlDialect, SqliteDialect};

    fn col(table: &str, name: &str) -> SqlExpr {
        SqlExpr::column(table, name)
    }

    #[test]
    fn renders_distinct_having_and_derived_table() {
        let inner = SelectQuery {
            distinct: true,
            select: vec![
                SelectItem {
                    expr: col("figures", "id"),
                    alias: Some("_fact_id".to_string()),
                },
                SelectItem {
                    expr: col("figures", "kind"),
                    alias: Some("kind".to_string()),
                },
            ],
            from: TableRef::table("figures"),
            ..Default::default()
        };
        let outer = SelectQuery {
            select: vec![SelectItem {
                expr: SqlExpr::Aggregate {
                    agg: Aggregate::Sum,
                    distinct: false,
                    args: vec![col("T", "_measure")],
                },
                alias: Some("total".to_string()),
            }],
            from: TableRef {
                name: String::new(),
                alias: Some("T".to_string()),
                subquery: Some(Box::new(inner)),
            },
            group_by: vec![col("T", "kind")],
            having: vec![SqlExpr::binary(
                SqlBinaryOperator::Gte,
                SqlExpr::Aggregate {
                    agg: Aggregate::Sum,
                    distinct: false,
                    args: vec![col("T", "_measure")],
                },
                SqlExpr::Literal(serde_json::json!(5.0)),
            )],
            ..Default::default()
        };

        let sql = SqlRenderer::new(&DuckDbDialect).render_select(&outer).unwrap();
        assert_eq!(
            sql,
            "SELECT SUM(\"T\".\"_measure\") AS \"total\" FROM (SELECT DISTINCT \"figures\".\"id\" AS \"_fact_id\", \"figures\".\"kind\" AS \"kind\" FROM \"figures\") AS \"T\" GROUP BY \"T\".\"kind\" HAVING (SUM(\"T\".\"_measure\") >= 5.0)"
        );
    }

    #[test]
    fn renders_templates_with_dialect_literals() {
        let expr = SqlExpr::Template {
            sql: "figures.kind = :value".to_string(),
            value: Some(serde_json::json!("amiibo card")),
        };
        let sql = SqlRenderer::new(&MySqlDialect).render_expr(&expr).unwrap();
        assert_eq!(sql, "figures.kind = 'amiibo card'");

        let missing = SqlExpr::Template {
            sql: "figures.kind = :value".to_string(),
            value: None,
        };
        assert!(SqlRenderer::new(&MySqlDialect).render_expr(&missing).is_err());

        let unexpected = SqlExpr::Template {
            sql: "figures.retired = false".to_string(),
            value: Some(serde_json::json!(false)),
        };
        assert!(SqlRenderer::new(&MySqlDialect).render_expr(&unexpected).is_err());
    }

    #[test]
    fn date_trunc_requires_an_adapter() {
        let expr = SqlExpr::DateTrunc {
            precision: Precision::Month,
            expr: Box::new(col("users", "created_at")),
        };
        let err = SqlRenderer::new(&SqliteDialect)
            .render_expr(&expr)
            .unwrap_err();
        assert!(matches!(err, ReportingError::InvalidDimensionLabel(_)));
    }
}

//! Report plan intermediate representation.
//!
//! Grouped aggregates are a single SELECT. Sums are planned as a DISTINCT
//! inner query over the joined rows wrapped by an outer SUM, so each fact row
//! contributes its measure once per dimension group.

use crate::sql_ast::{Join, SelectQuery, SqlExpr, TableRef};

/// Alias of the derived table in the fan-out rewrite.
pub const DERIVED_ALIAS: &str = "T";
/// Fact primary key column inside the derived table.
pub const FACT_ID_ALIAS: &str = "_fact_id";
/// Measure column inside the derived table.
pub const MEASURE_ALIAS: &str = "_measure";

/// FROM, JOINs, and WHERE shared by every plan shape.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseRelation {
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub filters: Vec<SqlExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportPlan {
    /// Aggregate, dimensions, GROUP BY/HAVING/ORDER BY in one SELECT.
    Grouped(SelectQuery),
    /// `inner` deduplicates (fact id, measure, dimensions); `outer` sums it.
    FanOutSum {
        inner: SelectQuery,
        outer: SelectQuery,
    },
}

impl ReportPlan {
    /// Nest the inner query as the outer query's derived table.
    pub fn into_select_query(self) -> SelectQuery {
        match self {
            ReportPlan::Grouped(query) => query,
            ReportPlan::FanOutSum { inner, mut outer } => {
                outer.from = TableRef {
                    name: DERIVED_ALIAS.to_string(),
                    alias: Some(DERIVED_ALIAS.to_string()),
                    subquery: Some(Box::new(inner)),
                };
                outer
            }
        }
    }
}

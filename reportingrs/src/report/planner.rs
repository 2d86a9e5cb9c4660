//! Report planner.
//!
//! Builds the base relation (fact table, dimension joins, filtered scope)
//! once, then shapes it into a grouped query or the fan-out sum rewrite.

use std::collections::BTreeMap;

use serde_json::{Number, Value};

use crate::dimension::ReportingDimension;
use crate::error::{Result, ReportingError};
use crate::filters::{PartitionedFilters, QueryScope, SearchTermEvaluator};
use crate::metric::{Aggregate, AggregateExpression, DimensionOrder, MetricFilterOp, SortDirection};
use crate::schema::Fact;
use crate::sql_ast::{Join, OrderItem, SelectItem, SelectQuery, SqlExpr, TableRef};

use super::plan::{BaseRelation, ReportPlan, DERIVED_ALIAS, FACT_ID_ALIAS, MEASURE_ALIAS};

pub(crate) struct PlanInput<'a> {
    pub fact: &'a Fact,
    pub metric_name: &'a str,
    pub aggregate: Aggregate,
    pub aggregate_expression: Option<&'a AggregateExpression>,
    pub dimensions: &'a [ReportingDimension],
    pub identifiers: bool,
    pub metric_filter: &'a BTreeMap<MetricFilterOp, f64>,
    pub ordering: &'a [DimensionOrder],
    pub filters: &'a PartitionedFilters,
    pub search: Option<&'a dyn SearchTermEvaluator>,
}

pub(crate) fn build_plan(input: &PlanInput<'_>) -> Result<ReportPlan> {
    let base = base_relation(input)?;
    match input.aggregate {
        Aggregate::Sum => build_fan_out_sum(input, base),
        _ => build_grouped(input, base),
    }
}

fn base_relation(input: &PlanInput<'_>) -> Result<BaseRelation> {
    let mut joins: Vec<Join> = Vec::new();
    for join in input.dimensions.iter().filter_map(ReportingDimension::join) {
        if !joins.contains(join) {
            joins.push(join.clone());
        }
    }

    let scope = input
        .filters
        .apply(QueryScope::new(input.fact.table.clone()), input.search)?;
    let (scope_joins, filters) = scope.into_parts();
    for join in scope_joins {
        if !joins.contains(&join) {
            joins.push(join);
        }
    }

    Ok(BaseRelation {
        from: TableRef::table(input.fact.table.clone()),
        joins,
        filters,
    })
}

/// Row-level value fed to the aggregate: the aggregate expression or the measure.
fn measure_expr(input: &PlanInput<'_>) -> SqlExpr {
    match input.aggregate_expression {
        Some(expr) => SqlExpr::Raw(expr.sql.clone()),
        None => SqlExpr::column(input.fact.table.clone(), input.fact.measure.clone()),
    }
}

fn primary_key_expr(input: &PlanInput<'_>) -> SqlExpr {
    SqlExpr::column(input.fact.table.clone(), input.fact.primary_key.clone())
}

fn aggregate_expr(input: &PlanInput<'_>) -> SqlExpr {
    match input.aggregate {
        Aggregate::Count => {
            let mut args = vec![primary_key_expr(input)];
            if let Some(expr) = input.aggregate_expression {
                args.push(SqlExpr::Raw(expr.sql.clone()));
            }
            SqlExpr::Aggregate {
                agg: Aggregate::Count,
                distinct: true,
                args,
            }
        }
        agg => SqlExpr::Aggregate {
            agg,
            distinct: false,
            args: vec![measure_expr(input)],
        },
    }
}

fn having(input: &PlanInput<'_>, aggregate: &SqlExpr) -> Result<Vec<SqlExpr>> {
    input
        .metric_filter
        .iter()
        .map(|(op, value)| {
            let number = Number::from_f64(*value).ok_or_else(|| {
                ReportingError::Validation(format!(
                    "metric filter {op:?} on '{}' is not a finite number",
                    input.metric_name
                ))
            })?;
            Ok(SqlExpr::binary(
                op.sql_operator(),
                aggregate.clone(),
                SqlExpr::Literal(Value::Number(number)),
            ))
        })
        .collect()
}

fn order_items<F>(input: &PlanInput<'_>, to_item: F) -> Vec<OrderItem>
where
    F: Fn(&ReportingDimension, SortDirection) -> OrderItem,
{
    let mut items = Vec::new();
    for order in input.ordering {
        match input
            .dimensions
            .iter()
            .find(|d| d.name == order.dimension)
        {
            Some(dim) => items.push(to_item(dim, order.direction)),
            None => tracing::warn!(
                metric = %input.metric_name,
                dimension = %order.dimension,
                "ignoring order by dimension that is not selected"
            ),
        }
    }
    items
}

fn build_grouped(input: &PlanInput<'_>, base: BaseRelation) -> Result<ReportPlan> {
    let aggregate = aggregate_expr(input);

    let mut select = vec![SelectItem {
        expr: aggregate.clone(),
        alias: Some(input.metric_name.to_string()),
    }];
    let mut group_by = Vec::new();
    for dim in input.dimensions {
        select.extend(dim.select_items(input.identifiers));
        group_by.extend(dim.group_by(input.identifiers));
    }

    Ok(ReportPlan::Grouped(SelectQuery {
        distinct: false,
        select,
        from: base.from,
        joins: base.joins,
        filters: base.filters,
        group_by,
        having: having(input, &aggregate)?,
        order_by: order_items(input, |dim, dir| dim.order_by(dir)),
    }))
}

fn build_fan_out_sum(input: &PlanInput<'_>, base: BaseRelation) -> Result<ReportPlan> {
    let mut inner_select = vec![
        SelectItem {
            expr: primary_key_expr(input),
            alias: Some(FACT_ID_ALIAS.to_string()),
        },
        SelectItem {
            expr: measure_expr(input),
            alias: Some(MEASURE_ALIAS.to_string()),
        },
    ];
    for dim in input.dimensions {
        inner_select.extend(dim.select_items(input.identifiers));
    }
    let inner = SelectQuery {
        distinct: true,
        select: inner_select,
        from: base.from,
        joins: base.joins,
        filters: base.filters,
        ..Default::default()
    };

    let aggregate = SqlExpr::Aggregate {
        agg: Aggregate::Sum,
        distinct: false,
        args: vec![SqlExpr::column(DERIVED_ALIAS, MEASURE_ALIAS)],
    };
    let mut outer_select = vec![SelectItem {
        expr: aggregate.clone(),
        alias: Some(input.metric_name.to_string()),
    }];
    let mut group_by = Vec::new();
    for dim in input.dimensions {
        outer_select.extend(dim.derived_select_items(input.identifiers, DERIVED_ALIAS));
        group_by.extend(dim.derived_group_by(input.identifiers, DERIVED_ALIAS));
    }
    let outer = SelectQuery {
        distinct: false,
        select: outer_select,
        from: TableRef::table(DERIVED_ALIAS),
        joins: Vec::new(),
        filters: Vec::new(),
        group_by,
        having: having(input, &aggregate)?,
        order_by: order_items(input, |dim, dir| dim.derived_order_by(dir, DERIVED_ALIAS)),
    };

    Ok(ReportPlan::FanOutSum { inner, outer })
}

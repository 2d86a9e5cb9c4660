use crate::backends::ConnectionManager;
use crate::error::Result;
use crate::executor::ResultRow;
use crate::registry::SchemaRegistry;
use crate::report::{Report, ReportOptions};

/// Build a report for a registered metric and run it on its fact's data source.
pub async fn run_metric(
    registry: &SchemaRegistry,
    connections: &ConnectionManager,
    metric_name: &str,
    options: ReportOptions,
) -> Result<Vec<ResultRow>> {
    let mut report = Report::for_metric(registry, metric_name, options)?;
    let conn = connections.require(&report.fact().data_source)?.clone();
    let rows = report.run(conn.as_ref()).await?;
    Ok(rows.to_vec())
}

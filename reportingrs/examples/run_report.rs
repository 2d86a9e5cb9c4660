use std::sync::Arc;

use reporting::{
    backends::ConnectionManager,
    runtime::run_metric,
    PredicateSearch, ReportOptions, ReportingConfig, SchemaRegistry,
};

const DEMO_DATA: &str = "
CREATE TABLE customers (id INTEGER PRIMARY KEY, name VARCHAR, country VARCHAR);
CREATE TABLE orders (
    id INTEGER PRIMARY KEY,
    customer_id INTEGER,
    status VARCHAR,
    amount DOUBLE,
    created_at TIMESTAMP
);
INSERT INTO customers VALUES (1, 'Alice', 'US'), (2, 'Bob', 'UK'), (3, 'Carla', 'US');
INSERT INTO orders VALUES
    (1, 1, 'paid', 100.0, '2023-01-01'),
    (2, 1, 'paid', 50.0, '2023-04-02'),
    (3, 2, 'open', 25.0, '2023-05-03'),
    (4, 3, 'paid', 75.0, '2023-08-19');
";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ReportingConfig::from_file("demos/reporting.toml")?;
    let registry = SchemaRegistry::builder()
        .config(&config)
        .search_evaluator(Arc::new(PredicateSearch))
        .load_dir("demos/schema")?
        .build()?;

    let mut connections = ConnectionManager::with_config(config);
    let duckdb = connections.open_duckdb("local", None)?;
    duckdb.execute_batch(DEMO_DATA).await?;

    for metric in ["revenue_by_country", "orders_by_quarter"] {
        let rows = run_metric(&registry, &connections, metric, ReportOptions::default()).await?;
        println!("{metric}: {} rows", rows.len());
        for row in rows {
            println!("  {}", serde_json::Value::Object(row));
        }
    }
    Ok(())
}

use std::{env, path::PathBuf};

use reporting::{dialect::dialect_for, Report, ReportOptions, ReportingConfig, SchemaRegistry};

fn usage() {
    eprintln!("Usage: print_sql <schema_dir> <metric> [dialect] [options_json]");
    eprintln!("Example: cargo run --example print_sql -- demos/schema revenue_by_country MySQL");
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1).collect::<Vec<_>>();
    if args.len() < 2 {
        usage();
        std::process::exit(1);
    }

    let schema_dir = PathBuf::from(args.remove(0));
    let metric = args.remove(0);
    let dialect_name = if args.is_empty() {
        "PostgreSQL".to_string()
    } else {
        args.remove(0)
    };
    let options: ReportOptions = match args.first() {
        Some(json) => serde_json::from_str(json)?,
        None => ReportOptions::default(),
    };

    let dialect = dialect_for(&dialect_name)
        .ok_or_else(|| anyhow::anyhow!("unknown dialect {dialect_name}"))?;
    let config = ReportingConfig::load_default();
    let registry = SchemaRegistry::builder()
        .config(&config)
        .search_evaluator(std::sync::Arc::new(reporting::PredicateSearch))
        .load_dir(schema_dir)?
        .build()?;

    let report = Report::for_metric(&registry, &metric, options)?;
    println!("{}", report.statement(dialect.as_ref())?);
    Ok(())
}

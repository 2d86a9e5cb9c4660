//! SQL dialect abstractions for different database backends.
//!
//! Each dialect lives in its own file. Dialects are pure string builders,
//! so all of them are compiled regardless of which backends are enabled.

use crate::date_trunc::{adapter_for, DateTruncAdapter};
use crate::metric::Aggregate;

/// Dialects render identifiers and primitive expression pieces.
/// Expression tree walking lives in the SQL renderer; the dialect
/// only maps logical constructs to SQL fragments.
pub trait Dialect {
    /// Adapter name, as reported by the backend (e.g. "PostgreSQL").
    fn name(&self) -> &'static str;
    fn quote_ident(&self, ident: &str) -> String;
    fn date_trunc(&self) -> Option<&'static dyn DateTruncAdapter> {
        adapter_for(self.name())
    }
    /// Whether `COUNT(DISTINCT a, b)` is accepted.
    fn supports_multi_column_count_distinct(&self) -> bool {
        false
    }
    fn render_aggregate(&self, agg: Aggregate, distinct: bool, args: &[String]) -> String {
        let func = agg.sql_name();
        match (agg, distinct, args) {
            (Aggregate::Count, true, [key, gates @ ..])
                if !gates.is_empty() && !self.supports_multi_column_count_distinct() =>
            {
                let condition: Vec<String> =
                    gates.iter().map(|g| format!("({g}) IS NOT NULL")).collect();
                format!(
                    "COUNT(DISTINCT CASE WHEN {} THEN {key} END)",
                    condition.join(" AND ")
                )
            }
            (_, true, _) => format!("{func}(DISTINCT {})", args.join(", ")),
            (_, false, _) => format!("{func}({})", args.join(", ")),
        }
    }
    fn render_literal(&self, value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::Null => "NULL".to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            serde_json::Value::Array(items) => {
                let rendered: Vec<String> = items.iter().map(|v| self.render_literal(v)).collect();
                rendered.join(", ")
            }
            serde_json::Value::Object(_) => {
                format!("'{}'", value.to_string().replace('\'', "''"))
            }
        }
    }
}

mod duckdb;
mod mysql;
mod postgres;
mod sqlite;

pub use duckdb::DuckDbDialect;
pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

/// Resolve a dialect from its adapter name.
pub fn dialect_for(name: &str) -> Option<Box<dyn Dialect + Send + Sync>> {
    match name {
        "PostgreSQL" | "PostGIS" => Some(Box::new(PostgresDialect)),
        "DuckDB" => Some(Box::new(DuckDbDialect)),
        "MySQL" | "Mysql2" => Some(Box::new(MySqlDialect)),
        "SQLite" => Some(Box::new(SqliteDialect)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_distinct_with_gate_falls_back_to_case() {
        let sql = PostgresDialect.render_aggregate(
            Aggregate::Count,
            true,
            &["\"figures\".\"id\"".to_string(), "kind = 'card'".to_string()],
        );
        assert_eq!(
            sql,
            "COUNT(DISTINCT CASE WHEN (kind = 'card') IS NOT NULL THEN \"figures\".\"id\" END)"
        );
    }

    #[test]
    fn mysql_keeps_multi_column_count_distinct() {
        let sql = MySqlDialect.render_aggregate(
            Aggregate::Count,
            true,
            &["`figures`.`id`".to_string(), "kind = 'card'".to_string()],
        );
        assert_eq!(sql, "COUNT(DISTINCT `figures`.`id`, kind = 'card')");
    }

    #[test]
    fn resolves_dialects_by_adapter_name() {
        assert_eq!(dialect_for("Mysql2").unwrap().name(), "MySQL");
        assert!(dialect_for("Oracle").is_none());
        assert!(dialect_for("SQLite").unwrap().date_trunc().is_none());
    }
}

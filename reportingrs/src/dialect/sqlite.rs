//! SQLite dialect implementation.
//!
//! No date truncation adapter is registered for SQLite, so time-bucketed
//! dimensions are rejected for facts stored there.

use super::Dialect;

#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "SQLite"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

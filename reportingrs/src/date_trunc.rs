//! Per-dialect translation of a time precision into a truncated timestamp
//! expression.
//!
//! Backends with a native `date_trunc` delegate to it directly. Backends
//! without one get an emulation built from whole-unit differences against
//! a fixed anchor.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ReportingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
    Decade,
    Century,
    Millennium,
}

impl Precision {
    pub const ALL: [Precision; 11] = [
        Precision::Second,
        Precision::Minute,
        Precision::Hour,
        Precision::Day,
        Precision::Week,
        Precision::Month,
        Precision::Quarter,
        Precision::Year,
        Precision::Decade,
        Precision::Century,
        Precision::Millennium,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Second => "second",
            Precision::Minute => "minute",
            Precision::Hour => "hour",
            Precision::Day => "day",
            Precision::Week => "week",
            Precision::Month => "month",
            Precision::Quarter => "quarter",
            Precision::Year => "year",
            Precision::Decade => "decade",
            Precision::Century => "century",
            Precision::Millennium => "millennium",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = ReportingError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        Precision::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == lowered)
            .ok_or_else(|| ReportingError::UnsupportedPrecision {
                precision: s.to_string(),
                adapter: "any dialect".to_string(),
            })
    }
}

/// Builds a truncated-timestamp SQL expression for one dialect.
pub trait DateTruncAdapter: Send + Sync {
    /// Dialect name this adapter is registered under.
    fn dialect_name(&self) -> &'static str;

    fn supported_precisions(&self) -> &'static [Precision];

    fn supports(&self, precision: Precision) -> bool {
        self.supported_precisions().contains(&precision)
    }

    /// Wrap an already-rendered, qualified column expression.
    fn truncate(&self, precision: Precision, expr: &str) -> Result<String>;
}

fn unsupported(precision: Precision, adapter: &str) -> ReportingError {
    ReportingError::UnsupportedPrecision {
        precision: precision.to_string(),
        adapter: adapter.to_string(),
    }
}

/// `date_trunc('<unit>', expr)` for backends that ship it.
///
/// PostgreSQL and DuckDB both truncate weeks to the ISO Monday.
#[derive(Debug, Clone, Copy)]
pub struct NativeDateTrunc {
    dialect: &'static str,
}

impl NativeDateTrunc {
    pub const fn new(dialect: &'static str) -> Self {
        Self { dialect }
    }
}

impl DateTruncAdapter for NativeDateTrunc {
    fn dialect_name(&self) -> &'static str {
        self.dialect
    }

    fn supported_precisions(&self) -> &'static [Precision] {
        &Precision::ALL
    }

    fn truncate(&self, precision: Precision, expr: &str) -> Result<String> {
        if !self.supports(precision) {
            return Err(unsupported(precision, self.dialect));
        }
        Ok(format!("date_trunc('{}', {expr})", precision.as_str()))
    }
}

/// Day zero of the emulation. 0001-01-01 is a Monday in the proleptic
/// Gregorian calendar, so whole-week offsets from it land on Mondays
/// whatever the server's week-start mode is.
pub const EMULATION_ANCHOR: &str = "0001-01-01";

const EMULATED_PRECISIONS: [Precision; 8] = [
    Precision::Second,
    Precision::Minute,
    Precision::Hour,
    Precision::Day,
    Precision::Week,
    Precision::Month,
    Precision::Quarter,
    Precision::Year,
];

/// Emulation for backends without `date_trunc` (MySQL): count whole units
/// between the anchor and the value, then add that many units back onto
/// the anchor.
///
/// `TIMESTAMPDIFF` has no decade/century/millennium units, so those are
/// reported as unsupported rather than approximated.
#[derive(Debug, Clone, Copy)]
pub struct EmulatedDateTrunc {
    dialect: &'static str,
}

impl EmulatedDateTrunc {
    pub const fn new(dialect: &'static str) -> Self {
        Self { dialect }
    }
}

impl DateTruncAdapter for EmulatedDateTrunc {
    fn dialect_name(&self) -> &'static str {
        self.dialect
    }

    fn supported_precisions(&self) -> &'static [Precision] {
        &EMULATED_PRECISIONS
    }

    fn truncate(&self, precision: Precision, expr: &str) -> Result<String> {
        if !self.supports(precision) {
            return Err(unsupported(precision, self.dialect));
        }
        let unit = precision.as_str().to_ascii_uppercase();
        Ok(format!(
            "DATE_ADD('{EMULATION_ANCHOR}', INTERVAL TIMESTAMPDIFF({unit}, '{EMULATION_ANCHOR}', {expr}) {unit})"
        ))
    }
}

static POSTGRES: NativeDateTrunc = NativeDateTrunc::new("PostgreSQL");
static DUCKDB: NativeDateTrunc = NativeDateTrunc::new("DuckDB");
static MYSQL: EmulatedDateTrunc = EmulatedDateTrunc::new("MySQL");

static MAPPINGS: Lazy<HashMap<&'static str, &'static dyn DateTruncAdapter>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, &'static dyn DateTruncAdapter> = HashMap::new();
    map.insert("PostgreSQL", &POSTGRES);
    map.insert("PostGIS", &POSTGRES);
    map.insert("DuckDB", &DUCKDB);
    map.insert("MySQL", &MYSQL);
    map.insert("Mysql2", &MYSQL);
    map
});

/// Look up the adapter registered for a dialect name, if any.
pub fn adapter_for(dialect_name: &str) -> Option<&'static dyn DateTruncAdapter> {
    MAPPINGS.get(dialect_name).copied()
}

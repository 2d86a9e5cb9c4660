#[cfg(feature = "duckdb")]
use duckdb::types::{TimeUnit, Value as DuckValue};
use serde_json::{Map, Value};

/// One report row, keyed by metric name and dimension names.
pub type ResultRow = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<ResultRow>,
}

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[cfg(feature = "duckdb")]
fn timestamp_to_json(unit: TimeUnit, t: i64) -> Value {
    let micros = match unit {
        TimeUnit::Second => t.checked_mul(1_000_000),
        TimeUnit::Millisecond => t.checked_mul(1_000),
        TimeUnit::Microsecond => Some(t),
        TimeUnit::Nanosecond => Some(t / 1_000),
    };
    micros
        .and_then(|m| {
            let nanos = (m.rem_euclid(1_000_000) * 1_000) as u32;
            chrono::DateTime::<chrono::Utc>::from_timestamp(m.div_euclid(1_000_000), nanos)
        })
        .map(|dt| Value::String(dt.naive_utc().format(TIMESTAMP_FORMAT).to_string()))
        .unwrap_or_else(|| Value::String(format!("{t} ({unit:?})")))
}

#[cfg(feature = "duckdb")]
fn date_to_json(days_since_epoch: i32) -> Value {
    // 719_163 days between 0001-01-01 (CE day 1) and 1970-01-01.
    days_since_epoch
        .checked_add(719_163)
        .and_then(chrono::NaiveDate::from_num_days_from_ce_opt)
        .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
        .unwrap_or_else(|| Value::from(days_since_epoch))
}

#[cfg(feature = "duckdb")]
pub(crate) fn duck_value_to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(i) => Value::from(i),
        DuckValue::SmallInt(i) => Value::from(i),
        DuckValue::Int(i) => Value::from(i),
        DuckValue::BigInt(i) => Value::from(i),
        // SUM over BIGINT widens to HUGEINT.
        DuckValue::HugeInt(i) => match i64::try_from(i) {
            Ok(small) => Value::from(small),
            Err(_) => Value::String(i.to_string()),
        },
        DuckValue::UTinyInt(i) => Value::from(i),
        DuckValue::USmallInt(i) => Value::from(i),
        DuckValue::UInt(i) => Value::from(i),
        DuckValue::UBigInt(i) => Value::from(i),
        DuckValue::Float(f) => Value::from(f),
        DuckValue::Double(f) => Value::from(f),
        DuckValue::Decimal(d) => Value::String(d.to_string()),
        DuckValue::Timestamp(unit, t) => timestamp_to_json(unit, t),
        DuckValue::Text(s) => Value::String(s),
        DuckValue::Blob(bytes) => Value::String(hex::encode(bytes)),
        DuckValue::Date32(d) => date_to_json(d),
        DuckValue::Time64(unit, t) => Value::String(format!("{t} ({unit:?})")),
        DuckValue::Interval {
            months,
            days,
            nanos,
        } => Value::String(format!("{months} months {days} days {nanos} nanos")),
        DuckValue::List(items) => {
            let values = items.into_iter().map(duck_value_to_json).collect();
            Value::Array(values)
        }
        DuckValue::Enum(s) => Value::String(s),
        DuckValue::Struct(fields) => {
            let mut map = Map::new();
            for (key, val) in fields.iter() {
                map.insert(key.clone(), duck_value_to_json(val.clone()));
            }
            Value::Object(map)
        }
        DuckValue::Array(items) => {
            let values = items.into_iter().map(duck_value_to_json).collect();
            Value::Array(values)
        }
        DuckValue::Map(entries) => {
            let pairs: Vec<Value> = entries
                .iter()
                .map(|(k, v)| {
                    Value::Array(vec![
                        duck_value_to_json(k.clone()),
                        duck_value_to_json(v.clone()),
                    ])
                })
                .collect();
            Value::Array(pairs)
        }
        DuckValue::Union(inner) => duck_value_to_json(*inner),
    }
}

#[cfg(all(test, feature = "duckdb"))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamps_render_as_naive_strings() {
        // 2018-09-29 12:15:00 UTC
        let micros = 1_538_223_300_000_000;
        assert_eq!(
            duck_value_to_json(DuckValue::Timestamp(TimeUnit::Microsecond, micros)),
            json!("2018-09-29 12:15:00")
        );
        assert_eq!(
            duck_value_to_json(DuckValue::Timestamp(TimeUnit::Second, micros / 1_000_000)),
            json!("2018-09-29 12:15:00")
        );
    }

    #[test]
    fn dates_render_as_iso_strings() {
        assert_eq!(duck_value_to_json(DuckValue::Date32(0)), json!("1970-01-01"));
        assert_eq!(
            duck_value_to_json(DuckValue::Date32(17_713)),
            json!("2018-07-01")
        );
    }

    #[test]
    fn small_hugeints_become_numbers() {
        assert_eq!(duck_value_to_json(DuckValue::HugeInt(11_040)), json!(11_040));
        let big = i128::from(i64::MAX) + 1;
        assert_eq!(
            duck_value_to_json(DuckValue::HugeInt(big)),
            json!(big.to_string())
        );
    }
}

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use lp_core::{DbError, Value};
use mysql_async::Value as MyValue;

/// Convert a core `Value` into the wire value `mysql_async` expects for a
/// bound parameter.
pub fn value_to_mysql(value: &Value) -> MyValue {
    match value {
        Value::Null => MyValue::NULL,
        Value::Bool(b) => MyValue::Int(*b as i64),
        Value::Int(i) => MyValue::Int(*i),
        Value::Float(f) => MyValue::Double(*f),
        Value::Text(s) => MyValue::Bytes(s.clone().into_bytes()),
        Value::Bytes(b) => MyValue::Bytes(b.clone()),
        Value::Json(s) => MyValue::Bytes(s.clone().into_bytes()),
        Value::DateTime(dt) => MyValue::Date(
            dt.format("%Y").to_string().parse().unwrap_or(0),
            dt.format("%m").to_string().parse().unwrap_or(0),
            dt.format("%d").to_string().parse().unwrap_or(0),
            dt.format("%H").to_string().parse().unwrap_or(0),
            dt.format("%M").to_string().parse().unwrap_or(0),
            dt.format("%S").to_string().parse().unwrap_or(0),
            dt.timestamp_subsec_micros(),
        ),
    }
}

/// Convert a `mysql_async` wire value into the core `Value`, given the
/// column's declared type name (used to disambiguate integer-shaped
/// columns that are semantically booleans or JSON).
pub fn mysql_to_value(raw: MyValue, column_type: &str) -> Result<Value, DbError> {
    let value = match raw {
        MyValue::NULL => Value::Null,
        MyValue::Bytes(bytes) => {
            let text = String::from_utf8(bytes.clone())
                .unwrap_or_else(|_| format!("<{} bytes>", bytes.len()));
            if column_type.eq_ignore_ascii_case("json") {
                Value::Json(text)
            } else if column_type.eq_ignore_ascii_case("blob")
                || column_type.eq_ignore_ascii_case("varbinary")
            {
                Value::Bytes(bytes)
            } else {
                Value::Text(text)
            }
        }
        MyValue::Int(i) => {
            if column_type.eq_ignore_ascii_case("tinyint(1)") {
                Value::Bool(i != 0)
            } else {
                Value::Int(i)
            }
        }
        MyValue::UInt(u) => Value::Int(u as i64),
        MyValue::Float(f) => Value::Float(f as f64),
        MyValue::Double(d) => Value::Float(d),
        MyValue::Date(year, month, day, hour, minute, second, micro) => {
            let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .ok_or_else(|| DbError::query_failed("invalid DATE value from MySQL"))?;
            let time = NaiveTime::from_hms_micro_opt(
                hour as u32,
                minute as u32,
                second as u32,
                micro,
            )
            .ok_or_else(|| DbError::query_failed("invalid TIME component from MySQL"))?;
            let naive = NaiveDateTime::new(date, time);
            Value::DateTime(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        }
        MyValue::Time(negative, days, hours, minutes, seconds, micros) => {
            let total_secs = days as i64 * 86_400
                + hours as i64 * 3600
                + minutes as i64 * 60
                + seconds as i64;
            let signed = if negative { -total_secs } else { total_secs };
            Value::Text(format!("{signed}.{micros:06}s"))
        }
    };
    Ok(value)
}

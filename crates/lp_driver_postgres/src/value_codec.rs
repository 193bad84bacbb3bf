use bytes::BytesMut;
use chrono::{DateTime, Utc};
use lp_core::Value;
use std::error::Error as StdError;
use tokio_postgres::types::{to_sql_checked, IsNull, Type};

/// Lets `Value` go directly into `tokio_postgres` parameter slots, instead
/// of matching on the variant at every call site.
impl tokio_postgres::types::ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(i) => i.to_sql(ty, out),
            Value::Float(f) => f.to_sql(ty, out),
            Value::Text(s) => s.to_sql(ty, out),
            Value::Bytes(b) => b.to_sql(ty, out),
            Value::Json(s) => {
                let parsed: serde_json::Value = serde_json::from_str(s)?;
                parsed.to_sql(ty, out)
            }
            Value::DateTime(dt) => dt.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Read column `idx` out of a row as a `Value`, dispatching on the
/// column's reported Postgres type name rather than assuming one Rust
/// type per column.
pub fn value_from_row(row: &tokio_postgres::Row, idx: usize) -> Result<Value, lp_core::DbError> {
    let column = &row.columns()[idx];
    let type_name = column.type_().name();

    macro_rules! get_nullable {
        ($t:ty, $wrap:expr) => {{
            let value: Option<$t> = row
                .try_get(idx)
                .map_err(|e| lp_core::DbError::query_failed(e.to_string()))?;
            match value {
                Some(v) => $wrap(v),
                None => Value::Null,
            }
        }};
    }

    let value = match type_name {
        "bool" => get_nullable!(bool, Value::Bool),
        "int2" => get_nullable!(i16, |v: i16| Value::Int(v as i64)),
        "int4" => get_nullable!(i32, |v: i32| Value::Int(v as i64)),
        "int8" => get_nullable!(i64, Value::Int),
        "float4" => get_nullable!(f32, |v: f32| Value::Float(v as f64)),
        "float8" => get_nullable!(f64, Value::Float),
        "bytea" => get_nullable!(Vec<u8>, Value::Bytes),
        "json" | "jsonb" => {
            get_nullable!(serde_json::Value, |v: serde_json::Value| Value::Json(v.to_string()))
        }
        "timestamptz" | "timestamp" => {
            get_nullable!(DateTime<Utc>, Value::DateTime)
        }
        _ => get_nullable!(String, Value::Text),
    };

    Ok(value)
}

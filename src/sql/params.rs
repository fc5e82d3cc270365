//! Convert serde_json::Value to types that sqlx can bind.

use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;

/// A value that can be bound to a PostgreSQL query. Each variant declares its own type so
/// PostgreSQL sees `int8`, `float8`, `bool`, `text` or `jsonb` rather than one catch-all.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Json(Value),
}

impl PgBindValue {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::Bool(b) => PgBindValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PgBindValue::I64(i),
                None => n
                    .as_f64()
                    .map(PgBindValue::F64)
                    .unwrap_or_else(|| PgBindValue::Text(n.to_string())),
            },
            Value::String(s) => PgBindValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => PgBindValue::Json(v.clone()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            PgBindValue::Null => <Option<String> as Encode<Postgres>>::encode_by_ref(&None, buf)?,
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf)?,
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::Text(s) => {
                let s_ref: &str = s.as_str();
                <&str as Encode<Postgres>>::encode_by_ref(&s_ref, buf)?
            }
            PgBindValue::Json(v) => <serde_json::Value as Encode<Postgres>>::encode_by_ref(v, buf)?,
        })
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgBindValue::Null | PgBindValue::Text(_) => PgTypeInfo::with_name("TEXT"),
            PgBindValue::Bool(_) => PgTypeInfo::with_name("BOOL"),
            PgBindValue::I64(_) => PgTypeInfo::with_name("INT8"),
            PgBindValue::F64(_) => PgTypeInfo::with_name("FLOAT8"),
            PgBindValue::Json(_) => PgTypeInfo::with_name("JSONB"),
        })
    }
}

impl sqlx::Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_values_map_to_typed_binds() {
        assert_eq!(PgBindValue::from_json(&json!(3)), PgBindValue::I64(3));
        assert_eq!(PgBindValue::from_json(&json!(1.5)), PgBindValue::F64(1.5));
        assert_eq!(PgBindValue::from_json(&json!("x")), PgBindValue::Text("x".into()));
        assert_eq!(PgBindValue::from_json(&json!(null)), PgBindValue::Null);
        assert_eq!(PgBindValue::from_json(&json!([1])), PgBindValue::Json(json!([1])));
    }
}

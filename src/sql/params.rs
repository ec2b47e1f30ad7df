//! Convert record values to parameters sqlx can bind.

use crate::value::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;

/// A value bound to a PostgreSQL query. Every parameter is sent as text and
/// cast in SQL (`$1::uuid`), so one bind type covers all column kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
}

impl PgBindValue {
    pub fn from_value(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::Bool(b) => PgBindValue::Bool(*b),
            Value::Int(i) => PgBindValue::I64(*i),
            Value::Float(f) => PgBindValue::F64(*f),
            Value::Uuid(u) => PgBindValue::Uuid(*u),
            Value::Json(j) => PgBindValue::Json(j.clone()),
            Value::List(_) => PgBindValue::Json(v.to_json()),
            Value::Record(r) => match r.key_values().into_iter().next() {
                Some(key) => PgBindValue::from_value(&key),
                None => PgBindValue::Null,
            },
            other => PgBindValue::String(other.to_text()),
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            PgBindValue::Null => None,
            PgBindValue::Bool(b) => Some(b.to_string()),
            PgBindValue::I64(n) => Some(n.to_string()),
            PgBindValue::F64(n) => Some(n.to_string()),
            PgBindValue::String(s) => Some(s.clone()),
            PgBindValue::Uuid(u) => Some(u.to_string()),
            PgBindValue::Json(v) => Some(v.to_string()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self.as_text() {
            None => Ok(IsNull::Yes),
            Some(text) => <&str as Encode<Postgres>>::encode_by_ref(&text.as_str(), buf),
        }
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
    use crate::value::Record;

    #[test]
    fn related_records_bind_their_key() {
        let u = uuid::Uuid::new_v4();
        let model = crate::models::Model::builder("authors")
            .column(crate::models::Column::new("uuid", crate::models::ColumnType::Uuid).primary_key())
            .build()
            .unwrap();
        let mut r = Record::for_model(&model);
        r.set("uuid", u);
        assert_eq!(PgBindValue::from_value(&r.into()), PgBindValue::Uuid(u));
    }

    #[test]
    fn text_forms() {
        assert_eq!(PgBindValue::Bool(true).as_text().as_deref(), Some("true"));
        assert_eq!(PgBindValue::Null.as_text(), None);
        assert_eq!(
            PgBindValue::Json(serde_json::json!({"a": 1})).as_text().as_deref(),
            Some("{\"a\":1}")
        );
    }
}

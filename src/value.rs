//! Internal values held on records, and their JSON mapping.

use crate::models::Model;
use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// A converted value: what fields produce from request data
/// and what stores read and write.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
    Uuid(Uuid),
    Json(Json),
    List(Vec<Value>),
    Record(Box<Record>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Plain identity mapping from request JSON.
    pub fn from_json(v: &Json) -> Value {
        match v {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            Json::Object(_) => Value::Json(v.clone()),
        }
    }

    /// Canonical wire form: dates as `YYYY-MM-DD`, datetimes as ISO-8601,
    /// UUIDs hyphenated, records as objects.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(d) => Json::String(d.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
            Value::Uuid(u) => Json::String(u.to_string()),
            Value::Json(j) => j.clone(),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Record(r) => r.to_json(),
        }
    }

    /// Text used when a value is embedded in a message or bound as SQL text.
    pub fn to_text(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Json(j) => j.to_string(),
            other => match other.to_json() {
                Json::String(s) => s,
                j => j.to_string(),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(Box::new(r))
    }
}

/// Text form of a request value as it appears in messages: strings unquoted.
pub fn display_json(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whether a request value counts as "given" (not null, empty, zero or false).
pub fn is_truthy(v: &Json) -> bool {
    match v {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Json::String(s) => !s.is_empty(),
        Json::Array(a) => !a.is_empty(),
        Json::Object(o) => !o.is_empty(),
    }
}

/// A dynamic attribute bag: the object a serializer creates or edits.
///
/// When `model` is set the record belongs to that model's table and can be
/// persisted through a [`crate::store::Store`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    model: Option<String>,
    key: Vec<String>,
    attrs: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_model(model: &Model) -> Self {
        Record {
            model: Some(model.name().to_string()),
            key: model.primary_key().to_vec(),
            attrs: BTreeMap::new(),
        }
    }

    /// Build a record from attribute pairs.
    pub fn from_attrs<K, V, I>(attrs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Record {
            model: None,
            key: Vec::new(),
            attrs: attrs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Primary key column names of the owning model.
    pub fn key_names(&self) -> &[String] {
        &self.key
    }

    /// Primary key values, `Null` where unset.
    pub fn key_values(&self) -> Vec<Value> {
        self.key
            .iter()
            .map(|k| self.attrs.get(k).cloned().unwrap_or_default())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attrs.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.attrs.remove(name)
    }

    pub fn attrs(&self) -> &BTreeMap<String, Value> {
        &self.attrs
    }

    pub fn to_json(&self) -> Json {
        Json::Object(
            self.attrs
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_numbers_keep_integer_kind() {
        assert_eq!(Value::from_json(&json!(3)), Value::Int(3));
        assert_eq!(Value::from_json(&json!(3.5)), Value::Float(3.5));
    }

    #[test]
    fn canonical_forms() {
        let d = NaiveDate::from_ymd_opt(2016, 9, 20).map(Value::Date);
        assert_eq!(d.map(|v| v.to_json()), Some(json!("2016-09-20")));
        let u = Uuid::nil();
        assert_eq!(Value::Uuid(u).to_json(), json!("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!({"a": 1})));
        assert!(is_truthy(&json!(7)));
    }

    #[test]
    fn record_attrs() {
        let mut r = Record::from_attrs([("name", "Adam")]);
        r.set("age", 30_i64);
        assert_eq!(r.get("name"), Some(&Value::from("Adam")));
        assert_eq!(r.to_json(), json!({"age": 30, "name": "Adam"}));
    }
}

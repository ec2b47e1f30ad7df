//! Storage entity descriptions: tables, typed columns, primary keys.

use crate::error::ConfigError;
use crate::value::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const DELETED_AT: &str = "deleted_at";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnType {
    String { max_length: Option<u32> },
    Text,
    Char { length: u32 },
    DateTime,
    Date,
    Uuid,
    Boolean,
    Integer,
    BigInteger,
    Float,
    Json,
    Jsonb,
}

impl ColumnType {
    /// PostgreSQL type used in DDL and parameter casts.
    pub fn pg_type(&self) -> String {
        match self {
            ColumnType::String { max_length: Some(n) } => format!("varchar({})", n),
            ColumnType::String { max_length: None } => "varchar".into(),
            ColumnType::Text => "text".into(),
            ColumnType::Char { length } => format!("char({})", length),
            ColumnType::DateTime => "timestamptz".into(),
            ColumnType::Date => "date".into(),
            ColumnType::Uuid => "uuid".into(),
            ColumnType::Boolean => "boolean".into(),
            ColumnType::Integer => "integer".into(),
            ColumnType::BigInteger => "bigint".into(),
            ColumnType::Float => "double precision".into(),
            ColumnType::Json => "json".into(),
            ColumnType::Jsonb => "jsonb".into(),
        }
    }

    /// Cast target for bound parameters (length modifiers dropped).
    pub fn cast_type(&self) -> &'static str {
        match self {
            ColumnType::String { .. } => "varchar",
            ColumnType::Text => "text",
            ColumnType::Char { .. } => "bpchar",
            ColumnType::DateTime => "timestamptz",
            ColumnType::Date => "date",
            ColumnType::Uuid => "uuid",
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::BigInteger => "bigint",
            ColumnType::Float => "double precision",
            ColumnType::Json => "json",
            ColumnType::Jsonb => "jsonb",
        }
    }

    pub fn max_length(&self) -> Option<u32> {
        match self {
            ColumnType::String { max_length } => *max_length,
            ColumnType::Char { length } => Some(*length),
            _ => None,
        }
    }

    /// Convert a loosely typed value (route parameter, query string, related
    /// record) into this column's value kind. `None` when it cannot match.
    pub fn coerce(&self, v: &Value) -> Option<Value> {
        if v.is_null() {
            return Some(Value::Null);
        }
        if let Value::Record(_) = v {
            return None;
        }
        let text = v.to_text();
        match self {
            ColumnType::String { .. } | ColumnType::Text | ColumnType::Char { .. } => {
                Some(Value::String(text))
            }
            ColumnType::Uuid => match v {
                Value::Uuid(_) => Some(v.clone()),
                _ => uuid::Uuid::parse_str(&text).ok().map(Value::Uuid),
            },
            ColumnType::Integer | ColumnType::BigInteger => match v {
                Value::Int(_) => Some(v.clone()),
                _ => text.trim().parse::<i64>().ok().map(Value::Int),
            },
            ColumnType::Float => match v {
                Value::Float(_) => Some(v.clone()),
                Value::Int(i) => Some(Value::Float(*i as f64)),
                _ => text.trim().parse::<f64>().ok().map(Value::Float),
            },
            ColumnType::Boolean => match v {
                Value::Bool(_) => Some(v.clone()),
                _ => match text.to_ascii_lowercase().as_str() {
                    "true" | "t" | "1" | "yes" => Some(Value::Bool(true)),
                    "false" | "f" | "0" | "no" => Some(Value::Bool(false)),
                    _ => None,
                },
            },
            ColumnType::Date => match v {
                Value::Date(_) => Some(v.clone()),
                Value::DateTime(d) => Some(Value::Date(d.date_naive())),
                _ => NaiveDate::parse_from_str(&text, "%Y-%m-%d").ok().map(Value::Date),
            },
            ColumnType::DateTime => match v {
                Value::DateTime(_) => Some(v.clone()),
                _ => DateTime::parse_from_rfc3339(&text)
                    .ok()
                    .or_else(|| {
                        NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
                            .ok()
                            .map(|n| n.and_utc().fixed_offset())
                    })
                    .map(Value::DateTime),
            },
            ColumnType::Json | ColumnType::Jsonb => Some(Value::Json(v.to_json())),
        }
    }
}

impl FromStr for ColumnType {
    type Err = ConfigError;

    /// Parses PostgreSQL-style names: `varchar(80)`, `text`, `char(2)`,
    /// `timestamptz`, `uuid`, `bigint`, `jsonb`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let (name, param) = match lower.split_once('(') {
            Some((n, rest)) => {
                let p = rest
                    .trim_end_matches(')')
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| ConfigError::UnknownColumnType(s.to_string()))?;
                (n.trim().to_string(), Some(p))
            }
            None => (lower.clone(), None),
        };
        Ok(match name.as_str() {
            "varchar" | "character varying" | "string" => ColumnType::String { max_length: param },
            "text" => ColumnType::Text,
            "char" | "character" | "bpchar" => ColumnType::Char {
                length: param.unwrap_or(1),
            },
            "timestamptz" | "timestamp" | "datetime" | "timestamp with time zone" => ColumnType::DateTime,
            "date" => ColumnType::Date,
            "uuid" | "guid" => ColumnType::Uuid,
            "boolean" | "bool" => ColumnType::Boolean,
            "integer" | "int" | "int4" | "smallint" | "serial" => ColumnType::Integer,
            "bigint" | "int8" | "bigserial" => ColumnType::BigInteger,
            "float" | "double precision" | "float8" | "real" | "numeric" => ColumnType::Float,
            "json" => ColumnType::Json,
            "jsonb" => ColumnType::Jsonb,
            _ => return Err(ConfigError::UnknownColumnType(s.to_string())),
        })
    }
}

/// Value filled in on insert when the record has none for the column.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnDefault {
    Value(Value),
    Uuid4,
    Now,
}

impl ColumnDefault {
    pub fn produce(&self) -> Value {
        match self {
            ColumnDefault::Value(v) => v.clone(),
            ColumnDefault::Uuid4 => Value::Uuid(uuid::Uuid::new_v4()),
            ColumnDefault::Now => Value::DateTime(Utc::now().fixed_offset()),
        }
    }

    /// SQL expression for DDL.
    pub fn sql(&self) -> Option<String> {
        match self {
            ColumnDefault::Uuid4 => Some("gen_random_uuid()".into()),
            ColumnDefault::Now => Some("now()".into()),
            ColumnDefault::Value(Value::Null) => None,
            ColumnDefault::Value(Value::Bool(b)) => Some(b.to_string()),
            ColumnDefault::Value(Value::Int(i)) => Some(i.to_string()),
            ColumnDefault::Value(Value::Float(f)) => Some(f.to_string()),
            ColumnDefault::Value(v) => Some(format!("'{}'", v.to_text().replace('\'', "''"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
    pub primary_key: bool,
    pub unique: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Column {
            name: name.into(),
            ty,
            nullable: true,
            default: None,
            primary_key: false,
            unique: false,
        }
    }

    /// Marks the column as (part of) the primary key; implies not null.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn not_null(self) -> Self {
        self.nullable(false)
    }

    pub fn default(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Model {
    name: String,
    schema: Option<String>,
    columns: Vec<Column>,
    primary_key: Vec<String>,
}

impl Model {
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            name: name.into(),
            schema: None,
            columns: Vec::new(),
        }
    }

    /// Table name; also the tag carried by records of this model.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn has_composite_key(&self) -> bool {
        self.primary_key.len() > 1
    }
}

pub struct ModelBuilder {
    name: String,
    schema: Option<String>,
    columns: Vec<Column>,
}

impl ModelBuilder {
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds `created_at` / `updated_at`, both defaulting to now.
    pub fn timestamps(self) -> Self {
        self.column(Column::new(CREATED_AT, ColumnType::DateTime).default(ColumnDefault::Now))
            .column(Column::new(UPDATED_AT, ColumnType::DateTime).default(ColumnDefault::Now))
    }

    /// Adds a nullable `deleted_at` used for soft deletion.
    pub fn archivable(self) -> Self {
        self.column(Column::new(DELETED_AT, ColumnType::DateTime))
    }

    pub fn build(self) -> Result<Arc<Model>, ConfigError> {
        let mut seen = HashSet::new();
        for c in &self.columns {
            if !seen.insert(c.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "table {} declares column {} twice",
                    self.name, c.name
                )));
            }
        }
        let primary_key: Vec<String> = self
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        if primary_key.is_empty() {
            return Err(ConfigError::InvalidPrimaryKey {
                table_id: self.name,
                column: String::new(),
            });
        }
        Ok(Arc::new(Model {
            name: self.name,
            schema: self.schema,
            columns: self.columns,
            primary_key,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("varchar(80)", ColumnType::String { max_length: Some(80) })]
    #[case("TEXT", ColumnType::Text)]
    #[case("char(2)", ColumnType::Char { length: 2 })]
    #[case("timestamptz", ColumnType::DateTime)]
    #[case("bigint", ColumnType::BigInteger)]
    #[case("jsonb", ColumnType::Jsonb)]
    fn parses_column_types(#[case] input: &str, #[case] expected: ColumnType) {
        assert_eq!(input.parse::<ColumnType>().ok(), Some(expected));
    }

    #[test]
    fn rejects_unknown_type() {
        assert!("geometry".parse::<ColumnType>().is_err());
    }

    #[test]
    fn model_requires_primary_key() {
        let err = Model::builder("t").column(Column::new("a", ColumnType::Text)).build();
        assert!(matches!(err, Err(ConfigError::InvalidPrimaryKey { .. })));
    }

    #[test]
    fn mixins_add_columns() {
        let m = Model::builder("notes")
            .column(Column::new("id", ColumnType::Integer).primary_key())
            .timestamps()
            .archivable()
            .build();
        let m = match m {
            Ok(m) => m,
            Err(e) => panic!("{e}"),
        };
        let names: Vec<_> = m.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", CREATED_AT, UPDATED_AT, DELETED_AT]);
        assert!(m.column(DELETED_AT).map(|c| c.nullable).unwrap_or(false));
    }

    #[test]
    fn coerces_route_values() {
        let u = uuid::Uuid::new_v4();
        assert_eq!(
            ColumnType::Uuid.coerce(&Value::String(u.to_string())),
            Some(Value::Uuid(u))
        );
        assert_eq!(ColumnType::Integer.coerce(&Value::from("12")), Some(Value::Int(12)));
        assert_eq!(ColumnType::Uuid.coerce(&Value::from("nope")), None);
    }
}

//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE and DDL from a
//! model and a query.

use crate::models::{Model, UPDATED_AT};
use crate::store::{Condition, Query};
use crate::value::Value;

/// Quote identifier for PostgreSQL (safe: only from model definitions).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Schema-qualified table name when the model names a schema.
pub fn qualified_table(model: &Model) -> String {
    match model.schema() {
        Some(schema) => format!("{}.{}", quoted(schema), quoted(model.name())),
        None => quoted(model.name()),
    }
}

#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Placeholder for a new parameter, cast to the column's type.
    fn push_param(&mut self, v: Value, cast: &str) -> String {
        self.params.push(v);
        format!("${}::{}", self.params.len(), cast)
    }
}

fn select_column_list(model: &Model) -> String {
    model
        .columns()
        .iter()
        .map(|c| quoted(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn where_clause(query: &Query, q: &mut QueryBuf) -> String {
    let model = query.model();
    let mut parts = Vec::new();
    for condition in query.conditions() {
        let cast = |col: &str| {
            model
                .column(col)
                .map(|c| c.ty.cast_type())
                .unwrap_or("text")
        };
        match condition {
            Condition::Eq(col, Value::Null) | Condition::IsNull(col) => {
                parts.push(format!("{} IS NULL", quoted(col)));
            }
            Condition::Eq(col, v) => {
                let ph = q.push_param(v.clone(), cast(col));
                parts.push(format!("{} = {}", quoted(col), ph));
            }
            Condition::In(col, values) => {
                if values.is_empty() {
                    parts.push("FALSE".into());
                } else {
                    let phs: Vec<String> = values
                        .iter()
                        .map(|v| q.push_param(v.clone(), cast(col)))
                        .collect();
                    parts.push(format!("{} IN ({})", quoted(col), phs.join(", ")));
                }
            }
            Condition::NotNull(col) => parts.push(format!("{} IS NOT NULL", quoted(col))),
            Condition::Contains {
                column,
                needle,
                case_insensitive,
            } => {
                let ph = q.push_param(Value::String(format!("%{}%", escape_like(needle))), "text");
                let op = if *case_insensitive { "ILIKE" } else { "LIKE" };
                parts.push(format!("{}::text {} {}", quoted(column), op, ph));
            }
        }
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

/// SELECT with the query's conditions, ordering (primary key by default) and
/// optional LIMIT/OFFSET.
pub fn select(query: &Query) -> QueryBuf {
    let mut q = QueryBuf::new();
    let model = query.model();
    let where_ = where_clause(query, &mut q);
    let order = query
        .ordering()
        .iter()
        .map(|(c, asc)| format!("{} {}", quoted(c), if *asc { "ASC" } else { "DESC" }))
        .collect::<Vec<_>>()
        .join(", ");
    let limit_clause = query.limit_value().map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = query.offset_value().map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {}{} ORDER BY {}{}{}",
        select_column_list(model),
        qualified_table(model),
        where_,
        order,
        limit_clause,
        offset_clause
    );
    q
}

pub fn count(query: &Query) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_ = where_clause(query, &mut q);
    q.sql = format!("SELECT COUNT(*) FROM {}{}", qualified_table(query.model()), where_);
    q
}

/// INSERT of the given (column, value) pairs, RETURNING every column.
pub fn insert(model: &Model, values: &[(String, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(model);
    if values.is_empty() {
        q.sql = format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, select_column_list(model));
        return q;
    }
    let mut cols = Vec::new();
    let mut phs = Vec::new();
    for (name, v) in values {
        let cast = model.column(name).map(|c| c.ty.cast_type()).unwrap_or("text");
        cols.push(quoted(name));
        phs.push(q.push_param(v.clone(), cast));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        table,
        cols.join(", "),
        phs.join(", "),
        select_column_list(model)
    );
    q
}

/// UPDATE non-key columns by primary key; `updated_at` is set to NOW() when
/// the model has it.
pub fn update(model: &Model, values: &[(String, Value)], key: &[(String, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for (name, v) in values {
        if name == UPDATED_AT || key.iter().any(|(k, _)| k == name) {
            continue;
        }
        let cast = model.column(name).map(|c| c.ty.cast_type()).unwrap_or("text");
        let ph = q.push_param(v.clone(), cast);
        sets.push(format!("{} = {}", quoted(name), ph));
    }
    if model.column(UPDATED_AT).is_some() {
        sets.push(format!("{} = NOW()", quoted(UPDATED_AT)));
    }
    let wheres = key_predicate(model, key, &mut q);
    if sets.is_empty() {
        q.sql = format!(
            "SELECT {} FROM {} WHERE {}",
            select_column_list(model),
            qualified_table(model),
            wheres
        );
        return q;
    }
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} RETURNING {}",
        qualified_table(model),
        sets.join(", "),
        wheres,
        select_column_list(model)
    );
    q
}

pub fn delete(model: &Model, key: &[(String, Value)]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let wheres = key_predicate(model, key, &mut q);
    q.sql = format!("DELETE FROM {} WHERE {}", qualified_table(model), wheres);
    q
}

fn key_predicate(model: &Model, key: &[(String, Value)], q: &mut QueryBuf) -> String {
    key.iter()
        .map(|(k, v)| {
            let cast = model.column(k).map(|c| c.ty.cast_type()).unwrap_or("text");
            format!("{} = {}", quoted(k), q.push_param(v.clone(), cast))
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// CREATE SCHEMA / CREATE TABLE IF NOT EXISTS for one model.
pub fn create_table(model: &Model) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(schema) = model.schema() {
        out.push(format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema)));
    }
    let mut defs: Vec<String> = model
        .columns()
        .iter()
        .map(|c| {
            let mut def = format!("{} {}", quoted(&c.name), c.ty.pg_type());
            if !c.nullable {
                def.push_str(" NOT NULL");
            }
            if let Some(expr) = c.default.as_ref().and_then(|d| d.sql()) {
                def.push_str(&format!(" DEFAULT {}", expr));
            }
            if c.unique {
                def.push_str(" UNIQUE");
            }
            def
        })
        .collect();
    defs.push(format!(
        "PRIMARY KEY ({})",
        model
            .primary_key()
            .iter()
            .map(|k| quoted(k))
            .collect::<Vec<_>>()
            .join(", ")
    ));
    out.push(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        qualified_table(model),
        defs.join(", ")
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Column, ColumnDefault, ColumnType};
    use std::sync::Arc;

    fn users() -> Arc<Model> {
        Model::builder("users")
            .schema("app")
            .column(Column::new("uuid", ColumnType::Uuid).primary_key().default(ColumnDefault::Uuid4))
            .column(Column::new("email", ColumnType::String { max_length: Some(120) }).not_null().unique())
            .column(Column::new("age", ColumnType::Integer))
            .timestamps()
            .build()
            .unwrap()
    }

    #[test]
    fn select_with_conditions() {
        let q = Query::new(users())
            .eq("email", "a@b.co")
            .is_in("age", vec![Value::Int(1), Value::Int(2)])
            .filter(Condition::IsNull("age".into()))
            .limit(10)
            .offset(20);
        let buf = select(&q);
        assert_eq!(
            buf.sql,
            "SELECT \"uuid\", \"email\", \"age\", \"created_at\", \"updated_at\" FROM \"app\".\"users\" \
             WHERE \"email\" = $1::varchar AND \"age\" IN ($2::integer, $3::integer) AND \"age\" IS NULL \
             ORDER BY \"uuid\" ASC LIMIT 10 OFFSET 20"
        );
        assert_eq!(buf.params.len(), 3);
    }

    #[test]
    fn search_escapes_wildcards() {
        let q = Query::new(users()).filter(Condition::Contains {
            column: "email".into(),
            needle: "50%".into(),
            case_insensitive: true,
        });
        let buf = count(&q);
        assert_eq!(
            buf.sql,
            "SELECT COUNT(*) FROM \"app\".\"users\" WHERE \"email\"::text ILIKE $1::text"
        );
        assert_eq!(buf.params, vec![Value::String("%50\\%%".into())]);
    }

    #[test]
    fn update_touches_updated_at_and_skips_key() {
        let m = users();
        let u = uuid::Uuid::nil();
        let buf = update(
            &m,
            &[
                ("uuid".into(), Value::Uuid(u)),
                ("age".into(), Value::Int(3)),
                ("updated_at".into(), Value::Null),
            ],
            &[("uuid".into(), Value::Uuid(u))],
        );
        assert_eq!(
            buf.sql,
            "UPDATE \"app\".\"users\" SET \"age\" = $1::integer, \"updated_at\" = NOW() \
             WHERE \"uuid\" = $2::uuid RETURNING \"uuid\", \"email\", \"age\", \"created_at\", \"updated_at\""
        );
    }

    #[test]
    fn ddl_includes_defaults_and_key() {
        let stmts = create_table(&users());
        assert_eq!(stmts[0], "CREATE SCHEMA IF NOT EXISTS \"app\"");
        assert!(stmts[1].contains("\"uuid\" uuid NOT NULL DEFAULT gen_random_uuid()"));
        assert!(stmts[1].contains("\"email\" varchar(120) NOT NULL UNIQUE"));
        assert!(stmts[1].ends_with("PRIMARY KEY (\"uuid\"))"));
    }
}

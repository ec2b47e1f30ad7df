//! PostgreSQL store over an sqlx pool.

use super::{column_value, Query, Store, Transaction};
use crate::error::AppError;
use crate::models::{Column, ColumnType, Model};
use crate::sql::{self, PgBindValue, QueryBuf};
use crate::value::{Record, Value};
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{ConnectOptions, PgPool, Postgres, Row};
use std::str::FromStr;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create every model's table (and schema) when missing.
    pub async fn sync_models(&self, models: &[std::sync::Arc<Model>]) -> Result<(), AppError> {
        for model in models {
            for stmt in sql::create_table(model) {
                tracing::debug!(sql = %stmt, "syncdb");
                sqlx::query(&stmt).execute(&self.pool).await?;
            }
            tracing::info!(table = model.name(), "table ready");
        }
        Ok(())
    }
}

fn bind(buf: &QueryBuf) -> sqlx::query::Query<'_, Postgres, PgArguments> {
    let mut q = sqlx::query(&buf.sql);
    for p in &buf.params {
        q = q.bind(PgBindValue::from_value(p));
    }
    q
}

#[async_trait]
impl Store for PgStore {
    async fn fetch(&self, query: &Query) -> Result<Vec<Record>, AppError> {
        if query.is_impossible() {
            return Ok(Vec::new());
        }
        let buf = sql::select(query);
        tracing::debug!(sql = %buf.sql, params = ?buf.params, "fetch");
        let rows = bind(&buf).fetch_all(&self.pool).await?;
        rows.iter().map(|r| row_to_record(query.model(), r)).collect()
    }

    async fn count(&self, query: &Query) -> Result<u64, AppError> {
        if query.is_impossible() {
            return Ok(0);
        }
        let buf = sql::count(query);
        tracing::debug!(sql = %buf.sql, params = ?buf.params, "count");
        let row = bind(&buf).fetch_one(&self.pool).await?;
        let n: i64 = row.try_get(0)?;
        Ok(n.max(0) as u64)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

fn key_pairs(model: &Model, record: &Record) -> Vec<(String, Value)> {
    model
        .primary_key()
        .iter()
        .map(|k| (k.clone(), record.get(k).cloned().unwrap_or_default()))
        .collect()
}

fn refresh(model: &Model, row: &PgRow, record: &mut Record) -> Result<(), AppError> {
    let stored = row_to_record(model, row)?;
    for (k, v) in stored.attrs() {
        record.set(k.clone(), v.clone());
    }
    Ok(())
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn insert(&mut self, model: &Model, record: &mut Record) -> Result<(), AppError> {
        let mut values = Vec::new();
        for column in model.columns() {
            let v = match column_value(column, record) {
                Some(v) if !v.is_null() => v,
                _ => match &column.default {
                    Some(d) => d.produce(),
                    None if record.contains(&column.name) => Value::Null,
                    None => continue,
                },
            };
            values.push((column.name.clone(), v));
        }
        let buf = sql::insert(model, &values);
        tracing::debug!(sql = %buf.sql, params = ?buf.params, "insert");
        let row = bind(&buf)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(persistence)?;
        refresh(model, &row, record)
    }

    async fn update(&mut self, model: &Model, record: &mut Record) -> Result<(), AppError> {
        let values: Vec<(String, Value)> = model
            .columns()
            .iter()
            .filter_map(|c| column_value(c, record).map(|v| (c.name.clone(), v)))
            .collect();
        let buf = sql::update(model, &values, &key_pairs(model, record));
        tracing::debug!(sql = %buf.sql, params = ?buf.params, "update");
        let row = bind(&buf)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(persistence)?
            .ok_or(AppError::NotFound)?;
        refresh(model, &row, record)
    }

    async fn delete(&mut self, model: &Model, record: &Record) -> Result<(), AppError> {
        let buf = sql::delete(model, &key_pairs(model, record));
        tracing::debug!(sql = %buf.sql, params = ?buf.params, "delete");
        let done = bind(&buf).execute(&mut *self.tx).await.map_err(persistence)?;
        if done.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await.map_err(persistence)
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Write failures surface as persistence errors; lookups keep `Db`.
fn persistence(e: sqlx::Error) -> AppError {
    match e {
        sqlx::Error::Database(db) => AppError::Persistence(db.to_string()),
        other => AppError::Db(other),
    }
}

fn row_to_record(model: &Model, row: &PgRow) -> Result<Record, AppError> {
    let mut record = Record::for_model(model);
    for column in model.columns() {
        record.set(column.name.clone(), cell_to_value(row, column)?);
    }
    Ok(record)
}

fn cell_to_value(row: &PgRow, column: &Column) -> Result<Value, AppError> {
    let name = column.name.as_str();
    let v = match &column.ty {
        ColumnType::String { .. } | ColumnType::Text | ColumnType::Char { .. } => row
            .try_get::<Option<String>, _>(name)?
            .map(Value::String),
        ColumnType::DateTime => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name)?
            .map(|d| Value::DateTime(d.fixed_offset())),
        ColumnType::Date => row.try_get::<Option<chrono::NaiveDate>, _>(name)?.map(Value::Date),
        ColumnType::Uuid => row.try_get::<Option<uuid::Uuid>, _>(name)?.map(Value::Uuid),
        ColumnType::Boolean => row.try_get::<Option<bool>, _>(name)?.map(Value::Bool),
        ColumnType::Integer => row
            .try_get::<Option<i32>, _>(name)?
            .map(|n| Value::Int(n.into())),
        ColumnType::BigInteger => row.try_get::<Option<i64>, _>(name)?.map(Value::Int),
        ColumnType::Float => row.try_get::<Option<f64>, _>(name)?.map(Value::Float),
        ColumnType::Json | ColumnType::Jsonb => row
            .try_get::<Option<serde_json::Value>, _>(name)?
            .map(Value::Json),
    };
    Ok(v.unwrap_or(Value::Null))
}

/// Create the database named in `database_url` if it does not exist.
/// Connects to the `postgres` maintenance database to do so.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::bad_request("Invalid database url", e.to_string()))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", sql::quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), AppError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| AppError::bad_request("Invalid database url", "DATABASE_URL has no path"))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_database_name() {
        let (admin, name) = parse_db_name_from_url("postgres://u:p@localhost:5432/shop?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres");
        assert_eq!(name, "shop");
    }
}

//! In-process store: tables of records behind a lock, writes staged per
//! transaction and applied on commit.

use super::{column_value, Condition, Query, Store, Transaction};
use crate::error::AppError;
use crate::models::{Model, UPDATED_AT};
use crate::value::{Record, Value};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

type Tables = HashMap<String, Vec<Record>>;

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows of one table, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Insert outside any transaction; used to seed fixtures.
    pub fn seed(&self, model: &Model, record: Record) -> Result<Record, AppError> {
        let mut row = to_row(model, &record, true)?;
        let mut tables = self.tables.write();
        let table = tables.entry(model.name().to_string()).or_default();
        check_unique(model, table, &row, None)?;
        table.push(row.clone());
        merge(&mut row, &record);
        Ok(row)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch(&self, query: &Query) -> Result<Vec<Record>, AppError> {
        if query.is_impossible() {
            return Ok(Vec::new());
        }
        let tables = self.tables.read();
        let mut rows: Vec<Record> = tables
            .get(query.model().name())
            .map(|t| t.iter().filter(|r| matches(query, r)).cloned().collect())
            .unwrap_or_default();
        let ordering = query.ordering();
        rows.sort_by(|a, b| {
            for (col, asc) in &ordering {
                let o = compare(
                    a.get(col).unwrap_or(&Value::Null),
                    b.get(col).unwrap_or(&Value::Null),
                );
                if o != Ordering::Equal {
                    return if *asc { o } else { o.reverse() };
                }
            }
            Ordering::Equal
        });
        let offset = query.offset_value().unwrap_or(0) as usize;
        let rows = rows.into_iter().skip(offset);
        Ok(match query.limit_value() {
            Some(n) => rows.take(n as usize).collect(),
            None => rows.collect(),
        })
    }

    async fn count(&self, query: &Query) -> Result<u64, AppError> {
        if query.is_impossible() {
            return Ok(0);
        }
        let tables = self.tables.read();
        Ok(tables
            .get(query.model().name())
            .map(|t| t.iter().filter(|r| matches(query, r)).count() as u64)
            .unwrap_or(0))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        Ok(Box::new(MemoryTransaction {
            tables: self.tables.clone(),
            staged: Vec::new(),
        }))
    }
}

enum Staged {
    Insert(Arc<Model>, Record),
    Update(Arc<Model>, Record),
    Delete(Arc<Model>, Vec<Value>),
}

struct MemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    staged: Vec<Staged>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn insert(&mut self, model: &Model, record: &mut Record) -> Result<(), AppError> {
        let row = to_row(model, record, true)?;
        {
            let tables = self.tables.read();
            if let Some(table) = tables.get(model.name()) {
                check_unique(model, table, &row, None)?;
            }
        }
        let mut refreshed = row.clone();
        merge(&mut refreshed, record);
        *record = refreshed;
        self.staged.push(Staged::Insert(Arc::new(model.clone()), row));
        Ok(())
    }

    async fn update(&mut self, model: &Model, record: &mut Record) -> Result<(), AppError> {
        if model.column(UPDATED_AT).is_some() {
            record.set(UPDATED_AT, Value::DateTime(Utc::now().fixed_offset()));
        }
        let row = to_row(model, record, false)?;
        self.staged.push(Staged::Update(Arc::new(model.clone()), row));
        Ok(())
    }

    async fn delete(&mut self, model: &Model, record: &Record) -> Result<(), AppError> {
        self.staged
            .push(Staged::Delete(Arc::new(model.clone()), key_of(model, record)));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTransaction { tables, staged } = *self;
        let mut tables = tables.write();
        let mut working = tables.clone();
        for op in staged {
            match op {
                Staged::Insert(model, row) => {
                    let table = working.entry(model.name().to_string()).or_default();
                    check_unique(&model, table, &row, None)?;
                    table.push(row);
                }
                Staged::Update(model, row) => {
                    let key = key_of(&model, &row);
                    let table = working.entry(model.name().to_string()).or_default();
                    let idx = table
                        .iter()
                        .position(|r| key_of(&model, r) == key)
                        .ok_or(AppError::NotFound)?;
                    check_unique(&model, table, &row, Some(idx))?;
                    table[idx] = row;
                }
                Staged::Delete(model, key) => {
                    let table = working.entry(model.name().to_string()).or_default();
                    let before = table.len();
                    table.retain(|r| key_of(&model, r) != key);
                    if table.len() == before {
                        return Err(AppError::NotFound);
                    }
                }
            }
        }
        *tables = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        tracing::debug!(staged = self.staged.len(), "memory transaction rolled back");
        Ok(())
    }
}

/// Column-only copy of a record, with defaults applied on insert and
/// not-null constraints enforced.
fn to_row(model: &Model, record: &Record, inserting: bool) -> Result<Record, AppError> {
    let mut row = Record::for_model(model);
    for column in model.columns() {
        let mut v = column_value(column, record).unwrap_or_default();
        if v.is_null() && inserting {
            if let Some(default) = &column.default {
                v = default.produce();
            }
        }
        if v.is_null() && !column.nullable {
            return Err(AppError::Persistence(format!(
                "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                column.name,
                model.name()
            )));
        }
        row.set(column.name.clone(), v);
    }
    Ok(row)
}

/// Non-column attributes (related records, computed values) survive a refresh.
fn merge(row: &mut Record, original: &Record) {
    for (k, v) in original.attrs() {
        if !row.contains(k) {
            row.set(k.clone(), v.clone());
        }
    }
}

fn key_of(model: &Model, record: &Record) -> Vec<Value> {
    model
        .primary_key()
        .iter()
        .map(|k| record.get(k).cloned().unwrap_or_default())
        .collect()
}

fn check_unique(model: &Model, table: &[Record], row: &Record, skip: Option<usize>) -> Result<(), AppError> {
    let key = key_of(model, row);
    let unique_cols: Vec<_> = model.columns().iter().filter(|c| c.unique).collect();
    for (i, existing) in table.iter().enumerate() {
        if Some(i) == skip {
            continue;
        }
        if key_of(model, existing) == key {
            return Err(AppError::Persistence(format!(
                "duplicate key value violates primary key of \"{}\"",
                model.name()
            )));
        }
        for c in &unique_cols {
            let v = row.get(&c.name).unwrap_or(&Value::Null);
            if !v.is_null() && existing.get(&c.name) == Some(v) {
                return Err(AppError::Persistence(format!(
                    "duplicate key value violates unique constraint on \"{}\".\"{}\"",
                    model.name(),
                    c.name
                )));
            }
        }
    }
    Ok(())
}

fn matches(query: &Query, record: &Record) -> bool {
    query.conditions().iter().all(|c| {
        let get = |col: &str| record.get(col).unwrap_or(&Value::Null);
        match c {
            Condition::Eq(col, v) => get(col) == v,
            Condition::In(col, values) => values.contains(get(col)),
            Condition::IsNull(col) => get(col).is_null(),
            Condition::NotNull(col) => !get(col).is_null(),
            Condition::Contains {
                column,
                needle,
                case_insensitive,
            } => {
                let v = get(column);
                if v.is_null() {
                    return false;
                }
                let hay = v.to_text();
                if *case_insensitive {
                    hay.to_lowercase().contains(&needle.to_lowercase())
                } else {
                    hay.contains(needle.as_str())
                }
            }
        }
    })
}

/// Total order used for sorting: nulls first, then natural order per kind.
fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::DateTime(x), Value::DateTime(y)) => x.cmp(y),
        (Value::Uuid(x), Value::Uuid(y)) => x.cmp(y),
        (x, y) => x.to_text().cmp(&y.to_text()),
    }
}

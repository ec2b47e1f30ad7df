//! Storage contract: queries over a model, fetch/count, and scoped
//! transactions with commit/rollback.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{ensure_database_exists, PgStore};

use crate::error::AppError;
use crate::models::{Column, Model};
use crate::value::{Record, Value};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
    NotNull(String),
    /// Substring match on the column's text form.
    Contains {
        column: String,
        needle: String,
        case_insensitive: bool,
    },
}

/// A filtered, ordered slice of one model's rows.
#[derive(Clone, Debug)]
pub struct Query {
    model: Arc<Model>,
    conditions: Vec<Condition>,
    order_by: Vec<(String, bool)>,
    limit: Option<u64>,
    offset: Option<u64>,
    impossible: bool,
}

impl Query {
    pub fn new(model: Arc<Model>) -> Self {
        Query {
            model,
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            impossible: false,
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    /// True when a condition could never match (value not convertible to the
    /// column's type, unknown column). Stores return nothing without querying.
    pub fn is_impossible(&self) -> bool {
        self.impossible
    }

    /// Ordering columns; primary key ascending when none were given.
    pub fn ordering(&self) -> Vec<(String, bool)> {
        if self.order_by.is_empty() {
            self.model
                .primary_key()
                .iter()
                .map(|k| (k.clone(), true))
                .collect()
        } else {
            self.order_by.clone()
        }
    }

    fn column(&mut self, name: &str) -> Option<Column> {
        let column = self.model.column(name).cloned();
        if column.is_none() {
            tracing::debug!(model = self.model.name(), column = name, "filter on unknown column");
            self.impossible = true;
        }
        column
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        let condition = match condition {
            Condition::Eq(name, v) => match self.column(&name) {
                Some(c) => match c.ty.coerce(&v) {
                    Some(v) => Condition::Eq(name, v),
                    None => {
                        self.impossible = true;
                        return self;
                    }
                },
                None => return self,
            },
            Condition::In(name, values) => match self.column(&name) {
                Some(c) => Condition::In(
                    name,
                    values.iter().filter_map(|v| c.ty.coerce(v)).collect(),
                ),
                None => return self,
            },
            Condition::IsNull(name) => match self.column(&name) {
                Some(_) => Condition::IsNull(name),
                None => return self,
            },
            Condition::NotNull(name) => match self.column(&name) {
                Some(_) => Condition::NotNull(name),
                None => return self,
            },
            Condition::Contains { column, needle, case_insensitive } => match self.column(&column) {
                Some(_) => Condition::Contains { column, needle, case_insensitive },
                None => return self,
            },
        };
        self.conditions.push(condition);
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Condition::Eq(column.into(), value.into()))
    }

    pub fn is_in(self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(Condition::In(column.into(), values))
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by.push((column.into(), ascending));
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Same conditions without limit/offset, for counting.
    pub fn unsliced(&self) -> Self {
        Query {
            limit: None,
            offset: None,
            ..self.clone()
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn fetch(&self, query: &Query) -> Result<Vec<Record>, AppError>;

    async fn count(&self, query: &Query) -> Result<u64, AppError>;

    async fn first(&self, query: &Query) -> Result<Option<Record>, AppError> {
        let rows = self.fetch(&query.clone().limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError>;
}

/// Staged writes; nothing is visible to other readers until `commit`.
#[async_trait]
pub trait Transaction: Send {
    /// Inserts the record, filling column defaults; the record is refreshed
    /// with the stored row.
    async fn insert(&mut self, model: &Model, record: &mut Record) -> Result<(), AppError>;

    async fn update(&mut self, model: &Model, record: &mut Record) -> Result<(), AppError>;

    async fn delete(&mut self, model: &Model, record: &Record) -> Result<(), AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

/// Commit on success; on failure roll back and return the original error.
pub async fn finish<T>(tx: Box<dyn Transaction>, result: Result<T, AppError>) -> Result<T, AppError> {
    match result {
        Ok(v) => {
            tx.commit().await?;
            Ok(v)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

/// Column value to persist: related records collapse to their single key.
pub(crate) fn column_value(column: &Column, record: &Record) -> Option<Value> {
    let v = record.get(&column.name)?;
    Some(match v {
        Value::Record(related) => related.key_values().into_iter().next().unwrap_or_default(),
        other => column.ty.coerce(other).unwrap_or_else(|| other.clone()),
    })
}

/// Pagination metadata exposed with list responses.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ListMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_limit: Option<u64>,
    pub total: u64,
}

pub struct Page {
    pub items: Vec<Record>,
    pub meta: ListMeta,
}

/// Fetch one page. `page < 1` and an empty page past the first are not found.
/// On the first page, fewer rows than `per_page` means the row count is the
/// total and no count query runs.
pub async fn paginate(
    store: &dyn Store,
    query: &Query,
    page: Option<i64>,
    per_page: Option<i64>,
    default_per_page: u64,
    max_per_page: u64,
) -> Result<Page, AppError> {
    let page = page.filter(|p| *p != 0).unwrap_or(1);
    if page < 1 {
        return Err(AppError::NotFound);
    }
    let page = page as u64;
    let requested = per_page.filter(|n| *n > 0).map(|n| n as u64);
    let per_page = requested.unwrap_or(default_per_page).min(max_per_page).max(1);

    // Offsets past i64::MAX cannot be expressed in SQL and hold no rows.
    let offset = (page - 1)
        .checked_mul(per_page)
        .filter(|o| i64::try_from(*o).is_ok())
        .ok_or(AppError::NotFound)?;
    let slice = query.unsliced().limit(per_page).offset(offset);
    let items = store.fetch(&slice).await?;
    if items.is_empty() && page != 1 {
        return Err(AppError::NotFound);
    }
    let total = if page == 1 && (items.len() as u64) < per_page {
        items.len() as u64
    } else {
        store.count(&query.unsliced()).await?
    };
    tracing::debug!(page, per_page, total, "paginated");
    Ok(Page {
        items,
        meta: ListMeta {
            page: Some(page),
            per_page: Some(per_page),
            page_limit: Some(max_per_page),
            total,
        },
    })
}

//! Query-string driven narrowing of a view set's collection.

use crate::error::AppError;
use crate::models::DELETED_AT;
use crate::request::ApiRequest;
use crate::store::{Condition, Query};
use crate::value::Value;
use std::sync::Arc;

pub trait Filter: Send + Sync {
    fn filter(&self, req: &ApiRequest, query: Query) -> Result<Query, AppError>;

    /// List-only filters are skipped for retrieve, update and destroy.
    fn list_only(&self) -> bool {
        true
    }
}

/// `?<field>=v` and `?<field>s[]=a,b` restrict a column to the given values.
#[derive(Clone, Debug)]
pub struct FieldMatchFilter {
    column: String,
    query_field: String,
    multi_query_field: String,
    multi: bool,
}

impl FieldMatchFilter {
    pub fn new(column: impl Into<String>) -> Self {
        let column = column.into();
        FieldMatchFilter {
            multi_query_field: format!("{}s[]", column),
            query_field: column.clone(),
            column,
            multi: true,
        }
    }

    pub fn query_field(mut self, name: impl Into<String>) -> Self {
        self.query_field = name.into();
        self
    }

    pub fn multi_query_field(mut self, name: impl Into<String>) -> Self {
        self.multi_query_field = name.into();
        self
    }

    /// Disable the list parameter.
    pub fn single(mut self) -> Self {
        self.multi = false;
        self
    }

    fn values(&self, req: &ApiRequest) -> Vec<Value> {
        let mut values = if self.multi {
            req.params(&self.multi_query_field)
        } else {
            Vec::new()
        };
        if let Some(v) = req.param(&self.query_field) {
            values.push(v.to_string());
        }
        values.into_iter().map(Value::String).collect()
    }
}

impl Filter for FieldMatchFilter {
    fn filter(&self, req: &ApiRequest, query: Query) -> Result<Query, AppError> {
        let values = self.values(req);
        if values.is_empty() {
            return Ok(query);
        }
        tracing::debug!(column = %self.column, count = values.len(), "field match filter");
        Ok(query.is_in(self.column.clone(), values))
    }
}

type Branch = Arc<dyn Fn(&ApiRequest, Query) -> Query + Send + Sync>;

/// Picks one of two query adjustments depending on whether `flag` is among
/// the `filter` / `filter[]` parameters.
#[derive(Clone)]
pub struct FlagFilter {
    flag: String,
    present: Option<Branch>,
    absent: Option<Branch>,
}

impl FlagFilter {
    pub fn new(flag: impl Into<String>) -> Self {
        FlagFilter {
            flag: flag.into(),
            present: None,
            absent: None,
        }
    }

    pub fn when_present(mut self, f: impl Fn(&ApiRequest, Query) -> Query + Send + Sync + 'static) -> Self {
        self.present = Some(Arc::new(f));
        self
    }

    pub fn by_default(mut self, f: impl Fn(&ApiRequest, Query) -> Query + Send + Sync + 'static) -> Self {
        self.absent = Some(Arc::new(f));
        self
    }

    pub fn is_present(&self, req: &ApiRequest) -> bool {
        req.params("filter")
            .iter()
            .chain(req.params("filter[]").iter())
            .any(|f| *f == self.flag)
    }
}

impl Filter for FlagFilter {
    fn filter(&self, req: &ApiRequest, query: Query) -> Result<Query, AppError> {
        let branch = if self.is_present(req) {
            &self.present
        } else {
            &self.absent
        };
        Ok(match branch {
            Some(f) => f(req, query),
            None => query,
        })
    }
}

/// Runs its filters in order.
#[derive(Clone, Default)]
pub struct CompoundFilter {
    filters: Vec<Arc<dyn Filter>>,
}

impl CompoundFilter {
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        CompoundFilter { filters }
    }
}

impl Filter for CompoundFilter {
    fn filter(&self, req: &ApiRequest, query: Query) -> Result<Query, AppError> {
        self.filters.iter().try_fold(query, |q, f| f.filter(req, q))
    }
}

/// Hides archived rows unless `?filter=deleted` is given.
#[derive(Clone)]
pub struct ArchiveFlagFilter {
    inner: FlagFilter,
}

impl ArchiveFlagFilter {
    pub fn new() -> Self {
        Self::with_column(DELETED_AT)
    }

    pub fn with_column(column: impl Into<String>) -> Self {
        let column = column.into();
        ArchiveFlagFilter {
            inner: FlagFilter::new("deleted")
                .by_default(move |_, q| q.filter(Condition::IsNull(column.clone()))),
        }
    }
}

impl Default for ArchiveFlagFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for ArchiveFlagFilter {
    fn filter(&self, req: &ApiRequest, query: Query) -> Result<Query, AppError> {
        self.inner.filter(req, query)
    }
}

/// `?search=text` keeps rows whose column contains the text.
#[derive(Clone, Debug)]
pub struct SearchFilter {
    column: String,
    query_field: String,
    case_insensitive: bool,
}

impl SearchFilter {
    pub fn new(column: impl Into<String>) -> Self {
        SearchFilter {
            column: column.into(),
            query_field: "search".into(),
            case_insensitive: true,
        }
    }

    pub fn query_field(mut self, name: impl Into<String>) -> Self {
        self.query_field = name.into();
        self
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_insensitive = false;
        self
    }
}

impl Filter for SearchFilter {
    fn filter(&self, req: &ApiRequest, query: Query) -> Result<Query, AppError> {
        match req.param(&self.query_field).filter(|s| !s.is_empty()) {
            Some(needle) => Ok(query.filter(Condition::Contains {
                column: self.column.clone(),
                needle: needle.to_string(),
                case_insensitive: self.case_insensitive,
            })),
            None => Ok(query),
        }
    }
}

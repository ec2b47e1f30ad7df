//! Resolved model: config validated and turned into models, serializers and
//! view sets.

use crate::config::ValidationRule;
use crate::error::ConfigError;
use crate::filters::{ArchiveFlagFilter, FieldMatchFilter, SearchFilter};
use crate::models::{Column, ColumnType, Model, DELETED_AT};
use crate::parsers::SnakeCaseParser;
use crate::renderers::{CamelCaseRenderer, ListMetaRenderer};
use crate::serializers::{
    BooleanField, DateField, EmailField, Field, FloatField, ISODateTimeField, IntField, JSONField, ModelSerializer,
    Serializer, StringField, UUIDField,
};
use crate::store::Store;
use crate::viewsets::{Action, ModelViewSet, ViewSet};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct ResolvedEntity {
    pub path_segment: String,
    pub model: Arc<Model>,
    pub actions: Vec<Action>,
    pub lookup: Option<String>,
    pub pagination: Option<(u64, u64)>,
    /// Columns accepted on input but never sent back.
    pub sensitive_columns: HashSet<String>,
    pub validation: HashMap<String, ValidationRule>,
    pub match_columns: Vec<String>,
    pub search_column: Option<String>,
    pub camel_case: bool,
}

/// Shared options every rule-driven field gets, then the conversion to `Field`.
macro_rules! finish_field {
    ($kind:expr, $column:expr, $rule:expr) => {{
        let mut kind = $kind
            .required($rule.required.unwrap_or(false))
            .nullable($column.nullable)
            .read_only($rule.read_only)
            .update_read_only($rule.update_read_only)
            .source($column.name.clone());
        if let Some(allowed) = &$rule.allowed {
            kind = kind.choices(allowed.clone());
        }
        Field::from(kind)
    }};
}

/// Field for a column with extra validation rules.
pub fn rule_field(column: &Column, rule: &ValidationRule) -> Result<Field, ConfigError> {
    let max_length = rule
        .max_length
        .or_else(|| column.ty.max_length())
        .map(|n| n as usize);
    let min_length = rule.min_length.unwrap_or(0) as usize;
    Ok(match &column.ty {
        ColumnType::String { .. } | ColumnType::Text | ColumnType::Char { .. }
            if rule.format.as_deref() == Some("email") =>
        {
            let mut f = EmailField::new().min_length(min_length).blank(column.nullable);
            if let Some(n) = max_length {
                f = f.max_length(n);
            }
            finish_field!(f, column, rule)
        }
        ColumnType::String { .. } | ColumnType::Text | ColumnType::Char { .. } => {
            let mut f = StringField::new().min_length(min_length).blank(column.nullable);
            if let Some(n) = max_length {
                f = f.max_length(n);
            }
            if let Some(pattern) = &rule.pattern {
                f = f.regex(pattern)?;
            }
            finish_field!(f, column, rule)
        }
        ColumnType::Integer | ColumnType::BigInteger => {
            let mut f = IntField::new();
            if let Some(min) = rule.minimum {
                f = f.min_value(min.ceil() as i64);
            }
            if let Some(max) = rule.maximum {
                f = f.max_value(max.floor() as i64);
            }
            finish_field!(f, column, rule)
        }
        ColumnType::Float => {
            let mut f = FloatField::new();
            if let Some(min) = rule.minimum {
                f = f.min_value(min);
            }
            if let Some(max) = rule.maximum {
                f = f.max_value(max);
            }
            finish_field!(f, column, rule)
        }
        ColumnType::Boolean => finish_field!(BooleanField::new(), column, rule),
        ColumnType::Date => finish_field!(DateField::new(), column, rule),
        ColumnType::DateTime => finish_field!(ISODateTimeField::new(), column, rule),
        ColumnType::Uuid => finish_field!(UUIDField::new(), column, rule),
        ColumnType::Json | ColumnType::Jsonb => finish_field!(JSONField::new(), column, rule),
    })
}

impl ResolvedEntity {
    /// Model serializer with the entity's rules applied over the column
    /// defaults. Sensitive columns are accepted and stored but never output.
    pub fn serializer(&self) -> Result<Serializer, ConfigError> {
        let mut builder = ModelSerializer::builder(self.path_segment.clone())
            .model(self.model.clone())
            .hide(self.sensitive_columns.iter().cloned());
        for column in self.model.columns() {
            if let Some(rule) = self.validation.get(&column.name) {
                builder = builder.field(column.name.clone(), rule_field(column, rule)?);
            }
        }
        builder.build()
    }

    pub fn viewset(&self, store: Arc<dyn Store>) -> Result<ModelViewSet, ConfigError> {
        let mut builder = ModelViewSet::builder(self.model.clone(), store)
            .name(self.path_segment.clone())
            .serializer(Arc::new(self.serializer()?))
            .actions(&self.actions);
        if let Some(lookup) = &self.lookup {
            builder = builder.lookup_param(lookup.clone());
        }
        if let Some((default, max)) = self.pagination {
            builder = builder.paginate(default, max);
        }
        if self.model.column(DELETED_AT).is_some() {
            builder = builder.filter(ArchiveFlagFilter::new());
        }
        for column in &self.match_columns {
            builder = builder.filter(FieldMatchFilter::new(column.clone()));
        }
        if let Some(column) = &self.search_column {
            builder = builder.filter(SearchFilter::new(column.clone()));
        }
        builder = builder.renderer(ListMetaRenderer);
        if self.camel_case {
            builder = builder.renderer(CamelCaseRenderer).parser(SnakeCaseParser);
        }
        builder.build()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedModel {
    pub models: Vec<Arc<Model>>,
    pub entities: Vec<ResolvedEntity>,
}

impl ResolvedModel {
    pub fn entity_by_path(&self, path: &str) -> Option<&ResolvedEntity> {
        self.entities.iter().find(|e| e.path_segment == path)
    }

    pub fn model(&self, table: &str) -> Option<&Arc<Model>> {
        self.models.iter().find(|m| m.name() == table)
    }

    /// One view set per api entity, keyed by its mount prefix (`/<path_segment>`).
    pub fn viewsets(&self, store: Arc<dyn Store>) -> Result<Vec<(String, Arc<dyn ViewSet>)>, ConfigError> {
        self.entities
            .iter()
            .map(|e| {
                let vs: Arc<dyn ViewSet> = Arc::new(e.viewset(store.clone())?);
                Ok((format!("/{}", e.path_segment), vs))
            })
            .collect()
    }
}

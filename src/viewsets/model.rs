use super::{Action, ViewSet};
use crate::authentication::Authenticator;
use crate::error::{AppError, ConfigError};
use crate::filters::Filter;
use crate::models::Model;
use crate::parsers::Parser;
use crate::permissions::Permission;
use crate::renderers::Renderer;
use crate::request::{ApiRequest, OperationContext};
use crate::serializers::{ModelSerializer, Serializer};
use crate::store::Store;
use std::fmt;
use std::sync::Arc;

/// A view set assembled from configuration rather than a custom type.
pub struct ModelViewSet {
    name: String,
    model: Arc<Model>,
    store: Arc<dyn Store>,
    serializer: Arc<Serializer>,
    write_serializer: Option<Arc<Serializer>>,
    actions: Vec<Action>,
    lookup_param: String,
    authenticators: Vec<Arc<dyn Authenticator>>,
    permissions: Vec<Arc<dyn Permission>>,
    filters: Vec<Arc<dyn Filter>>,
    renderers: Vec<Arc<dyn Renderer>>,
    parsers: Vec<Arc<dyn Parser>>,
    pagination: Option<(u64, u64)>,
}

impl fmt::Debug for ModelViewSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelViewSet")
            .field("name", &self.name)
            .field("model", &self.model.name())
            .field("actions", &self.actions)
            .field("lookup_param", &self.lookup_param)
            .field("pagination", &self.pagination)
            .finish()
    }
}

impl ModelViewSet {
    pub fn builder(model: Arc<Model>, store: Arc<dyn Store>) -> ModelViewSetBuilder {
        ModelViewSetBuilder {
            name: None,
            model,
            store,
            serializer: None,
            write_serializer: None,
            actions: Action::ALL.to_vec(),
            lookup_param: None,
            authenticators: Vec::new(),
            permissions: Vec::new(),
            filters: Vec::new(),
            renderers: Vec::new(),
            parsers: Vec::new(),
            pagination: None,
        }
    }
}

impl ViewSet for ModelViewSet {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &Arc<Model> {
        &self.model
    }

    fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    fn serializer(&self, _req: &ApiRequest, _op: &OperationContext) -> Result<Arc<Serializer>, AppError> {
        Ok(self.serializer.clone())
    }

    fn write_serializer(&self, _req: &ApiRequest, _op: &OperationContext) -> Result<Arc<Serializer>, AppError> {
        Ok(self
            .write_serializer
            .clone()
            .unwrap_or_else(|| self.serializer.clone()))
    }

    fn actions(&self) -> &[Action] {
        &self.actions
    }

    fn lookup_param(&self) -> &str {
        &self.lookup_param
    }

    fn authenticators(&self) -> &[Arc<dyn Authenticator>] {
        &self.authenticators
    }

    fn permissions(&self) -> &[Arc<dyn Permission>] {
        &self.permissions
    }

    fn filters(&self) -> &[Arc<dyn Filter>] {
        &self.filters
    }

    fn renderers(&self) -> &[Arc<dyn Renderer>] {
        &self.renderers
    }

    fn parsers(&self) -> &[Arc<dyn Parser>] {
        &self.parsers
    }

    fn pagination(&self) -> Option<(u64, u64)> {
        self.pagination
    }
}

pub struct ModelViewSetBuilder {
    name: Option<String>,
    model: Arc<Model>,
    store: Arc<dyn Store>,
    serializer: Option<Arc<Serializer>>,
    write_serializer: Option<Arc<Serializer>>,
    actions: Vec<Action>,
    lookup_param: Option<String>,
    authenticators: Vec<Arc<dyn Authenticator>>,
    permissions: Vec<Arc<dyn Permission>>,
    filters: Vec<Arc<dyn Filter>>,
    renderers: Vec<Arc<dyn Renderer>>,
    parsers: Vec<Arc<dyn Parser>>,
    pagination: Option<(u64, u64)>,
}

impl ModelViewSetBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Output serializer; defaults to one introspected from the model.
    pub fn serializer(mut self, serializer: Arc<Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn write_serializer(mut self, serializer: Arc<Serializer>) -> Self {
        self.write_serializer = Some(serializer);
        self
    }

    pub fn actions(mut self, actions: &[Action]) -> Self {
        self.actions = actions.to_vec();
        self
    }

    pub fn read_only(self) -> Self {
        self.actions(&Action::READ_ONLY)
    }

    /// Defaults to the model's single primary-key column.
    pub fn lookup_param(mut self, name: impl Into<String>) -> Self {
        self.lookup_param = Some(name.into());
        self
    }

    pub fn authenticator(mut self, a: impl Authenticator + 'static) -> Self {
        self.authenticators.push(Arc::new(a));
        self
    }

    pub fn permission(mut self, p: impl Permission + 'static) -> Self {
        self.permissions.push(Arc::new(p));
        self
    }

    pub fn filter(mut self, f: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(f));
        self
    }

    pub fn renderer(mut self, r: impl Renderer + 'static) -> Self {
        self.renderers.push(Arc::new(r));
        self
    }

    pub fn parser(mut self, p: impl Parser + 'static) -> Self {
        self.parsers.push(Arc::new(p));
        self
    }

    pub fn paginate(mut self, default_per_page: u64, max_per_page: u64) -> Self {
        self.pagination = Some((default_per_page, max_per_page));
        self
    }

    pub fn build(self) -> Result<ModelViewSet, ConfigError> {
        let serializer = match self.serializer {
            Some(s) => s,
            None => Arc::new(
                ModelSerializer::builder(self.model.name())
                    .model(self.model.clone())
                    .build()?,
            ),
        };
        let lookup_param = match self.lookup_param {
            Some(p) => p,
            None => match self.model.primary_key() {
                [key] => key.clone(),
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "view set for {} needs an explicit lookup parameter: the primary key is composite",
                        self.model.name()
                    )))
                }
            },
        };
        if self.model.column(&lookup_param).is_none() {
            return Err(ConfigError::Validation(format!(
                "lookup parameter {} is not a column of {}",
                lookup_param,
                self.model.name()
            )));
        }
        if let Some((default, max)) = self.pagination {
            if default == 0 || max < default {
                return Err(ConfigError::Validation(format!(
                    "pagination ({}, {}) needs 0 < default <= max",
                    default, max
                )));
            }
        }
        Ok(ModelViewSet {
            name: self.name.unwrap_or_else(|| self.model.name().to_string()),
            model: self.model,
            store: self.store,
            serializer,
            write_serializer: self.write_serializer,
            actions: self.actions,
            lookup_param,
            authenticators: self.authenticators,
            permissions: self.permissions,
            filters: self.filters,
            renderers: self.renderers,
            parsers: self.parsers,
            pagination: self.pagination,
        })
    }
}

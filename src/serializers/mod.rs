//! Declarative validation, conversion and output of request data.
//!
//! A [`Serializer`] is an ordered set of named [`Field`]s. `validate` turns
//! request JSON into cleaned values keyed by each field's source attribute,
//! collecting every failure into one [`ValidationError`]; `save` creates or
//! edits a [`Record`] from it; `serialize` produces response JSON.

pub mod fields;
pub mod introspect;

pub use fields::*;

use crate::authentication::Principal;
use crate::error::{AppError, ConfigError, ErrorDetail, ValidationError, NON_FIELD_ERRORS};
use crate::models::Model;
use crate::store::Store;
use crate::value::{Record, Value};
use async_trait::async_trait;
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Cleaned values keyed by source attribute.
pub type CleanedData = BTreeMap<String, Value>;

pub fn cleaned_to_json(cleaned: &CleanedData) -> Json {
    Json::Object(cleaned.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}

pub fn cleaned_to_record(cleaned: CleanedData) -> Record {
    Record::from_attrs(cleaned)
}

/// Per-request state handed to fields, cleaners and hooks.
#[derive(Clone, Default)]
pub struct Context {
    pub store: Option<Arc<dyn Store>>,
    pub principal: Option<Principal>,
    pub values: BTreeMap<String, Json>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("store", &self.store.is_some())
            .field("principal", &self.principal)
            .field("values", &self.values)
            .finish()
    }
}

impl Context {
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_principal(mut self, principal: Option<Principal>) -> Self {
        self.principal = principal;
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Json>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Json> {
        self.values.get(key)
    }
}

/// Serializer-level hook for one field. Gets the edited object (if any), the
/// raw data and the context; returns the value to convert in place of the
/// submitted one.
pub type FieldCleaner =
    Arc<dyn Fn(Option<&Record>, &Map<String, Json>, &Context) -> Result<Json, ValidationError> + Send + Sync>;

/// Overridable steps of `validate` and `save`.
#[async_trait]
pub trait SerializerHooks: Send + Sync {
    /// Runs after every field is cleaned. A [`ValidationError`] lands under
    /// `non_field_errors`.
    async fn clean(
        &self,
        _obj: Option<&Record>,
        _data: &Map<String, Json>,
        cleaned: CleanedData,
        _ctx: &Context,
    ) -> Result<CleanedData, AppError> {
        Ok(cleaned)
    }

    /// Builds the new object; fields are copied onto it afterwards.
    async fn create(
        &self,
        serializer: &Serializer,
        _data: &Json,
        _cleaned: &CleanedData,
        _ctx: &Context,
    ) -> Result<Record, AppError> {
        Ok(serializer.new_record())
    }

    async fn update(
        &self,
        serializer: &Serializer,
        obj: &mut Record,
        _data: &Json,
        cleaned: &CleanedData,
        _ctx: &Context,
    ) -> Result<(), AppError> {
        serializer.save_fields(obj, cleaned);
        Ok(())
    }

    async fn post_save(&self, _obj: &mut Record, _data: &Json, _cleaned: &CleanedData, _ctx: &Context) -> Result<(), AppError> {
        Ok(())
    }
}

struct DefaultHooks;

impl SerializerHooks for DefaultHooks {}

#[derive(Clone, Debug)]
pub struct BoundField {
    pub name: String,
    pub field: Field,
}

impl BoundField {
    pub fn source(&self) -> &str {
        self.field.options().source.as_deref().unwrap_or(&self.name)
    }
}

pub struct Serializer {
    name: String,
    fields: Vec<BoundField>,
    cleaners: HashMap<String, FieldCleaner>,
    hooks: Arc<dyn SerializerHooks>,
    model: Option<Arc<Model>>,
    /// Fields validated and saved as usual but left out of `serialize`.
    hidden: HashSet<String>,
}

impl fmt::Debug for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializer")
            .field("name", &self.name)
            .field("fields", &self.fields.iter().map(|b| b.name.as_str()).collect::<Vec<_>>())
            .field("model", &self.model.as_ref().map(|m| m.name()))
            .finish()
    }
}

impl Serializer {
    pub fn builder(name: impl Into<String>) -> SerializerBuilder {
        SerializerBuilder::new(name.into(), false)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> Option<&Arc<Model>> {
        self.model.as_ref()
    }

    pub fn fields(&self) -> &[BoundField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|b| b.name == name).map(|b| &b.field)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|b| b.name.as_str()).collect()
    }

    /// Empty object of this serializer's model, or a plain record.
    pub fn new_record(&self) -> Record {
        match &self.model {
            Some(model) => Record::for_model(model),
            None => Record::new(),
        }
    }

    /// Validate `data`, creating when `obj` is `None` and editing otherwise.
    pub async fn validate(&self, obj: Option<&Record>, data: &Json, ctx: &Context) -> Result<CleanedData, AppError> {
        let empty = Map::new();
        let data = match data {
            Json::Object(map) => map,
            Json::Null => &empty,
            _ => return Err(ValidationError::non_field("Data passed is not a dictionary.").into()),
        };

        let mut errors: BTreeMap<String, Vec<ErrorDetail>> = BTreeMap::new();
        let mut cleaned = CleanedData::new();

        for bound in &self.fields {
            let name = bound.name.as_str();
            let field = &bound.field;
            let opts = field.options();

            let Some(value) = data.get(name) else {
                if obj.is_some() {
                    continue;
                }
                if opts.required {
                    errors.insert(name.to_string(), vec!["Field is required.".into()]);
                } else if field.kind().takes_default() {
                    cleaned.insert(bound.source().to_string(), opts.default_value());
                }
                continue;
            };

            if value.is_null() && !field.is_nullable() {
                errors.insert(name.to_string(), vec!["Field cannot be `None`.".into()]);
                continue;
            }

            let input = Input::new(name, value, data, ctx).editing(obj);
            let mut field_errors = field.validate(&input).await?;

            let mut replaced = None;
            if let Some(cleaner) = self.cleaners.get(name) {
                match cleaner(obj, data, ctx) {
                    Ok(v) => replaced = Some(v),
                    Err(e) => field_errors.push(e.description),
                }
            }

            if !field_errors.is_empty() {
                errors.insert(name.to_string(), field_errors);
                continue;
            }
            let input = match &replaced {
                Some(v) => input.with_value(v),
                None => input,
            };
            match field.to_python(&input).await {
                Ok(v) => {
                    cleaned.insert(bound.source().to_string(), v);
                }
                Err(AppError::Validation(e)) => {
                    errors.insert(name.to_string(), vec![e.description]);
                }
                Err(other) => return Err(other),
            }
        }

        let cleaned = match self.hooks.clean(obj, data, cleaned, ctx).await {
            Ok(c) => c,
            Err(AppError::Validation(e)) => {
                errors.insert(NON_FIELD_ERRORS.to_string(), vec![e.description]);
                CleanedData::new()
            }
            Err(other) => return Err(other),
        };

        if !errors.is_empty() {
            tracing::debug!(serializer = %self.name, fields = ?errors.keys().collect::<Vec<_>>(), "validation failed");
            return Err(ValidationError::from_fields(errors).into());
        }
        Ok(cleaned)
    }

    /// Validate, then create a new object or apply the data to `obj`.
    /// Nothing is persisted here.
    pub async fn save(&self, obj: Option<Record>, data: &Json, ctx: &Context) -> Result<Record, AppError> {
        let cleaned = self.validate(obj.as_ref(), data, ctx).await?;
        let mut obj = match obj {
            None => {
                let mut created = self.hooks.create(self, data, &cleaned, ctx).await?;
                self.save_fields(&mut created, &cleaned);
                created
            }
            Some(mut existing) => {
                self.hooks.update(self, &mut existing, data, &cleaned, ctx).await?;
                existing
            }
        };
        self.hooks.post_save(&mut obj, data, &cleaned, ctx).await?;
        Ok(obj)
    }

    /// Copy cleaned values onto `obj`, skipping write-only fields.
    pub fn save_fields(&self, obj: &mut Record, cleaned: &CleanedData) {
        for (source, value) in cleaned {
            let write_only = self
                .fields
                .iter()
                .find(|b| b.source() == source)
                .map(|b| b.field.options().write_only)
                .unwrap_or(false);
            if !write_only {
                obj.set(source.clone(), value.clone());
            }
        }
    }

    pub fn serialize(&self, obj: &Record, ctx: &Context) -> Json {
        let mut out = Map::new();
        for bound in &self.fields {
            if bound.field.options().write_only || self.hidden.contains(&bound.name) {
                continue;
            }
            let value = obj.get(bound.source()).cloned().unwrap_or_default();
            out.insert(bound.name.clone(), bound.field.to_data(&value, ctx));
        }
        Json::Object(out)
    }

    pub fn serialize_many(&self, objs: &[Record], ctx: &Context) -> Json {
        Json::Array(objs.iter().map(|o| self.serialize(o, ctx)).collect())
    }
}

/// Serializer whose fields start from a model's columns.
pub struct ModelSerializer;

impl ModelSerializer {
    pub fn builder(name: impl Into<String>) -> SerializerBuilder {
        SerializerBuilder::new(name.into(), true)
    }
}

pub struct SerializerBuilder {
    name: String,
    for_model: bool,
    model: Option<Arc<Model>>,
    fields: Vec<(String, Field)>,
    cleaners: HashMap<String, FieldCleaner>,
    hooks: Option<Arc<dyn SerializerHooks>>,
    required: Vec<String>,
    only: Option<Vec<String>>,
    hidden: HashSet<String>,
}

impl SerializerBuilder {
    fn new(name: String, for_model: bool) -> Self {
        SerializerBuilder {
            name,
            for_model,
            model: None,
            fields: Vec::new(),
            cleaners: HashMap::new(),
            hooks: None,
            required: Vec::new(),
            only: None,
            hidden: HashSet::new(),
        }
    }

    pub fn model(mut self, model: Arc<Model>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn field(mut self, name: impl Into<String>, field: impl Into<Field>) -> Self {
        self.fields.push((name.into(), field.into()));
        self
    }

    pub fn clean_field<F>(mut self, name: impl Into<String>, cleaner: F) -> Self
    where
        F: Fn(Option<&Record>, &Map<String, Json>, &Context) -> Result<Json, ValidationError> + Send + Sync + 'static,
    {
        self.cleaners.insert(name.into(), Arc::new(cleaner));
        self
    }

    pub fn hooks(mut self, hooks: impl SerializerHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Fields forced to required; their nullability is left as resolved.
    pub fn required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(names.into_iter().map(Into::into));
        self
    }

    /// Keep only these fields.
    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Accept and save these fields but never output them.
    pub fn hide<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<Serializer, ConfigError> {
        if self.for_model && self.model.is_none() {
            return Err(ConfigError::MissingModel(self.name));
        }

        let mut bound: Vec<BoundField> = match (&self.model, self.for_model) {
            (Some(model), true) => introspect::table_fields(model)
                .into_iter()
                .map(|(name, field)| BoundField { name, field })
                .collect(),
            _ => Vec::new(),
        };

        for (name, field) in self.fields {
            if field.kind().requires_model_serializer() && !self.for_model {
                return Err(ConfigError::RequiresModelSerializer { field: name });
            }
            let field = field.with_default_source(&name);
            let source = field.options().source.clone().unwrap_or_else(|| name.clone());
            bound.retain(|b| b.source() != source && b.name != name);
            bound.push(BoundField { name, field });
        }

        for name in &self.required {
            if let Some(b) = bound.iter_mut().find(|b| &b.name == name) {
                b.field = b.field.forced_required();
            }
        }

        if let Some(only) = &self.only {
            bound.retain(|b| only.contains(&b.name));
        }

        Ok(Serializer {
            name: self.name,
            fields: bound,
            cleaners: self.cleaners,
            hooks: self.hooks.unwrap_or_else(|| Arc::new(DefaultHooks)),
            model: self.model,
            hidden: self.hidden,
        })
    }
}

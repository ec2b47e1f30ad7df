use super::{field_options, FieldKind, FieldOptions, Input};
use crate::error::{AppError, ConfigError, ErrorDetail, ValidationError};
use crate::models::Model;
use crate::serializers::Context;
use crate::store::{Query, Store};
use crate::value::{is_truthy, Record, Value};
use async_trait::async_trait;
use serde_json::{Map, Value as Json};
use std::fmt;
use std::sync::Arc;

/// Relates to rows of another model, written and read as their primary keys.
///
/// Lookups use the store given to [`PrimaryKeyRelatedField::store`] or, when
/// none was given, the store carried by the request [`Context`].
pub struct PrimaryKeyRelatedField {
    pub(super) options: FieldOptions,
    model: Arc<Model>,
    many: bool,
    store: Option<Arc<dyn Store>>,
}

field_options!(PrimaryKeyRelatedField);

impl fmt::Debug for PrimaryKeyRelatedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimaryKeyRelatedField")
            .field("model", &self.model.name())
            .field("many", &self.many)
            .finish()
    }
}

impl PrimaryKeyRelatedField {
    pub fn new(model: Arc<Model>) -> Self {
        PrimaryKeyRelatedField {
            options: FieldOptions::default(),
            model,
            many: false,
            store: None,
        }
    }

    pub fn many(mut self, many: bool) -> Self {
        self.many = many;
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    fn resolve_store<'a>(&'a self, ctx: &'a Context) -> Result<&'a dyn Store, AppError> {
        match (&self.store, &ctx.store) {
            (Some(s), _) | (None, Some(s)) => Ok(s.as_ref()),
            (None, None) => Err(ConfigError::Validation(format!(
                "no store available to look up {} rows",
                self.model.name()
            ))
            .into()),
        }
    }

    fn multikey_error(&self) -> ValidationError {
        ValidationError::new(format!(
            "The table {} has a composite primary key. You must submit all keys in the format \
             {{\"key1\": value1, \"key2\": \"value2\"}}",
            self.model.name()
        ))
    }

    fn missing_error(&self) -> ValidationError {
        ValidationError::new(format!(
            "A row with the key \"{}\" does not exist in the database.",
            self.model.primary_key().join(", ")
        ))
    }

    /// Lookup query for one submitted key; `None` when it cannot match.
    fn lookup(&self, key: &Json, strict: bool) -> Result<Option<Query>, ValidationError> {
        let names = self.model.primary_key();
        let mut query = Query::new(self.model.clone());
        if let [name] = names {
            return Ok(Some(query.eq(name.clone(), Value::from_json(key))));
        }
        let Some(parts) = key.as_object() else {
            return if strict { Err(self.multikey_error()) } else { Ok(None) };
        };
        for name in names {
            match parts.get(name) {
                Some(v) => query = query.eq(name.clone(), Value::from_json(v)),
                None => return Ok(None),
            }
        }
        Ok(Some(query))
    }

    async fn fetch(&self, key: &Json, strict: bool, ctx: &Context) -> Result<Option<Record>, AppError> {
        match self.lookup(key, strict)? {
            Some(query) => self.resolve_store(ctx)?.first(&query).await,
            None => Ok(None),
        }
    }

    fn keys(&self, value: &Json) -> Vec<Json> {
        match value {
            Json::Array(items) if self.many => items.clone(),
            other => vec![other.clone()],
        }
    }

    fn key_data(&self, record: &Record) -> Json {
        let names = self.model.primary_key();
        if let [name] = names {
            return record.get(name).map(Value::to_json).unwrap_or(Json::Null);
        }
        let map: Map<String, Json> = names
            .iter()
            .map(|n| (n.clone(), record.get(n).map(Value::to_json).unwrap_or(Json::Null)))
            .collect();
        Json::Object(map)
    }
}

#[async_trait]
impl FieldKind for PrimaryKeyRelatedField {
    fn type_name(&self) -> &'static str {
        "primary_key_related"
    }

    async fn check(&self, _opts: &FieldOptions, input: &Input<'_>) -> Result<Vec<ErrorDetail>, AppError> {
        if !is_truthy(input.value) {
            return Ok(Vec::new());
        }
        if self.many && !input.value.is_array() {
            return Ok(vec!["Value must be a list.".into()]);
        }
        for key in self.keys(input.value) {
            match self.fetch(&key, true, input.ctx).await {
                Ok(Some(_)) => {}
                Ok(None) => return Ok(vec![self.missing_error().description]),
                Err(AppError::Validation(e)) => return Ok(vec![e.description]),
                Err(other) => return Err(other),
            }
        }
        Ok(Vec::new())
    }

    async fn to_python(&self, _opts: &FieldOptions, input: &Input<'_>) -> Result<Value, AppError> {
        if !is_truthy(input.value) {
            return Ok(Value::from_json(input.value));
        }
        if !self.many {
            return Ok(self
                .fetch(input.value, false, input.ctx)
                .await?
                .map(Value::from)
                .unwrap_or_default());
        }
        let mut out = Vec::new();
        for key in self.keys(input.value) {
            if let Some(record) = self.fetch(&key, false, input.ctx).await? {
                out.push(Value::from(record));
            }
        }
        Ok(Value::List(out))
    }

    fn to_data(&self, value: &Value, ctx: &Context) -> Json {
        match value {
            Value::Record(r) => self.key_data(r),
            Value::List(items) => Json::Array(items.iter().map(|v| self.to_data(v, ctx)).collect()),
            other => other.to_json(),
        }
    }

    fn requires_model_serializer(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Column, ColumnType};
    use crate::serializers::fields::Field;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn books() -> Arc<Model> {
        Model::builder("books")
            .column(Column::new("id", ColumnType::Integer).primary_key())
            .column(Column::new("title", ColumnType::Text))
            .build()
            .unwrap()
    }

    fn editions() -> Arc<Model> {
        Model::builder("editions")
            .column(Column::new("book", ColumnType::Integer).primary_key())
            .column(Column::new("number", ColumnType::Integer).primary_key())
            .build()
            .unwrap()
    }

    fn seeded() -> (Arc<Model>, Context) {
        let store = MemoryStore::new();
        let model = books();
        for (id, title) in [(1, "It"), (2, "Misery")] {
            store
                .seed(&model, Record::from_attrs([("id", Value::Int(id)), ("title", Value::from(title))]))
                .unwrap();
        }
        (model, Context::default().with_store(Arc::new(store)))
    }

    #[tokio::test]
    async fn missing_rows_are_reported() {
        let (model, ctx) = seeded();
        let data = Map::new();
        let field: Field = PrimaryKeyRelatedField::new(model).many(true).into();
        let v = json!([1, 3]);
        assert_eq!(
            field.validate(&Input::new("books", &v, &data, &ctx)).await.unwrap(),
            vec![ErrorDetail::from("A row with the key \"id\" does not exist in the database.")]
        );
    }

    #[tokio::test]
    async fn resolves_rows_and_writes_back_keys() {
        let (model, ctx) = seeded();
        let data = Map::new();
        let field: Field = PrimaryKeyRelatedField::new(model).many(true).into();
        let v = json!([2, 1]);
        let rows = field.to_python(&Input::new("books", &v, &data, &ctx)).await.unwrap();
        assert_eq!(field.to_data(&rows, &ctx), json!([2, 1]));
    }

    #[tokio::test]
    async fn composite_keys_need_objects() {
        let ctx = Context::default().with_store(Arc::new(MemoryStore::new()));
        let data = Map::new();
        let field: Field = PrimaryKeyRelatedField::new(editions()).into();
        let v = json!(5);
        let errors = field.validate(&Input::new("edition", &v, &data, &ctx)).await.unwrap();
        assert!(errors[0]
            .to_string()
            .starts_with("The table editions has a composite primary key."));
    }

    #[tokio::test]
    async fn explicit_store_wins() {
        let (model, _) = seeded();
        let (_, ctx) = seeded();
        let empty: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let data = Map::new();
        let field: Field = PrimaryKeyRelatedField::new(model).store(empty).into();
        let v = json!(1);
        assert_eq!(field.validate(&Input::new("book", &v, &data, &ctx)).await.unwrap().len(), 1);
    }
}

use super::json::decode;
use super::{field_options, FieldKind, FieldOptions, Input};
use crate::error::{AppError, ErrorDetail};
use crate::serializers::{cleaned_to_record, Context, Serializer};
use crate::value::{Record, Value};
use async_trait::async_trait;
use serde_json::Value as Json;
use std::sync::Arc;

/// Another serializer used as a field: one object, or a list with `many`.
///
/// Does all of its own validation; the built-in checks do not run.
#[derive(Debug)]
pub struct SerializerField {
    pub(super) options: FieldOptions,
    serializer: Arc<Serializer>,
    many: bool,
    create_object: bool,
}

field_options!(SerializerField);

impl SerializerField {
    pub fn new(serializer: Arc<Serializer>) -> Self {
        SerializerField {
            options: FieldOptions::default(),
            serializer,
            many: false,
            create_object: true,
        }
    }

    pub fn many(mut self, many: bool) -> Self {
        self.many = many;
        self
    }

    /// When false, the cleaned data is kept as a plain record instead of
    /// running the nested serializer's create hooks.
    pub fn create_object(mut self, create: bool) -> Self {
        self.create_object = create;
        self
    }

    /// The nested object already held by the edited parent, if any.
    fn existing<'a>(&self, opts: &FieldOptions, input: &Input<'a>) -> Option<&'a Record> {
        if self.many {
            return None;
        }
        let source = opts.source.as_deref().unwrap_or(input.field_name);
        input.obj.and_then(|o| o.get(source)).and_then(Value::as_record)
    }

    fn items(&self, value: Json) -> Vec<Json> {
        match value {
            Json::Array(items) if self.many => items,
            other => vec![other],
        }
    }

    async fn convert(&self, existing: Option<&Record>, item: &Json, ctx: &Context) -> Result<Value, AppError> {
        if self.create_object {
            let record = self.serializer.save(existing.cloned(), item, ctx).await?;
            return Ok(Value::from(record));
        }
        let cleaned = self.serializer.validate(existing, item, ctx).await?;
        Ok(Value::from(cleaned_to_record(cleaned)))
    }
}

#[async_trait]
impl FieldKind for SerializerField {
    fn type_name(&self) -> &'static str {
        "serializer"
    }

    async fn check(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<Vec<ErrorDetail>, AppError> {
        if input.value.is_null() && opts.is_nullable() {
            return Ok(Vec::new());
        }
        let Some(value) = decode(input.value) else {
            return Ok(vec!["Does not appear to be valid json.".into()]);
        };
        if self.many && !value.is_array() {
            return Ok(vec!["Value must be a list.".into()]);
        }
        let existing = self.existing(opts, input);
        let mut errors = Vec::new();
        for item in self.items(value) {
            match self.serializer.validate(existing, &item, input.ctx).await {
                Ok(_) => {}
                Err(AppError::Validation(e)) => errors.push(e.description),
                Err(other) => return Err(other),
            }
        }
        Ok(errors)
    }

    async fn to_python(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<Value, AppError> {
        if input.value.is_null() {
            return Ok(Value::Null);
        }
        let value = decode(input.value).unwrap_or(Json::Null);
        let existing = self.existing(opts, input);
        if !self.many {
            return self.convert(existing, &value, input.ctx).await;
        }
        let mut out = Vec::new();
        for item in self.items(value) {
            out.push(self.convert(None, &item, input.ctx).await?);
        }
        Ok(Value::List(out))
    }

    fn to_data(&self, value: &Value, ctx: &Context) -> Json {
        match value {
            Value::Record(r) => self.serializer.serialize(r, ctx),
            Value::List(items) => Json::Array(items.iter().map(|v| self.to_data(v, ctx)).collect()),
            other => other.to_json(),
        }
    }

    fn takes_default(&self) -> bool {
        false
    }

    fn replaces_builtin_checks(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializers::fields::{Field, StringField};
    use serde_json::{json, Map};

    fn author() -> Arc<Serializer> {
        Arc::new(
            Serializer::builder("author")
                .field("name", StringField::new().required(true))
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn collects_nested_errors_per_item() {
        let ctx = Context::default();
        let data = Map::new();
        let field: Field = SerializerField::new(author()).many(true).into();
        let v = json!([{"name": "Dean"}, {}]);
        let errors = field.validate(&Input::new("authors", &v, &data, &ctx)).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_json(), json!({"name": ["Field is required."]}));
    }

    #[tokio::test]
    async fn structural_errors() {
        let ctx = Context::default();
        let data = Map::new();
        let field: Field = SerializerField::new(author()).many(true).into();
        let v = json!({"name": "Dean"});
        assert_eq!(
            field.validate(&Input::new("authors", &v, &data, &ctx)).await.unwrap(),
            vec![ErrorDetail::from("Value must be a list.")]
        );
        let v = json!("[oops");
        assert_eq!(
            field.validate(&Input::new("authors", &v, &data, &ctx)).await.unwrap(),
            vec![ErrorDetail::from("Does not appear to be valid json.")]
        );
    }

    #[tokio::test]
    async fn saves_and_serializes_nested_objects() {
        let ctx = Context::default();
        let data = Map::new();
        let field: Field = SerializerField::new(author()).into();
        let v = json!("{\"name\": \" Dean \"}");
        let saved = field.to_python(&Input::new("author", &v, &data, &ctx)).await.unwrap();
        assert_eq!(saved.as_record().and_then(|r| r.get("name")), Some(&Value::from("Dean")));
        assert_eq!(field.to_data(&saved, &ctx), json!({"name": "Dean"}));
    }
}

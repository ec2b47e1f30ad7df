use super::{field_options, FieldKind, FieldOptions, Input};
use crate::error::{AppError, ErrorDetail};
use crate::serializers::{cleaned_to_json, Context, Serializer};
use crate::value::{is_truthy, Value};
use async_trait::async_trait;
use serde_json::Value as Json;
use std::sync::Arc;

/// Arbitrary JSON, optionally checked against a serializer. String input is
/// decoded first.
#[derive(Debug, Default)]
pub struct JSONField {
    pub(super) options: FieldOptions,
    validator: Option<Arc<Serializer>>,
    many: bool,
}

field_options!(JSONField);

impl JSONField {
    pub fn new() -> Self {
        Self {
            options: FieldOptions::default(),
            validator: None,
            many: false,
        }
    }

    pub fn validator(mut self, serializer: Arc<Serializer>) -> Self {
        self.validator = Some(serializer);
        self
    }

    pub fn many(mut self, many: bool) -> Self {
        self.many = many;
        self
    }
}

pub(super) fn decode(value: &Json) -> Option<Json> {
    match value {
        Json::String(s) => serde_json::from_str(s).ok(),
        other => Some(other.clone()),
    }
}

#[async_trait]
impl FieldKind for JSONField {
    fn type_name(&self) -> &'static str {
        "json"
    }

    async fn check(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<Vec<ErrorDetail>, AppError> {
        if opts.is_nullable() && input.value.is_null() {
            return Ok(Vec::new());
        }
        let Some(value) = decode(input.value) else {
            return Ok(vec!["Does not appear to be valid json.".into()]);
        };
        if self.many && !value.is_array() {
            return Ok(vec!["Must be a list.".into()]);
        }
        let Some(validator) = &self.validator else {
            return Ok(Vec::new());
        };
        if !is_truthy(&value) {
            return Ok(Vec::new());
        }
        let items = match &value {
            Json::Array(items) if self.many => items.iter().collect(),
            other => vec![other],
        };
        for item in items {
            match validator.validate(input.obj, item, input.ctx).await {
                Ok(_) => {}
                Err(AppError::Validation(e)) => return Ok(vec![e.description]),
                Err(other) => return Err(other),
            }
        }
        Ok(Vec::new())
    }

    async fn to_python(&self, _opts: &FieldOptions, input: &Input<'_>) -> Result<Value, AppError> {
        let value = decode(input.value).unwrap_or(Json::Null);
        let Some(validator) = &self.validator else {
            return Ok(Value::Json(value));
        };
        if self.many {
            let mut out = Vec::new();
            for item in value.as_array().into_iter().flatten() {
                let cleaned = validator.validate(None, item, input.ctx).await?;
                out.push(cleaned_to_json(&cleaned));
            }
            return Ok(Value::Json(Json::Array(out)));
        }
        let cleaned = validator.validate(None, &value, input.ctx).await?;
        Ok(Value::Json(cleaned_to_json(&cleaned)))
    }

    fn to_data(&self, value: &Value, _ctx: &Context) -> Json {
        match value {
            Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| Json::String(s.clone())),
            other => other.to_json(),
        }
    }

    fn takes_default(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializers::fields::{Field, IntField};
    use serde_json::{json, Map};

    #[tokio::test]
    async fn decodes_string_input() {
        let ctx = Context::default();
        let data = Map::new();
        let field: Field = JSONField::new().into();
        let v = json!("{\"a\": 1}");
        assert!(field.validate(&Input::new("doc", &v, &data, &ctx)).await.unwrap().is_empty());
        assert_eq!(
            field.to_python(&Input::new("doc", &v, &data, &ctx)).await.unwrap(),
            Value::Json(json!({"a": 1}))
        );
        let v = json!("{nope");
        assert_eq!(
            field.validate(&Input::new("doc", &v, &data, &ctx)).await.unwrap(),
            vec![ErrorDetail::from("Does not appear to be valid json.")]
        );
    }

    #[tokio::test]
    async fn many_requires_list_and_validates_items() {
        let ctx = Context::default();
        let data = Map::new();
        let inner = Serializer::builder("point")
            .field("x", IntField::new().required(true))
            .build()
            .unwrap();
        let field: Field = JSONField::new().validator(Arc::new(inner)).many(true).into();

        let v = json!({"x": 1});
        assert_eq!(
            field.validate(&Input::new("points", &v, &data, &ctx)).await.unwrap(),
            vec![ErrorDetail::from("Must be a list.")]
        );

        let v = json!([{"x": 1}, {}]);
        let errors = field.validate(&Input::new("points", &v, &data, &ctx)).await.unwrap();
        assert_eq!(errors[0].field("x"), Some(&[ErrorDetail::from("Field is required.")][..]));
    }
}

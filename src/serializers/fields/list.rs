use super::{field_options, Field, FieldKind, FieldOptions, Input};
use crate::error::{AppError, ErrorDetail};
use crate::serializers::Context;
use crate::value::Value;
use async_trait::async_trait;
use serde_json::Value as Json;

/// A list whose items are each checked and converted by `child`.
#[derive(Debug)]
pub struct ListField {
    pub(super) options: FieldOptions,
    child: Field,
}

field_options!(ListField);

impl ListField {
    pub fn new(child: impl Into<Field>) -> Self {
        ListField {
            options: FieldOptions::default(),
            child: child.into(),
        }
    }
}

#[async_trait]
impl FieldKind for ListField {
    fn type_name(&self) -> &'static str {
        "list"
    }

    async fn check(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<Vec<ErrorDetail>, AppError> {
        if opts.is_nullable() && input.value.is_null() {
            return Ok(Vec::new());
        }
        let Some(items) = input.value.as_array() else {
            return Ok(vec!["Value must be a list.".into()]);
        };
        // Every item is checked under the list's own name; only the first
        // failure is reported.
        let mut first = None;
        for item in items {
            let errors = self.child.validate(&input.with_value(item)).await?;
            if first.is_none() {
                first = errors.into_iter().next();
            }
        }
        Ok(first.into_iter().collect())
    }

    async fn to_python(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<Value, AppError> {
        if opts.is_nullable() && input.value.is_null() {
            return Ok(Value::Null);
        }
        let mut out = Vec::new();
        for item in input.value.as_array().into_iter().flatten() {
            out.push(self.child.to_python(&input.with_value(item)).await?);
        }
        Ok(Value::List(out))
    }

    fn to_data(&self, value: &Value, ctx: &Context) -> Json {
        match value {
            Value::List(items) => Json::Array(items.iter().map(|v| self.child.to_data(v, ctx)).collect()),
            other => other.to_json(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializers::fields::{IntField, SerializerField, StringField};
    use crate::serializers::Serializer;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn reports_first_item_error_only() {
        let ctx = Context::default();
        let data = Map::new();
        let field: Field = ListField::new(IntField::new()).into();
        let v = json!([1, "a", "b"]);
        let errors = field.validate(&Input::new("ids", &v, &data, &ctx)).await.unwrap();
        assert_eq!(errors, vec![ErrorDetail::from("\"a\" does not appear to be an integer.")]);
    }

    #[tokio::test]
    async fn later_items_are_still_checked() {
        let ctx = Context::default();
        let data = Map::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let child = Serializer::builder("item")
            .field("n", IntField::new())
            .clean_field("n", move |_, data, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(data.get("n").cloned().unwrap_or(Json::Null))
            })
            .build()
            .unwrap();
        let field: Field = ListField::new(SerializerField::new(Arc::new(child)).create_object(false)).into();
        let v = json!([{"n": "x"}, {"n": 1}, {"n": 2}]);
        let errors = field.validate(&Input::new("items", &v, &data, &ctx)).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn first_error_among_several_failures() {
        let ctx = Context::default();
        let data = Map::new();
        let field: Field = ListField::new(IntField::new().min_value(0)).into();
        let v = json!([1, 2, "3", 4, -1]);
        let errors = field.validate(&Input::new("ids", &v, &data, &ctx)).await.unwrap();
        assert_eq!(errors, vec![ErrorDetail::from("\"3\" does not appear to be an integer.")]);
    }

    #[tokio::test]
    async fn not_a_list() {
        let ctx = Context::default();
        let data = Map::new();
        let field: Field = ListField::new(IntField::new()).into();
        let v = json!(4);
        let errors = field.validate(&Input::new("ids", &v, &data, &ctx)).await.unwrap();
        assert_eq!(errors, vec![ErrorDetail::from("Value must be a list.")]);
    }

    #[tokio::test]
    async fn converts_each_item() {
        let ctx = Context::default();
        let data = Map::new();
        let field: Field = ListField::new(StringField::new()).into();
        let v = json!([" a ", "b"]);
        assert_eq!(
            field.to_python(&Input::new("tags", &v, &data, &ctx)).await.unwrap(),
            Value::List(vec![Value::from("a"), Value::from("b")])
        );
    }
}

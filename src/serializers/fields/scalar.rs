use super::{field_options, FieldKind, FieldOptions, Input};
use crate::error::{AppError, ErrorDetail, ValidationError};
use crate::serializers::Context;
use crate::value::Value;
use async_trait::async_trait;
use serde_json::Value as Json;
use uuid::Uuid;

/// Untyped field: only the built-in checks, value passed through.
#[derive(Debug, Default)]
pub struct AnyField {
    pub(super) options: FieldOptions,
}

field_options!(AnyField);

impl AnyField {
    pub fn new() -> Self {
        Self {
            options: FieldOptions::default(),
        }
    }
}

#[async_trait]
impl FieldKind for AnyField {
    fn type_name(&self) -> &'static str {
        "any"
    }

    async fn check(&self, _opts: &FieldOptions, _input: &Input<'_>) -> Result<Vec<ErrorDetail>, AppError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default)]
pub struct BooleanField {
    pub(super) options: FieldOptions,
}

field_options!(BooleanField);

impl BooleanField {
    pub fn new() -> Self {
        Self {
            options: FieldOptions::default(),
        }
    }
}

#[async_trait]
impl FieldKind for BooleanField {
    fn type_name(&self) -> &'static str {
        "boolean"
    }

    async fn check(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<Vec<ErrorDetail>, AppError> {
        if input.value.is_boolean() || (opts.is_nullable() && input.value.is_null()) {
            return Ok(Vec::new());
        }
        Ok(vec!["Must be a boolean.".into()])
    }
}

#[derive(Debug, Default)]
pub struct UUIDField {
    pub(super) options: FieldOptions,
}

field_options!(UUIDField);

impl UUIDField {
    pub fn new() -> Self {
        Self {
            options: FieldOptions::default(),
        }
    }
}

fn parse_uuid(v: &Json) -> Result<Uuid, ValidationError> {
    let text = match v {
        Json::String(s) => s.as_str(),
        other => {
            return Err(ValidationError::new(format!(
                "Error converting uuid: expected a string, found {}",
                other
            )))
        }
    };
    Uuid::parse_str(text).map_err(|e| ValidationError::new(format!("Error converting uuid: {}", e)))
}

#[async_trait]
impl FieldKind for UUIDField {
    fn type_name(&self) -> &'static str {
        "uuid"
    }

    async fn check(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<Vec<ErrorDetail>, AppError> {
        if opts.is_nullable() && input.value.is_null() {
            return Ok(Vec::new());
        }
        Ok(parse_uuid(input.value).err().map(|e| e.description).into_iter().collect())
    }

    async fn to_python(&self, _opts: &FieldOptions, input: &Input<'_>) -> Result<Value, AppError> {
        if input.value.is_null() {
            return Ok(Value::Null);
        }
        Ok(Value::Uuid(parse_uuid(input.value)?))
    }

    fn to_data(&self, value: &Value, _ctx: &Context) -> Json {
        match value {
            Value::Uuid(u) => Json::String(u.hyphenated().to_string()),
            other => other.to_json(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializers::fields::Field;
    use serde_json::{json, Map};

    #[tokio::test]
    async fn boolean_rejects_strings() {
        let ctx = Context::default();
        let data = Map::new();
        let field: Field = BooleanField::new().into();
        let v = json!("true");
        let errors = field.validate(&Input::new("flag", &v, &data, &ctx)).await.unwrap();
        assert_eq!(errors, vec![ErrorDetail::from("Must be a boolean.")]);
    }

    #[tokio::test]
    async fn uuid_round_trip_is_hyphenated() {
        let ctx = Context::default();
        let data = Map::new();
        let field: Field = UUIDField::new().into();
        let v = json!("67E55044-10B1-426F-9247-BB680E5FE0C8");
        let parsed = field.to_python(&Input::new("id", &v, &data, &ctx)).await.unwrap();
        assert_eq!(
            field.to_data(&parsed, &ctx),
            json!("67e55044-10b1-426f-9247-bb680e5fe0c8")
        );
    }

    #[tokio::test]
    async fn uuid_error_prefix() {
        let ctx = Context::default();
        let data = Map::new();
        let field: Field = UUIDField::new().into();
        let v = json!("not-a-uuid");
        let errors = field.validate(&Input::new("id", &v, &data, &ctx)).await.unwrap();
        assert!(errors[0].to_string().starts_with("Error converting uuid: "));
    }
}

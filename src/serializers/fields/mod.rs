//! Typed validation/conversion units.
//!
//! A [`Field`] is immutable configuration ([`FieldOptions`]) plus a kind
//! ([`FieldKind`]). Every field runs the built-in checks (choices, required,
//! read-only, nullable, read-only-on-update) and then its kind's checks, in a
//! fixed order, collecting every failure.

mod json;
mod list;
mod nested;
mod number;
mod related;
mod scalar;
mod string;
mod temporal;

pub use json::JSONField;
pub use list::ListField;
pub use nested::SerializerField;
pub use number::{FloatField, IntField};
pub use related::PrimaryKeyRelatedField;
pub use scalar::{AnyField, BooleanField, UUIDField};
pub use string::{EmailField, StringField};
pub use temporal::{DateField, ISODateTimeField};

use crate::error::{AppError, ErrorDetail, ValidationError};
use crate::serializers::Context;
use crate::value::{display_json, Record, Value};
use async_trait::async_trait;
use serde_json::{Map, Value as Json};
use std::fmt;
use std::sync::Arc;

/// Value used for an absent, optional field on create.
#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Value(v) => v.clone(),
            DefaultValue::Factory(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            DefaultValue::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FieldOptions {
    pub required: bool,
    pub default: Option<DefaultValue>,
    pub read_only: bool,
    pub write_only: bool,
    pub update_read_only: bool,
    /// Unset means "the opposite of `required`".
    pub nullable: Option<bool>,
    pub choices: Option<Vec<Json>>,
    pub source: Option<String>,
}

impl FieldOptions {
    pub fn is_nullable(&self) -> bool {
        self.nullable.unwrap_or(!self.required)
    }

    pub fn default_value(&self) -> Value {
        self.default.as_ref().map(DefaultValue::produce).unwrap_or_default()
    }
}

/// Everything a check or conversion sees for one field of one request.
#[derive(Clone, Copy)]
pub struct Input<'a> {
    pub field_name: &'a str,
    pub value: &'a Json,
    pub data: &'a Map<String, Json>,
    /// The object being edited; `None` on create.
    pub obj: Option<&'a Record>,
    pub ctx: &'a Context,
}

impl<'a> Input<'a> {
    pub fn new(field_name: &'a str, value: &'a Json, data: &'a Map<String, Json>, ctx: &'a Context) -> Self {
        Input {
            field_name,
            value,
            data,
            obj: None,
            ctx,
        }
    }

    pub fn editing(mut self, obj: Option<&'a Record>) -> Self {
        self.obj = obj;
        self
    }

    pub fn with_value(mut self, value: &'a Json) -> Self {
        self.value = value;
        self
    }

    fn is_present(&self) -> bool {
        self.data.contains_key(self.field_name)
    }
}

/// One kind-specific check. Kinds list theirs in the order they run.
pub(crate) type Check<K> = fn(&K, &FieldOptions, &Input<'_>) -> Result<(), ValidationError>;

pub(crate) fn run_checks<K>(kind: &K, checks: &[Check<K>], opts: &FieldOptions, input: &Input<'_>) -> Vec<ErrorDetail> {
    checks
        .iter()
        .filter_map(|check| check(kind, opts, input).err())
        .map(|e| e.description)
        .collect()
}

#[async_trait]
pub trait FieldKind: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &'static str;

    /// Kind-specific checks, after the built-in ones.
    async fn check(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<Vec<ErrorDetail>, AppError>;

    /// External (request) form to internal form.
    async fn to_python(&self, _opts: &FieldOptions, input: &Input<'_>) -> Result<Value, AppError> {
        Ok(Value::from_json(input.value))
    }

    /// Internal form to external (response) form.
    fn to_data(&self, value: &Value, _ctx: &Context) -> Json {
        value.to_json()
    }

    fn requires_model_serializer(&self) -> bool {
        false
    }

    /// Whether an absent optional field gets its default on create.
    fn takes_default(&self) -> bool {
        true
    }

    /// Kinds that do all validation themselves skip the built-in checks.
    fn replaces_builtin_checks(&self) -> bool {
        false
    }
}

#[derive(Clone)]
pub struct Field {
    options: FieldOptions,
    kind: Arc<dyn FieldKind>,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("kind", &self.kind.type_name())
            .field("options", &self.options)
            .finish()
    }
}

impl Field {
    pub fn new(kind: impl FieldKind + 'static, options: FieldOptions) -> Self {
        Field {
            options,
            kind: Arc::new(kind),
        }
    }

    pub fn options(&self) -> &FieldOptions {
        &self.options
    }

    pub fn kind(&self) -> &dyn FieldKind {
        self.kind.as_ref()
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn is_nullable(&self) -> bool {
        self.options.is_nullable()
    }

    /// Copy with `required` set and nullability pinned to its current value.
    pub fn forced_required(&self) -> Field {
        let mut options = self.options.clone();
        options.nullable = Some(options.is_nullable());
        options.required = true;
        Field {
            options,
            kind: self.kind.clone(),
        }
    }

    /// Copy with `source` set when it has none.
    pub(crate) fn with_default_source(&self, source: &str) -> Field {
        let mut f = self.clone();
        if f.options.source.is_none() {
            f.options.source = Some(source.to_string());
        }
        f
    }

    /// Run every check and return the failures in the order they ran.
    pub async fn validate(&self, input: &Input<'_>) -> Result<Vec<ErrorDetail>, AppError> {
        if self.kind.replaces_builtin_checks() {
            return self.kind.check(&self.options, input).await;
        }
        let opts = &self.options;
        let mut errors = Vec::new();

        if let Some(choices) = &opts.choices {
            if !choices.is_empty() && !choices.contains(input.value) {
                errors.push(ErrorDetail::from(format!(
                    "\"{}\" not in \"{}\"",
                    display_json(input.value),
                    choices.iter().map(display_json).collect::<Vec<_>>().join(", ")
                )));
            }
        }
        if input.obj.is_none() && opts.required && !input.is_present() {
            errors.push("Field is required.".into());
        }
        if opts.read_only && input.is_present() {
            errors.push("Field is read-only.".into());
        }
        if opts.required && !opts.is_nullable() && input.value.is_null() {
            errors.push("Field cannot be null.".into());
        }
        if opts.update_read_only && input.is_present() {
            if let Some(obj) = input.obj {
                let source = opts.source.as_deref().unwrap_or(input.field_name);
                let current = obj.get(source).cloned().unwrap_or_default();
                match self.kind.to_python(opts, input).await {
                    Ok(incoming) if incoming != current => {
                        errors.push("Field is read-only when editing.".into());
                    }
                    Ok(_) => {}
                    // Unconvertible input is reported by the kind's check below.
                    Err(AppError::Validation(_)) => {}
                    Err(other) => return Err(other),
                }
            }
        }

        errors.extend(self.kind.check(opts, input).await?);
        Ok(errors)
    }

    pub async fn to_python(&self, input: &Input<'_>) -> Result<Value, AppError> {
        self.kind.to_python(&self.options, input).await
    }

    pub fn to_data(&self, value: &Value, ctx: &Context) -> Json {
        self.kind.to_data(value, ctx)
    }
}

/// Builder methods for the shared options, and `Into<Field>`, for a kind
/// struct carrying an `options: FieldOptions` member.
macro_rules! field_options {
    ($kind:ty) => {
        impl $kind {
            pub fn required(mut self, required: bool) -> Self {
                self.options.required = required;
                self
            }

            pub fn nullable(mut self, nullable: bool) -> Self {
                self.options.nullable = Some(nullable);
                self
            }

            pub fn read_only(mut self, read_only: bool) -> Self {
                self.options.read_only = read_only;
                self
            }

            pub fn write_only(mut self, write_only: bool) -> Self {
                self.options.write_only = write_only;
                self
            }

            pub fn update_read_only(mut self, update_read_only: bool) -> Self {
                self.options.update_read_only = update_read_only;
                self
            }

            pub fn default(mut self, value: impl Into<$crate::value::Value>) -> Self {
                self.options.default = Some($crate::serializers::fields::DefaultValue::Value(value.into()));
                self
            }

            pub fn default_with<F>(mut self, factory: F) -> Self
            where
                F: Fn() -> $crate::value::Value + Send + Sync + 'static,
            {
                self.options.default = Some($crate::serializers::fields::DefaultValue::Factory(
                    std::sync::Arc::new(factory),
                ));
                self
            }

            pub fn choices<I, V>(mut self, choices: I) -> Self
            where
                I: IntoIterator<Item = V>,
                V: Into<serde_json::Value>,
            {
                self.options.choices = Some(choices.into_iter().map(Into::into).collect());
                self
            }

            pub fn source(mut self, source: impl Into<String>) -> Self {
                self.options.source = Some(source.into());
                self
            }
        }

        impl From<$kind> for $crate::serializers::fields::Field {
            fn from(mut kind: $kind) -> Self {
                let options = std::mem::take(&mut kind.options);
                $crate::serializers::fields::Field::new(kind, options)
            }
        }
    };
}

pub(crate) use field_options;

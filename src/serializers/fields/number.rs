use super::{field_options, run_checks, Check, FieldKind, FieldOptions, Input};
use crate::error::{AppError, ErrorDetail, ValidationError};
use crate::value::{display_json, Value};
use async_trait::async_trait;

#[derive(Debug, Default, Clone, Copy)]
struct Bounds {
    min: Option<f64>,
    max: Option<f64>,
}

impl Bounds {
    fn check_min(&self, input: &Input<'_>) -> Result<(), ValidationError> {
        match (self.min, input.value.as_f64()) {
            (Some(min), Some(v)) if v < min => Err(ValidationError::new(format!(
                "Value cannot be smaller than {}.",
                number_text(min)
            ))),
            _ => Ok(()),
        }
    }

    fn check_max(&self, input: &Input<'_>) -> Result<(), ValidationError> {
        match (self.max, input.value.as_f64()) {
            (Some(max), Some(v)) if v > max => Err(ValidationError::new(format!(
                "Value cannot be larger than {}.",
                number_text(max)
            ))),
            _ => Ok(()),
        }
    }
}

/// `3.0` prints as `3` so integer bounds read naturally.
fn number_text(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[derive(Debug, Default)]
pub struct IntField {
    pub(super) options: FieldOptions,
    bounds: Bounds,
}

field_options!(IntField);

impl IntField {
    pub fn new() -> Self {
        Self {
            options: FieldOptions::default(),
            bounds: Bounds::default(),
        }
    }

    pub fn min_value(mut self, min: i64) -> Self {
        self.bounds.min = Some(min as f64);
        self
    }

    pub fn max_value(mut self, max: i64) -> Self {
        self.bounds.max = Some(max as f64);
        self
    }

    fn check_is_int(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<(), ValidationError> {
        let v = input.value;
        if (opts.is_nullable() && v.is_null()) || v.is_i64() || v.is_u64() {
            return Ok(());
        }
        Err(ValidationError::new(format!(
            "\"{}\" does not appear to be an integer.",
            display_json(v)
        )))
    }

    fn check_max_value(&self, _: &FieldOptions, input: &Input<'_>) -> Result<(), ValidationError> {
        self.bounds.check_max(input)
    }

    fn check_min_value(&self, _: &FieldOptions, input: &Input<'_>) -> Result<(), ValidationError> {
        self.bounds.check_min(input)
    }

    const CHECKS: &'static [Check<Self>] = &[Self::check_is_int, Self::check_max_value, Self::check_min_value];
}

#[async_trait]
impl FieldKind for IntField {
    fn type_name(&self) -> &'static str {
        "int"
    }

    async fn check(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<Vec<ErrorDetail>, AppError> {
        Ok(run_checks(self, Self::CHECKS, opts, input))
    }
}

#[derive(Debug, Default)]
pub struct FloatField {
    pub(super) options: FieldOptions,
    bounds: Bounds,
}

field_options!(FloatField);

impl FloatField {
    pub fn new() -> Self {
        Self {
            options: FieldOptions::default(),
            bounds: Bounds::default(),
        }
    }

    pub fn min_value(mut self, min: f64) -> Self {
        self.bounds.min = Some(min);
        self
    }

    pub fn max_value(mut self, max: f64) -> Self {
        self.bounds.max = Some(max);
        self
    }

    fn check_is_float(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<(), ValidationError> {
        let v = input.value;
        if (opts.is_nullable() && v.is_null()) || v.is_f64() {
            return Ok(());
        }
        Err(ValidationError::new(format!(
            "\"{}\" does not appear to be a float.",
            display_json(v)
        )))
    }

    fn check_max_value(&self, _: &FieldOptions, input: &Input<'_>) -> Result<(), ValidationError> {
        self.bounds.check_max(input)
    }

    fn check_min_value(&self, _: &FieldOptions, input: &Input<'_>) -> Result<(), ValidationError> {
        self.bounds.check_min(input)
    }

    const CHECKS: &'static [Check<Self>] = &[Self::check_is_float, Self::check_max_value, Self::check_min_value];
}

#[async_trait]
impl FieldKind for FloatField {
    fn type_name(&self) -> &'static str {
        "float"
    }

    async fn check(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<Vec<ErrorDetail>, AppError> {
        Ok(run_checks(self, Self::CHECKS, opts, input))
    }

    async fn to_python(&self, _opts: &FieldOptions, input: &Input<'_>) -> Result<Value, AppError> {
        Ok(match input.value.as_f64() {
            Some(f) => Value::Float(f),
            None => Value::from_json(input.value),
        })
    }
}

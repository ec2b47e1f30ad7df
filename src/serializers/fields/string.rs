use super::{field_options, run_checks, Check, FieldKind, FieldOptions, Input};
use crate::error::{AppError, ConfigError, ErrorDetail, ValidationError};
use crate::value::{display_json, Value};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value as Json;

const EMAIL_PATTERN: &str = r"[^@]+@[^@]+\.[^@]+";

/// Text of a request value as the length checks see it.
fn text_of(value: &Json) -> String {
    display_json(value)
}

/// Matches when the pattern matches at the start of the text.
fn matches_at_start(re: &Regex, text: &str) -> bool {
    re.find(text).map(|m| m.start() == 0).unwrap_or(false)
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

#[derive(Debug, Default)]
pub struct StringField {
    pub(super) options: FieldOptions,
    min_length: Option<usize>,
    max_length: Option<usize>,
    trim_whitespace: bool,
    blank: bool,
    regex: Option<Regex>,
}

field_options!(StringField);

impl StringField {
    pub fn new() -> Self {
        StringField {
            trim_whitespace: true,
            blank: true,
            ..Default::default()
        }
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn trim_whitespace(mut self, trim: bool) -> Self {
        self.trim_whitespace = trim;
        self
    }

    /// Whether the empty string is accepted.
    pub fn blank(mut self, blank: bool) -> Self {
        self.blank = blank;
        self
    }

    pub fn regex(mut self, pattern: &str) -> Result<Self, ConfigError> {
        self.regex = Some(compile(pattern)?);
        Ok(self)
    }

    fn skips_null(&self, opts: &FieldOptions, input: &Input<'_>) -> bool {
        opts.is_nullable() && input.value.is_null()
    }

    fn check_blank(&self, _: &FieldOptions, input: &Input<'_>) -> Result<(), ValidationError> {
        if !self.blank && input.value.as_str() == Some("") {
            return Err(ValidationError::new("Cannot be blank."));
        }
        Ok(())
    }

    fn check_is_string(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<(), ValidationError> {
        if self.skips_null(opts, input) || input.value.is_string() {
            return Ok(());
        }
        Err(ValidationError::new("Must be a string."))
    }

    fn check_min_length(&self, _: &FieldOptions, input: &Input<'_>) -> Result<(), ValidationError> {
        match self.min_length {
            Some(n) if n > 0 && !input.value.is_null() && text_of(input.value).chars().count() < n => Err(
                ValidationError::new(format!("Must be at least {} character(s) long.", n)),
            ),
            _ => Ok(()),
        }
    }

    fn check_max_length(&self, _: &FieldOptions, input: &Input<'_>) -> Result<(), ValidationError> {
        match self.max_length {
            Some(n) if n > 0 && !input.value.is_null() && text_of(input.value).chars().count() > n => Err(
                ValidationError::new(format!("Must be at most {} character(s) long.", n)),
            ),
            _ => Ok(()),
        }
    }

    fn check_regex(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<(), ValidationError> {
        let Some(re) = &self.regex else {
            return Ok(());
        };
        if self.skips_null(opts, input) {
            return Ok(());
        }
        if matches_at_start(re, &text_of(input.value)) {
            return Ok(());
        }
        Err(ValidationError::new(format!("Must match the pattern \"{}\".", re.as_str())))
    }

    const CHECKS: &'static [Check<Self>] = &[
        Self::check_blank,
        Self::check_is_string,
        Self::check_min_length,
        Self::check_max_length,
        Self::check_regex,
    ];

    fn convert(&self, opts: &FieldOptions, value: &Json) -> Value {
        if opts.is_nullable() && value.is_null() {
            return Value::Null;
        }
        let text = text_of(value);
        if self.trim_whitespace {
            Value::String(text.trim().to_string())
        } else {
            Value::String(text)
        }
    }
}

#[async_trait]
impl FieldKind for StringField {
    fn type_name(&self) -> &'static str {
        "string"
    }

    async fn check(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<Vec<ErrorDetail>, AppError> {
        Ok(run_checks(self, Self::CHECKS, opts, input))
    }

    async fn to_python(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<Value, AppError> {
        Ok(self.convert(opts, input.value))
    }
}

/// Loose `something@domain.tld` check; lowercases by default.
#[derive(Debug)]
pub struct EmailField {
    pub(super) options: FieldOptions,
    string: StringField,
    convert_to_lower: bool,
}

field_options!(EmailField);

impl Default for EmailField {
    fn default() -> Self {
        Self::new()
    }
}

impl EmailField {
    pub fn new() -> Self {
        let string = StringField {
            regex: Regex::new(EMAIL_PATTERN).ok(),
            ..StringField::new()
        };
        EmailField {
            options: FieldOptions::default(),
            string,
            convert_to_lower: true,
        }
    }

    pub fn convert_to_lower(mut self, lower: bool) -> Self {
        self.convert_to_lower = lower;
        self
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.string.min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.string.max_length = Some(n);
        self
    }

    pub fn blank(mut self, blank: bool) -> Self {
        self.string.blank = blank;
        self
    }

    fn check_blank(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<(), ValidationError> {
        self.string.check_blank(opts, input)
    }

    fn check_is_string(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<(), ValidationError> {
        self.string.check_is_string(opts, input)
    }

    fn check_min_length(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<(), ValidationError> {
        self.string.check_min_length(opts, input)
    }

    fn check_max_length(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<(), ValidationError> {
        self.string.check_max_length(opts, input)
    }

    fn check_address(&self, _: &FieldOptions, input: &Input<'_>) -> Result<(), ValidationError> {
        let (Some(re), Some(text)) = (&self.string.regex, input.value.as_str()) else {
            return Ok(());
        };
        if matches_at_start(re, text) {
            return Ok(());
        }
        Err(ValidationError::new(format!(
            "\"{}\" does not appear to be a valid email address.",
            text
        )))
    }

    const CHECKS: &'static [Check<Self>] = &[
        Self::check_blank,
        Self::check_is_string,
        Self::check_min_length,
        Self::check_max_length,
        Self::check_address,
    ];
}

#[async_trait]
impl FieldKind for EmailField {
    fn type_name(&self) -> &'static str {
        "email"
    }

    async fn check(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<Vec<ErrorDetail>, AppError> {
        Ok(run_checks(self, Self::CHECKS, opts, input))
    }

    async fn to_python(&self, _opts: &FieldOptions, input: &Input<'_>) -> Result<Value, AppError> {
        Ok(match input.value.as_str() {
            Some(s) if self.convert_to_lower => Value::String(s.to_lowercase()),
            _ => Value::from_json(input.value),
        })
    }
}

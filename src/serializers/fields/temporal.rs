use super::{field_options, FieldKind, FieldOptions, Input};
use crate::error::{AppError, ErrorDetail, ValidationError};
use crate::serializers::Context;
use crate::value::{display_json, Value};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value as Json;

/// Calendar date in `YYYY-MM-DD` form.
#[derive(Debug, Default)]
pub struct DateField {
    pub(super) options: FieldOptions,
}

field_options!(DateField);

impl DateField {
    pub fn new() -> Self {
        Self {
            options: FieldOptions::default(),
        }
    }
}

fn parse_date(v: &Json) -> Result<NaiveDate, ValidationError> {
    match v {
        Json::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
            ValidationError::new(format!("\"{}\" does not appear to be in the format \"YYYY-MM-DD\".", s))
        }),
        other => Err(ValidationError::new(format!(
            "\"{}\" is not a valid date.",
            display_json(other)
        ))),
    }
}

#[async_trait]
impl FieldKind for DateField {
    fn type_name(&self) -> &'static str {
        "date"
    }

    async fn check(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<Vec<ErrorDetail>, AppError> {
        if opts.is_nullable() && input.value.is_null() {
            return Ok(Vec::new());
        }
        Ok(parse_date(input.value).err().map(|e| e.description).into_iter().collect())
    }

    async fn to_python(&self, _opts: &FieldOptions, input: &Input<'_>) -> Result<Value, AppError> {
        if input.value.is_null() {
            return Ok(Value::Null);
        }
        Ok(Value::Date(parse_date(input.value)?))
    }

    fn to_data(&self, value: &Value, _ctx: &Context) -> Json {
        match value {
            Value::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(d) => Json::String(d.date_naive().format("%Y-%m-%d").to_string()),
            other => other.to_json(),
        }
    }
}

/// Date and time parsed leniently from ISO-8601 and written back as RFC 3339.
#[derive(Debug, Default)]
pub struct ISODateTimeField {
    pub(super) options: FieldOptions,
}

field_options!(ISODateTimeField);

impl ISODateTimeField {
    pub fn new() -> Self {
        Self {
            options: FieldOptions::default(),
        }
    }
}

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Offset-less input is read as UTC.
pub(crate) fn parse_datetime(text: &str) -> Result<DateTime<FixedOffset>, String> {
    let text = text.trim();
    let err = match DateTime::parse_from_rfc3339(text) {
        Ok(d) => return Ok(d),
        Err(e) => e,
    };
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Ok(Utc.from_utc_datetime(&naive).fixed_offset());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive).fixed_offset());
        }
    }
    Err(err.to_string())
}

fn convert(v: &Json) -> Result<DateTime<FixedOffset>, ValidationError> {
    let parsed = match v {
        Json::String(s) => parse_datetime(s),
        other => Err(format!("unsupported value {}", other)),
    };
    parsed.map_err(|e| ValidationError::new(format!("Error converting datetime: {}", e)))
}

#[async_trait]
impl FieldKind for ISODateTimeField {
    fn type_name(&self) -> &'static str {
        "datetime"
    }

    async fn check(&self, opts: &FieldOptions, input: &Input<'_>) -> Result<Vec<ErrorDetail>, AppError> {
        if opts.is_nullable() && input.value.is_null() {
            return Ok(Vec::new());
        }
        Ok(convert(input.value).err().map(|e| e.description).into_iter().collect())
    }

    async fn to_python(&self, _opts: &FieldOptions, input: &Input<'_>) -> Result<Value, AppError> {
        if input.value.is_null() {
            return Ok(Value::Null);
        }
        Ok(Value::DateTime(convert(input.value)?))
    }

    fn to_data(&self, value: &Value, _ctx: &Context) -> Json {
        match value {
            Value::DateTime(d) => Json::String(d.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
            other => other.to_json(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializers::fields::Field;
    use serde_json::{json, Map};

    async fn errors(field: Field, value: Json) -> Vec<String> {
        let ctx = Context::default();
        let data = Map::new();
        field
            .validate(&Input::new("when", &value, &data, &ctx))
            .await
            .unwrap()
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[tokio::test]
    async fn date_messages() {
        assert_eq!(
            errors(DateField::new().into(), json!("2016/09/20")).await,
            vec!["\"2016/09/20\" does not appear to be in the format \"YYYY-MM-DD\"."]
        );
        assert_eq!(
            errors(DateField::new().into(), json!(20160920)).await,
            vec!["\"20160920\" is not a valid date."]
        );
        assert!(errors(DateField::new().into(), json!("2016-09-20")).await.is_empty());
    }

    #[test]
    fn lenient_datetime_parsing() {
        assert!(parse_datetime("2016-09-20T20:18:01.682945").is_ok());
        assert!(parse_datetime("2016-09-20T20:18:01+02:00").is_ok());
        assert!(parse_datetime("2016-09-20").is_ok());
        assert!(parse_datetime("yesterday").is_err());
    }

    #[tokio::test]
    async fn datetime_output_is_rfc3339() {
        let ctx = Context::default();
        let data = Map::new();
        let field: Field = ISODateTimeField::new().into();
        let v = json!("2016-09-20T20:18:01Z");
        let parsed = field.to_python(&Input::new("when", &v, &data, &ctx)).await.unwrap();
        assert_eq!(field.to_data(&parsed, &ctx), json!("2016-09-20T20:18:01+00:00"));
    }

    #[tokio::test]
    async fn datetime_error_prefix() {
        let errs = errors(ISODateTimeField::new().into(), json!("soon")).await;
        assert!(errs[0].starts_with("Error converting datetime: "));
    }
}

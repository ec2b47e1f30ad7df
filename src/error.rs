//! Typed errors and HTTP mapping.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Key used for errors that do not belong to a single field.
pub const NON_FIELD_ERRORS: &str = "non_field_errors";

/// Construction-time errors: bad models, serializers, settings or config files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} id '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: table {table_id} column {column}")]
    InvalidPrimaryKey { table_id: String, column: String },
    #[error("duplicate path segment: {0}")]
    DuplicatePathSegment(String),
    #[error("serializer {0} has no model; a model serializer must be given a model")]
    MissingModel(String),
    #[error("the field {field} requires a ModelSerializer")]
    RequiresModelSerializer { field: String },
    #[error("invalid pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("unknown column type: {0}")]
    UnknownColumnType(String),
    #[error("invalid cache engine: {0}")]
    InvalidCacheEngine(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// One validation detail: a message, a list of details, or a nested field map
/// (produced by nested serializers).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Message(String),
    List(Vec<ErrorDetail>),
    Map(BTreeMap<String, ErrorDetail>),
}

impl ErrorDetail {
    pub fn as_message(&self) -> Option<&str> {
        match self {
            ErrorDetail::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Detail list stored under `key` when this is a field map.
    pub fn field(&self, key: &str) -> Option<&[ErrorDetail]> {
        match self {
            ErrorDetail::Map(map) => match map.get(key) {
                Some(ErrorDetail::List(items)) => Some(items),
                Some(other) => Some(std::slice::from_ref(other)),
                None => None,
            },
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl From<&str> for ErrorDetail {
    fn from(s: &str) -> Self {
        ErrorDetail::Message(s.to_string())
    }
}

impl From<String> for ErrorDetail {
    fn from(s: String) -> Self {
        ErrorDetail::Message(s)
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDetail::Message(m) => f.write_str(m),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// Structured user-input failure: either a single message or a map of
/// field name (or [`NON_FIELD_ERRORS`]) to ordered details.
#[derive(Error, Clone, Debug, PartialEq)]
#[error("{description}")]
pub struct ValidationError {
    pub description: ErrorDetail,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        ValidationError {
            description: ErrorDetail::Message(message.into()),
        }
    }

    pub fn from_fields(fields: BTreeMap<String, Vec<ErrorDetail>>) -> Self {
        ValidationError {
            description: ErrorDetail::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, ErrorDetail::List(v)))
                    .collect(),
            ),
        }
    }

    pub fn non_field(message: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(NON_FIELD_ERRORS.to_string(), vec![ErrorDetail::Message(message.into())]);
        Self::from_fields(fields)
    }

    /// Details recorded for one field, in the order they were produced.
    pub fn field(&self, name: &str) -> Option<&[ErrorDetail]> {
        self.description.field(name)
    }

    /// Messages recorded for one field; nested details are skipped.
    pub fn messages(&self, name: &str) -> Vec<&str> {
        self.field(name)
            .unwrap_or(&[])
            .iter()
            .filter_map(ErrorDetail::as_message)
            .collect()
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("not found")]
    NotFound,
    #[error("not authorized")]
    Unauthorized {
        description: String,
        challenges: Vec<String>,
    },
    #[error("forbidden")]
    Forbidden,
    #[error("method not allowed")]
    MethodNotAllowed { allowed: Vec<&'static str> },
    #[error("{title}: {description}")]
    BadRequest { title: String, description: String },
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("persistence: {0}")]
    Persistence(String),
    #[error("cache: {0}")]
    Cache(String),
    #[error("cache is not initialized")]
    CacheNotInitialized,
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::Cache(e.to_string())
    }
}

impl AppError {
    pub fn bad_request(title: impl Into<String>, description: impl Into<String>) -> Self {
        AppError::BadRequest {
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
            AppError::Persistence(_)
            | AppError::Cache(_)
            | AppError::CacheNotInitialized
            | AppError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "Validation Error",
            AppError::NotFound => "Not Found",
            AppError::Unauthorized { .. } => "Not Authorized",
            AppError::Forbidden => "Forbidden",
            AppError::MethodNotAllowed { .. } => "Method Not Allowed",
            AppError::BadRequest { .. } => "Bad Request",
            _ => "Internal Server Error",
        }
    }

    /// Body placed under `description`; never exposes why a permission failed.
    fn description(&self) -> serde_json::Value {
        match self {
            AppError::Validation(e) => e.description.to_json(),
            AppError::Unauthorized { description, .. } => description.clone().into(),
            AppError::Forbidden => "You do not have permission to access this resource.".into(),
            AppError::BadRequest { description, .. } => description.clone().into(),
            AppError::NotFound => "The requested resource could not be found.".into(),
            AppError::MethodNotAllowed { .. } => "The method is not allowed for the requested resource.".into(),
            other => other.to_string().into(),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub title: String,
    pub description: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl ErrorBody {
    pub fn from_error(e: &AppError, debug: bool) -> Self {
        ErrorBody {
            title: match e {
                AppError::BadRequest { title, .. } => title.clone(),
                other => other.title().to_string(),
            },
            description: e.description(),
            traceback: debug.then(|| format!("{:#?}", e)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "request rejected");
        }
        let body = ErrorBody::from_error(&self, crate::conf::get().debug);
        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        match &self {
            AppError::Unauthorized { challenges, .. } if !challenges.is_empty() => {
                if let Ok(v) = HeaderValue::from_str(&challenges.join(", ")) {
                    headers.insert(header::WWW_AUTHENTICATE, v);
                }
            }
            AppError::MethodNotAllowed { allowed } => {
                if let Ok(v) = HeaderValue::from_str(&allowed.join(", ")) {
                    headers.insert(header::ALLOW, v);
                }
            }
            _ => {}
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_map_serializes_as_lists() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), vec!["Field is required.".into()]);
        let e = ValidationError::from_fields(fields);
        assert_eq!(
            e.description.to_json(),
            serde_json::json!({"name": ["Field is required."]})
        );
        assert_eq!(e.messages("name"), vec!["Field is required."]);
    }

    #[test]
    fn non_field_helper_uses_sentinel_key() {
        let e = ValidationError::non_field("Data passed is not a dictionary.");
        assert_eq!(e.messages(NON_FIELD_ERRORS), vec!["Data passed is not a dictionary."]);
    }

    #[test]
    fn forbidden_body_is_generic() {
        let body = ErrorBody::from_error(&AppError::Forbidden, false);
        assert_eq!(body.title, "Forbidden");
        assert_eq!(
            body.description,
            serde_json::json!("You do not have permission to access this resource.")
        );
        assert!(body.traceback.is_none());
    }

    #[test]
    fn traceback_only_in_debug() {
        let body = ErrorBody::from_error(&AppError::NotFound, true);
        assert!(body.traceback.is_some());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(AppError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Validation(ValidationError::new("x")).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::MethodNotAllowed { allowed: vec!["GET"] }.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}

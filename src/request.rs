//! Transport-neutral request and response used by view sets.

use crate::authentication::Principal;
use crate::error::AppError;
use crate::store::ListMeta;
use crate::value::Record;
use crate::viewsets::Action;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    pub path_params: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiRequest {
    pub fn new(method: Method) -> Self {
        ApiRequest {
            method,
            path_params: HashMap::new(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(v) = HeaderValue::from_str(value) {
            self.headers.insert(name, v);
        }
        self
    }

    pub fn with_json(mut self, body: &Json) -> Self {
        self.body = Bytes::from(body.to_string());
        self
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    /// First query-string value for `name`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Every value given for `name`; comma-separated values are split.
    pub fn params(&self, name: &str) -> Vec<String> {
        self.query
            .iter()
            .filter(|(k, _)| k == name)
            .flat_map(|(_, v)| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn param_as_int(&self, name: &str) -> Result<Option<i64>, AppError> {
        match self.param(name) {
            None | Some("") => Ok(None),
            Some(v) => v.trim().parse().map(Some).map_err(|_| {
                AppError::bad_request(
                    "Invalid parameter",
                    format!("The \"{}\" parameter is invalid. The value must be an integer.", name),
                )
            }),
        }
    }

    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Decoded request body; an empty body reads as `{}`.
    pub fn json_body(&self) -> Result<Json, AppError> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Json::Object(Map::new()));
        }
        serde_json::from_slice(&self.body).map_err(|e| AppError::bad_request("Malformed JSON", e.to_string()))
    }
}

/// What one view-set operation is doing, visible to permissions, hooks and
/// renderers.
#[derive(Clone, Debug)]
pub struct OperationContext {
    pub action: Action,
    pub principal: Option<Principal>,
    /// Object created by this request, once saved.
    pub object: Option<Record>,
    /// Pagination or total-count metadata of a list.
    pub meta: Option<ListMeta>,
    pub values: BTreeMap<String, Json>,
}

impl OperationContext {
    pub fn new(action: Action) -> Self {
        OperationContext {
            action,
            principal: None,
            object: None,
            meta: None,
            values: BTreeMap::new(),
        }
    }

    pub fn is_list(&self) -> bool {
        self.action == Action::List
    }
}

#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Option<Json>,
    pub headers: HeaderMap,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: Option<Json>) -> Self {
        ApiResponse {
            status,
            body,
            headers: HeaderMap::new(),
        }
    }

    pub fn ok(body: Json) -> Self {
        Self::new(StatusCode::OK, Some(body))
    }

    pub fn created(body: Json) -> Self {
        Self::new(StatusCode::CREATED, Some(body))
    }

    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT, None)
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            Some(body) => (self.status, axum::Json(body)).into_response(),
            None => self.status.into_response(),
        };
        response.headers_mut().extend(self.headers);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn repeated_and_comma_separated_params() {
        let req = ApiRequest::new(Method::GET)
            .with_query("names[]", "a,b")
            .with_query("names[]", "c")
            .with_query("page", "2");
        assert_eq!(req.params("names[]"), vec!["a", "b", "c"]);
        assert_eq!(req.param_as_int("page").unwrap(), Some(2));
        assert_eq!(req.param_as_int("per_page").unwrap(), None);
    }

    #[test]
    fn bad_int_param_is_400() {
        let req = ApiRequest::new(Method::GET).with_query("page", "two");
        let err = req.param_as_int("page").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn body_decoding() {
        let req = ApiRequest::new(Method::POST);
        assert_eq!(req.json_body().unwrap(), json!({}));
        let req = req.with_json(&json!({"a": 1}));
        assert_eq!(req.json_body().unwrap(), json!({"a": 1}));
        let mut bad = ApiRequest::new(Method::POST);
        bad.body = Bytes::from_static(b"{nope");
        assert_eq!(bad.json_body().unwrap_err().status(), StatusCode::BAD_REQUEST);
    }
}

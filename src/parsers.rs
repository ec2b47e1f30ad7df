//! Request-body transformations applied before validation.

use crate::case;
use crate::error::AppError;
use crate::request::{ApiRequest, OperationContext};
use serde_json::Value as Json;

pub trait Parser: Send + Sync {
    fn parse(&self, req: &ApiRequest, op: &OperationContext, data: Json) -> Result<Json, AppError>;
}

/// Accepts camelCase request keys as their snake_case field names.
#[derive(Clone, Copy, Debug, Default)]
pub struct SnakeCaseParser;

impl Parser for SnakeCaseParser {
    fn parse(&self, _req: &ApiRequest, _op: &OperationContext, data: Json) -> Result<Json, AppError> {
        Ok(case::keys_to_snake_case(data))
    }
}

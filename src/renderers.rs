//! Response-body transformations applied after an operation runs.

use crate::case;
use crate::request::{ApiRequest, OperationContext};
use serde_json::{json, Value as Json};

pub trait Renderer: Send + Sync {
    fn render(&self, req: &ApiRequest, op: &OperationContext, data: Json) -> Json;

    /// List-only renderers are applied to list responses alone.
    fn list_only(&self) -> bool {
        false
    }
}

/// Wraps a list as `{"meta": {...}, "results": [...]}`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ListMetaRenderer;

impl Renderer for ListMetaRenderer {
    fn render(&self, _req: &ApiRequest, op: &OperationContext, data: Json) -> Json {
        if !data.is_array() {
            return data;
        }
        let meta = op
            .meta
            .as_ref()
            .and_then(|m| serde_json::to_value(m).ok())
            .unwrap_or_else(|| json!({}));
        json!({"meta": meta, "results": data})
    }

    fn list_only(&self) -> bool {
        true
    }
}

/// Rewrites every object key to camelCase.
#[derive(Clone, Copy, Debug, Default)]
pub struct CamelCaseRenderer;

impl Renderer for CamelCaseRenderer {
    fn render(&self, _req: &ApiRequest, _op: &OperationContext, data: Json) -> Json {
        case::keys_to_camel_case(data)
    }
}

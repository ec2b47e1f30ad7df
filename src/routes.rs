//! axum routers: view-set mounts plus health and version.

use crate::error::AppError;
use crate::request::{ApiRequest, ApiResponse};
use crate::viewsets::{dispatch, ViewSet};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Largest accepted request body.
pub const BODY_LIMIT: usize = 2 * 1024 * 1024;

type SharedViewSet = Arc<dyn ViewSet>;

async fn collection(
    State(vs): State<SharedViewSet>,
    method: Method,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiResponse, AppError> {
    let req = ApiRequest {
        method,
        path_params: HashMap::new(),
        query,
        headers,
        body,
    };
    dispatch(vs.as_ref(), req).await
}

async fn item(
    State(vs): State<SharedViewSet>,
    method: Method,
    Path(path_params): Path<HashMap<String, String>>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiResponse, AppError> {
    let req = ApiRequest {
        method,
        path_params,
        query,
        headers,
        body,
    };
    dispatch(vs.as_ref(), req).await
}

/// `/` (list, create) and `/:<lookup>` (retrieve, update, destroy). Every
/// method reaches the view set so unsupported ones get 405 with `Allow`.
pub fn viewset_routes(vs: SharedViewSet) -> Router {
    let item_path = format!("/:{}", vs.lookup_param());
    Router::new()
        .route("/", any(collection))
        .route(&item_path, any(item))
        .with_state(vs)
}

/// Mounts each view set at its prefix, with request tracing and a body limit.
pub fn api_router<I, P>(viewsets: I) -> Router
where
    I: IntoIterator<Item = (P, SharedViewSet)>,
    P: AsRef<str>,
{
    let mut router = Router::new();
    for (prefix, vs) in viewsets {
        tracing::info!(prefix = prefix.as_ref(), viewset = vs.name(), "mounted view set");
        router = router.nest(prefix.as_ref(), viewset_routes(vs));
    }
    router
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /health, GET /version.
pub fn common_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
}

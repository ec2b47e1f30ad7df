//! Serval: declarative serializers and model view sets for REST APIs on axum
//! and PostgreSQL.

pub mod authentication;
pub mod cache;
pub mod case;
pub mod conf;
pub mod config;
pub mod error;
pub mod filters;
pub mod models;
pub mod parsers;
pub mod permissions;
pub mod renderers;
pub mod request;
pub mod routes;
pub mod serializers;
pub mod skel;
pub mod sql;
pub mod store;
pub mod value;
pub mod viewsets;

pub use config::{load_file, resolve, FullConfig, ResolvedEntity, ResolvedModel};
pub use error::{AppError, ConfigError, ErrorDetail, ValidationError, NON_FIELD_ERRORS};
pub use models::{Column, ColumnDefault, ColumnType, Model};
pub use request::{ApiRequest, ApiResponse, OperationContext};
pub use routes::{api_router, common_routes, viewset_routes};
pub use serializers::{Context, ModelSerializer, Serializer};
pub use store::{ensure_database_exists, MemoryStore, PgStore, Query, Store};
pub use value::{Record, Value};
pub use viewsets::{dispatch, Action, ModelViewSet, ViewSet};

//! Example server: a hand-declared `calendars` model served through a custom
//! view set (basic auth, per-user rows, camelCase wire keys) over an
//! in-memory store, or PostgreSQL when DATABASE_URL is set.
//!
//! ```bash
//! cargo run --example server
//! curl -u alice:secret localhost:3000/api/v1/calendars
//! ```

use async_trait::async_trait;
use axum::Router;
use serval::authentication::{Authenticator, BasicAuthentication, Principal};
use serval::filters::{ArchiveFlagFilter, Filter, SearchFilter};
use serval::models::{Column, ColumnDefault, ColumnType, Model};
use serval::parsers::{Parser, SnakeCaseParser};
use serval::permissions::{IsAuthenticated, Permission};
use serval::renderers::{CamelCaseRenderer, ListMetaRenderer, Renderer};
use serval::serializers::{EmailField, ModelSerializer, Serializer, StringField};
use serval::store::{MemoryStore, PgStore, Query, Store};
use serval::{api_router, common_routes, ensure_database_exists, ApiRequest, AppError, OperationContext, Record, ViewSet};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn calendar_model() -> Result<Arc<Model>, serval::ConfigError> {
    Model::builder("calendars")
        .column(Column::new("uuid", ColumnType::Uuid).primary_key().default(ColumnDefault::Uuid4))
        .column(Column::new("name", ColumnType::String { max_length: Some(80) }).not_null())
        .column(Column::new("owner", ColumnType::String { max_length: Some(80) }).not_null())
        .column(Column::new("contact_email", ColumnType::String { max_length: Some(120) }))
        .timestamps()
        .archivable()
        .build()
}

struct CalendarViewSet {
    model: Arc<Model>,
    store: Arc<dyn Store>,
    serializer: Arc<Serializer>,
    authenticators: Vec<Arc<dyn Authenticator>>,
    permissions: Vec<Arc<dyn Permission>>,
    filters: Vec<Arc<dyn Filter>>,
    renderers: Vec<Arc<dyn Renderer>>,
    parsers: Vec<Arc<dyn Parser>>,
}

impl CalendarViewSet {
    fn new(store: Arc<dyn Store>) -> Result<Self, serval::ConfigError> {
        let model = calendar_model()?;
        let serializer = ModelSerializer::builder("calendars")
            .model(model.clone())
            .field("name", StringField::new().min_length(1).max_length(80).required(true).source("name"))
            .field("contact_email", EmailField::new().required(false).source("contact_email"))
            .field("owner", StringField::new().read_only(true).source("owner"))
            .build()?;
        let verify = |user: &str, password: &str| (password == "secret").then(|| Principal::new(user));
        Ok(CalendarViewSet {
            model,
            store,
            serializer: Arc::new(serializer),
            authenticators: vec![Arc::new(BasicAuthentication::new(verify))],
            permissions: vec![Arc::new(IsAuthenticated)],
            filters: vec![Arc::new(ArchiveFlagFilter::new()), Arc::new(SearchFilter::new("name"))],
            renderers: vec![Arc::new(ListMetaRenderer), Arc::new(CamelCaseRenderer)],
            parsers: vec![Arc::new(SnakeCaseParser)],
        })
    }
}

#[async_trait]
impl ViewSet for CalendarViewSet {
    fn name(&self) -> &str {
        "calendars"
    }

    fn model(&self) -> &Arc<Model> {
        &self.model
    }

    fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    fn serializer(&self, _req: &ApiRequest, _op: &OperationContext) -> Result<Arc<Serializer>, AppError> {
        Ok(self.serializer.clone())
    }

    fn authenticators(&self) -> &[Arc<dyn Authenticator>] {
        &self.authenticators
    }

    fn permissions(&self) -> &[Arc<dyn Permission>] {
        &self.permissions
    }

    fn filters(&self) -> &[Arc<dyn Filter>] {
        &self.filters
    }

    fn renderers(&self) -> &[Arc<dyn Renderer>] {
        &self.renderers
    }

    fn parsers(&self) -> &[Arc<dyn Parser>] {
        &self.parsers
    }

    fn pagination(&self) -> Option<(u64, u64)> {
        Some((20, 100))
    }

    /// Callers only see their own calendars.
    async fn get_qs(&self, _req: &ApiRequest, op: &OperationContext) -> Result<Query, AppError> {
        let owner = op.principal.as_ref().map(|p| p.id.clone()).unwrap_or_default();
        Ok(Query::new(self.model.clone()).eq("owner", owner))
    }

    async fn create_pre_save(&self, _req: &ApiRequest, op: &OperationContext, obj: &mut Record) -> Result<(), AppError> {
        if let Some(principal) = &op.principal {
            obj.set("owner", principal.id.clone());
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("serval=info")))
        .init();

    let store: Arc<dyn Store> = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            ensure_database_exists(&database_url).await?;
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(&database_url)
                .await?;
            let store = PgStore::new(pool);
            store.sync_models(&[calendar_model()?]).await?;
            Arc::new(store)
        }
        Err(_) => Arc::new(MemoryStore::new()),
    };

    let calendars: Arc<dyn ViewSet> = Arc::new(CalendarViewSet::new(store)?);
    let app = Router::new()
        .merge(common_routes())
        .nest("/api/v1", api_router([("/calendars", calendars)]));

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

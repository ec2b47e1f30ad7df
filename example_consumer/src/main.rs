//! Example consumer: a separate Rust project that uses serval as a dependency.
//!
//! Run from repo root: `cargo run -p example-consumer -- demos/models.json`
//! Or from this directory: `cargo run -- ../demos/models.json`

use serval::store::{MemoryStore, Store};
use serval::{api_router, common_routes, load_file, resolve};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("serval=info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("demos/models.json"));
    let model = resolve(&load_file(&path)?)?;
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    let app = axum::Router::new()
        .merge(common_routes())
        .nest("/api", api_router(model.viewsets(store)?));
    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    let port = listener.local_addr()?.port();
    tracing::info!("Example consumer listening on http://127.0.0.1:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

//! Project management commands.
//!
//! ```bash
//! manage --settings settings.json check
//! manage syncdb
//! manage runserver --bind 0.0.0.0:8080
//! manage startmodule calendars
//! ```

use anyhow::{bail, Context as _};
use axum::Router;
use clap::{Parser, Subcommand};
use serval::conf::{self, Settings};
use serval::store::{MemoryStore, PgStore, Store};
use serval::viewsets::ViewSet;
use serval::{api_router, cache, common_routes, ensure_database_exists, ResolvedModel};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "manage")]
#[command(about = "Serval project management", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (JSON); the environment overrides its values
    #[arg(short, long, env = "SERVAL_SETTINGS", global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve every configured api entity
    Runserver {
        /// Address to listen on (defaults to the `bind` setting)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,

        /// Keep rows in process memory instead of PostgreSQL
        #[arg(long)]
        memory: bool,
    },

    /// Create the configured tables when missing
    Syncdb,

    /// Load and validate settings and the model document, then print a summary
    Check,

    /// Write a new module skeleton
    Startmodule {
        /// Module name
        #[arg(value_name = "NAME")]
        name: String,

        /// Directory to create the module in
        #[arg(long, default_value = "src", value_name = "DIRECTORY")]
        directory: PathBuf,
    },
}

fn load_models(settings: &Settings) -> anyhow::Result<ResolvedModel> {
    let Some(path) = settings.models_path.as_deref() else {
        bail!("no model document configured: set models_path or {}", conf::ENV_MODELS);
    };
    let config = serval::load_file(path)?;
    Ok(serval::resolve(&config)?)
}

async fn pg_store(settings: &Settings) -> anyhow::Result<PgStore> {
    ensure_database_exists(&settings.database_url).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await
        .with_context(|| "connecting to the database")?;
    Ok(PgStore::new(pool))
}

async fn runserver(settings: &Settings, bind: Option<String>, memory: bool) -> anyhow::Result<()> {
    let resolved = load_models(settings)?;
    let store: Arc<dyn Store> = if memory {
        tracing::warn!("using the in-memory store; rows are lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(pg_store(settings).await?)
    };

    let mut viewsets: Vec<(String, Arc<dyn ViewSet>)> = Vec::new();
    for entity in &resolved.entities {
        let mut entity = entity.clone();
        if entity.pagination.is_none() {
            entity.pagination = settings.page_size.map(|(d, m)| (u64::from(d), u64::from(m)));
        }
        let vs: Arc<dyn ViewSet> = Arc::new(entity.viewset(store.clone())?);
        viewsets.push((format!("/{}", entity.path_segment), vs));
    }

    let app = Router::new().merge(common_routes()).merge(api_router(viewsets));
    let addr = bind.unwrap_or_else(|| settings.bind.clone());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn syncdb(settings: &Settings) -> anyhow::Result<()> {
    let resolved = load_models(settings)?;
    let store = pg_store(settings).await?;
    store.sync_models(&resolved.models).await?;
    println!("{} table(s) synchronized", resolved.models.len());
    Ok(())
}

fn check(settings: &Settings) -> anyhow::Result<()> {
    let resolved = load_models(settings)?;
    println!("debug: {}", settings.debug);
    println!(
        "cache: {}",
        settings.cache.as_ref().map(|c| c.engine.as_str()).unwrap_or("none")
    );
    for model in &resolved.models {
        println!("table {} ({} columns)", model.name(), model.columns().len());
    }
    for entity in &resolved.entities {
        entity.serializer()?;
        let actions: Vec<&str> = entity.actions.iter().map(|a| a.as_str()).collect();
        println!("/{} -> {} [{}]", entity.path_segment, entity.model.name(), actions.join(", "));
    }
    println!("ok");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("serval=info")))
        .init();

    let settings = Settings::load(cli.settings.as_deref())?;
    conf::init(settings.clone());
    if let Some(cache_config) = &settings.cache {
        cache::init(cache_config)?;
    }

    match cli.command {
        Commands::Runserver { bind, memory } => runserver(&settings, bind, memory).await,
        Commands::Syncdb => syncdb(&settings).await,
        Commands::Check => check(&settings),
        Commands::Startmodule { name, directory } => {
            let written = serval::skel::write_module(&directory, &name)?;
            for path in &written {
                println!("created {}", path.display());
            }
            Ok(())
        }
    }
}

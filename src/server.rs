/// Server setup and initialization
///
/// Wires together the definition store, cache, version controller, editor,
/// sub-workflow coordinator, and run registry into a complete axum
/// application.

use crate::{
    api::{definitions::create_definition_routes, runs::create_run_routes, AppState},
    config::Config,
    registry::ActiveWorkflowRegistry,
    workflow::{
        DefinitionCache, DefinitionStore, GraphEditor, SubWorkflowCoordinator, VersionController,
    },
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Open (creating if missing) the workflow database under the data directory.
pub async fn open_database(config: &Config) -> Result<SqlitePool> {
    std::fs::create_dir_all(&config.database.data_dir).map_err(|e| {
        anyhow::anyhow!(
            "Failed to create data directory '{}': {}",
            config.database.data_dir,
            e
        )
    })?;
    let db_path = Path::new(&config.database.data_dir).join("storyloom.db");

    tracing::info!("Opening workflow database: {}", db_path.display());
    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// Create the main axum application with all routes.
pub async fn create_app(config: Config) -> Result<Router> {
    let pool = open_database(&config).await?;

    tracing::info!("Initializing storage schemas");
    let store = DefinitionStore::new(pool.clone());
    let versions = VersionController::new(pool.clone());
    let subworkflows = SubWorkflowCoordinator::new(pool.clone());
    store.init_schema().await?;
    versions.init_schema().await?;
    subworkflows.init_schema().await?;

    tracing::info!("Loading definition cache");
    let cache = Arc::new(DefinitionCache::new(store.clone()));
    cache.init_from_store().await?;

    let registry = ActiveWorkflowRegistry::new(pool.clone(), Arc::clone(&cache));
    registry.init_schema().await?;

    let editor = GraphEditor::new(
        store.clone(),
        versions.clone(),
        Arc::clone(&cache),
        config.enforce_version_locks,
    );

    let app_state = AppState {
        store,
        cache,
        versions,
        editor,
        subworkflows,
        registry,
    };

    tracing::info!("Creating HTTP router");
    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_definition_routes())
        .merge(create_run_routes())
        .with_state(app_state);

    tracing::info!("Application initialized");
    Ok(app)
}

/// Start the HTTP server with the given configuration.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Storyloom workflow core...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}

//! Local LLM chat server
//!
//! (c) Softlandia 2025

use lemtosh_llm_server::api;
use lemtosh_llm_server::config::{Settings, StatusBackend};
use lemtosh_llm_server::core::inference::{InferenceConfig, InferenceService};
use lemtosh_llm_server::core::services::DbChatService;
use lemtosh_llm_server::core::status::StatusStore;
use lemtosh_llm_server::infrastructure::database::DatabaseConnection;
use lemtosh_llm_server::infrastructure::repositories::DbChatRepository;
use lemtosh_llm_server::infrastructure::status_store::{FileStatusStore, SqliteStatusStore};
use lemtosh_llm_server::infrastructure::wgml_backend::WgmlBackend;

use anyhow::Context;
use axum::Extension;
use axum::http::{HeaderValue, Method};
use di::{Injectable, ServiceCollection};
use di_axum::RouterServiceProviderExtensions;
use log::info;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env()?;
    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;

    runtime.block_on(serve(settings))
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await
        .with_context(|| format!("cannot open database {}", settings.database_url))?;
    sqlx::migrate!().run(&pool).await?;
    DatabaseConnection::set_shared_pool(pool.clone());

    let status: Arc<dyn StatusStore> = match settings.status_backend {
        StatusBackend::File => Arc::new(FileStatusStore::open(&settings.status_dir).await?),
        StatusBackend::Sqlite => Arc::new(SqliteStatusStore::new(pool.clone())),
    };

    let inference = Arc::new(InferenceService::new(
        InferenceConfig::from(&settings),
        Arc::new(WgmlBackend),
        status,
    ));

    info!(
        "Environment {:?}: {} of {} configured models advertised",
        settings.environment,
        inference.available_models().len(),
        settings.catalog.len()
    );

    // Loads run in the background; the server accepts requests meanwhile.
    inference.start(settings.default_model.as_deref()).await?;

    let provider = ServiceCollection::new()
        .add(DatabaseConnection::singleton())
        .add(DbChatRepository::scoped())
        .add(DbChatService::scoped())
        .build_provider()
        .map_err(|e| anyhow::anyhow!("invalid service configuration: {e:?}"))?;

    let app = api::router()
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_headers(Any)
                        .allow_methods([Method::GET, Method::POST])
                        .allow_origin([
                            HeaderValue::from_static("http://localhost:3000"),
                            HeaderValue::from_static("http://localhost:5173"),
                        ]),
                )
                .layer(Extension(inference)),
        )
        .with_provider(provider);

    let listener = tokio::net::TcpListener::bind((settings.host.as_str(), settings.port)).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    info!("Shutting down...");

    Ok(())
}

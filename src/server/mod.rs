//! HTTP surface over the job orchestrator.

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod error;
pub mod routes;

use crate::config::Config;
use crate::jobs::JobRegistry;
use crate::progress::ProgressChannel;
use crate::transcribe::{JobOrchestrator, TranscriptionPipeline};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<JobOrchestrator>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the production pipeline and a registry persisted under the data dir
    pub fn from_config(config: Config) -> Result<Self> {
        config.ensure_dirs().context("Failed to create data directories")?;

        let registry = JobRegistry::open(config.jobs_dir()).context("Failed to load job records")?;
        let orchestrator = JobOrchestrator::new(
            Arc::new(TranscriptionPipeline::new(&config)),
            Arc::new(registry),
            Arc::new(ProgressChannel::new(config.poll_interval())),
            config.server.max_concurrent_jobs,
        );

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            config: Arc::new(config),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let transcription_routes = Router::new()
        .route("/", get(routes::list).post(routes::create))
        .route("/{id}", get(routes::get).delete(routes::delete))
        .route("/{id}/events", get(routes::events))
        .route("/{id}/download", get(routes::download))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes()));

    Router::new()
        .nest("/api/transcriptions", transcription_routes)
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the server until ctrl-c
pub async fn serve(config: Config) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::from_config(config)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

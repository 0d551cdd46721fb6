use crate::config::Config;
use crate::pipeline::MediaPipeline;
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use mediaforge_av::ToolRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod error;
pub mod routes_jobs;

/// Slack on top of the upload limit for multipart framing and parameter fields.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub pipeline: Arc<MediaPipeline>,
    /// Discovered external tools, reported by `/tools`
    pub tools: Arc<ToolRegistry>,
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    let body_limit = usize::try_from(ctx.config.storage.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/tools", get(get_tools))
        .merge(routes_jobs::job_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check(State(ctx): State<AppContext>) -> impl IntoResponse {
    let stats = ctx.pipeline.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "jobs": stats.jobs,
    }))
}

async fn stats(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.pipeline.stats())
}

async fn get_tools(State(ctx): State<AppContext>) -> impl IntoResponse {
    let tools = Arc::clone(&ctx.tools);
    match tokio::task::spawn_blocking(move || tools.check_all()).await {
        Ok(infos) => Json(infos).into_response(),
        Err(e) => error::AppError::new(mediaforge_common::Error::Internal(format!(
            "tool check failed: {e}"
        )))
        .into_response(),
    }
}

/// Start the HTTP server and the job pipeline behind it.
pub async fn start_server(config: Config, pipeline: Arc<MediaPipeline>, tools: ToolRegistry) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    pipeline
        .start()
        .await
        .context("Failed to start media pipeline")?;

    let ctx = AppContext {
        config: Arc::new(config),
        pipeline: Arc::clone(&pipeline),
        tools: Arc::new(tools),
    };
    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pipeline.shutdown();
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use novelpress::app::coordinator::QueueCoordinator;
use novelpress::app::model::{JobId, JobStatus};
use novelpress::app::worker::Worker;
use novelpress::app::build_engine;
use novelpress::config::AppConfig;
use novelpress::error::IngestError;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Also run an in-process worker loop next to the HTTP surface.
    #[arg(long)]
    worker: bool,
}

#[derive(Clone)]
struct AppState {
    coordinator: Arc<QueueCoordinator>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    novelpress::logging::init()?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting novelpress-app");

    let config = AppConfig::from_env()?;
    let engine = build_engine(config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = if args.worker {
        let worker = Worker::new(
            engine.queue.clone(),
            engine.job_store.clone(),
            engine.executor.clone(),
            engine.config.job_timeout,
            engine.config.dequeue_wait,
        );
        Some(tokio::spawn(async move { worker.run(shutdown_rx).await }))
    } else {
        None
    };

    let state = AppState {
        coordinator: Arc::clone(&engine.coordinator),
    };
    let router = Router::new()
        .route("/ingest", post(ingest))
        .route("/jobs/:job_id", get(job_status))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker_handle {
        let _ = handle.await;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    url: String,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    job_id: JobId,
    status: JobStatus,
    message: String,
}

async fn ingest(State(state): State<AppState>, Json(request): Json<IngestRequest>) -> Response {
    match state.coordinator.create_job(&request.url).await {
        Ok(job) => (
            StatusCode::ACCEPTED,
            Json(IngestResponse {
                job_id: job.id,
                status: job.status,
                message: "ingestion job created and queued".to_string(),
            }),
        )
            .into_response(),
        Err(err @ (IngestError::UnsupportedSource { .. } | IngestError::InvalidUrl { .. })) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
        Err(err) => {
            tracing::error!(?err, "create job failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
                .into_response()
        }
    }
}

async fn job_status(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.coordinator.job_status(&JobId::from(job_id.as_str())).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "job not found" })),
        )
            .into_response(),
        Err(err) => {
            tracing::error!(?err, "load job failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
                .into_response()
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "service": "novelpress" }))
}

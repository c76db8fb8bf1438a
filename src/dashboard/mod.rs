use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::scheduler::{GlobalLoad, WorkerRegistry, WorkerSnapshot};

#[derive(Clone)]
pub struct DashboardState {
    pub registry: Arc<WorkerRegistry>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct LoadResponse {
    active_tasks: u64,
    total_capacity: u64,
    utilization: f64,
    worker_count: usize,
}

#[derive(Serialize)]
struct WorkerResponse {
    id: String,
    hostname: String,
    max_concurrency: u32,
    active_task_count: u32,
    has_capacity: bool,
    spare_capacity: u32,
    registered_at_ms: i64,
    last_status_at_ms: i64,
}

impl From<WorkerSnapshot> for WorkerResponse {
    fn from(w: WorkerSnapshot) -> Self {
        Self {
            has_capacity: w.has_capacity(),
            spare_capacity: w.spare_capacity(),
            registered_at_ms: w.registered_at.timestamp_millis(),
            last_status_at_ms: w.last_status_at.timestamp_millis(),
            id: w.id,
            hostname: w.hostname,
            max_concurrency: w.max_concurrency,
            active_task_count: w.active_task_count,
        }
    }
}

/// Read-only HTTP routes over the worker registry.
pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/load", get(load_handler))
        .route("/api/workers", get(workers_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn load_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let snapshot = state.registry.snapshot();
    let load = GlobalLoad::from_snapshots(&snapshot);

    Json(LoadResponse {
        active_tasks: load.active_tasks,
        total_capacity: load.total_capacity,
        utilization: load.utilization(),
        worker_count: snapshot.len(),
    })
}

async fn workers_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let workers: Vec<WorkerResponse> = state
        .registry
        .snapshot()
        .into_iter()
        .map(WorkerResponse::from)
        .collect();

    Json(workers)
}

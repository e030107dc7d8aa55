//! Agent API
//!
//! The control surface the manager calls inside each runner container:
//! - `GET /status`: disk status and liveness of the runner process
//! - `POST /start`: launch `run.sh` unless already running or launching
//! - `POST /stop`: SIGTERM the recorded PID
//! - `GET /health`: liveness of the agent itself
//!
//! Failures answer `500` with plain diagnostic text.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use fleet_core::dto::agent::{AgentMessage, AgentStatus};
use fleet_core::process::ProcessController;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AgentState {
    pub install_dir: Arc<PathBuf>,
    pub process: ProcessController,

    /// PID of the last script this agent launched; held across check and
    /// launch so overlapping starts see each other before the PID file exists
    launched: Arc<Mutex<Option<u32>>>,
}

impl AgentState {
    pub fn new(install_dir: PathBuf, process: ProcessController) -> Self {
        Self {
            install_dir: Arc::new(install_dir),
            process,
            launched: Arc::new(Mutex::new(None)),
        }
    }
}

/// Create the agent router
pub fn create_router(state: AgentState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// GET /status
async fn status(State(state): State<AgentState>) -> Json<AgentStatus> {
    let (status, running) = state.process.status(&state.install_dir);
    Json(AgentStatus::new(status, running))
}

/// POST /start
async fn start(State(state): State<AgentState>) -> Response {
    let mut launched = state.launched.lock().await;

    let (_, running) = state.process.status(&state.install_dir);
    let launching = (*launched).is_some_and(|pid| state.process.is_alive(pid));
    if running || launching {
        return Json(AgentMessage::new("already running")).into_response();
    }

    match state.process.start(&state.install_dir) {
        Ok(pid) => {
            *launched = pid;
            info!("Runner started");
            Json(AgentMessage::new("started")).into_response()
        }
        Err(e) => {
            warn!("Failed to start runner: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// POST /stop
async fn stop(State(state): State<AgentState>) -> Response {
    match state.process.stop(&state.install_dir) {
        Ok(()) => {
            info!("Stop signal sent to runner");
            Json(AgentMessage::new("stop signal sent")).into_response()
        }
        Err(e) => {
            warn!("Failed to stop runner: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// GET /health
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

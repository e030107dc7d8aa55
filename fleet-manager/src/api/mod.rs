//! API Module
//!
//! HTTP API layer for the manager. A thin consumer of the lifecycle
//! engine: handlers load the inventory, call the supervisor and shape
//! the answer.

pub mod error;
pub mod health;
pub mod runner;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::ConfigStore;
use crate::scheduler::RegistrationQueue;
use crate::service::Supervisor;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub supervisor: Arc<Supervisor>,
    pub queue: RegistrationQueue,
    pub version: String,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/version", get(health::version))
        // Runner endpoints
        .route(
            "/api/runners",
            get(runner::list_runners).post(runner::add_runner),
        )
        .route(
            "/api/runners/{name}",
            get(runner::get_runner)
                .put(runner::update_runner)
                .delete(runner::remove_runner),
        )
        .route("/api/runners/{name}/start", post(runner::start_runner))
        .route("/api/runners/{name}/stop", post(runner::stop_runner))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

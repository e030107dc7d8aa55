//! Runner Fleet Agent
//!
//! Runs inside every runner container and controls the runner process on
//! behalf of the manager. It only reads the install directory and signals
//! the process recorded there; all lifecycle decisions stay with the manager.
//!
//! Environment:
//! - `RUNNER_INSTALL_DIR`: install directory (default `/runner`)
//! - `AGENT_PORT`: listen port (default `8081`)

mod api;

use anyhow::{Context, Result};
use fleet_core::process::{ProcessController, default_liveness};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::{AgentState, create_router};

const DEFAULT_INSTALL_DIR: &str = "/runner";
const DEFAULT_PORT: u16 = 8081;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet_agent=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let install_dir = std::env::var("RUNNER_INSTALL_DIR")
        .ok()
        .filter(|d| !d.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_INSTALL_DIR));
    let port = match std::env::var("AGENT_PORT") {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u16>()
            .with_context(|| format!("Invalid AGENT_PORT {:?}", value))?,
        _ => DEFAULT_PORT,
    };

    let app = create_router(AgentState::new(
        install_dir.clone(),
        ProcessController::new(default_liveness()),
    ));

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(
        "Agent listening on {}, RUNNER_INSTALL_DIR={}",
        addr,
        install_dir.display()
    );

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

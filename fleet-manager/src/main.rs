//! Runner Fleet Manager
//!
//! Keeps a fleet of self-hosted GitHub Actions runners alive, either as bare
//! processes or as one container per runner.
//!
//! Architecture:
//! - Configuration: YAML inventory plus environment overrides
//! - Runtime: container CLI wrapper behind a trait
//! - Services: status prober, container controller, supervisor
//! - Scheduler: registration worker and reconciliation loops
//! - API: HTTP endpoints over the supervisor and the inventory

mod api;
mod config;
mod github;
mod runtime;
mod scheduler;
mod service;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use fleet_client::AgentClient;
use fleet_core::process::{ProcessController, default_liveness};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::{AppState, create_router};
use crate::config::{ConfigStore, process_env};
use crate::github::GitHubChecker;
use crate::runtime::{ContainerRuntime, DockerCli};
use crate::scheduler::registration::DEFAULT_QUEUE_CAPACITY;
use crate::scheduler::{
    ReconcileSettings, Reconciler, RunnerStarter, ScriptSettings, registration_channel,
};
use crate::service::{ContainerController, ContainerSettings, StatusProber, Supervisor};

#[derive(Parser)]
#[command(name = "fleet-manager")]
#[command(about = "Self-hosted runner fleet manager", version, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, env = "FLEET_CONFIG", default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet_manager=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Runner Fleet Manager");

    // Load configuration
    let env = process_env();
    let store = Arc::new(ConfigStore::new(cli.config.clone(), env.clone()));
    let config = store
        .load()
        .await
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    info!(
        "Loaded configuration: {} runner(s), base_path={}, container_mode={}",
        config.runners.items.len(),
        config.runners.base_path,
        config.runners.container_mode
    );

    // Initialize lifecycle components
    let mut docker = DockerCli::new(env("DOCKER_HOST"));
    if let Some(program) = env("CONTAINER_CLI").filter(|p| !p.trim().is_empty()) {
        info!("Using container CLI {}", program);
        docker = docker.with_program(program.trim());
    }
    let docker = Arc::new(docker);
    if config.runners.container_mode && docker.endpoint_is_remote() {
        warn!(
            "Container mode is on but DOCKER_HOST points at a TCP endpoint; the manager needs the host Docker socket to manage runner containers. Unset DOCKER_HOST and mount /var/run/docker.sock"
        );
    }

    let agent = Arc::new(AgentClient::new());
    let process = ProcessController::new(default_liveness());
    let prober = StatusProber::new(
        docker.clone(),
        agent.clone(),
        process.clone(),
        config.runners.agent_port,
        config.runners.container_mode,
    );
    let containers = ContainerController::new(
        docker,
        agent,
        ContainerSettings::from_config(&config.runners),
    );
    if config.runners.container_mode {
        let settings = containers.settings();
        info!(
            "Container mode: image={}, network={}, job docker backend={}",
            settings.image,
            settings.network,
            settings.backend.as_str()
        );
    }
    let supervisor = Arc::new(Supervisor::new(
        config.runners.container_mode,
        prober,
        containers,
        process,
    ));

    info!("Services initialized");

    // Start background workers
    let (queue, worker) = registration_channel(DEFAULT_QUEUE_CAPACITY);
    let starter: Arc<dyn RunnerStarter> = supervisor.clone();
    let worker_handle = tokio::spawn(
        worker.run(ScriptSettings::new(&config.runners.install_script), starter),
    );

    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        supervisor.clone(),
        GitHubChecker::new(),
        ReconcileSettings::default(),
    ));
    let startup_sweep = tokio::spawn(reconciler.clone().run_startup());
    let periodic = tokio::spawn(reconciler.run_periodic());

    // Build router with all API endpoints
    let app = create_router(AppState {
        store,
        supervisor,
        queue,
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let host = if config.server.addr.trim().is_empty() {
        "0.0.0.0"
    } else {
        config.server.addr.trim()
    };
    let addr = format!("{}:{}", host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // The router owned the last queue handle; the worker drains and exits
    startup_sweep.abort();
    periodic.abort();
    if let Err(e) = worker_handle.await {
        error!("Registration worker panicked: {}", e);
    }

    served.context("Server error")?;
    info!("Stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
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

    info!("Shutting down");
}

//! Container-mode lifecycle
//!
//! Each runner lives in its own container with the install directory mounted
//! at `/runner` and a control agent listening inside. Starting is idempotent:
//! - running container: nudge the agent, succeed regardless
//! - stopped container: start it, recreating it if its network is gone
//! - no container: create, start, wait for the agent, then ask it to start

use fleet_client::Agent;
use fleet_core::domain::runner::{RunnerIdentity, agent_endpoint, container_name};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{JobDockerBackend, RunnersConfig};
use crate::runtime::{ContainerRuntime, ContainerSpec, RuntimeError};
use crate::service::ControlError;

/// Mount point of the install directory inside a runner container
pub const RUNNER_MOUNT: &str = "/runner";

/// Host runtime socket, mounted by the `host-socket` backend
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Port of the shared Docker-in-Docker service
pub const DIND_PORT: u16 = 2375;

/// Settings for creating and driving runner containers
#[derive(Debug, Clone)]
pub struct ContainerSettings {
    pub image: String,
    pub network: String,
    pub agent_port: u16,
    pub backend: JobDockerBackend,
    pub dind_host: String,
    pub base_path: PathBuf,

    /// Host-side view of `base_path` when the manager runs in a container
    pub volume_host_path: Option<PathBuf>,

    /// Wait between creating a container and calling its agent
    pub create_settle: Duration,

    /// Wait between restarting a stopped container and calling its agent
    pub restart_settle: Duration,

    /// Grace period handed to the runtime's stop
    pub stop_grace: Duration,
}

impl ContainerSettings {
    pub fn from_config(runners: &RunnersConfig) -> Self {
        let volume_host_path = runners.volume_host_path.trim();
        Self {
            image: runners.container_image.clone(),
            network: runners.container_network.clone(),
            agent_port: runners.agent_port,
            backend: runners.backend(),
            dind_host: runners.dind_host.clone(),
            base_path: PathBuf::from(&runners.base_path),
            volume_host_path: (!volume_host_path.is_empty()).then(|| PathBuf::from(volume_host_path)),
            create_settle: Duration::from_secs(3),
            restart_settle: Duration::from_secs(2),
            stop_grace: Duration::from_secs(30),
        }
    }

    /// Host path to bind-mount as the runner's install directory
    pub fn mount_source(&self, install_dir: &Path) -> PathBuf {
        match &self.volume_host_path {
            Some(host_base) => {
                // Compare absolute forms so a relative base path still matches
                let install_abs = absolute_or_self(install_dir);
                let base_abs = absolute_or_self(&self.base_path);
                let relative = match install_abs.strip_prefix(&base_abs) {
                    Ok(relative) => relative.to_path_buf(),
                    Err(_) => {
                        let fallback = install_dir
                            .file_name()
                            .map(PathBuf::from)
                            .unwrap_or_default();
                        warn!(
                            "Install dir {} is outside base path {}; mounting {} from the host volume",
                            install_abs.display(),
                            base_abs.display(),
                            fallback.display()
                        );
                        fallback
                    }
                };
                host_base.join(relative)
            }
            None => absolute_or_self(install_dir),
        }
    }

    /// Container definition for a runner
    pub fn container_spec(&self, runner: &RunnerIdentity) -> ContainerSpec {
        let mut mounts = vec![(
            self.mount_source(&runner.install_dir).to_string_lossy().to_string(),
            RUNNER_MOUNT.to_string(),
        )];
        let mut env = Vec::new();

        match self.backend {
            JobDockerBackend::Dind => env.push((
                "DOCKER_HOST".to_string(),
                format!("tcp://{}:{}", self.dind_host, DIND_PORT),
            )),
            JobDockerBackend::HostSocket => {
                mounts.push((DOCKER_SOCKET.to_string(), DOCKER_SOCKET.to_string()))
            }
            JobDockerBackend::None => {}
        }

        ContainerSpec {
            name: runner.container_name(),
            image: self.image.clone(),
            network: self.network.clone(),
            mounts,
            env,
        }
    }
}

fn absolute_or_self(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Drives runner containers through the runtime and their agents
pub struct ContainerController {
    runtime: Arc<dyn ContainerRuntime>,
    agent: Arc<dyn Agent>,
    settings: ContainerSettings,
}

impl ContainerController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        agent: Arc<dyn Agent>,
        settings: ContainerSettings,
    ) -> Self {
        Self {
            runtime,
            agent,
            settings,
        }
    }

    pub fn settings(&self) -> &ContainerSettings {
        &self.settings
    }

    /// Starts the runner's container, creating it when needed
    pub async fn start_or_create(&self, runner: &RunnerIdentity) -> Result<(), ControlError> {
        if self.runtime.endpoint_is_remote() {
            return Err(ControlError::Config(
                "container mode needs direct socket access to the Docker daemon, but DOCKER_HOST points at a TCP endpoint; mount /var/run/docker.sock and unset DOCKER_HOST".to_string(),
            ));
        }

        let cn = runner.container_name();
        let endpoint = agent_endpoint(&cn, self.settings.agent_port);

        if self.runtime.is_running(&cn).await? {
            debug!("Container {} already running, nudging agent", cn);
            if let Err(e) = self.agent.start(&endpoint).await {
                warn!("Agent start on running container {} failed: {}", cn, e);
            }
            return Ok(());
        }

        if self.runtime.exists(&cn).await? {
            match self.runtime.start(&cn).await {
                Ok(()) => {
                    info!("Restarted stopped container {}", cn);
                    tokio::time::sleep(self.settings.restart_settle).await;
                    self.agent.start(&endpoint).await?;
                    return Ok(());
                }
                Err(e) if e.is_network_missing() => {
                    warn!("Container {} lost its network, recreating: {}", cn, e);
                    self.force_remove(&cn).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.create_and_start(runner, &cn, &endpoint).await
    }

    async fn create_and_start(
        &self,
        runner: &RunnerIdentity,
        cn: &str,
        endpoint: &str,
    ) -> Result<(), ControlError> {
        let spec = self.settings.container_spec(runner);
        info!(
            "Creating container {} for runner {} (image {}, backend {})",
            cn,
            runner.name,
            spec.image,
            self.settings.backend.as_str()
        );

        self.runtime.create(&spec).await?;
        self.runtime.start(cn).await?;

        tokio::time::sleep(self.settings.create_settle).await;
        self.agent.start(endpoint).await?;
        Ok(())
    }

    async fn force_remove(&self, cn: &str) -> Result<(), ControlError> {
        match self.runtime.remove(cn).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stops the runner's container; an absent container counts as stopped
    pub async fn stop(&self, runner_name: &str) -> Result<(), ControlError> {
        let cn = container_name(runner_name);
        match self.runtime.stop(&cn, self.settings.stop_grace).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Container {} not found, nothing to stop", cn);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stops and deletes the runner's container; an absent container counts
    /// as removed
    pub async fn remove(&self, runner_name: &str) -> Result<(), ControlError> {
        let cn = container_name(runner_name);
        if let Err(e) = self.runtime.stop(&cn, self.settings.stop_grace).await {
            if !matches!(e, RuntimeError::NotFound(_)) {
                debug!("Stop before remove of {} failed: {}", cn, e);
            }
        }
        self.force_remove(&cn).await
    }
}

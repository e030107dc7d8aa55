//! Runner supervisor
//!
//! Single entry point for lifecycle operations. It picks the process or
//! container path for the configured mode, bounds every operation with a
//! deadline, and serializes operations on the same runner so a probe never
//! observes a half-finished start and two sweeps never double-start.

use async_trait::async_trait;
use fleet_core::domain::probe::ProbeError;
use fleet_core::domain::runner::{Probe, RunnerIdentity, Status};
use fleet_core::process::ProcessController;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::scheduler::RunnerStarter;
use crate::service::{ContainerController, ControlError, StatusProber};

/// Deadline for a start, including container creation and agent readiness
pub const START_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for a container stop or remove; covers the 30s grace period
pub const STOP_TIMEOUT: Duration = Duration::from_secs(35);

/// Result of [`Supervisor::ensure_started`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    Started,
    AlreadyRunning,

    /// Not registered; nothing to start
    NotInstalled(Status),

    /// Status could not be determined; left alone
    ProbeFailed(ProbeError),
}

/// Mode-aware lifecycle facade with per-runner serialization
pub struct Supervisor {
    container_mode: bool,
    prober: StatusProber,
    containers: ContainerController,
    process: ProcessController,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    start_timeout: Duration,
    stop_timeout: Duration,
}

impl Supervisor {
    pub fn new(
        container_mode: bool,
        prober: StatusProber,
        containers: ContainerController,
        process: ProcessController,
    ) -> Self {
        Self {
            container_mode,
            prober,
            containers,
            process,
            locks: Mutex::new(HashMap::new()),
            start_timeout: START_TIMEOUT,
            stop_timeout: STOP_TIMEOUT,
        }
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(name.to_string()).or_default().clone()
    }

    /// Drops the lock entry of a runner that left the inventory
    pub fn forget(&self, name: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(name);
    }

    // =============================================================================
    // Operations
    // =============================================================================

    pub async fn probe(&self, runner: &RunnerIdentity) -> Probe {
        let lock = self.lock_for(&runner.name);
        let _guard = lock.lock().await;
        self.prober.probe(runner).await
    }

    /// Starts the runner unconditionally
    ///
    /// A running container only gets its agent nudged. In process mode this
    /// launches the entrypoint again, so callers that have not probed first
    /// should use [`Supervisor::ensure_started`].
    pub async fn start(&self, runner: &RunnerIdentity) -> Result<(), ControlError> {
        let lock = self.lock_for(&runner.name);
        let _guard = lock.lock().await;
        self.start_locked(runner).await
    }

    /// Starts the runner only if it is registered and not running
    pub async fn ensure_started(
        &self,
        runner: &RunnerIdentity,
    ) -> Result<EnsureOutcome, ControlError> {
        let lock = self.lock_for(&runner.name);
        let _guard = lock.lock().await;

        let probe = self.prober.probe(runner).await;
        if let Some(error) = probe.error {
            return Ok(EnsureOutcome::ProbeFailed(error));
        }
        if probe.status != Status::Installed {
            return Ok(EnsureOutcome::NotInstalled(probe.status));
        }
        if probe.running {
            return Ok(EnsureOutcome::AlreadyRunning);
        }

        self.start_locked(runner).await?;
        Ok(EnsureOutcome::Started)
    }

    async fn start_locked(&self, runner: &RunnerIdentity) -> Result<(), ControlError> {
        info!("Starting runner {}", runner.name);
        if self.container_mode {
            with_deadline("start", self.start_timeout, self.containers.start_or_create(runner))
                .await
        } else {
            self.process.start(&runner.install_dir)?;
            Ok(())
        }
    }

    pub async fn stop(&self, runner: &RunnerIdentity) -> Result<(), ControlError> {
        let lock = self.lock_for(&runner.name);
        let _guard = lock.lock().await;

        info!("Stopping runner {}", runner.name);
        if self.container_mode {
            with_deadline("stop", self.stop_timeout, self.containers.stop(&runner.name)).await
        } else {
            self.process.stop(&runner.install_dir)?;
            Ok(())
        }
    }

    /// Tears down the runner's runtime state; the install directory stays
    pub async fn remove(&self, runner: &RunnerIdentity) -> Result<(), ControlError> {
        let lock = self.lock_for(&runner.name);
        let _guard = lock.lock().await;

        info!("Removing runner {}", runner.name);
        if self.container_mode {
            with_deadline("remove", self.stop_timeout, self.containers.remove(&runner.name))
                .await?;
        } else if self.process.is_running(&runner.install_dir) {
            if let Err(e) = self.process.stop(&runner.install_dir) {
                warn!("Failed to stop runner {} before removal: {}", runner.name, e);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RunnerStarter for Supervisor {
    async fn start_runner(&self, runner: &RunnerIdentity) -> Result<(), ControlError> {
        self.start(runner).await
    }
}

async fn with_deadline<F>(operation: &str, timeout: Duration, fut: F) -> Result<(), ControlError>
where
    F: Future<Output = Result<(), ControlError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ControlError::TimedOut {
            operation: operation.to_string(),
            timeout,
        })?
}

/// Deletes a runner's install directory
///
/// Refuses anything that does not resolve strictly below `base_path`,
/// symlinks included. A directory that is already gone is not an error.
pub fn remove_install_dir(base_path: &Path, install_dir: &Path) -> Result<(), ControlError> {
    let unsafe_path = |reason: &str| ControlError::UnsafePath {
        path: install_dir.to_path_buf(),
        reason: reason.to_string(),
    };

    let dir = match install_dir.canonicalize() {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Install dir {} already gone", install_dir.display());
            return Ok(());
        }
        Err(source) => {
            return Err(ControlError::Io {
                path: install_dir.to_path_buf(),
                source,
            });
        }
    };
    let base = base_path
        .canonicalize()
        .map_err(|_| unsafe_path("base path cannot be resolved"))?;

    if dir == base || !dir.starts_with(&base) {
        return Err(unsafe_path("not under the runners base path"));
    }

    std::fs::remove_dir_all(&dir).map_err(|source| ControlError::Io {
        path: dir.clone(),
        source,
    })?;
    info!("Removed install dir {}", dir.display());
    Ok(())
}

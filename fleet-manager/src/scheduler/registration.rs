//! Registration queue and worker
//!
//! Installing and registering a runner is slow and heavy on disk and network,
//! so jobs go through one bounded channel with exactly one consumer. Producers
//! never block: a full queue is reported back immediately.
//!
//! Every job ends in a `RegistrationResult` file inside the runner's install
//! directory. A successful registration is followed by a start attempt whose
//! failure is only logged.

use fleet_core::domain::registration::RegistrationResult;
use fleet_core::domain::runner::RunnerIdentity;
use fleet_core::install;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};

use crate::scheduler::RunnerStarter;

/// Default number of jobs the queue holds before refusing new ones
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Deadline for the install script (download and unpack)
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(180);

/// Deadline for `config.sh`
pub const CONFIG_TIMEOUT: Duration = Duration::from_secs(120);

const SUDO_PHRASE: &str = "Must not run with sudo";
const TOKEN_FAILURE_WORDS: [&str; 4] = ["invalid", "expired", "already", "used"];

// =============================================================================
// Jobs and queue
// =============================================================================

/// Install-and-register request for one runner
#[derive(Clone)]
pub struct RegistrationJob {
    pub runner: RunnerIdentity,

    /// Runners base path, handed to the install script
    pub base_path: PathBuf,

    /// Org or repository URL on GitHub
    pub url: String,

    /// Single-use registration token
    pub token: String,
}

impl fmt::Debug for RegistrationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationJob")
            .field("runner", &self.runner.name)
            .field("install_dir", &self.runner.install_dir)
            .field("base_path", &self.base_path)
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("registration queue full, retry later")]
    Full,

    #[error("registration worker is not running")]
    Closed,
}

/// Producer side of the registration channel
#[derive(Clone)]
pub struct RegistrationQueue {
    tx: mpsc::Sender<RegistrationJob>,
}

impl RegistrationQueue {
    /// Enqueues a job without waiting
    pub fn enqueue(&self, job: RegistrationJob) -> Result<(), QueueError> {
        debug!("Enqueueing registration job {:?}", job);
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}

/// Consumer side of the registration channel
pub struct RegistrationWorker {
    rx: mpsc::Receiver<RegistrationJob>,
}

/// Creates the queue and its single worker
pub fn registration_channel(capacity: usize) -> (RegistrationQueue, RegistrationWorker) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (RegistrationQueue { tx }, RegistrationWorker { rx })
}

/// Scripts used by the worker and their deadlines
#[derive(Debug, Clone)]
pub struct ScriptSettings {
    pub install_script: PathBuf,
    pub install_timeout: Duration,
    pub config_timeout: Duration,
}

impl ScriptSettings {
    pub fn new(install_script: impl Into<PathBuf>) -> Self {
        Self {
            install_script: install_script.into(),
            install_timeout: INSTALL_TIMEOUT,
            config_timeout: CONFIG_TIMEOUT,
        }
    }
}

impl RegistrationWorker {
    /// Takes the next waiting job without running it
    #[cfg(test)]
    pub fn try_next(&mut self) -> Option<RegistrationJob> {
        self.rx.try_recv().ok()
    }

    /// Processes jobs one at a time until every queue handle is dropped
    pub async fn run(mut self, scripts: ScriptSettings, starter: Arc<dyn RunnerStarter>) {
        info!("Registration worker started");

        while let Some(job) = self.rx.recv().await {
            let name = job.runner.name.clone();
            info!("Registering runner {}", name);

            let result = register(&job, &scripts).await;
            if let Err(e) = result.write(&job.runner.install_dir) {
                warn!("Failed to write registration result for {}: {}", name, e);
            }

            if result.success {
                info!("Runner {} registered", name);
                match starter.start_runner(&job.runner).await {
                    Ok(()) => info!("Auto-started runner {} after registration", name),
                    Err(e) => warn!("Auto-start after registration failed for {}: {}", name, e),
                }
            } else {
                warn!("Registration of {} failed: {}", name, result.message);
            }
        }

        info!("Registration worker stopped");
    }
}

// =============================================================================
// Job execution
// =============================================================================

async fn register(job: &RegistrationJob, scripts: &ScriptSettings) -> RegistrationResult {
    let dir = match std::path::absolute(&job.runner.install_dir) {
        Ok(dir) => dir,
        Err(e) => {
            return RegistrationResult::failure(format!(
                "cannot resolve install dir {}: {}",
                job.runner.install_dir.display(),
                e
            ));
        }
    };
    let config_script = dir.join(install::config_script_name());

    if !config_script.exists() {
        if let Err(message) = install(job, &dir, scripts).await {
            return RegistrationResult::failure(message);
        }
        if !config_script.exists() {
            return RegistrationResult::failure(format!(
                "install finished but {} not found",
                install::config_script_name()
            ));
        }
    }

    let mut cmd = Command::new(&config_script);
    cmd.current_dir(&dir)
        .arg("--url")
        .arg(&job.url)
        .arg("--token")
        .arg(&job.token);
    if !job.runner.labels.is_empty() {
        cmd.arg("--labels").arg(job.runner.labels.join(","));
    }

    match run_script(cmd, install::config_script_name(), scripts.config_timeout).await {
        Ok(output) => {
            debug!("config script output for {}: {}", job.runner.name, output);
            RegistrationResult::success("registration succeeded")
        }
        Err(e) => RegistrationResult::failure(with_hints(e.describe())),
    }
}

async fn install(job: &RegistrationJob, dir: &Path, scripts: &ScriptSettings) -> Result<(), String> {
    if !scripts.install_script.exists() {
        return Err(format!(
            "{} not found and install script {} is missing; unpack the runner into {} manually",
            install::config_script_name(),
            scripts.install_script.display(),
            dir.display()
        ));
    }

    let segment = dir
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    info!("Installing runner {} into {}", job.runner.name, dir.display());

    let mut cmd = Command::new(&scripts.install_script);
    cmd.arg(&segment).env("RUNNERS_BASE_PATH", &job.base_path);

    match run_script(cmd, "install script", scripts.install_timeout).await {
        Ok(output) => {
            debug!("install script output for {}: {}", job.runner.name, output);
            Ok(())
        }
        Err(e) => Err(format!("automatic runner install failed: {}", e.describe())),
    }
}

#[derive(Debug, Error)]
enum ScriptError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("{program} exited with {status}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        output: String,
    },
}

impl ScriptError {
    /// Script output when there is any, the error itself otherwise
    fn describe(&self) -> String {
        match self {
            ScriptError::Failed { output, .. } if !output.trim().is_empty() => {
                output.trim().to_string()
            }
            other => other.to_string(),
        }
    }
}

async fn run_script(
    mut cmd: Command,
    program: &str,
    timeout: Duration,
) -> Result<String, ScriptError> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);

    let output = match time::timeout(timeout, cmd.output()).await {
        Err(_) => {
            return Err(ScriptError::TimedOut {
                program: program.to_string(),
                timeout,
            });
        }
        Ok(Err(source)) => {
            return Err(ScriptError::Spawn {
                program: program.to_string(),
                source,
            });
        }
        Ok(Ok(output)) => output,
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if output.status.success() {
        Ok(combined)
    } else {
        Err(ScriptError::Failed {
            program: program.to_string(),
            status: output.status,
            output: combined,
        })
    }
}

/// Appends operator guidance for known `config.sh` failures
fn with_hints(message: String) -> String {
    let mut message = message;
    if message.contains(SUDO_PHRASE) {
        message.push_str(
            " (hint: run the manager as a non-root user, or set RUNNER_ALLOW_RUNASROOT=1)",
        );
    }

    let lower = message.to_lowercase();
    if lower.contains("token") && TOKEN_FAILURE_WORDS.iter().any(|w| lower.contains(w)) {
        message.push_str(
            " (hint: registration tokens are single-use and expire; generate a new one for each runner)",
        );
    }
    message
}

//! Process-mode runner control
//!
//! Handles runners that execute as bare OS processes:
//! - Checking whether the recorded PID is alive
//! - Starting the entrypoint script detached from the caller
//! - Reaping the child so it never lingers as a zombie
//! - Signalling the runner to stop

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::runner::Status;
use crate::install;

/// Errors from process-mode control
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to resolve runner path {path}: {source}")]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("run script {0} not found")]
    ScriptMissing(PathBuf),

    #[error("failed to launch {script}: {source}")]
    Spawn {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable runner pid file in {0}")]
    PidNotFound(PathBuf),

    #[error("failed to signal runner pid {pid}: {message}")]
    Signal { pid: u32, message: String },
}

/// Answers whether a PID belongs to a live process
pub trait ProcessLiveness: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Liveness via a zero-signal probe
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalLiveness;

#[cfg(unix)]
impl ProcessLiveness for SignalLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // A PID outside i32 would turn into a process-group target
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }

        match kill(Pid::from_raw(raw), None::<nix::sys::signal::Signal>) {
            Ok(()) => true,
            // Exists but belongs to someone else
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

/// Liveness where the platform offers no cheap probe
///
/// Treats any recorded PID as alive. This is a known precision limitation:
/// a stale PID file reads as a running runner.
#[derive(Debug, Default, Clone, Copy)]
pub struct PidFileLiveness;

impl ProcessLiveness for PidFileLiveness {
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }
}

/// Liveness implementation for the current platform
pub fn default_liveness() -> Arc<dyn ProcessLiveness> {
    #[cfg(unix)]
    {
        Arc::new(SignalLiveness)
    }
    #[cfg(not(unix))]
    {
        Arc::new(PidFileLiveness)
    }
}

/// Starts, stops and inspects process-mode runners
#[derive(Clone)]
pub struct ProcessController {
    liveness: Arc<dyn ProcessLiveness>,
}

impl ProcessController {
    pub fn new(liveness: Arc<dyn ProcessLiveness>) -> Self {
        Self { liveness }
    }

    /// Status and running flag of a process-mode runner
    pub fn status(&self, install_dir: &Path) -> (Status, bool) {
        let status = install::disk_status(install_dir);
        if status != Status::Installed {
            return (status, false);
        }
        (status, self.is_running(install_dir))
    }

    /// True iff the recorded PID resolves to a live process
    pub fn is_running(&self, install_dir: &Path) -> bool {
        install::read_pid(install_dir)
            .map(|pid| self.is_alive(pid))
            .unwrap_or(false)
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.liveness.is_alive(pid)
    }

    /// Launches the runner's entrypoint script in the background
    ///
    /// The child gets its own process group and the inherited environment.
    /// A background task waits on it, so it must be called from within a
    /// Tokio runtime.
    ///
    /// # Returns
    /// PID of the launched script, when the OS reports one
    pub fn start(&self, install_dir: &Path) -> Result<Option<u32>, ProcessError> {
        let dir = absolute(install_dir)?;
        let script = dir.join(install::run_script_name());
        if !script.is_file() {
            return Err(ProcessError::ScriptMissing(script));
        }

        let mut command = tokio::process::Command::new(&script);
        command
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            script: script.clone(),
            source,
        })?;

        let pid = child.id();
        info!("Started runner script {} (pid {:?})", script.display(), pid);

        // Reap the child; nothing else may wait on it
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("Runner script {} exited: {}", script.display(), status),
                Err(e) => warn!("Failed to wait on runner script {}: {}", script.display(), e),
            }
        });

        Ok(pid)
    }

    /// Asks the runner to terminate
    ///
    /// Sends SIGTERM on POSIX and force-kills elsewhere. A missing or invalid
    /// PID file is an error, not a no-op.
    pub fn stop(&self, install_dir: &Path) -> Result<(), ProcessError> {
        let dir = absolute(install_dir)?;
        let pid = install::read_pid(&dir).ok_or_else(|| ProcessError::PidNotFound(dir.clone()))?;

        info!("Stopping runner pid {} in {}", pid, dir.display());
        terminate(pid)
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ProcessError> {
    std::path::absolute(path).map_err(|source| ProcessError::InvalidPath {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<(), ProcessError> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| ProcessError::Signal {
        pid,
        message: "pid out of range".to_string(),
    })?;

    kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(|errno| ProcessError::Signal {
        pid,
        message: errno.to_string(),
    })
}

#[cfg(not(unix))]
fn terminate(pid: u32) -> Result<(), ProcessError> {
    let output = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .output()
        .map_err(|e| ProcessError::Signal {
            pid,
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ProcessError::Signal {
            pid,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

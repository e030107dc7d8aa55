//! Service layer
//!
//! Lifecycle logic for runners, independent of how it is triggered:
//! - `container`: create/start/stop/remove runner containers
//! - `prober`: derive a runner's status from disk, process table, runtime and agent
//! - `supervisor`: mode dispatch, deadlines and per-runner serialization
//!
//! The API layer and the background schedulers both go through [`Supervisor`].

mod container;
mod prober;
mod supervisor;

pub use container::{ContainerController, ContainerSettings};
pub use prober::StatusProber;
pub use supervisor::{EnsureOutcome, Supervisor, remove_install_dir};

use fleet_client::AgentError;
use fleet_core::process::ProcessError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::runtime::RuntimeError;

/// Errors from start, stop and remove operations
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The deployment cannot perform this operation at all
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{operation} timed out after {timeout:?}")]
    TimedOut {
        operation: String,
        timeout: Duration,
    },

    /// Path outside the managed base directory
    #[error("refusing to remove {path}: {reason}")]
    UnsafePath { path: PathBuf, reason: String },

    #[error("failed to remove {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ControlError {
    pub fn is_timeout(&self) -> bool {
        match self {
            ControlError::TimedOut { .. } => true,
            ControlError::Runtime(RuntimeError::TimedOut { .. }) => true,
            ControlError::Agent(e) => e.is_timeout(),
            _ => false,
        }
    }
}

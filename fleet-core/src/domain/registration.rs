//! Registration records kept inside a runner's install directory
//!
//! Two small JSON files form the durable trace of registration work:
//! the result of the last registration job, and the last check of whether
//! the CI provider lists the runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File written by the registration worker
pub const REGISTRATION_RESULT_FILE: &str = ".registration_result.json";

/// File written by the GitHub registration checker
pub const GITHUB_STATUS_FILE: &str = ".github_status.json";

/// Outcome of the most recent registration job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub success: bool,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl RegistrationResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            at: Utc::now(),
        }
    }

    /// Reads the result file; absent or malformed files read as `None`
    pub fn read(install_dir: &Path) -> Option<Self> {
        read_json(&install_dir.join(REGISTRATION_RESULT_FILE))
    }

    pub fn write(&self, install_dir: &Path) -> std::io::Result<()> {
        write_json(&install_dir.join(REGISTRATION_RESULT_FILE), self)
    }
}

/// Whether the CI provider lists the runner, as of `last_check`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubStatus {
    pub registered: bool,
    pub last_check: DateTime<Utc>,
}

impl GitHubStatus {
    pub fn now(registered: bool) -> Self {
        Self {
            registered,
            last_check: Utc::now(),
        }
    }

    pub fn read(install_dir: &Path) -> Option<Self> {
        read_json(&install_dir.join(GITHUB_STATUS_FILE))
    }

    pub fn write(&self, install_dir: &Path) -> std::io::Result<()> {
        write_json(&install_dir.join(GITHUB_STATUS_FILE), self)
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(value)?;
    std::fs::write(path, bytes)
}

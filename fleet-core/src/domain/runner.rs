//! Runner domain model
//!
//! Represents a runner from the inventory and the status derived for it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::probe::ProbeError;

/// Prefix applied to every runner container name
pub const CONTAINER_NAME_PREFIX: &str = "github-runner-";

/// Body used when a runner name sanitizes to nothing
pub const CONTAINER_NAME_FALLBACK: &str = "runner";

/// A runner as described by the inventory
///
/// Owned by the configuration layer; the lifecycle engine only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerIdentity {
    /// Unique runner name, also the source of the container name
    pub name: String,

    /// Absolute or base-relative install directory
    pub install_dir: PathBuf,

    /// Organization name or `owner/repo`
    pub target: String,

    /// Custom labels registered with the runner
    pub labels: Vec<String>,
}

impl RunnerIdentity {
    /// Creates an identity with no target or labels
    pub fn new(name: impl Into<String>, install_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            install_dir: install_dir.into(),
            target: String::new(),
            labels: Vec::new(),
        }
    }

    /// Container name for this runner
    pub fn container_name(&self) -> String {
        container_name(&self.name)
    }
}

/// Lifecycle status of a runner install directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Install directory absent or not a directory
    Missing,

    /// Directory exists but the runner never registered
    New,

    /// Registration marker present
    Installed,

    /// Probing itself failed; not a lifecycle state
    Unknown,
}

impl Status {
    /// Maps the agent's self-reported status onto a lifecycle status
    ///
    /// Anything the agent reports besides `installed` or `new` is treated as
    /// `missing`, never as an error.
    pub fn from_agent(status: &str) -> Self {
        match status {
            "installed" => Status::Installed,
            "new" => Status::New,
            _ => Status::Missing,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Missing => "missing",
            Status::New => "new",
            Status::Installed => "installed",
            Status::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of probing a single runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub status: Status,

    /// Meaningful only when `status` is `Installed`, or when a container is
    /// known to be up while its agent could not be queried
    pub running: bool,

    /// Set only when status determination itself failed
    pub error: Option<ProbeError>,
}

impl Probe {
    /// A successful probe
    pub fn ok(status: Status, running: bool) -> Self {
        Self {
            status,
            running,
            error: None,
        }
    }

    /// A failed probe; status is always `Unknown`
    pub fn failed(running: bool, error: ProbeError) -> Self {
        Self {
            status: Status::Unknown,
            running,
            error: Some(error),
        }
    }

    /// True when the runner is registered but not running
    pub fn needs_start(&self) -> bool {
        self.status == Status::Installed && !self.running
    }
}

/// Derives the container name for a runner name
///
/// Runs of characters outside `[A-Za-z0-9_-]` collapse to a single `-`,
/// leading and trailing dashes are trimmed, and an empty result falls back to
/// a fixed body. The result always carries the fleet prefix.
pub fn container_name(runner_name: &str) -> String {
    let mut body = String::with_capacity(runner_name.len());
    let mut in_invalid_run = false;

    for c in runner_name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            body.push(c);
            in_invalid_run = false;
        } else if !in_invalid_run {
            body.push('-');
            in_invalid_run = true;
        }
    }

    let body = body.trim_matches('-');
    if body.is_empty() {
        format!("{}{}", CONTAINER_NAME_PREFIX, CONTAINER_NAME_FALLBACK)
    } else {
        format!("{}{}", CONTAINER_NAME_PREFIX, body)
    }
}

/// Base URL of the control agent inside a runner container
pub fn agent_endpoint(container_name: &str, port: u16) -> String {
    format!("http://{}:{}", container_name, port)
}

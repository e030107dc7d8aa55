//! Container runtime layer
//!
//! The manager drives runner containers through a runtime CLI. This module
//! defines the narrow surface it needs, so the controller and prober can be
//! exercised against an in-memory runtime in tests.

mod docker;

pub use docker::DockerCli;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Longest slice of CLI output kept in an error
pub const OUTPUT_LIMIT: usize = 2048;

/// Errors from runtime CLI invocations
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The named container does not exist
    #[error("no such container: {0}")]
    NotFound(String),

    /// The CLI ran and exited non-zero
    #[error("{}", describe_failure(.command, .output))]
    CommandFailed { command: String, output: String },

    /// The CLI binary could not be launched at all
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

impl RuntimeError {
    /// True when a start failed because the container's network is gone
    ///
    /// Such a container can never start again; it must be recreated.
    pub fn is_network_missing(&self) -> bool {
        match self {
            RuntimeError::CommandFailed { output, .. } => {
                let output = output.to_lowercase();
                output.contains("network")
                    && (output.contains("not found")
                        || output.contains("no such network")
                        || output.contains("does not exist"))
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            RuntimeError::NotFound(_) => true,
            RuntimeError::CommandFailed { output, .. } => is_no_such_container(output),
            _ => false,
        }
    }
}

/// Runtime's wording for an absent container
pub(crate) fn is_no_such_container(output: &str) -> bool {
    output.to_lowercase().contains("no such container")
}

/// Operator hint for well-known runtime failures
pub fn hint_for(output: &str) -> Option<&'static str> {
    let output = output.to_lowercase();
    if output.contains("permission denied") {
        Some(
            "permission denied or cannot reach the daemon: check the docker.sock mount, DOCKER_GID / group_add and the container user",
        )
    } else if output.contains("connection refused") || output.contains("cannot connect to the docker daemon") {
        Some("the Docker daemon refused the connection: make sure it is running and that DOCKER_HOST points at it")
    } else {
        None
    }
}

fn describe_failure(command: &str, output: &str) -> String {
    let shown = if output.trim().is_empty() {
        "(no output)".to_string()
    } else {
        truncate(output.trim(), OUTPUT_LIMIT)
    };

    match hint_for(output) {
        Some(hint) => format!("{} failed: {} (hint: {})", command, shown, hint),
        None => format!("{} failed: {}", command, shown),
    }
}

/// Cuts `text` to at most `limit` bytes on a character boundary
pub fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &text[..end])
}

/// Everything needed to create a runner container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: String,

    /// `(host source, container target)` bind mounts
    pub mounts: Vec<(String, String)>,

    /// `(key, value)` environment variables
    pub env: Vec<(String, String)>,
}

/// Container operations the manager relies on
///
/// Absent containers are not errors for the query methods: `is_running` and
/// `exists` answer `false`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError>;

    /// True if a container with exactly this name exists, running or not
    async fn exists(&self, name: &str) -> Result<bool, RuntimeError>;

    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError>;

    async fn start(&self, name: &str) -> Result<(), RuntimeError>;

    async fn stop(&self, name: &str, grace: Duration) -> Result<(), RuntimeError>;

    /// Force-removes the container
    async fn remove(&self, name: &str) -> Result<(), RuntimeError>;

    /// True when the runtime connection goes to a remote TCP endpoint
    fn endpoint_is_remote(&self) -> bool;
}

//! Probe failure classification
//!
//! When status determination itself fails, the failure is tagged with one of
//! a closed set of types. Each type maps to an operator suggestion, a
//! read-only check command and a fix command that may have side effects.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phrase the agent client puts in every non-2xx error message
///
/// The message fallback of [`classify`] keys on it, so keep them in sync.
pub const AGENT_HTTP_PHRASE: &str = "agent returned";

/// Category of a probe failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeErrorType {
    /// Runtime CLI or daemon unreachable, or permission denied
    DockerAccess,

    /// Agent reachable but answered with a non-2xx status
    AgentHttp,

    /// Agent unreachable: DNS, connection refused or timeout
    AgentConnect,

    Unknown,
}

impl ProbeErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeErrorType::DockerAccess => "docker-access",
            ProbeErrorType::AgentHttp => "agent-http",
            ProbeErrorType::AgentConnect => "agent-connect",
            ProbeErrorType::Unknown => "unknown",
        }
    }

    /// Short troubleshooting advice for operators
    pub fn suggestion(&self) -> &'static str {
        match self {
            ProbeErrorType::DockerAccess => {
                "Check the docker.sock mount and its permissions (DOCKER_GID / group_add / user) and make sure the Docker daemon is reachable"
            }
            ProbeErrorType::AgentConnect => {
                "Check the runner container network, DNS resolution and that the agent port is reachable"
            }
            ProbeErrorType::AgentHttp => {
                "Inspect the runner container logs to see the agent and the state of the scripts under /runner"
            }
            ProbeErrorType::Unknown => {
                "Try a stop/start cycle first, then inspect the manager and runner container logs"
            }
        }
    }

    /// Read-only command that helps diagnose the failure
    pub fn check_command(&self) -> &'static str {
        match self {
            ProbeErrorType::DockerAccess => "ls -l /var/run/docker.sock && id && docker info",
            ProbeErrorType::AgentConnect => {
                "docker network inspect runner-net && docker ps --format \"table {{.Names}}\\t{{.Status}}\\t{{.Networks}}\""
            }
            ProbeErrorType::AgentHttp => {
                "docker ps -a | grep \"github-runner-\" && docker logs --tail=200 <runner_container_name>"
            }
            ProbeErrorType::Unknown => "docker compose ps && docker logs --tail=200 runner-manager",
        }
    }

    /// Command that usually repairs the failure; may restart services
    pub fn fix_command(&self) -> &'static str {
        match self {
            ProbeErrorType::DockerAccess => {
                "DOCKER_GID=$(stat -c \"%g\" /var/run/docker.sock 2>/dev/null || stat -f \"%g\" /var/run/docker.sock) && echo \"DOCKER_GID=$DOCKER_GID\" > .env && docker compose up -d"
            }
            ProbeErrorType::AgentConnect => "docker compose up -d && docker restart runner-manager",
            ProbeErrorType::AgentHttp => "docker restart <runner_container_name>",
            ProbeErrorType::Unknown => "docker compose up -d --force-recreate",
        }
    }
}

impl std::fmt::Display for ProbeErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed probe failure
///
/// Constructed at the point of failure whenever the failing call is known, so
/// classification never has to parse the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProbeError {
    pub kind: ProbeErrorType,
    pub message: String,
}

impl ProbeError {
    pub fn new(kind: ProbeErrorType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Wraps an arbitrary error, classifying it with [`classify`]
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::new(classify(err), err.to_string())
    }
}

/// Classifies an error into a probe failure type
///
/// A [`ProbeError`] anywhere in the source chain is trusted as-is. Otherwise
/// the lower-cased message is matched against known substrings.
pub fn classify(err: &(dyn std::error::Error + 'static)) -> ProbeErrorType {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(probe) = e.downcast_ref::<ProbeError>() {
            return probe.kind;
        }
        current = e.source();
    }

    classify_message(&err.to_string())
}

/// Message-only fallback of [`classify`]
pub fn classify_message(message: &str) -> ProbeErrorType {
    let msg = message.to_lowercase();

    if msg.contains("docker") || msg.contains("daemon") || msg.contains("socket") {
        ProbeErrorType::DockerAccess
    } else if msg.contains(AGENT_HTTP_PHRASE) {
        ProbeErrorType::AgentHttp
    } else if msg.contains("connect")
        || msg.contains("connection refused")
        || msg.contains("no such host")
    {
        ProbeErrorType::AgentConnect
    } else {
        ProbeErrorType::Unknown
    }
}

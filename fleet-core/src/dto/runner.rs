//! Runner DTOs
//!
//! Views and requests served by the manager's HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::probe::{ProbeError, ProbeErrorType};
use crate::domain::runner::Status;

/// Probe failure details with operator guidance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeInfo {
    pub error: String,

    #[serde(rename = "type")]
    pub kind: ProbeErrorType,

    pub suggestion: String,
    pub check_command: String,
    pub fix_command: String,
}

impl From<&ProbeError> for ProbeInfo {
    fn from(err: &ProbeError) -> Self {
        ProbeInfo {
            error: err.message.clone(),
            kind: err.kind,
            suggestion: err.kind.suggestion().to_string(),
            check_command: err.kind.check_command().to_string(),
            fix_command: err.kind.fix_command().to_string(),
        }
    }
}

/// A runner with its configuration and live status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerView {
    pub name: String,

    /// Directory relative to the base path; defaults to the name
    pub path: String,

    pub target_type: String,
    pub target: String,
    pub labels: Vec<String>,
    pub install_dir: String,
    pub status: Status,
    pub running: bool,

    /// Present only when status determination failed
    pub probe: Option<ProbeInfo>,

    /// `dind`, `host-socket` or `none`; container mode only
    pub job_docker_backend: Option<String>,

    pub registration_message: Option<String>,
    pub registration_checked_at: Option<DateTime<Utc>>,

    /// `None` when the provider was never checked
    pub registered_on_github: Option<bool>,
    pub github_check_at: Option<DateTime<Utc>>,
}

/// Request to add a runner
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddRunner {
    pub name: String,

    #[serde(default)]
    pub path: String,

    pub target_type: String,
    pub target: String,

    #[serde(default)]
    pub labels: Vec<String>,

    /// When set, the runner is installed and registered in the background
    #[serde(default)]
    pub registration_token: Option<String>,
}

/// Request to update a runner; the name itself cannot change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRunner {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub path: String,

    pub target_type: String,
    pub target: String,

    #[serde(default)]
    pub labels: Vec<String>,

    /// When set, installation and registration are queued again
    #[serde(default)]
    pub registration_token: Option<String>,
}

/// Body of `GET /api/runners`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerList {
    pub runners: Vec<RunnerView>,
}

/// Outcome of a runner mutation or lifecycle action
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerActionResponse {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<String>,

    /// A registration job was accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued: Option<bool>,

    /// The runner was auto-started as part of the action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<RunnerView>,

    /// Probe failure seen before the action was attempted anyway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeInfo>,
}

impl RunnerActionResponse {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Trims labels and drops empty ones
pub fn normalize_labels(labels: &[String]) -> Vec<String> {
    labels
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

//! Control agent wire protocol
//!
//! - `GET /status` returns [`AgentStatus`]
//! - `POST /start` and `POST /stop` return [`AgentMessage`] on success and
//!   plain diagnostic text otherwise
//! - `GET /health` always answers `200 ok`

use serde::{Deserialize, Serialize};

use crate::domain::runner::Status;

/// Body of `GET /status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    /// `new`, `installed`, or anything else (read as missing)
    pub status: String,

    pub running: bool,
}

impl AgentStatus {
    pub fn new(status: Status, running: bool) -> Self {
        Self {
            status: status.as_str().to_string(),
            running,
        }
    }

    /// Lifecycle status and running flag as seen by the manager
    ///
    /// `running` is only honored when the agent reports `installed`.
    pub fn to_status(&self) -> (Status, bool) {
        let status = Status::from_agent(&self.status);
        (status, status == Status::Installed && self.running)
    }
}

/// Body of a successful `POST /start` or `POST /stop`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub message: String,
}

impl AgentMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_status_honors_running_only_when_installed() {
        let installed = AgentStatus {
            status: "installed".into(),
            running: true,
        };
        assert_eq!(installed.to_status(), (Status::Installed, true));

        let new = AgentStatus {
            status: "new".into(),
            running: true,
        };
        assert_eq!(new.to_status(), (Status::New, false));

        let odd = AgentStatus {
            status: "exploded".into(),
            running: true,
        };
        assert_eq!(odd.to_status(), (Status::Missing, false));
    }

    #[test]
    fn test_agent_status_wire_format() {
        let body: AgentStatus =
            serde_json::from_str(r#"{"status":"installed","running":true}"#).unwrap();
        assert_eq!(body, AgentStatus::new(Status::Installed, true));
    }
}

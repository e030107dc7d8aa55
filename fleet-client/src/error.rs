//! Error types for the agent client

use fleet_core::domain::probe::{ProbeError, ProbeErrorType};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur when talking to a control agent
#[derive(Debug, Error)]
pub enum AgentError {
    /// Agent could not be reached (DNS, refused connection, reset)
    #[error("failed to connect to agent at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Agent did not answer within the request timeout
    #[error("agent at {endpoint} timed out after {timeout:?}")]
    TimedOut { endpoint: String, timeout: Duration },

    /// Agent answered with a non-2xx status
    #[error("agent returned {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Bounded response body, the agent's own diagnostic text
        body: String,
    },

    /// Agent answered 2xx with a body that is not the expected JSON
    #[error("failed to parse agent response: {0}")]
    Parse(String),
}

impl AgentError {
    /// Probe failure category for this error
    pub fn probe_type(&self) -> ProbeErrorType {
        match self {
            AgentError::Connect { .. } | AgentError::TimedOut { .. } => {
                ProbeErrorType::AgentConnect
            }
            AgentError::Http { .. } | AgentError::Parse(_) => ProbeErrorType::AgentHttp,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AgentError::TimedOut { .. })
    }
}

impl From<&AgentError> for ProbeError {
    fn from(err: &AgentError) -> Self {
        ProbeError::new(err.probe_type(), err.to_string())
    }
}

impl From<AgentError> for ProbeError {
    fn from(err: AgentError) -> Self {
        ProbeError::from(&err)
    }
}

//! Test doubles shared across modules

use async_trait::async_trait;
use fleet_client::{Agent, AgentError, AgentStatus};
use fleet_core::domain::runner::RunnerIdentity;
use fleet_core::install;
use fleet_core::process::{ProcessController, default_liveness};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{EnvLookup, JobDockerBackend};
use crate::runtime::fake::FakeRuntime;
use crate::service::{ContainerController, ContainerSettings, StatusProber, Supervisor};

/// How a fake agent call fails
#[derive(Debug, Clone)]
pub enum FakeFailure {
    /// Agent never answers; surfaces as a timeout
    Unreachable,
    /// Agent answers with this status and body
    Http(u16, String),
}

impl FakeFailure {
    fn to_error(&self, endpoint: &str) -> AgentError {
        match self {
            FakeFailure::Unreachable => AgentError::TimedOut {
                endpoint: endpoint.to_string(),
                timeout: Duration::from_secs(5),
            },
            FakeFailure::Http(status, body) => AgentError::Http {
                status: *status,
                body: body.clone(),
            },
        }
    }
}

/// In-memory control agent
#[derive(Default)]
pub struct FakeAgent {
    status: Mutex<Option<AgentStatus>>,
    status_failure: Mutex<Option<FakeFailure>>,
    start_failure: Mutex<Option<String>>,
    start_calls: Mutex<Vec<String>>,
}

impl FakeAgent {
    pub fn reporting(status: AgentStatus) -> Self {
        let agent = Self::default();
        *agent.status.lock().unwrap() = Some(status);
        agent
    }

    pub fn fail_status(&self, failure: FakeFailure) {
        *self.status_failure.lock().unwrap() = Some(failure);
    }

    pub fn fail_start(&self, body: &str) {
        *self.start_failure.lock().unwrap() = Some(body.to_string());
    }

    pub fn start_calls(&self) -> Vec<String> {
        self.start_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for FakeAgent {
    async fn status(&self, endpoint: &str) -> Result<AgentStatus, AgentError> {
        if let Some(failure) = self.status_failure.lock().unwrap().as_ref() {
            return Err(failure.to_error(endpoint));
        }
        self.status
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| FakeFailure::Unreachable.to_error(endpoint))
    }

    async fn start(&self, endpoint: &str) -> Result<(), AgentError> {
        self.start_calls.lock().unwrap().push(endpoint.to_string());
        match self.start_failure.lock().unwrap().as_ref() {
            Some(body) => Err(FakeFailure::Http(500, body.clone()).to_error(endpoint)),
            None => Ok(()),
        }
    }
}

/// Container settings with no settle delays
pub fn container_settings(base: &Path) -> ContainerSettings {
    ContainerSettings {
        image: "img:tag".to_string(),
        network: "runner-net".to_string(),
        agent_port: 8081,
        backend: JobDockerBackend::None,
        dind_host: String::new(),
        base_path: base.to_path_buf(),
        volume_host_path: None,
        create_settle: Duration::ZERO,
        restart_settle: Duration::ZERO,
        stop_grace: Duration::from_secs(30),
    }
}

/// Container-mode supervisor wired to fakes
pub fn container_supervisor(
    runtime: Arc<FakeRuntime>,
    agent: Arc<FakeAgent>,
    base: &Path,
) -> Supervisor {
    let process = ProcessController::new(default_liveness());
    let prober = StatusProber::new(runtime.clone(), agent.clone(), process.clone(), 8081, true);
    let containers = ContainerController::new(runtime, agent, container_settings(base));
    Supervisor::new(true, prober, containers, process)
}

/// Creates a registered install directory under `base`
pub fn installed_runner(base: &Path, name: &str) -> RunnerIdentity {
    let dir = base.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(install::REGISTRATION_MARKER), b"{}").unwrap();
    RunnerIdentity::new(name, dir)
}

/// Environment lookup that sees no variables
pub fn no_env() -> EnvLookup {
    Arc::new(|_: &str| None)
}

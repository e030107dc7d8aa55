//! Status prober
//!
//! Derives `(Status, running, ProbeError?)` for a runner. Process mode reads
//! the install directory and the process table. Container mode asks the
//! runtime first and the in-container agent second.
//!
//! A probe never fails as a call; failures to determine state are reported
//! inside the returned [`Probe`] as a typed error with status `unknown`.

use fleet_client::Agent;
use fleet_core::domain::probe::{ProbeError, ProbeErrorType};
use fleet_core::domain::runner::{Probe, RunnerIdentity, agent_endpoint};
use fleet_core::install;
use fleet_core::process::ProcessController;
use std::sync::Arc;
use tracing::debug;

use crate::runtime::ContainerRuntime;

/// Probes runners in one execution mode
pub struct StatusProber {
    runtime: Arc<dyn ContainerRuntime>,
    agent: Arc<dyn Agent>,
    process: ProcessController,
    agent_port: u16,
    container_mode: bool,
}

impl StatusProber {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        agent: Arc<dyn Agent>,
        process: ProcessController,
        agent_port: u16,
        container_mode: bool,
    ) -> Self {
        Self {
            runtime,
            agent,
            process,
            agent_port,
            container_mode,
        }
    }

    pub async fn probe(&self, runner: &RunnerIdentity) -> Probe {
        if self.container_mode {
            self.probe_container(runner).await
        } else {
            let (status, running) = self.process.status(&runner.install_dir);
            Probe::ok(status, running)
        }
    }

    async fn probe_container(&self, runner: &RunnerIdentity) -> Probe {
        let cn = runner.container_name();

        let running = match self.runtime.is_running(&cn).await {
            Ok(running) => running,
            Err(e) => {
                debug!("Runtime query for {} failed: {}", cn, e);
                return Probe::failed(
                    false,
                    ProbeError::new(ProbeErrorType::DockerAccess, e.to_string()),
                );
            }
        };

        // Registered but off; keep what the disk says
        if !running {
            return Probe::ok(install::disk_status(&runner.install_dir), false);
        }

        let endpoint = agent_endpoint(&cn, self.agent_port);
        match self.agent.status(&endpoint).await {
            Ok(reported) => {
                let (status, running) = reported.to_status();
                Probe::ok(status, running)
            }
            Err(e) => {
                debug!("Agent status for {} failed: {}", cn, e);
                // The container is up, only the agent call failed
                Probe::failed(true, ProbeError::from(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::FakeRuntime;
    use crate::testing::{FakeAgent, FakeFailure};
    use fleet_client::AgentStatus;
    use fleet_core::domain::runner::Status;
    use fleet_core::process::ProcessLiveness;
    use tempfile::TempDir;

    struct Dead;

    impl ProcessLiveness for Dead {
        fn is_alive(&self, _pid: u32) -> bool {
            false
        }
    }

    fn prober(runtime: FakeRuntime, agent: FakeAgent, container_mode: bool) -> StatusProber {
        StatusProber::new(
            Arc::new(runtime),
            Arc::new(agent),
            ProcessController::new(Arc::new(Dead)),
            8081,
            container_mode,
        )
    }

    fn installed_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(install::REGISTRATION_MARKER), b"{}").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_process_mode_scenarios() {
        let prober = prober(FakeRuntime::default(), FakeAgent::default(), false);
        let base = TempDir::new().unwrap();

        let absent = RunnerIdentity::new("r1", base.path().join("r1"));
        assert_eq!(prober.probe(&absent).await, Probe::ok(Status::Missing, false));

        let fresh = RunnerIdentity::new("r1", base.path());
        assert_eq!(prober.probe(&fresh).await, Probe::ok(Status::New, false));

        let dir = installed_dir();
        std::fs::write(dir.path().join("Runner.Listener.pid"), b"999999").unwrap();
        let stale = RunnerIdentity::new("r1", dir.path());
        assert_eq!(prober.probe(&stale).await, Probe::ok(Status::Installed, false));
    }

    #[tokio::test]
    async fn test_container_runtime_failure_is_docker_access() {
        let runtime = FakeRuntime::default();
        runtime.fail_queries("Cannot connect to the Docker daemon at unix:///var/run/docker.sock");
        let prober = prober(runtime, FakeAgent::default(), true);

        let dir = installed_dir();
        let probe = prober.probe(&RunnerIdentity::new("r1", dir.path())).await;
        assert_eq!(probe.status, Status::Unknown);
        assert!(!probe.running);
        assert_eq!(probe.error.unwrap().kind, ProbeErrorType::DockerAccess);
    }

    #[tokio::test]
    async fn test_container_stopped_keeps_disk_status() {
        let prober = prober(
            FakeRuntime::default().with_container("github-runner-r1", false),
            FakeAgent::default(),
            true,
        );

        let dir = installed_dir();
        let probe = prober.probe(&RunnerIdentity::new("r1", dir.path())).await;
        assert_eq!(probe, Probe::ok(Status::Installed, false));

        let fresh = TempDir::new().unwrap();
        let probe = prober.probe(&RunnerIdentity::new("r1", fresh.path())).await;
        assert_eq!(probe, Probe::ok(Status::New, false));
    }

    #[tokio::test]
    async fn test_container_running_agent_reports() {
        let prober = prober(
            FakeRuntime::default().with_container("github-runner-r1", true),
            FakeAgent::reporting(AgentStatus {
                status: "installed".to_string(),
                running: true,
            }),
            true,
        );

        let probe = prober.probe(&RunnerIdentity::new("r1", "/nonexistent")).await;
        assert_eq!(probe, Probe::ok(Status::Installed, true));
    }

    #[tokio::test]
    async fn test_container_running_agent_other_status_is_missing() {
        let prober = prober(
            FakeRuntime::default().with_container("github-runner-r1", true),
            FakeAgent::reporting(AgentStatus {
                status: "weird".to_string(),
                running: true,
            }),
            true,
        );

        let probe = prober.probe(&RunnerIdentity::new("r1", "/nonexistent")).await;
        assert_eq!(probe, Probe::ok(Status::Missing, false));
    }

    #[tokio::test]
    async fn test_container_running_agent_unreachable() {
        let agent = FakeAgent::default();
        agent.fail_status(FakeFailure::Unreachable);
        let prober = prober(
            FakeRuntime::default().with_container("github-runner-r1", true),
            agent,
            true,
        );

        let probe = prober.probe(&RunnerIdentity::new("r1", "/nonexistent")).await;
        assert_eq!(probe.status, Status::Unknown);
        assert!(probe.running);
        assert_eq!(probe.error.unwrap().kind, ProbeErrorType::AgentConnect);
    }

    #[tokio::test]
    async fn test_container_running_agent_http_error() {
        let agent = FakeAgent::default();
        agent.fail_status(FakeFailure::Http(500, "run.sh missing".to_string()));
        let prober = prober(
            FakeRuntime::default().with_container("github-runner-r1", true),
            agent,
            true,
        );

        let probe = prober.probe(&RunnerIdentity::new("r1", "/nonexistent")).await;
        assert_eq!(probe.status, Status::Unknown);
        let error = probe.error.unwrap();
        assert_eq!(error.kind, ProbeErrorType::AgentHttp);
        assert!(error.message.contains("run.sh missing"));
    }
}

//! Reconciliation loops
//!
//! Two background tasks bring registered runners back after a restart of the
//! manager or of the container host:
//! - a one-shot sweep shortly after startup
//! - a recurring loop that refreshes the GitHub registration status and, from
//!   its second tick on, sweeps again
//!
//! The recurring loop skips its first start pass because it would overlap the
//! one-shot sweep. Per-runner serialization in the supervisor keeps two
//! sweeps from double-starting a runner either way.

use std::sync::Arc;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ConfigStore;
use crate::github::GitHubChecker;
use crate::service::{EnsureOutcome, Supervisor};

/// Timing of the reconciliation loops
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Delay before the one-shot startup sweep
    pub startup_delay: Duration,

    /// Delay before the recurring loop's first tick
    pub first_check_delay: Duration,

    pub interval: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_secs(15),
            first_check_delay: Duration::from_secs(30),
            interval: Duration::from_secs(300),
        }
    }
}

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub started: usize,
    pub failed: usize,
}

pub struct Reconciler {
    store: Arc<ConfigStore>,
    supervisor: Arc<Supervisor>,
    github: GitHubChecker,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        store: Arc<ConfigStore>,
        supervisor: Arc<Supervisor>,
        github: GitHubChecker,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            store,
            supervisor,
            github,
            settings,
        }
    }

    /// Starts every registered runner that is not running
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let config = match self.store.load().await {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load config for reconciliation: {}", e);
                return report;
            }
        };

        for runner in config.runners.identities() {
            match self.supervisor.ensure_started(&runner).await {
                Ok(EnsureOutcome::Started) => {
                    info!("Auto-started runner {}", runner.name);
                    report.started += 1;
                }
                Ok(EnsureOutcome::ProbeFailed(e)) => {
                    warn!("Skipping runner {}: status unknown ({})", runner.name, e);
                }
                Ok(outcome) => {
                    debug!("Runner {} left as is: {:?}", runner.name, outcome);
                }
                Err(e) => {
                    error!("Failed to auto-start runner {}: {}", runner.name, e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// One-shot sweep after the startup delay
    pub async fn run_startup(self: Arc<Self>) {
        time::sleep(self.settings.startup_delay).await;
        info!("Running startup sweep");
        let report = self.sweep().await;
        info!(
            "Startup sweep done: {} started, {} failed",
            report.started, report.failed
        );
    }

    /// Recurring GitHub check and sweep; never returns
    pub async fn run_periodic(self: Arc<Self>) {
        time::sleep(self.settings.first_check_delay).await;

        info!(
            "Starting reconciliation loop (interval: {:?})",
            self.settings.interval
        );
        let mut interval = time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut first = true;

        loop {
            interval.tick().await;

            match self.store.load().await {
                Ok(config) => {
                    self.github.check_all(&config).await;
                }
                Err(e) => error!("Failed to load config for GitHub check: {}", e),
            }

            if first {
                first = false;
                debug!("Skipping start pass on the first tick");
                continue;
            }

            let report = self.sweep().await;
            if report.started > 0 || report.failed > 0 {
                info!(
                    "Reconciliation: {} started, {} failed",
                    report.started, report.failed
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RunnerItem};
    use crate::runtime::fake::FakeRuntime;
    use crate::testing::{FakeAgent, container_supervisor, installed_runner, no_env};
    use fleet_client::AgentStatus;
    use fleet_core::domain::runner::Status;
    use tempfile::TempDir;

    fn item(name: &str) -> RunnerItem {
        RunnerItem {
            name: name.to_string(),
            target_type: "org".to_string(),
            target: "acme".to_string(),
            ..Default::default()
        }
    }

    fn store(base: &TempDir, names: &[&str]) -> Arc<ConfigStore> {
        let mut config = Config::default();
        config.runners.base_path = base.path().join("runners").display().to_string();
        config.runners.container_mode = true;
        config.runners.container_image = "img:tag".to_string();
        config.runners.job_docker_backend = "none".to_string();
        config.runners.items = names.iter().map(|n| item(n)).collect();

        let path = base.path().join("config.yaml");
        config.save(&path).unwrap();
        Arc::new(ConfigStore::new(path, no_env()))
    }

    fn reconciler(
        store: Arc<ConfigStore>,
        runtime: Arc<FakeRuntime>,
        base: &TempDir,
    ) -> Arc<Reconciler> {
        let agent = Arc::new(FakeAgent::reporting(AgentStatus::new(Status::Installed, true)));
        let supervisor = Arc::new(container_supervisor(
            runtime,
            agent,
            &base.path().join("runners"),
        ));
        Arc::new(Reconciler::new(
            store,
            supervisor,
            GitHubChecker::with_api_base("http://127.0.0.1:9"),
            ReconcileSettings {
                startup_delay: Duration::ZERO,
                first_check_delay: Duration::ZERO,
                interval: Duration::from_millis(50),
            },
        ))
    }

    fn start_calls(runtime: &FakeRuntime) -> usize {
        runtime
            .calls()
            .iter()
            .filter(|c| c.starts_with("start"))
            .count()
    }

    #[tokio::test]
    async fn test_sweep_starts_only_installed_stopped_runners() {
        let base = TempDir::new().unwrap();
        let runners = base.path().join("runners");
        installed_runner(&runners, "stopped");
        installed_runner(&runners, "up");
        std::fs::create_dir_all(runners.join("fresh")).unwrap();

        let runtime = Arc::new(
            FakeRuntime::default()
                .with_container("github-runner-stopped", false)
                .with_container("github-runner-up", true),
        );
        let reconciler = reconciler(
            store(&base, &["stopped", "up", "fresh", "absent"]),
            runtime.clone(),
            &base,
        );

        let report = reconciler.sweep().await;
        assert_eq!(report, SweepReport { started: 1, failed: 0 });
        assert_eq!(runtime.calls().iter().filter(|c| *c == "start github-runner-stopped").count(), 1);
        assert_eq!(start_calls(&runtime), 1);
    }

    #[tokio::test]
    async fn test_sweep_continues_after_failure() {
        let base = TempDir::new().unwrap();
        let runners = base.path().join("runners");
        installed_runner(&runners, "bad");
        installed_runner(&runners, "good");

        let runtime = Arc::new(
            FakeRuntime::default()
                .with_container("github-runner-bad", false)
                .with_container("github-runner-good", false),
        );
        runtime.fail_next_start("Error response from daemon: no space left on device");
        let reconciler = reconciler(store(&base, &["bad", "good"]), runtime.clone(), &base);

        let report = reconciler.sweep().await;
        assert_eq!(report, SweepReport { started: 1, failed: 1 });
    }

    #[tokio::test]
    async fn test_sweep_skips_unknown_status() {
        let base = TempDir::new().unwrap();
        installed_runner(&base.path().join("runners"), "r1");

        let runtime = Arc::new(FakeRuntime::default());
        runtime.fail_queries("Cannot connect to the Docker daemon");
        let reconciler = reconciler(store(&base, &["r1"]), runtime.clone(), &base);

        assert_eq!(reconciler.sweep().await, SweepReport::default());
        assert_eq!(start_calls(&runtime), 0);
    }

    #[tokio::test]
    async fn test_sweep_with_broken_config_is_noop() {
        let base = TempDir::new().unwrap();
        let path = base.path().join("config.yaml");
        std::fs::write(&path, "runners: [not, a, map]").unwrap();
        let runtime = Arc::new(FakeRuntime::default());
        let reconciler = reconciler(
            Arc::new(ConfigStore::new(path, no_env())),
            runtime.clone(),
            &base,
        );

        assert_eq!(reconciler.sweep().await, SweepReport::default());
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_startup_sweep_runs_once() {
        let base = TempDir::new().unwrap();
        installed_runner(&base.path().join("runners"), "r1");
        let runtime = Arc::new(FakeRuntime::default().with_container("github-runner-r1", false));
        let reconciler = reconciler(store(&base, &["r1"]), runtime.clone(), &base);

        reconciler.run_startup().await;
        assert_eq!(start_calls(&runtime), 1);
    }

    #[tokio::test]
    async fn test_periodic_loop_skips_first_start_pass() {
        let base = TempDir::new().unwrap();
        installed_runner(&base.path().join("runners"), "r1");
        let runtime = Arc::new(FakeRuntime::default().with_container("github-runner-r1", false));
        let reconciler = reconciler(store(&base, &["r1"]), runtime.clone(), &base);

        let handle = tokio::spawn(reconciler.clone().run_periodic());
        time::sleep(Duration::from_millis(20)).await;
        assert_eq!(start_calls(&runtime), 0);

        time::sleep(Duration::from_millis(150)).await;
        handle.abort();
        assert_eq!(start_calls(&runtime), 1);
    }
}

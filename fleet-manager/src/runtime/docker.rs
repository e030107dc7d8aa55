//! Docker CLI runtime
//!
//! Runs every container operation as a `docker` subprocess:
//! - Each invocation is bounded by a timeout and killed if it overruns
//! - stdout/stderr are logged at debug level
//! - Failures keep the combined output for the failure classifier

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ContainerRuntime, ContainerSpec, RuntimeError, is_no_such_container};

/// Default bound for a single CLI invocation
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Docker CLI wrapper
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    timeout: Duration,
    docker_host: Option<String>,
}

impl DockerCli {
    /// Creates a wrapper around `docker` with the given `DOCKER_HOST`
    ///
    /// # Arguments
    /// * `docker_host` - Value of `DOCKER_HOST` the CLI will use, if any
    pub fn new(docker_host: Option<String>) -> Self {
        Self {
            program: "docker".to_string(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            docker_host,
        }
    }

    /// Uses a different CLI binary, e.g. a podman docker shim
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Runs the CLI and returns its combined output
    ///
    /// # Returns
    /// Trimmed stdout on success; [`RuntimeError::CommandFailed`] with stdout
    /// and stderr otherwise
    async fn run(&self, args: &[&str]) -> Result<String, RuntimeError> {
        let command = format!("{} {}", self.program, args.first().copied().unwrap_or_default());

        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| RuntimeError::TimedOut {
                command: command.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| RuntimeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stdout.trim().is_empty() {
            debug!("{} stdout: {}", command, stdout.trim());
        }
        if !stderr.trim().is_empty() {
            debug!("{} stderr: {}", command, stderr.trim());
        }

        if !output.status.success() {
            let combined = format!("{}\n{}", stdout.trim(), stderr.trim());
            return Err(RuntimeError::CommandFailed {
                command,
                output: combined.trim().to_string(),
            });
        }

        Ok(stdout.trim().to_string())
    }

    /// Maps "no such container" failures onto [`RuntimeError::NotFound`]
    fn not_found(name: &str, err: RuntimeError) -> RuntimeError {
        match &err {
            RuntimeError::CommandFailed { output, .. } if is_no_such_container(output) => {
                RuntimeError::NotFound(name.to_string())
            }
            _ => err,
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError> {
        match self
            .run(&["inspect", "-f", "{{.State.Running}}", name])
            .await
            .map_err(|e| Self::not_found(name, e))
        {
            Ok(out) => Ok(out == "true"),
            Err(RuntimeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
        let filter = format!("name=^{}$", name);
        let out = self.run(&["ps", "-a", "-q", "-f", &filter]).await?;
        Ok(!out.is_empty())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let mut args: Vec<String> = vec![
            "create".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];
        for (source, target) in &spec.mounts {
            args.push("-v".to_string());
            args.push(format!("{}:{}", source, target));
        }
        args.push("--network".to_string());
        args.push(spec.network.clone());
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(spec.image.clone());

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self.run(&args).await?;
        info!("Created container {} ({})", spec.name, id);
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.run(&["start", name])
            .await
            .map_err(|e| Self::not_found(name, e))?;
        info!("Started container {}", name);
        Ok(())
    }

    async fn stop(&self, name: &str, grace: Duration) -> Result<(), RuntimeError> {
        let grace = grace.as_secs().to_string();
        self.run(&["stop", "-t", &grace, name])
            .await
            .map_err(|e| Self::not_found(name, e))?;
        info!("Stopped container {}", name);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        self.run(&["rm", "-f", name])
            .await
            .map_err(|e| Self::not_found(name, e))?;
        info!("Removed container {}", name);
        Ok(())
    }

    fn endpoint_is_remote(&self) -> bool {
        self.docker_host
            .as_deref()
            .map(|host| host.trim().to_ascii_lowercase().starts_with("tcp://"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_is_remote() {
        assert!(!DockerCli::new(None).endpoint_is_remote());
        assert!(!DockerCli::new(Some("unix:///var/run/docker.sock".into())).endpoint_is_remote());
        assert!(DockerCli::new(Some("tcp://runner-dind:2375".into())).endpoint_is_remote());
        assert!(DockerCli::new(Some(" TCP://10.0.0.1:2376".into())).endpoint_is_remote());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let cli = DockerCli::new(None).with_program("definitely-not-a-container-cli");
        let err = cli.is_running("github-runner-r1").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// Writes a fake CLI that prints `body` and exits with `code`
        fn fake_cli(dir: &TempDir, body: &str, code: i32) -> DockerCli {
            let path = dir.path().join("docker");
            std::fs::write(
                &path,
                format!("#!/bin/sh\necho \"$@\" > \"$(dirname \"$0\")/args\"\necho '{}' >&2\nexit {}\n", body, code),
            )
            .unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            DockerCli::new(None).with_program(path.to_string_lossy().to_string())
        }

        fn recorded_args(dir: &TempDir) -> String {
            std::fs::read_to_string(dir.path().join("args")).unwrap().trim().to_string()
        }

        #[tokio::test]
        async fn test_inspect_no_such_container_is_not_running() {
            let dir = TempDir::new().unwrap();
            let cli = fake_cli(&dir, "Error: No such container: github-runner-r1", 1);
            assert!(!cli.is_running("github-runner-r1").await.unwrap());
            assert_eq!(
                recorded_args(&dir),
                "inspect -f {{.State.Running}} github-runner-r1"
            );
        }

        #[tokio::test]
        async fn test_inspect_daemon_failure_is_error() {
            let dir = TempDir::new().unwrap();
            let cli = fake_cli(&dir, "Cannot connect to the Docker daemon", 1);
            let err = cli.is_running("github-runner-r1").await.unwrap_err();
            assert!(matches!(err, RuntimeError::CommandFailed { .. }));
            assert!(err.to_string().contains("hint:"));
        }

        #[tokio::test]
        async fn test_stop_missing_container_is_not_found() {
            let dir = TempDir::new().unwrap();
            let cli = fake_cli(&dir, "Error response from daemon: No such container: x", 1);
            let err = cli.stop("x", Duration::from_secs(30)).await.unwrap_err();
            assert!(matches!(err, RuntimeError::NotFound(_)));
            assert_eq!(recorded_args(&dir), "stop -t 30 x");
        }

        #[tokio::test]
        async fn test_create_arguments() {
            let dir = TempDir::new().unwrap();
            let cli = fake_cli(&dir, "", 0);
            let spec = ContainerSpec {
                name: "github-runner-r1".to_string(),
                image: "img:tag".to_string(),
                network: "runner-net".to_string(),
                mounts: vec![("/data/runners/r1".to_string(), "/runner".to_string())],
                env: vec![("DOCKER_HOST".to_string(), "tcp://runner-dind:2375".to_string())],
            };
            cli.create(&spec).await.unwrap();
            assert_eq!(
                recorded_args(&dir),
                "create --name github-runner-r1 -v /data/runners/r1:/runner --network runner-net -e DOCKER_HOST=tcp://runner-dind:2375 img:tag"
            );
        }

        #[tokio::test]
        async fn test_slow_cli_times_out() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("docker");
            std::fs::write(&path, "#!/bin/sh\nexec sleep 5\n").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

            let cli = DockerCli {
                program: path.to_string_lossy().to_string(),
                timeout: Duration::from_millis(200),
                docker_host: None,
            };
            let err = cli.exists("x").await.unwrap_err();
            assert!(matches!(err, RuntimeError::TimedOut { .. }));
        }
    }
}

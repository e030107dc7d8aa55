//! Manager configuration
//!
//! The runner inventory and the fleet-wide settings live in one YAML file.
//! Loading goes through three steps, in order:
//! - parse the YAML
//! - apply environment overrides (deployment knobs such as ports and images)
//! - fill defaults, then validate
//!
//! Every write goes through [`ConfigStore::update`], which holds one lock
//! across load, mutate, validate and save. Only the runner inventory is
//! written back; overrides and defaults stay out of the file.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use fleet_core::domain::runner::{RunnerIdentity, container_name};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BASE_PATH: &str = "./runners";
pub const DEFAULT_NETWORK: &str = "runner-net";
pub const DEFAULT_AGENT_PORT: u16 = 8081;
pub const DEFAULT_DIND_HOST: &str = "runner-dind";
pub const DEFAULT_INSTALL_SCRIPT: &str = "/app/scripts/install-runner.sh";
pub const DEFAULT_IMAGE_REPO: &str = "ghcr.io/runner-fleet/runner-fleet";
pub const DEFAULT_IMAGE_TAG: &str = "v1.0.0";

/// Errors from loading, validating or saving the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// Looks up an environment variable; injectable so tests never touch the
/// process environment
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Lookup backed by the real process environment
pub fn process_env() -> EnvLookup {
    Arc::new(|key| std::env::var(key).ok())
}

// =============================================================================
// Configuration Types
// =============================================================================

/// Complete manager configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub runners: RunnersConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,

    /// Bind address; empty binds every interface
    pub addr: String,
}

/// Fleet-wide runner settings and the inventory itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnersConfig {
    /// Root directory of every runner install
    pub base_path: String,

    pub items: Vec<RunnerItem>,

    /// Run each runner in its own container instead of as a bare process
    pub container_mode: bool,

    pub container_image: String,
    pub container_network: String,
    pub agent_port: u16,

    /// `dind`, `host-socket` or `none`
    pub job_docker_backend: String,

    /// Docker-in-Docker host name; only used by the `dind` backend
    pub dind_host: String,

    /// Host-side path of `base_path`, for a manager that itself runs in a
    /// container
    pub volume_host_path: String,

    /// Script that downloads and unpacks a runner into its directory
    pub install_script: String,
}

/// One runner of the inventory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerItem {
    /// Display name, also the default directory name
    pub name: String,

    /// Directory under `base_path`; empty means `name`
    pub path: String,

    /// `org` or `repo`
    pub target_type: String,

    /// Organization name or `owner/repo`
    pub target: String,

    pub labels: Vec<String>,
}

impl RunnerItem {
    /// Directory segment under the base path
    pub fn dir_segment(&self) -> &str {
        let path = self.path.trim();
        if path.is_empty() { self.name.trim() } else { path }
    }

    /// Full install directory of this runner
    pub fn install_path(&self, base_path: &Path) -> PathBuf {
        base_path.join(self.dir_segment())
    }

    /// Identity handed to the lifecycle engine
    pub fn identity(&self, base_path: &Path) -> RunnerIdentity {
        RunnerIdentity {
            name: self.name.clone(),
            install_dir: self.install_path(base_path),
            target: self.target.clone(),
            labels: self.labels.clone(),
        }
    }

    /// Registration URL for this runner's target
    pub fn github_url(&self) -> String {
        format!("https://github.com/{}", self.target.trim())
    }
}

/// How a runner container's jobs reach a Docker daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDockerBackend {
    /// Shared Docker-in-Docker service over TCP
    Dind,
    /// Bind-mounted host socket
    HostSocket,
    None,
}

impl JobDockerBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "dind" => Some(JobDockerBackend::Dind),
            "host-socket" => Some(JobDockerBackend::HostSocket),
            "none" => Some(JobDockerBackend::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobDockerBackend::Dind => "dind",
            JobDockerBackend::HostSocket => "host-socket",
            JobDockerBackend::None => "none",
        }
    }
}

impl RunnersConfig {
    pub fn base_path(&self) -> &Path {
        Path::new(&self.base_path)
    }

    /// Configured job-Docker backend; unknown values were rejected by validation
    pub fn backend(&self) -> JobDockerBackend {
        JobDockerBackend::parse(&self.job_docker_backend).unwrap_or(JobDockerBackend::Dind)
    }

    pub fn find(&self, name: &str) -> Option<&RunnerItem> {
        self.items.iter().find(|item| item.name == name)
    }

    pub fn identities(&self) -> Vec<RunnerIdentity> {
        self.items
            .iter()
            .map(|item| item.identity(self.base_path()))
            .collect()
    }
}

// =============================================================================
// Loading
// =============================================================================

impl Config {
    /// Parses, overrides, defaults and validates a YAML document
    pub fn from_yaml(content: &str, env: &EnvLookup) -> Result<Self, ConfigError> {
        let mut config = Self::parse(content)?;
        config.resolve(env)?;
        Ok(config)
    }

    /// Loads the configuration file at `path`
    pub fn load(path: &Path, env: &EnvLookup) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        config.resolve(env)?;
        Ok(config)
    }

    /// Validates and writes the configuration to `path`
    #[cfg(test)]
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        self.write(path)
    }

    /// The document as written, without overrides or defaults
    fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(content).map_err(ConfigError::Parse)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Turns the file's values into the effective configuration
    fn resolve(&mut self, env: &EnvLookup) -> Result<(), ConfigError> {
        self.apply_env_overrides(env);
        self.apply_defaults(env);
        self.validate()
    }

    /// Writes a sibling temp file first and renames it over the target, so a
    /// crash never leaves a truncated inventory behind.
    fn write(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self).map_err(ConfigError::Serialize)?;

        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, content).map_err(write_err)?;
        std::fs::rename(&tmp, path).map_err(write_err)?;

        debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Applies deployment overrides from the environment
    ///
    /// Invalid values are ignored rather than rejected.
    pub fn apply_env_overrides(&mut self, env: &EnvLookup) {
        let get = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(port) = ["MANAGER_PORT", "SERVER_PORT"]
            .iter()
            .filter_map(|key| get(key))
            .find_map(|v| v.parse::<u16>().ok().filter(|p| *p > 0))
        {
            self.server.port = port;
        }
        if let Some(addr) = get("SERVER_ADDR") {
            self.server.addr = addr;
        }

        if let Some(mode) = get("CONTAINER_MODE") {
            match mode.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.runners.container_mode = true,
                "0" | "false" | "no" => self.runners.container_mode = false,
                _ => {}
            }
        }

        if let Some(base) = get("RUNNERS_BASE_PATH") {
            self.runners.base_path = base;
        }
        if let Some(network) = get("CONTAINER_NETWORK") {
            self.runners.container_network = network;
        }
        if let Some(backend) = get("JOB_DOCKER_BACKEND") {
            self.runners.job_docker_backend = backend;
        }
        if let Some(host) = get("DIND_HOST") {
            self.runners.dind_host = host;
        }
        if let Some(port) = get("AGENT_PORT").and_then(|v| v.parse::<u16>().ok()).filter(|p| *p > 0) {
            self.runners.agent_port = port;
        }

        // Later keys win
        for key in ["VOLUME_HOST_PATH", "RUNNERS_VOLUME_HOST_PATH"] {
            if let Some(path) = get(key) {
                self.runners.volume_host_path = path;
            }
        }
        for key in ["RUNNER_IMAGE", "CONTAINER_IMAGE"] {
            if let Some(image) = get(key) {
                self.runners.container_image = image;
            }
        }
    }

    /// Trims string settings and fills unset ones
    pub fn apply_defaults(&mut self, env: &EnvLookup) {
        let server = &mut self.server;
        server.addr = server.addr.trim().to_string();
        if server.port == 0 {
            server.port = DEFAULT_PORT;
        }

        let runners = &mut self.runners;
        for field in [
            &mut runners.base_path,
            &mut runners.container_image,
            &mut runners.container_network,
            &mut runners.dind_host,
            &mut runners.volume_host_path,
            &mut runners.install_script,
        ] {
            *field = field.trim().to_string();
        }

        if runners.base_path.is_empty() {
            runners.base_path = DEFAULT_BASE_PATH.to_string();
        }
        if runners.container_network.is_empty() {
            runners.container_network = DEFAULT_NETWORK.to_string();
        }
        if runners.agent_port == 0 {
            runners.agent_port = DEFAULT_AGENT_PORT;
        }
        if runners.install_script.is_empty() {
            runners.install_script = DEFAULT_INSTALL_SCRIPT.to_string();
        }

        runners.job_docker_backend = runners.job_docker_backend.trim().to_ascii_lowercase();
        if runners.job_docker_backend.is_empty() {
            runners.job_docker_backend = JobDockerBackend::Dind.as_str().to_string();
        }
        if runners.job_docker_backend == JobDockerBackend::Dind.as_str()
            && runners.dind_host.is_empty()
        {
            runners.dind_host = DEFAULT_DIND_HOST.to_string();
        }

        if runners.container_mode && runners.container_image.is_empty() {
            runners.container_image = default_runner_image(env);
        }
    }

    /// Rejects malformed or contradictory settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        let runners = &self.runners;

        let Some(backend) = JobDockerBackend::parse(&runners.job_docker_backend) else {
            return Err(invalid(format!(
                "runners.job_docker_backend must be one of dind/host-socket/none, got {:?}",
                runners.job_docker_backend
            )));
        };

        let volume_host_path = runners.volume_host_path.trim();
        if !runners.container_mode {
            if !volume_host_path.is_empty() {
                return Err(invalid(
                    "runners.volume_host_path can only be set when container_mode=true",
                ));
            }
            if backend != JobDockerBackend::Dind {
                return Err(invalid(format!(
                    "runners.job_docker_backend must be dind when container_mode=false (got {:?})",
                    backend.as_str()
                )));
            }
        } else {
            if !volume_host_path.is_empty() && !Path::new(volume_host_path).is_absolute() {
                return Err(invalid(
                    "runners.volume_host_path must be an absolute host path",
                ));
            }
            if volume_host_path.is_empty() && Path::new(&runners.base_path).starts_with("/app") {
                return Err(invalid(format!(
                    "runners.volume_host_path is required when container_mode=true and base_path={}",
                    runners.base_path
                )));
            }
        }

        let mut names: HashSet<&str> = HashSet::new();
        let mut install_paths: HashMap<PathBuf, &str> = HashMap::new();
        let mut container_names: HashMap<String, &str> = HashMap::new();

        for (i, item) in runners.items.iter().enumerate() {
            let name = item.name.trim();
            let path = item.path.trim();
            let target_type = item.target_type.trim().to_ascii_lowercase();
            let target = item.target.trim();

            if name.is_empty() {
                return Err(invalid(format!("runners.items[{}].name cannot be empty", i)));
            }
            if !is_safe_segment(name) {
                return Err(invalid(format!(
                    "runners.items[{}].name contains illegal characters (.. / \\ are not allowed): {}",
                    i, name
                )));
            }
            if !path.is_empty() && !is_safe_segment(path) {
                return Err(invalid(format!(
                    "runners.items[{}].path contains illegal characters (.. / \\ are not allowed): {}",
                    i, path
                )));
            }
            validate_target(&target_type, target)
                .map_err(|msg| invalid(format!("runners.items[{}].{}", i, msg)))?;

            if !names.insert(name) {
                return Err(invalid(format!("duplicate runner name: {}", name)));
            }

            let install_path = item.install_path(runners.base_path());
            if let Some(existing) = install_paths.get(&install_path) {
                return Err(invalid(format!(
                    "install directory conflict: {} and {} both map to {}",
                    existing,
                    name,
                    install_path.display()
                )));
            }
            install_paths.insert(install_path, name);

            if runners.container_mode {
                let cn = container_name(name);
                if let Some(existing) = container_names.get(&cn) {
                    return Err(invalid(format!(
                        "container name conflict: {} and {} both map to {}",
                        existing, name, cn
                    )));
                }
                container_names.insert(cn, name);
            }
        }

        Ok(())
    }
}

/// Checks a target against its type; the message names no config location
pub fn validate_target(target_type: &str, target: &str) -> Result<(), String> {
    if target_type != "org" && target_type != "repo" {
        return Err("target_type must be org or repo".to_string());
    }
    if target.is_empty() {
        return Err("target cannot be empty".to_string());
    }

    if target_type == "org" && target.contains('/') {
        return Err("target cannot contain / when target_type=org".to_string());
    }
    if target_type == "repo" {
        let valid = match target.split_once('/') {
            Some((owner, repo)) => {
                !owner.trim().is_empty() && !repo.trim().is_empty() && !repo.contains('/')
            }
            None => false,
        };
        if !valid {
            return Err("target must be owner/repo when target_type=repo".to_string());
        }
    }
    Ok(())
}

/// True when a name or path is usable as a single directory segment
pub fn is_safe_segment(value: &str) -> bool {
    !value.is_empty() && !value.contains("..") && !value.contains('/') && !value.contains('\\')
}

/// Runner image used when none is configured
///
/// Follows the manager's own image when `MANAGER_IMAGE` is set, so both
/// halves of a deployment stay on one release.
pub fn default_runner_image(env: &EnvLookup) -> String {
    if let Some(manager) = env("MANAGER_IMAGE")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    {
        let last_segment = manager.rsplit('/').next().unwrap_or(&manager);
        return if last_segment.contains(':') {
            format!("{}-runner", manager)
        } else {
            format!("{}:latest-runner", manager)
        };
    }

    let tag = env("FLEET_IMAGE_TAG")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_IMAGE_TAG.to_string());
    format!("{}:{}-runner", DEFAULT_IMAGE_REPO, tag)
}

// =============================================================================
// Config Store
// =============================================================================

/// Owner of the configuration file
///
/// Created once at startup and shared by the API and background tasks.
pub struct ConfigStore {
    path: PathBuf,
    env: EnvLookup,
    lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>, env: EnvLookup) -> Self {
        Self {
            path: path.into(),
            env,
            lock: Mutex::new(()),
        }
    }

    /// Reads the current configuration
    pub async fn load(&self) -> Result<Config, ConfigError> {
        let _guard = self.lock.lock().await;
        Config::load(&self.path, &self.env)
    }

    /// Loads, mutates, validates and saves under one lock
    ///
    /// `mutate` sees the effective configuration, but only the runner
    /// inventory is written back: environment overrides and defaults never
    /// end up in the file. Nothing is written when `mutate` fails or the
    /// result does not validate.
    pub async fn update<T, E, F>(&self, mutate: F) -> Result<T, E>
    where
        F: FnOnce(&mut Config) -> Result<T, E>,
        E: From<ConfigError>,
    {
        let _guard = self.lock.lock().await;

        let mut stored = Config::read_file(&self.path)?;
        let mut config = stored.clone();
        config.resolve(&self.env)?;
        let value = mutate(&mut config)?;
        config.validate()?;

        stored.runners.items = config.runners.items;
        stored.write(&self.path)?;

        info!("Updated config {}", self.path.display());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> EnvLookup {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(move |key| map.get(key).cloned())
    }

    fn no_env() -> EnvLookup {
        env(&[])
    }

    fn item(name: &str, target_type: &str, target: &str) -> RunnerItem {
        RunnerItem {
            name: name.to_string(),
            target_type: target_type.to_string(),
            target: target.to_string(),
            ..Default::default()
        }
    }

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.apply_defaults(&no_env());
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml("server: {}\nrunners: {}\n", &no_env()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.runners.base_path, "./runners");
        assert_eq!(config.runners.container_network, "runner-net");
        assert_eq!(config.runners.agent_port, 8081);
        assert_eq!(config.runners.job_docker_backend, "dind");
        assert_eq!(config.runners.dind_host, "runner-dind");
        assert_eq!(config.runners.install_script, DEFAULT_INSTALL_SCRIPT);
        assert!(config.runners.container_image.is_empty());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_yaml("", &no_env()).unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_port_overrides() {
        let config =
            Config::from_yaml("server: { port: 9000 }", &env(&[("SERVER_PORT", "7000")])).unwrap();
        assert_eq!(config.server.port, 7000);

        let config = Config::from_yaml(
            "server: { port: 9000 }",
            &env(&[("MANAGER_PORT", "6000"), ("SERVER_PORT", "7000")]),
        )
        .unwrap();
        assert_eq!(config.server.port, 6000);

        // Invalid first candidate falls through to the next one
        let config = Config::from_yaml(
            "server: { port: 9000 }",
            &env(&[("MANAGER_PORT", "abc"), ("SERVER_PORT", "7000")]),
        )
        .unwrap();
        assert_eq!(config.server.port, 7000);

        let config =
            Config::from_yaml("server: { port: 9000 }", &env(&[("SERVER_PORT", "0")])).unwrap();
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_container_mode_override() {
        let yaml = "runners: { volume_host_path: /data/runners }";
        for value in ["1", "true", "TRUE", "yes"] {
            let config = Config::from_yaml(yaml, &env(&[("CONTAINER_MODE", value)])).unwrap();
            assert!(config.runners.container_mode, "{}", value);
        }

        let config = Config::from_yaml(
            "runners: { container_mode: true }",
            &env(&[("CONTAINER_MODE", "maybe")]),
        )
        .unwrap();
        assert!(config.runners.container_mode);
    }

    #[test]
    fn test_later_env_keys_win() {
        let config = Config::from_yaml(
            "runners: { container_mode: true }",
            &env(&[
                ("VOLUME_HOST_PATH", "/a"),
                ("RUNNERS_VOLUME_HOST_PATH", "/b"),
                ("RUNNER_IMAGE", "img:one"),
                ("CONTAINER_IMAGE", "img:two"),
            ]),
        )
        .unwrap();
        assert_eq!(config.runners.volume_host_path, "/b");
        assert_eq!(config.runners.container_image, "img:two");
    }

    #[test]
    fn test_runner_env_overrides() {
        let config = Config::from_yaml(
            "runners: { container_mode: true }",
            &env(&[
                ("RUNNERS_BASE_PATH", "/srv/runners"),
                ("CONTAINER_NETWORK", "ci-net"),
                ("JOB_DOCKER_BACKEND", "host-socket"),
                ("AGENT_PORT", "9091"),
            ]),
        )
        .unwrap();
        assert_eq!(config.runners.base_path, "/srv/runners");
        assert_eq!(config.runners.container_network, "ci-net");
        assert_eq!(config.runners.backend(), JobDockerBackend::HostSocket);
        assert_eq!(config.runners.agent_port, 9091);
        // No dind host for other backends
        assert!(config.runners.dind_host.is_empty());
    }

    #[test]
    fn test_default_runner_image() {
        assert_eq!(
            default_runner_image(&env(&[("MANAGER_IMAGE", "ghcr.io/acme/fleet:v2")])),
            "ghcr.io/acme/fleet:v2-runner"
        );
        assert_eq!(
            default_runner_image(&env(&[("MANAGER_IMAGE", "localhost:5000/acme/fleet")])),
            "localhost:5000/acme/fleet:latest-runner"
        );
        assert_eq!(
            default_runner_image(&env(&[("FLEET_IMAGE_TAG", "v3.1.0")])),
            "ghcr.io/runner-fleet/runner-fleet:v3.1.0-runner"
        );
        assert_eq!(
            default_runner_image(&no_env()),
            "ghcr.io/runner-fleet/runner-fleet:v1.0.0-runner"
        );
    }

    #[test]
    fn test_validate_backend() {
        let mut config = valid_config();
        config.runners.job_docker_backend = "bad-backend".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("job_docker_backend"));

        let mut config = valid_config();
        config.runners.job_docker_backend = "host-socket".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("container_mode=false"));

        config.runners.container_mode = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_volume_host_path() {
        let mut config = valid_config();
        config.runners.volume_host_path = "/abs/path".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("volume_host_path"));

        config.runners.container_mode = true;
        assert!(config.validate().is_ok());

        config.runners.volume_host_path = "relative/path".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("absolute"));

        config.runners.volume_host_path = String::new();
        config.runners.base_path = "/app/runners".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("required"));
    }

    #[test]
    fn test_validate_items() {
        let cases = [
            (item("", "org", "acme"), "cannot be empty"),
            (item("a/b", "org", "acme"), "illegal characters"),
            (item("..x", "org", "acme"), "illegal characters"),
            (item("r1", "team", "acme"), "org or repo"),
            (item("r1", "org", ""), "target cannot be empty"),
            (item("r1", "org", "acme/repo"), "cannot contain /"),
            (item("r1", "repo", "acme"), "owner/repo"),
            (item("r1", "repo", "acme/"), "owner/repo"),
            (item("r1", "repo", "a/b/c"), "owner/repo"),
        ];

        for (runner, expected) in cases {
            let mut config = valid_config();
            config.runners.items.push(runner.clone());
            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains(expected), "{:?}: {}", runner, err);
        }

        let mut config = valid_config();
        let mut bad_path = item("r1", "org", "acme");
        bad_path.path = "x\\y".to_string();
        config.runners.items.push(bad_path);
        assert!(config.validate().unwrap_err().to_string().contains("path"));
    }

    #[test]
    fn test_validate_duplicates() {
        let mut config = valid_config();
        config.runners.items = vec![item("r1", "org", "acme"), item("r1", "org", "acme")];
        assert!(config.validate().unwrap_err().to_string().contains("duplicate"));

        let mut shared_dir = item("r2", "org", "acme");
        shared_dir.path = "r1".to_string();
        config.runners.items = vec![item("r1", "org", "acme"), shared_dir];
        assert!(config.validate().unwrap_err().to_string().contains("install directory"));

        // Distinct names, same container name
        config.runners.items = vec![item("a.b", "org", "acme"), item("a b", "org", "acme")];
        assert!(config.validate().is_ok());
        config.runners.container_mode = true;
        assert!(config.validate().unwrap_err().to_string().contains("container name"));
    }

    #[test]
    fn test_install_path() {
        let base = Path::new("/base");
        let mut runner = item("r1", "org", "acme");
        assert_eq!(runner.install_path(base), PathBuf::from("/base/r1"));
        runner.path = "sub".to_string();
        assert_eq!(runner.install_path(base), PathBuf::from("/base/sub"));
        assert_eq!(runner.identity(base).install_dir, PathBuf::from("/base/sub"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = valid_config();
        config.server.addr = "127.0.0.1".to_string();
        let mut runner = item("r1", "repo", "owner/repo");
        runner.labels = vec!["a".to_string(), "b".to_string()];
        config.runners.items.push(runner.clone());
        config.save(&path).unwrap();

        let loaded = Config::load(&path, &no_env()).unwrap();
        assert_eq!(loaded.server.addr, "127.0.0.1");
        assert_eq!(loaded.runners.items, vec![runner]);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(&dir.path().join("absent.yaml"), &no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[tokio::test]
    async fn test_store_update_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        valid_config().save(&path).unwrap();

        let store = ConfigStore::new(&path, no_env());
        store
            .update(|config| {
                config.runners.items.push(item("added", "org", "acme"));
                Ok::<_, ConfigError>(())
            })
            .await
            .unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.runners.items.len(), 1);
        assert_eq!(loaded.runners.items[0].name, "added");
    }

    #[tokio::test]
    async fn test_store_update_rejects_invalid_result() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        valid_config().save(&path).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let store = ConfigStore::new(&path, no_env());
        let result = store
            .update(|config| {
                config.runners.items.push(item("bad/name", "org", "acme"));
                Ok::<_, ConfigError>(())
            })
            .await;
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_store_update_keeps_env_values_out_of_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "runners:\n  base_path: /srv/runners\n").unwrap();

        let store = ConfigStore::new(
            &path,
            env(&[("CONTAINER_MODE", "true"), ("CONTAINER_IMAGE", "env/runner:1")]),
        );
        let image = store
            .update(|config| {
                config.runners.items.push(item("added", "org", "acme"));
                Ok::<_, ConfigError>(config.runners.container_image.clone())
            })
            .await
            .unwrap();
        assert_eq!(image, "env/runner:1");

        let written: Config = serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(!written.runners.container_mode);
        assert!(written.runners.container_image.is_empty());
        assert!(written.runners.job_docker_backend.is_empty());
        assert_eq!(written.runners.base_path, "/srv/runners");
        assert_eq!(written.runners.items.len(), 1);

        let loaded = store.load().await.unwrap();
        assert!(loaded.runners.container_mode);
        assert_eq!(loaded.runners.items[0].name, "added");
    }

    #[tokio::test]
    async fn test_store_concurrent_updates_keep_every_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        valid_config().save(&path).unwrap();

        let store = Arc::new(ConfigStore::new(&path, no_env()));
        let mut handles = Vec::new();
        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .update(|config| {
                        config.runners.items.push(item(&format!("r{}", i), "org", "acme"));
                        Ok::<_, ConfigError>(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.load().await.unwrap().runners.items.len(), 10);
    }
}

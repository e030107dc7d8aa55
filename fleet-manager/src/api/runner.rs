//! Runner API Handlers
//!
//! HTTP endpoints for the runner inventory and runner lifecycle.

use axum::{
    Json,
    extract::{Path, State},
};
use fleet_core::domain::registration::{GitHubStatus, RegistrationResult};
use fleet_core::domain::runner::{Probe, Status};
use fleet_core::dto::runner::{
    AddRunner, ProbeInfo, RunnerActionResponse, RunnerList, RunnerView, UpdateRunner,
    normalize_labels,
};
use fleet_core::install;
use std::path::Path as FsPath;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::config::{RunnerItem, RunnersConfig, is_safe_segment, validate_target};
use crate::scheduler::RegistrationJob;
use crate::service::{EnsureOutcome, remove_install_dir};

/// Attempts at finding a free name before giving up
const NAME_SUFFIX_ATTEMPTS: usize = 20;
const NAME_SUFFIX_LEN: usize = 6;

// =============================================================================
// Runner Query Endpoints
// =============================================================================

/// GET /api/runners
/// List all runners with their live status
pub async fn list_runners(State(state): State<AppState>) -> ApiResult<Json<RunnerList>> {
    tracing::debug!("Listing all runners");

    let config = state.store.load().await?;
    let mut runners = Vec::with_capacity(config.runners.items.len());
    for item in &config.runners.items {
        let probe = state
            .supervisor
            .probe(&item.identity(config.runners.base_path()))
            .await;
        runners.push(runner_view(item, &config.runners, &probe));
    }

    Ok(Json(RunnerList { runners }))
}

/// GET /api/runners/{name}
/// Get one runner with its live status
pub async fn get_runner(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<RunnerView>> {
    tracing::debug!("Getting runner: {}", name);

    let config = state.store.load().await?;
    let item = find_item(&config.runners, &name)?;
    let probe = state
        .supervisor
        .probe(&item.identity(config.runners.base_path()))
        .await;

    Ok(Json(runner_view(item, &config.runners, &probe)))
}

// =============================================================================
// Inventory Mutation
// =============================================================================

/// POST /api/runners
/// Add a runner; with a registration token it is installed and registered
/// in the background
pub async fn add_runner(
    State(state): State<AppState>,
    Json(req): Json<AddRunner>,
) -> ApiResult<Json<RunnerActionResponse>> {
    let requested = req.name.trim().to_string();
    let path = req.path.trim().to_string();
    let target_type = req.target_type.trim().to_ascii_lowercase();
    let target = req.target.trim().to_string();
    let labels = normalize_labels(&req.labels);
    let token = registration_token(req.registration_token.as_deref());

    if requested.is_empty() || target_type.is_empty() || target.is_empty() {
        return Err(ApiError::BadRequest(
            "name, target_type and target are required".to_string(),
        ));
    }
    validate_target(&target_type, &target).map_err(ApiError::BadRequest)?;
    check_segments(&requested, &path)?;

    let config = state.store.load().await?;
    let name = unique_name(&config.runners, &requested)?;
    if name != requested {
        tracing::info!("Runner name {} taken, using {}", requested, name);
    }

    let item = RunnerItem {
        name: name.clone(),
        path,
        target_type,
        target,
        labels,
    };
    let base_path = config.runners.base_path().to_path_buf();
    let install_dir = item.install_path(&base_path);
    std::fs::create_dir_all(&install_dir).map_err(|e| {
        ApiError::InternalError(format!(
            "failed to create install dir {}: {}",
            install_dir.display(),
            e
        ))
    })?;

    let added = item.clone();
    state
        .store
        .update(move |cfg| {
            if cfg.runners.find(&added.name).is_some() {
                return Err(ApiError::Conflict(format!(
                    "runner {} already exists",
                    added.name
                )));
            }
            cfg.runners.items.push(added);
            Ok(())
        })
        .await?;
    tracing::info!("Added runner {} ({})", name, install_dir.display());

    let mut response = RunnerActionResponse {
        name: Some(name.clone()),
        install_dir: Some(install_dir.display().to_string()),
        ..Default::default()
    };

    let Some(token) = token else {
        response.message =
            "runner added; provide a registration token to install and register it".to_string();
        return Ok(Json(response));
    };

    match queue_registration(&state, &config.runners, &item, token)? {
        Registration::Queued { install: false } => {
            response.queued = Some(true);
            response.message = "runner added; registration queued".to_string();
        }
        Registration::Queued { install: true } => {
            response.queued = Some(true);
            response.message = "runner added; install and registration queued".to_string();
        }
        Registration::Manual(hint) => response.message = format!("runner added; {}", hint),
    }
    Ok(Json(response))
}

/// PUT /api/runners/{name}
/// Update a runner's settings; the name cannot change
pub async fn update_runner(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<UpdateRunner>,
) -> ApiResult<Json<RunnerActionResponse>> {
    if !is_safe_segment(&name) {
        return Err(unsafe_name(&name));
    }
    let body_name = req.name.trim();
    if !body_name.is_empty() && body_name != name {
        return Err(ApiError::BadRequest(
            "runner name cannot be changed".to_string(),
        ));
    }

    let path = req.path.trim().to_string();
    let target_type = req.target_type.trim().to_ascii_lowercase();
    let target = req.target.trim().to_string();
    if target_type.is_empty() || target.is_empty() {
        return Err(ApiError::BadRequest(
            "target_type and target are required".to_string(),
        ));
    }
    validate_target(&target_type, &target).map_err(ApiError::BadRequest)?;
    check_segments(&name, &path)?;
    let labels = normalize_labels(&req.labels);
    let token = registration_token(req.registration_token.as_deref());

    let target_name = name.clone();
    let (item, runners) = state
        .store
        .update(move |cfg| {
            let existing = cfg
                .runners
                .items
                .iter_mut()
                .find(|i| i.name == target_name)
                .ok_or_else(|| ApiError::NotFound(format!("Runner {} not found", target_name)))?;
            existing.path = path;
            existing.target_type = target_type;
            existing.target = target;
            existing.labels = labels;
            Ok::<_, ApiError>((existing.clone(), cfg.runners.clone()))
        })
        .await?;
    tracing::info!("Updated runner {}", name);

    let identity = item.identity(runners.base_path());
    let mut message = "runner updated".to_string();
    let mut queued = None;
    if let Some(token) = token {
        match queue_registration(&state, &runners, &item, token)? {
            Registration::Queued { install } => {
                queued = Some(true);
                message.push_str(if install {
                    "; install and registration queued"
                } else {
                    "; registration queued"
                });
            }
            Registration::Manual(hint) => message.push_str(&format!("; {}", hint)),
        }
    }

    // A queued registration starts the runner once it succeeds
    let mut started = false;
    if queued.is_none() {
        match state.supervisor.ensure_started(&identity).await {
            Ok(EnsureOutcome::Started) => {
                started = true;
                message.push_str(", auto-started");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Auto-start after update failed for {}: {}", name, e);
                message.push_str(&format!(", but auto-start failed: {}", e));
            }
        }
    }

    let probe = state.supervisor.probe(&identity).await;
    Ok(Json(RunnerActionResponse {
        message,
        name: Some(name),
        queued,
        started: Some(started),
        runner: Some(runner_view(&item, &runners, &probe)),
        ..Default::default()
    }))
}

/// DELETE /api/runners/{name}
/// Remove a runner, its container and its install directory
pub async fn remove_runner(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<RunnerActionResponse>> {
    tracing::info!("Removing runner: {}", name);

    let config = state.store.load().await?;
    let item = find_item(&config.runners, &name)?;
    let base_path = config.runners.base_path();
    let identity = item.identity(base_path);

    if let Err(e) = state.supervisor.remove(&identity).await {
        tracing::warn!("Failed to tear down runner {}: {}", name, e);
    }
    if let Err(e) = remove_install_dir(base_path, &identity.install_dir) {
        tracing::warn!("Keeping install dir of {}: {}", name, e);
    }

    let target_name = name.clone();
    state
        .store
        .update(move |cfg| {
            let before = cfg.runners.items.len();
            cfg.runners.items.retain(|i| i.name != target_name);
            if cfg.runners.items.len() == before {
                return Err(ApiError::NotFound(format!("Runner {} not found", target_name)));
            }
            Ok(())
        })
        .await?;
    state.supervisor.forget(&name);

    Ok(Json(RunnerActionResponse {
        name: Some(name),
        ..RunnerActionResponse::message("runner removed")
    }))
}

// =============================================================================
// Runner Lifecycle
// =============================================================================

/// POST /api/runners/{name}/start
/// Start an installed runner
pub async fn start_runner(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<RunnerActionResponse>> {
    tracing::info!("Start requested for runner: {}", name);

    let config = state.store.load().await?;
    let item = find_item(&config.runners, &name)?;
    let identity = item.identity(config.runners.base_path());

    let probe = state.supervisor.probe(&identity).await;
    // An unknown status still gets a start attempt; starting is idempotent
    if probe.error.is_none() {
        if probe.status != Status::Installed {
            return Err(ApiError::BadRequest(format!(
                "only installed runners can be started, current status: {}",
                probe.status
            )));
        }
        if probe.running {
            return Ok(Json(RunnerActionResponse::message("already running")));
        }
    }

    state
        .supervisor
        .start(&identity)
        .await
        .map_err(|e| ApiError::control("start", e))?;

    Ok(Json(RunnerActionResponse {
        probe: probe.error.as_ref().map(ProbeInfo::from),
        ..RunnerActionResponse::message("runner started")
    }))
}

/// POST /api/runners/{name}/stop
/// Stop a running runner
pub async fn stop_runner(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<RunnerActionResponse>> {
    tracing::info!("Stop requested for runner: {}", name);

    let config = state.store.load().await?;
    let item = find_item(&config.runners, &name)?;
    let identity = item.identity(config.runners.base_path());

    let probe = state.supervisor.probe(&identity).await;
    if probe.error.is_none() && !probe.running {
        return Ok(Json(RunnerActionResponse::message("not running")));
    }

    state
        .supervisor
        .stop(&identity)
        .await
        .map_err(|e| ApiError::control("stop", e))?;

    Ok(Json(RunnerActionResponse {
        probe: probe.error.as_ref().map(ProbeInfo::from),
        ..RunnerActionResponse::message("runner stopped")
    }))
}

// =============================================================================
// Helpers
// =============================================================================

/// How a registration request was handled
enum Registration {
    /// Job accepted; `install` when the runner still has to be unpacked
    Queued { install: bool },

    /// Neither `config.sh` nor the install script exists
    Manual(String),
}

fn registration_token(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Queues install and registration for a runner already in the inventory
///
/// A refused job is reported with the runner's name and install dir, since
/// the inventory change has already been saved.
fn queue_registration(
    state: &AppState,
    runners: &RunnersConfig,
    item: &RunnerItem,
    token: String,
) -> ApiResult<Registration> {
    let base_path = runners.base_path().to_path_buf();
    let install_dir = item.install_path(&base_path);

    let has_config_script = install_dir.join(install::config_script_name()).exists();
    let install_script = FsPath::new(&runners.install_script);
    if !has_config_script && !install_script.exists() {
        return Ok(Registration::Manual(format!(
            "{} not found and no install script at {}; unpack the runner into {} and register it manually",
            install::config_script_name(),
            install_script.display(),
            install_dir.display()
        )));
    }

    let job = RegistrationJob {
        runner: item.identity(&base_path),
        base_path,
        url: item.github_url(),
        token,
    };
    state
        .queue
        .enqueue(job)
        .map_err(|e| ApiError::RegistrationNotQueued {
            message: e.to_string(),
            name: item.name.clone(),
            install_dir: install_dir.display().to_string(),
        })?;

    tracing::info!("Queued registration for runner {}", item.name);
    Ok(Registration::Queued {
        install: !has_config_script,
    })
}

fn find_item<'a>(runners: &'a RunnersConfig, name: &str) -> ApiResult<&'a RunnerItem> {
    if !is_safe_segment(name) {
        return Err(unsafe_name(name));
    }
    runners
        .find(name)
        .ok_or_else(|| ApiError::NotFound(format!("Runner {} not found", name)))
}

fn unsafe_name(name: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "runner name contains illegal characters (.. / \\ are not allowed): {}",
        name
    ))
}

fn check_segments(name: &str, path: &str) -> ApiResult<()> {
    if !is_safe_segment(name) {
        return Err(unsafe_name(name));
    }
    if !path.is_empty() && !is_safe_segment(path) {
        return Err(ApiError::BadRequest(format!(
            "path contains illegal characters (.. / \\ are not allowed): {}",
            path
        )));
    }
    Ok(())
}

/// Returns `name`, or `name-xxxxxx` when it is taken
fn unique_name(runners: &RunnersConfig, name: &str) -> ApiResult<String> {
    if runners.find(name).is_none() {
        return Ok(name.to_string());
    }

    for _ in 0..NAME_SUFFIX_ATTEMPTS {
        let suffix: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(NAME_SUFFIX_LEN)
            .collect();
        let candidate = format!("{}-{}", name, suffix);
        if runners.find(&candidate).is_none() {
            return Ok(candidate);
        }
    }

    Err(ApiError::Conflict(format!(
        "runner {} already exists and no free name was found",
        name
    )))
}

/// Builds the view of one runner from its config, probe and record files
fn runner_view(item: &RunnerItem, runners: &RunnersConfig, probe: &Probe) -> RunnerView {
    let install_dir = item.install_path(runners.base_path());
    let registration = RegistrationResult::read(&install_dir);
    let github = GitHubStatus::read(&install_dir);

    RunnerView {
        name: item.name.clone(),
        path: item.dir_segment().to_string(),
        target_type: item.target_type.clone(),
        target: item.target.clone(),
        labels: item.labels.clone(),
        install_dir: install_dir.display().to_string(),
        status: probe.status,
        running: probe.running,
        probe: probe.error.as_ref().map(ProbeInfo::from),
        job_docker_backend: runners
            .container_mode
            .then(|| runners.backend().as_str().to_string()),
        registration_message: registration.as_ref().map(|r| r.message.clone()),
        registration_checked_at: registration.as_ref().map(|r| r.at),
        registered_on_github: github.as_ref().map(|g| g.registered),
        github_check_at: github.as_ref().map(|g| g.last_check),
    }
}

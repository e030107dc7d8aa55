//! GitHub registration check
//!
//! Asks the GitHub REST API whether each runner shows up in its org or
//! repository and records the answer in `.github_status.json`. Only runners
//! whose install directory holds a `.github_check_token` file are checked;
//! the token never leaves that file except as a bearer header.

use fleet_core::domain::registration::GitHubStatus;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, RunnerItem, validate_target};

pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// Per-runner file holding a token allowed to list runners
pub const TOKEN_FILE: &str = ".github_check_token";

pub const CHECK_TIMEOUT: Duration = Duration::from_secs(30);

const PER_PAGE: u32 = 100;
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "runner-fleet-manager";

#[derive(Debug, Deserialize)]
struct RunnersPage {
    #[serde(default)]
    runners: Vec<ListedRunner>,
}

#[derive(Debug, Deserialize)]
struct ListedRunner {
    name: String,
}

/// Client for the GitHub runners listing
#[derive(Clone)]
pub struct GitHubChecker {
    client: Client,
    api_base: String,
}

impl Default for GitHubChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl GitHubChecker {
    pub fn new() -> Self {
        Self::with_api_base(GITHUB_API_BASE)
    }

    /// Points the checker at another API host
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(CHECK_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Checks every runner of the inventory that has a token file
    ///
    /// # Returns
    /// Number of runners checked
    pub async fn check_all(&self, config: &Config) -> usize {
        let base = config.runners.base_path();
        let mut checked = 0;

        for item in &config.runners.items {
            let install_dir = item.install_path(base);
            if self.check(item, &install_dir).await.is_some() {
                checked += 1;
            }
        }

        if checked > 0 {
            info!("Checked GitHub registration of {} runner(s)", checked);
        }
        checked
    }

    /// Checks one runner and records the result
    ///
    /// # Returns
    /// `None` when the runner has no token file and was skipped
    pub async fn check(&self, item: &RunnerItem, install_dir: &Path) -> Option<bool> {
        let token = read_token(install_dir)?;

        let registered = match self.is_listed(item, &token).await {
            Ok(listed) => listed,
            Err(e) => {
                debug!("GitHub check for {} failed: {}", item.name, e);
                false
            }
        };

        if let Err(e) = GitHubStatus::now(registered).write(install_dir) {
            warn!("Failed to write GitHub status for {}: {}", item.name, e);
        }
        Some(registered)
    }

    async fn is_listed(&self, item: &RunnerItem, token: &str) -> Result<bool, String> {
        let target_type = item.target_type.trim().to_ascii_lowercase();
        let target = item.target.trim();
        validate_target(&target_type, target)?;

        let scope = if target_type == "org" { "orgs" } else { "repos" };
        let url = format!(
            "{}/{}/{}/actions/runners?per_page={}",
            self.api_base, scope, target, PER_PAGE
        );

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("GitHub returned {}", response.status()));
        }

        let page: RunnersPage = response.json().await.map_err(|e| e.to_string())?;
        Ok(page.runners.iter().any(|r| r.name == item.name))
    }
}

fn read_token(install_dir: &Path) -> Option<String> {
    let content = std::fs::read_to_string(install_dir.join(TOKEN_FILE)).ok()?;
    let token = content.trim();
    (!token.is_empty()).then(|| token.to_string())
}

//! Fleet Agent Client
//!
//! HTTP client for the control agent running inside each runner container.
//!
//! The manager only ever needs two calls on the hot path:
//! - `GET /status` to learn whether the runner is registered and running
//! - `POST /start` to launch (or nudge) the runner process
//!
//! Every call carries its own short timeout, and non-2xx answers keep a
//! bounded slice of the agent's response body so operators see the agent's
//! diagnostic text rather than a bare status code.
//!
//! # Example
//!
//! ```no_run
//! use fleet_client::AgentClient;
//!
//! #[tokio::main]
//! async fn main() -> fleet_client::Result<()> {
//!     let client = AgentClient::new();
//!     let status = client.get_status("http://github-runner-r1:8081").await?;
//!     println!("runner is {}", status.status);
//!     Ok(())
//! }
//! ```

pub mod error;

pub use error::{AgentError, Result};
pub use fleet_core::dto::agent::{AgentMessage, AgentStatus};

use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

/// Timeout for `GET /status`
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for `POST /start` and `POST /stop`
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Most bytes of an error body kept in [`AgentError::Http`]
pub const ERROR_BODY_LIMIT: usize = 4096;

/// The two agent calls the manager depends on
///
/// Implemented by [`AgentClient`]; tests substitute in-memory fakes.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Runner status as reported by the agent
    async fn status(&self, endpoint: &str) -> Result<AgentStatus>;

    /// Asks the agent to start the runner; already running is success
    async fn start(&self, endpoint: &str) -> Result<()>;
}

/// HTTP client for the in-container control agent
#[derive(Debug, Clone)]
pub struct AgentClient {
    client: Client,
    status_timeout: Duration,
    start_timeout: Duration,
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentClient {
    /// Create a client with the default timeouts
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Create a client around a preconfigured reqwest client
    ///
    /// The per-call timeouts still apply on top of whatever the given client
    /// enforces; the shorter one wins.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            status_timeout: DEFAULT_STATUS_TIMEOUT,
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }

    /// Override the per-call timeouts
    pub fn with_timeouts(mut self, status: Duration, start: Duration) -> Self {
        self.status_timeout = status;
        self.start_timeout = start;
        self
    }

    // =============================================================================
    // Agent Endpoints
    // =============================================================================

    /// Query `GET /status`
    ///
    /// # Arguments
    /// * `endpoint` - Agent base URL, e.g. `http://github-runner-r1:8081`
    pub async fn get_status(&self, endpoint: &str) -> Result<AgentStatus> {
        let url = url(endpoint, "status");
        let response = self
            .client
            .get(&url)
            .timeout(self.status_timeout)
            .send()
            .await
            .map_err(|e| send_error(endpoint, self.status_timeout, e))?;

        let response = check_status(response).await?;
        response.json::<AgentStatus>().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::TimedOut {
                    endpoint: endpoint.to_string(),
                    timeout: self.status_timeout,
                }
            } else {
                AgentError::Parse(format!("invalid status body from {}: {}", url, e))
            }
        })
    }

    /// Trigger `POST /start`
    pub async fn start_runner(&self, endpoint: &str) -> Result<()> {
        self.post(endpoint, "start").await
    }

    /// Trigger `POST /stop`
    pub async fn stop_runner(&self, endpoint: &str) -> Result<()> {
        self.post(endpoint, "stop").await
    }

    /// Check `GET /health`
    pub async fn health(&self, endpoint: &str) -> Result<()> {
        let response = self
            .client
            .get(url(endpoint, "health"))
            .timeout(self.status_timeout)
            .send()
            .await
            .map_err(|e| send_error(endpoint, self.status_timeout, e))?;

        check_status(response).await.map(|_| ())
    }

    async fn post(&self, endpoint: &str, action: &str) -> Result<()> {
        let response = self
            .client
            .post(url(endpoint, action))
            .timeout(self.start_timeout)
            .send()
            .await
            .map_err(|e| send_error(endpoint, self.start_timeout, e))?;

        let response = check_status(response).await?;
        debug!("Agent {} accepted {}: {}", endpoint, action, response.status());
        Ok(())
    }
}

#[async_trait]
impl Agent for AgentClient {
    async fn status(&self, endpoint: &str) -> Result<AgentStatus> {
        self.get_status(endpoint).await
    }

    async fn start(&self, endpoint: &str) -> Result<()> {
        self.start_runner(endpoint).await
    }
}

// =============================================================================
// Response Handlers
// =============================================================================

fn url(endpoint: &str, path: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), path)
}

fn send_error(endpoint: &str, timeout: Duration, err: reqwest::Error) -> AgentError {
    if err.is_timeout() {
        AgentError::TimedOut {
            endpoint: endpoint.to_string(),
            timeout,
        }
    } else {
        AgentError::Connect {
            endpoint: endpoint.to_string(),
            source: err,
        }
    }
}

/// Passes 2xx responses through and turns anything else into [`AgentError::Http`]
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = read_error_body(response).await;
    Err(AgentError::Http {
        status: status.as_u16(),
        body,
    })
}

/// Reads at most [`ERROR_BODY_LIMIT`] bytes of a response body
async fn read_error_body(mut response: Response) -> String {
    let mut buf: Vec<u8> = Vec::new();

    while buf.len() < ERROR_BODY_LIMIT {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(ERROR_BODY_LIMIT - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Failed to read agent error body: {}", e);
                break;
            }
        }
    }

    let text = String::from_utf8_lossy(&buf).trim().to_string();
    if text.is_empty() {
        "(no body)".to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use fleet_core::domain::probe::ProbeErrorType;
    use fleet_core::domain::runner::Status;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_get_status_success() {
        let router = Router::new().route(
            "/status",
            get(|| async { Json(AgentStatus::new(Status::Installed, true)) }),
        );
        let endpoint = serve(router).await;

        let status = AgentClient::new().get_status(&endpoint).await.unwrap();
        assert_eq!(status.to_status(), (Status::Installed, true));
    }

    #[tokio::test]
    async fn test_get_status_keeps_error_body() {
        let router = Router::new().route(
            "/status",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "run.sh not found") }),
        );
        let endpoint = serve(router).await;

        let err = AgentClient::new().get_status(&endpoint).await.unwrap_err();
        match &err {
            AgentError::Http { status, body } => {
                assert_eq!(*status, 500);
                assert_eq!(body, "run.sh not found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(err.probe_type(), ProbeErrorType::AgentHttp);
    }

    #[tokio::test]
    async fn test_get_status_rejects_malformed_body() {
        let router = Router::new().route("/status", get(|| async { "not json" }));
        let endpoint = serve(router).await;

        let err = AgentClient::new().get_status(&endpoint).await.unwrap_err();
        assert!(matches!(err, AgentError::Parse(_)));
    }

    #[tokio::test]
    async fn test_start_error_body_is_bounded() {
        let router = Router::new().route(
            "/start",
            post(|| async { (StatusCode::BAD_GATEWAY, "x".repeat(ERROR_BODY_LIMIT * 3)) }),
        );
        let endpoint = serve(router).await;

        match AgentClient::new().start_runner(&endpoint).await.unwrap_err() {
            AgentError::Http { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body.len(), ERROR_BODY_LIMIT);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_empty_error_body() {
        let router = Router::new().route("/start", post(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let endpoint = serve(router).await;

        match AgentClient::new().start_runner(&endpoint).await.unwrap_err() {
            AgentError::Http { body, .. } => assert_eq!(body, "(no body)"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_and_health_success() {
        let router = Router::new()
            .route(
                "/start",
                post(|| async { Json(AgentMessage::new("already running")) }),
            )
            .route("/health", get(|| async { "ok" }));
        let endpoint = serve(router).await;

        let client = AgentClient::new();
        client.start_runner(&endpoint).await.unwrap();
        client.health(&format!("{}/", endpoint)).await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = AgentClient::new()
            .get_status(&format!("http://{}", addr))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Connect { .. }), "{:?}", err);
        assert_eq!(err.probe_type(), ProbeErrorType::AgentConnect);
    }

    #[tokio::test]
    async fn test_slow_agent_times_out() {
        let router = Router::new().route(
            "/status",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(AgentStatus::new(Status::New, false))
            }),
        );
        let endpoint = serve(router).await;

        let client = AgentClient::new()
            .with_timeouts(Duration::from_millis(100), Duration::from_millis(100));
        let err = client.get_status(&endpoint).await.unwrap_err();
        assert!(err.is_timeout(), "{:?}", err);
        assert_eq!(err.probe_type(), ProbeErrorType::AgentConnect);
    }
}

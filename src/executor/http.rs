//! HTTP implementation of the remote executor.
//!
//! Each attempt is a single `POST` carrying one point:
//!
//! ```json
//! {"points": [{"id": "p-1", "data": {...}, "attempts": 1}]}
//! ```
//!
//! The service answers with `{"success": true, "processed_count": 1, ...}` or
//! `{"success": false, "error": "..."}` (usually with a 500 status).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use super::{ExecOutcome, RemoteExecutor};
use crate::error::ExecutorError;
use crate::scheduler::WorkItem;

/// Default processing endpoint of the compute service.
pub const DEFAULT_SERVICE_URL: &str = "http://localhost:8000/process";

/// Configuration for [`HttpExecutor`].
#[derive(Debug, Clone)]
pub struct HttpExecutorConfig {
    /// Full URL of the processing endpoint.
    pub url: String,
    /// Timeout for establishing a TCP connection.
    pub connect_timeout: Duration,
    /// Abort the run if the very first requests cannot connect at all.
    pub fail_fast_on_connect: bool,
}

impl Default for HttpExecutorConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVICE_URL.to_string(),
            connect_timeout: Duration::from_secs(5),
            fail_fast_on_connect: true,
        }
    }
}

impl HttpExecutorConfig {
    /// Creates a configuration for the given endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets whether connection failures before first contact abort the run.
    pub fn with_fail_fast_on_connect(mut self, fail_fast: bool) -> Self {
        self.fail_fast_on_connect = fail_fast;
        self
    }
}

#[derive(Debug, Serialize)]
struct ProcessRequest<'a> {
    points: [PointEnvelope<'a>; 1],
}

#[derive(Debug, Serialize)]
struct PointEnvelope<'a> {
    id: &'a str,
    data: &'a serde_json::Value,
    attempts: u32,
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Executor that posts points to the compute service over HTTP.
pub struct HttpExecutor {
    url: Url,
    http_client: Client,
    fail_fast_on_connect: bool,
    /// Set once any response has come back from the service.
    reached: AtomicBool,
}

impl HttpExecutor {
    /// Creates a new executor.
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::InvalidUrl` if the URL does not parse and
    /// `ExecutorError::ClientBuild` if the HTTP client cannot be constructed.
    pub fn new(config: HttpExecutorConfig) -> Result<Self, ExecutorError> {
        let url = Url::parse(&config.url)
            .map_err(|e| ExecutorError::InvalidUrl(format!("{}: {}", config.url, e)))?;

        let http_client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ExecutorError::ClientBuild(e.to_string()))?;

        Ok(Self {
            url,
            http_client,
            fail_fast_on_connect: config.fail_fast_on_connect,
            reached: AtomicBool::new(false),
        })
    }

    /// Endpoint attempts are posted to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Queries the service's `/health` endpoint.
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::Unreachable` if the request fails and
    /// `ExecutorError::Unhealthy` if the service answers with an error status.
    pub async fn health(&self) -> Result<serde_json::Value, ExecutorError> {
        let health_url = self
            .url
            .join("/health")
            .map_err(|e| ExecutorError::InvalidUrl(e.to_string()))?;

        let response = self
            .http_client
            .get(health_url)
            .send()
            .await
            .map_err(|e| ExecutorError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExecutorError::Unhealthy {
                code: status.as_u16(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ExecutorError::Unreachable(format!("invalid health body: {}", e)))
    }
}

/// Maps a service response onto an attempt outcome.
pub(crate) fn interpret_response(status: u16, body: &str) -> ExecOutcome {
    match serde_json::from_str::<ProcessResponse>(body) {
        Ok(parsed) if parsed.success => {
            let value = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
            ExecOutcome::Success(value)
        }
        Ok(parsed) => ExecOutcome::Failure(
            parsed
                .error
                .unwrap_or_else(|| "Unknown error".to_string()),
        ),
        Err(_) if (200..300).contains(&status) => {
            ExecOutcome::failure("Malformed response from service")
        }
        Err(_) => ExecOutcome::Failure(format!("HTTP {}", status)),
    }
}

#[async_trait]
impl RemoteExecutor for HttpExecutor {
    async fn execute(&self, item: &WorkItem) -> ExecOutcome {
        let request = ProcessRequest {
            points: [PointEnvelope {
                id: &item.id,
                data: &item.payload,
                attempts: item.attempt_number(),
            }],
        };

        let response = match self
            .http_client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if e.is_connect()
                    && self.fail_fast_on_connect
                    && !self.reached.load(Ordering::SeqCst)
                {
                    return ExecOutcome::Fatal(format!("cannot reach {}: {}", self.url, e));
                }
                return ExecOutcome::Failure(format!("Request error: {}", e));
            }
        };

        self.reached.store(true, Ordering::SeqCst);
        let status = response.status().as_u16();

        match response.text().await {
            Ok(body) => interpret_response(status, &body),
            Err(e) => ExecOutcome::Failure(format!("Failed to read response: {}", e)),
        }
    }
}

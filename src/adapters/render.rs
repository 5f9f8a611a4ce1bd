//! Render engine client: submission with bounded retries, non-blocking
//! polling, and a deadline-bounded wait loop.
//!
//! The engine is assumed flaky. Transport failures are retried; a
//! well-formed rejection (error status, or a response without a ticket)
//! is terminal. A poll deadline expiring maps to TimedOut, never Failed,
//! because the engine may still finish the work out of band.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ResolvedLimits;

/// Errors from the render service boundary
#[derive(Debug, Error)]
pub enum RenderError {
    /// Connection/timeout-level failure; safe to retry
    #[error("transport error talking to render service: {0}")]
    Transport(String),

    /// The engine explicitly refused the spec; not retryable
    #[error("render service rejected the request: {0}")]
    Rejected(String),
}

impl RenderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// What one render job asks the engine to do
#[derive(Debug, Clone, Serialize)]
pub struct RequestSpec {
    /// Submission endpoint, e.g. "generate_image" or "generate_video"
    #[serde(skip)]
    pub endpoint: String,

    pub prompt: String,

    /// Face image filename, empty when none is paired
    pub face: String,

    /// Engine output subfolder for this batch
    pub output_subfolder: String,

    /// Filename prefix the engine stamps on outputs
    pub filename_prefix_text: String,

    /// Engine-relative start image path (video jobs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_start_image_path: Option<String>,
}

/// Result of one non-blocking poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Ticket not in the engine's history yet
    Running,

    /// Job finished; engine-relative output paths as reported
    Completed(Vec<String>),
}

/// Terminal result of a deadline-bounded wait
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    Completed(Vec<String>),
    TimedOut,
}

/// Seam to the external render service
#[async_trait]
pub trait RenderService: Send + Sync {
    /// Submit one job; returns the engine ticket
    async fn submit(&self, spec: &RequestSpec) -> Result<String, RenderError>;

    /// Single non-blocking status check for a ticket
    async fn poll(&self, ticket: &str) -> Result<PollOutcome, RenderError>;
}

/// Envelope the submission API returns
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    status: String,
    #[serde(default)]
    ticket: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// One output entry inside a history record
#[derive(Debug, Deserialize)]
struct OutputFile {
    filename: String,
    #[serde(default)]
    subfolder: String,
    #[serde(rename = "type", default)]
    kind: String,
}

/// Outputs of one node in a history record
#[derive(Debug, Default, Deserialize)]
struct NodeOutput {
    #[serde(default)]
    images: Vec<OutputFile>,
    #[serde(default)]
    gifs: Vec<OutputFile>,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    outputs: HashMap<String, NodeOutput>,
}

/// HTTP implementation against the submission server + engine history API
pub struct HttpRenderService {
    submit_url: String,
    engine_url: String,
    client: reqwest::Client,
}

impl HttpRenderService {
    pub fn new(submit_url: impl Into<String>, engine_url: impl Into<String>) -> Self {
        Self {
            submit_url: submit_url.into(),
            engine_url: engine_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn submit_endpoint(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.submit_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    fn history_endpoint(&self, ticket: &str) -> String {
        format!("{}/history/{}", self.engine_url.trim_end_matches('/'), ticket)
    }
}

#[async_trait]
impl RenderService for HttpRenderService {
    async fn submit(&self, spec: &RequestSpec) -> Result<String, RenderError> {
        let url = self.submit_endpoint(&spec.endpoint);
        debug!(%url, "Submitting render job");

        let response = self
            .client
            .post(&url)
            .json(spec)
            .send()
            .await
            .map_err(|e| RenderError::Transport(e.to_string()))?;

        let http_status = response.status();
        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| RenderError::Transport(format!("unreadable submit response: {e}")))?;

        // A parsed error body is a semantic rejection even over HTTP 4xx/5xx
        if !http_status.is_success() || body.status != "submitted" {
            let detail = body
                .error
                .unwrap_or_else(|| format!("status '{}' (HTTP {})", body.status, http_status));
            return Err(RenderError::Rejected(detail));
        }

        match body.ticket {
            Some(ticket) if !ticket.is_empty() => Ok(ticket),
            _ => Err(RenderError::Rejected(
                "submission accepted but no ticket returned".to_string(),
            )),
        }
    }

    async fn poll(&self, ticket: &str) -> Result<PollOutcome, RenderError> {
        let url = self.history_endpoint(ticket);

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| RenderError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RenderError::Transport(format!(
                "history endpoint returned HTTP {}",
                response.status()
            )));
        }

        let mut history: HashMap<String, HistoryEntry> = response
            .json()
            .await
            .map_err(|e| RenderError::Transport(format!("unreadable history response: {e}")))?;

        // Absent ticket means the job is still queued or running
        let Some(entry) = history.remove(ticket) else {
            return Ok(PollOutcome::Running);
        };

        let mut paths = Vec::new();
        for node in entry.outputs.values() {
            for file in node.images.iter().chain(node.gifs.iter()) {
                if file.kind != "output" {
                    continue;
                }
                if file.subfolder.is_empty() {
                    paths.push(file.filename.clone());
                } else {
                    paths.push(format!("{}/{}", file.subfolder, file.filename));
                }
            }
        }
        paths.sort();

        Ok(PollOutcome::Completed(paths))
    }
}

/// Submission retry + deadline-bounded polling over any RenderService
pub struct JobClient<'a> {
    service: &'a dyn RenderService,
    limits: &'a ResolvedLimits,
}

impl<'a> JobClient<'a> {
    pub fn new(service: &'a dyn RenderService, limits: &'a ResolvedLimits) -> Self {
        Self { service, limits }
    }

    /// Submit with up to `submit_max_attempts` tries, fixed delay between
    /// them. Only transport failures are retried; a rejection is final.
    pub async fn submit(&self, spec: &RequestSpec) -> Result<String, RenderError> {
        let max_attempts = self.limits.submit_max_attempts.max(1);
        let mut last_transport = None;

        for attempt in 1..=max_attempts {
            match self.service.submit(spec).await {
                Ok(ticket) => {
                    info!(%ticket, attempt, endpoint = %spec.endpoint, "Job submitted");
                    return Ok(ticket);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "Submission transport failure, retrying"
                    );
                    tokio::time::sleep(self.limits.submit_retry_delay).await;
                    last_transport = Some(e);
                }
                Err(e @ RenderError::Rejected(_)) => return Err(e),
                Err(e) => {
                    last_transport = Some(e);
                    break;
                }
            }
        }

        Err(last_transport
            .unwrap_or_else(|| RenderError::Transport("no attempts made".to_string())))
    }

    /// Poll at a fixed interval until the job is terminal or the wall-clock
    /// deadline elapses. Poll transport errors are retried within the loop
    /// and never treated as job failure.
    pub async fn wait_for_completion(
        &self,
        ticket: &str,
        deadline: Duration,
    ) -> Result<WaitOutcome, RenderError> {
        let wait = async {
            loop {
                match self.service.poll(ticket).await {
                    Ok(PollOutcome::Completed(paths)) => return Ok(paths),
                    Ok(PollOutcome::Running) => {
                        debug!(%ticket, "Job still running");
                    }
                    Err(e) if e.is_retryable() => {
                        warn!(%ticket, error = %e, "Poll failed, will retry");
                    }
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(self.limits.poll_interval).await;
            }
        };

        match tokio::time::timeout(deadline, wait).await {
            Ok(Ok(paths)) => Ok(WaitOutcome::Completed(paths)),
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => {
                warn!(%ticket, ?deadline, "Poll deadline elapsed, marking timed out");
                Ok(WaitOutcome::TimedOut)
            }
        }
    }
}

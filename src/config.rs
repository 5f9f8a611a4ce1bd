//! Configuration for renderflow paths, endpoints and limits.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (RENDERFLOW_SUBMIT_URL, RENDERFLOW_ENGINE_URL)
//! 2. Config file (renderflow.yaml, or the path given with --config)
//!
//! The resolved config is owned by the RunContext and threaded through the
//! stages explicitly; there is no process-global state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Raw config file schema (matches the YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub render: RenderConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    /// Base URL of the submission API server
    pub submit_url: String,
    /// Base URL of the engine itself (history endpoint lives here)
    pub engine_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Where run folders (checkpoints, logs, approval files) are created
    pub output_root: PathBuf,
    /// The engine's output directory, as mounted on this machine
    pub engine_output_root: PathBuf,
    /// The engine's input directory, as mounted on this machine
    pub engine_input_root: PathBuf,
    /// Optional folder of face images assigned round-robin to items
    #[serde(default)]
    pub faces_dir: Option<PathBuf>,
    /// Subdirectory of the engine input dir for temp video start images
    #[serde(default = "default_temp_subdir")]
    pub temp_start_subdir: String,
}

fn default_temp_subdir() -> String {
    "temp_video_starts".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptsConfig {
    /// How many work items to create per run
    #[serde(default = "default_prompt_count")]
    pub count: u32,
    /// Prompt-synthesis endpoint (external collaborator)
    #[serde(default = "default_prompt_url")]
    pub source_url: String,
    /// Model name passed to the prompt source
    #[serde(default = "default_prompt_model")]
    pub model: String,
    /// Scene themes sampled round-robin into the prompt requests
    #[serde(default)]
    pub themes: Vec<String>,
}

fn default_prompt_count() -> u32 {
    10
}
fn default_prompt_url() -> String {
    "http://localhost:11434/api/generate".to_string()
}
fn default_prompt_model() -> String {
    "llama3".to_string()
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            count: default_prompt_count(),
            source_url: default_prompt_url(),
            model: default_prompt_model(),
            themes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalConfig {
    /// Tick interval for checking the two channel files, in seconds
    #[serde(default = "default_approval_poll")]
    pub poll_interval_secs: u64,
    /// Command spawned to run the incremental reviewer (Channel B);
    /// artifact paths are appended as arguments. None disables the spawn
    /// (the file is still watched in case the process runs externally).
    #[serde(default)]
    pub reviewer_command: Option<Vec<String>>,
}

fn default_approval_poll() -> u64 {
    2
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_approval_poll(),
            reviewer_command: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_submit_attempts")]
    pub submit_max_attempts: u32,
    #[serde(default = "default_submit_delay")]
    pub submit_retry_delay_secs: u64,
    /// Spacing between consecutive submissions within a batch (ms)
    #[serde(default = "default_submit_spacing")]
    pub submit_spacing_ms: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_image_timeout")]
    pub image_timeout_secs: u64,
    #[serde(default = "default_video_timeout")]
    pub video_timeout_secs: u64,
}

fn default_submit_attempts() -> u32 {
    3
}
fn default_submit_delay() -> u64 {
    5
}
fn default_submit_spacing() -> u64 {
    500
}
fn default_poll_interval() -> u64 {
    3
}
fn default_image_timeout() -> u64 {
    600
}
fn default_video_timeout() -> u64 {
    1800
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            submit_max_attempts: default_submit_attempts(),
            submit_retry_delay_secs: default_submit_delay(),
            submit_spacing_ms: default_submit_spacing(),
            poll_interval_secs: default_poll_interval(),
            image_timeout_secs: default_image_timeout(),
            video_timeout_secs: default_video_timeout(),
        }
    }
}

/// Fully resolved configuration handed to the RunContext
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub submit_url: String,
    pub engine_url: String,
    pub output_root: PathBuf,
    pub engine_output_root: PathBuf,
    pub engine_input_root: PathBuf,
    pub faces_dir: Option<PathBuf>,
    pub temp_start_subdir: String,
    pub prompts: PromptsConfig,
    pub approval_poll_interval: Duration,
    pub reviewer_command: Option<Vec<String>>,
    pub limits: ResolvedLimits,
}

#[derive(Debug, Clone)]
pub struct ResolvedLimits {
    pub submit_max_attempts: u32,
    pub submit_retry_delay: Duration,
    pub submit_spacing: Duration,
    pub poll_interval: Duration,
    pub image_timeout: Duration,
    pub video_timeout: Duration,
}

impl ResolvedConfig {
    /// Folder holding everything this run writes locally
    pub fn run_dir(&self, run_id: &crate::domain::RunId) -> PathBuf {
        self.output_root.join(run_id.as_str())
    }

    /// Engine-side directory receiving temp video start images
    pub fn temp_start_dir(&self) -> PathBuf {
        self.engine_input_root.join(&self.temp_start_subdir)
    }
}

/// Load and resolve configuration from a YAML file plus env overrides
pub fn load(path: &Path) -> Result<ResolvedConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let file: ConfigFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(resolve(file))
}

fn resolve(file: ConfigFile) -> ResolvedConfig {
    let submit_url = std::env::var("RENDERFLOW_SUBMIT_URL").unwrap_or(file.render.submit_url);
    let engine_url = std::env::var("RENDERFLOW_ENGINE_URL").unwrap_or(file.render.engine_url);

    ResolvedConfig {
        submit_url,
        engine_url,
        output_root: file.paths.output_root,
        engine_output_root: file.paths.engine_output_root,
        engine_input_root: file.paths.engine_input_root,
        faces_dir: file.paths.faces_dir,
        temp_start_subdir: file.paths.temp_start_subdir,
        prompts: file.prompts,
        approval_poll_interval: Duration::from_secs(file.approval.poll_interval_secs),
        reviewer_command: file.approval.reviewer_command,
        limits: ResolvedLimits {
            submit_max_attempts: file.limits.submit_max_attempts,
            submit_retry_delay: Duration::from_secs(file.limits.submit_retry_delay_secs),
            submit_spacing: Duration::from_millis(file.limits.submit_spacing_ms),
            poll_interval: Duration::from_secs(file.limits.poll_interval_secs),
            image_timeout: Duration::from_secs(file.limits.image_timeout_secs),
            video_timeout: Duration::from_secs(file.limits.video_timeout_secs),
        },
    }
}

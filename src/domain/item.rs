//! Work items and job records.
//!
//! A WorkItem is one prompt traveling through the pipeline. Its jobs are
//! tracked as JobRecords whose status only ever moves forward; every
//! mutation goes through an explicit transition method so the monotonic
//! invariant is testable on its own.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal and in-flight states of an external render job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// No submission attempted yet (or submission failed before a ticket)
    NotSubmitted,

    /// Engine accepted the job and returned a ticket
    Submitted,

    /// Polling loop is watching the ticket
    Polling,

    /// Engine reported the job finished
    Completed,

    /// Engine rejected the job, or submission exhausted its retries
    Failed,

    /// Polling deadline elapsed with no terminal answer from the engine
    TimedOut,
}

impl JobStatus {
    /// Position along the forward-only chain; terminal states share rank
    fn rank(self) -> u8 {
        match self {
            Self::NotSubmitted => 0,
            Self::Submitted => 1,
            Self::Polling => 2,
            Self::Completed | Self::Failed | Self::TimedOut => 3,
        }
    }

    /// Check if no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

/// Attempted to move a job status backwards (or between terminal states)
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid job status transition: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One submitted (or attempted) job against the render engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// External job id; None when submission never produced one
    pub ticket: Option<String>,

    /// Current status (forward-only)
    pub status: JobStatus,

    /// When the engine accepted the job
    pub submitted_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal status
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Default for JobRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRecord {
    /// A fresh record, nothing submitted
    pub fn new() -> Self {
        Self {
            ticket: None,
            status: JobStatus::NotSubmitted,
            submitted_at: None,
            resolved_at: None,
        }
    }

    fn advance(&mut self, to: JobStatus) -> Result<(), InvalidTransition> {
        if self.status.is_terminal() || to.rank() <= self.status.rank() {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Record a successful submission with its engine ticket
    pub fn submitted(&mut self, ticket: String) -> Result<(), InvalidTransition> {
        self.advance(JobStatus::Submitted)?;
        self.ticket = Some(ticket);
        self.submitted_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the polling loop as having taken ownership of this record
    pub fn polling(&mut self) -> Result<(), InvalidTransition> {
        self.advance(JobStatus::Polling)
    }

    /// Engine confirmed completion
    pub fn completed(&mut self) -> Result<(), InvalidTransition> {
        self.advance(JobStatus::Completed)?;
        self.resolved_at = Some(Utc::now());
        Ok(())
    }

    /// Submission was rejected or exhausted its retries
    pub fn failed(&mut self) -> Result<(), InvalidTransition> {
        self.advance(JobStatus::Failed)?;
        self.resolved_at = Some(Utc::now());
        Ok(())
    }

    /// Polling deadline elapsed; the engine may still finish out of band
    pub fn timed_out(&mut self) -> Result<(), InvalidTransition> {
        self.advance(JobStatus::TimedOut)?;
        self.resolved_at = Some(Utc::now());
        Ok(())
    }
}

/// Reference to one file produced by a completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Absolute path on the orchestrator's filesystem
    pub path: PathBuf,

    /// Path relative to the engine's output root, slash-separated
    pub engine_path: String,

    /// Whether the file was present on disk when the record was made
    pub exists_on_disk: bool,
}

impl ArtifactRef {
    /// Stable string key used by approval decision sets
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// One logical unit (one prompt) traveling through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable identity, unique within the run, never reused
    pub index: u32,

    /// Prompt text driving the image job
    pub prompt: String,

    /// Optional face image paired with this item
    pub face_ref: Option<PathBuf>,

    /// The image generation job
    pub image_job: JobRecord,

    /// Outputs of the image job; append-only once the job completes
    pub artifacts: Vec<ArtifactRef>,

    /// One video job per approved artifact
    pub video_jobs: Vec<VideoJob>,
}

impl WorkItem {
    /// Create a new item for a generated prompt
    pub fn new(index: u32, prompt: String, face_ref: Option<PathBuf>) -> Self {
        Self {
            index,
            prompt,
            face_ref,
            image_job: JobRecord::new(),
            artifacts: Vec::new(),
            video_jobs: Vec::new(),
        }
    }
}

/// A video job together with the approved artifact that seeds it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoJob {
    /// Absolute path of the approved source image
    pub source_artifact: PathBuf,

    /// Temp start-image copy handed to the engine, if one was made
    pub temp_start_image: Option<PathBuf>,

    /// The submitted job
    pub record: JobRecord,
}

//! The pipeline stages, in execution order:
//! prompts -> images -> approval -> videos -> cleanup -> summary.

pub mod approval;
pub mod cleanup;
pub mod images;
pub mod prompts;
pub mod summary;
pub mod videos;

use crate::core::Stage;
use crate::domain::{ArtifactRef, JobStatus, RunState};

/// Stage names accepted by `--start-from`, in pipeline order
pub const STAGE_NAMES: [&str; 6] = [
    "prompts", "images", "approval", "videos", "cleanup", "summary",
];

/// Index of a stage by name
pub fn stage_index(name: &str) -> Option<usize> {
    STAGE_NAMES.iter().position(|s| *s == name)
}

/// The full pipeline
pub fn pipeline() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(prompts::PromptsStage),
        Box::new(images::ImagesStage),
        Box::new(approval::ApprovalStage),
        Box::new(videos::VideosStage),
        Box::new(cleanup::CleanupStage),
        Box::new(summary::SummaryStage),
    ]
}

/// Artifacts eligible for approval: outputs of completed image jobs that
/// are actually present on disk.
pub(crate) fn approvable_artifacts(state: &RunState) -> Vec<ArtifactRef> {
    state
        .items
        .iter()
        .filter(|item| item.image_job.status == JobStatus::Completed)
        .flat_map(|item| item.artifacts.iter())
        .filter(|artifact| artifact.exists_on_disk)
        .cloned()
        .collect()
}

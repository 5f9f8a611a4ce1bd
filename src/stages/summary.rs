//! Summary stage: report the run's outcome and write a machine-readable
//! summary next to the checkpoint. Never mutates items.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::{RunContext, Stage};
use crate::domain::{JobStatus, RunState};

#[derive(Debug, Default, Serialize)]
struct RunSummary {
    run_id: String,
    items: usize,
    images_completed: usize,
    images_failed: usize,
    images_timed_out: usize,
    approved: usize,
    rejected: usize,
    videos_completed: usize,
    videos_failed: usize,
    videos_timed_out: usize,
    /// Indices of items whose image job never completed
    unfinished_items: Vec<u32>,
}

fn summarize(state: &RunState) -> RunSummary {
    let mut summary = RunSummary {
        run_id: state.run_id.to_string(),
        items: state.items.len(),
        ..Default::default()
    };

    if let Some(decisions) = &state.approvals {
        summary.approved = decisions.approved_count();
        summary.rejected = decisions.rejected_count();
    }

    for item in &state.items {
        match item.image_job.status {
            JobStatus::Completed => summary.images_completed += 1,
            JobStatus::Failed => {
                summary.images_failed += 1;
                summary.unfinished_items.push(item.index);
            }
            JobStatus::TimedOut => {
                summary.images_timed_out += 1;
                summary.unfinished_items.push(item.index);
            }
            _ => summary.unfinished_items.push(item.index),
        }
        for job in &item.video_jobs {
            match job.record.status {
                JobStatus::Completed => summary.videos_completed += 1,
                JobStatus::Failed => summary.videos_failed += 1,
                JobStatus::TimedOut => summary.videos_timed_out += 1,
                _ => {}
            }
        }
    }
    summary
}

pub struct SummaryStage;

#[async_trait]
impl Stage for SummaryStage {
    fn name(&self) -> &'static str {
        "summary"
    }

    #[instrument(skip_all)]
    async fn execute(&self, ctx: &RunContext, state: RunState) -> Result<RunState> {
        let summary = summarize(&state);

        info!(
            run_id = %state.run_id,
            items = summary.items,
            images_completed = summary.images_completed,
            approved = summary.approved,
            rejected = summary.rejected,
            videos_completed = summary.videos_completed,
            "Run summary"
        );
        if !summary.unfinished_items.is_empty() {
            warn!(
                indices = ?summary.unfinished_items,
                "Items without a completed image"
            );
        }

        let json = serde_json::to_vec_pretty(&summary).context("Failed to serialize summary")?;
        let path = ctx.config.run_dir(&state.run_id).join("summary.json");
        crate::core::atomic_write(&path, &json).context("Failed to write summary file")?;
        info!(path = %path.display(), "Summary written");

        Ok(state)
    }
}

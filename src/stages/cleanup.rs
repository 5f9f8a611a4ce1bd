//! Cleanup stage: remove the temp start images staged for video jobs.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::core::{CleanupManager, RunContext, Stage};
use crate::domain::RunState;

pub struct CleanupStage;

#[async_trait]
impl Stage for CleanupStage {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    #[instrument(skip_all)]
    async fn execute(&self, ctx: &RunContext, state: RunState) -> Result<RunState> {
        let manager = CleanupManager::new(Some(ctx.config.temp_start_dir()));
        let report = manager.cleanup(&state.items);

        info!(
            deleted = report.deleted.len(),
            retained = report.retained.len(),
            errors = report.errors,
            "Cleanup finished"
        );
        for (index, path) in &report.retained {
            warn!(
                item = index,
                path = %path.display(),
                "Retained temp start image needs manual removal"
            );
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sequencer::tests::test_context;
    use crate::domain::{JobRecord, RunId, VideoJob, WorkItem};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_stage_removes_finished_start_images() {
        let temp = TempDir::new().unwrap();
        let ctx = test_context(&temp);

        let start_dir = ctx.config.temp_start_dir();
        std::fs::create_dir_all(&start_dir).unwrap();
        let staged = start_dir.join("start_001_0_a.png");
        std::fs::write(&staged, b"img").unwrap();

        let mut record = JobRecord::new();
        record.submitted("t".to_string()).unwrap();
        record.polling().unwrap();
        record.completed().unwrap();

        let mut item = WorkItem::new(1, "p".to_string(), None);
        item.video_jobs.push(VideoJob {
            source_artifact: staged.clone(),
            temp_start_image: Some(staged.clone()),
            record,
        });

        let mut state = RunState::new(RunId::from_name("Run_t"));
        state.items.push(item);

        let state = CleanupStage.execute(&ctx, state).await.unwrap();
        assert!(!staged.exists());
        // Empty afterwards, so the folder itself goes too
        assert!(!start_dir.exists());
        // Cleanup never mutates job records
        assert!(state.items[0].video_jobs[0].record.status.is_terminal());
    }
}

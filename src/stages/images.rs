//! Image generation stage: submit every item's image job, then poll each
//! ticket to a terminal status and record the produced artifacts.
//!
//! Submission and polling are separate passes so the engine's queue fills
//! first and slow jobs overlap. Item failures never abort the stage;
//! each item just carries its terminal status forward.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::adapters::{JobClient, RequestSpec, WaitOutcome};
use crate::core::{RunContext, Stage};
use crate::domain::{ArtifactRef, JobStatus, RunState, WorkItem};

pub struct ImagesStage;

#[async_trait]
impl Stage for ImagesStage {
    fn name(&self) -> &'static str {
        "images"
    }

    #[instrument(skip_all)]
    async fn execute(&self, ctx: &RunContext, mut state: RunState) -> Result<RunState> {
        let client = JobClient::new(ctx.render.as_ref(), &ctx.config.limits);
        let subfolder = format!("{}/all_images", state.run_id);

        // Pass 1: submit everything not yet submitted
        for item in &mut state.items {
            if item.image_job.status != JobStatus::NotSubmitted {
                continue;
            }

            let spec = image_spec(item, &subfolder);
            match client.submit(&spec).await {
                Ok(ticket) => item.image_job.submitted(ticket)?,
                Err(e) => {
                    warn!(index = item.index, error = %e, "Image submission failed");
                    item.image_job.failed()?;
                }
            }
            tokio::time::sleep(ctx.config.limits.submit_spacing).await;
        }

        // Pass 2: poll each live ticket to a terminal status
        for item in &mut state.items {
            if item.image_job.status != JobStatus::Submitted
                && item.image_job.status != JobStatus::Polling
            {
                continue;
            }
            let Some(ticket) = item.image_job.ticket.clone() else {
                continue;
            };
            if item.image_job.status == JobStatus::Submitted {
                item.image_job.polling()?;
            }

            match client
                .wait_for_completion(&ticket, ctx.config.limits.image_timeout)
                .await
            {
                Ok(WaitOutcome::Completed(paths)) => {
                    item.artifacts = resolve_artifacts(ctx, &paths);
                    item.image_job.completed()?;
                    info!(
                        index = item.index,
                        artifacts = item.artifacts.len(),
                        "Image job completed"
                    );
                }
                Ok(WaitOutcome::TimedOut) => {
                    item.image_job.timed_out()?;
                    warn!(index = item.index, %ticket, "Image job timed out");
                }
                Err(e) => {
                    item.image_job.failed()?;
                    warn!(index = item.index, error = %e, "Image job failed");
                }
            }
        }

        let completed = state
            .items
            .iter()
            .filter(|i| i.image_job.status == JobStatus::Completed)
            .count();
        info!(completed, total = state.items.len(), "Image stage finished");
        Ok(state)
    }
}

fn image_spec(item: &WorkItem, subfolder: &str) -> RequestSpec {
    let face = item
        .face_ref
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let variant = if face.is_empty() { "raw" } else { "swapped" };

    RequestSpec {
        endpoint: "generate_image".to_string(),
        prompt: item.prompt.clone(),
        face,
        output_subfolder: subfolder.to_string(),
        filename_prefix_text: format!("{:03}_{}", item.index, variant),
        video_start_image_path: None,
    }
}

/// Map engine-relative output paths onto the local mount, checking presence
fn resolve_artifacts(ctx: &RunContext, engine_paths: &[String]) -> Vec<ArtifactRef> {
    engine_paths
        .iter()
        .map(|rel| {
            let path = ctx.config.engine_output_root.join(rel);
            let exists_on_disk = path.is_file();
            if !exists_on_disk {
                warn!(path = %path.display(), "Engine reported an output that is not on disk");
            }
            ArtifactRef {
                path,
                engine_path: rel.clone(),
                exists_on_disk,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{PollOutcome, RenderError, RenderService};
    use crate::core::sequencer::tests::test_context;
    use crate::domain::RunId;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Render service keyed by prompt text: scripted submit outcome, and
    /// every poll completes with the given engine-relative paths.
    struct MapService {
        submits: Mutex<HashMap<String, Result<String, RenderError>>>,
        outputs: HashMap<String, Vec<String>>,
    }

    #[async_trait]
    impl RenderService for MapService {
        async fn submit(&self, spec: &RequestSpec) -> Result<String, RenderError> {
            self.submits
                .lock()
                .unwrap()
                .remove(&spec.prompt)
                .unwrap_or_else(|| Err(RenderError::Rejected("unexpected submit".to_string())))
        }

        async fn poll(&self, ticket: &str) -> Result<PollOutcome, RenderError> {
            match self.outputs.get(ticket) {
                Some(paths) => Ok(PollOutcome::Completed(paths.clone())),
                None => Ok(PollOutcome::Running),
            }
        }
    }

    fn seeded_state() -> RunState {
        let mut state = RunState::new(RunId::from_name("Run_t"));
        state.items.push(WorkItem::new(1, "alpha".to_string(), None));
        state.items.push(WorkItem::new(2, "beta".to_string(), None));
        state
    }

    #[tokio::test]
    async fn test_mixed_outcomes_are_isolated() {
        let temp = TempDir::new().unwrap();
        let mut ctx = test_context(&temp);

        // Item 1 completes with one on-disk artifact; item 2 is rejected
        let out_root = ctx.config.engine_output_root.clone();
        std::fs::create_dir_all(out_root.join("Run_t/all_images")).unwrap();
        std::fs::write(out_root.join("Run_t/all_images/001_raw_0001.png"), b"img").unwrap();

        ctx.render = Box::new(MapService {
            submits: Mutex::new(HashMap::from([
                ("alpha".to_string(), Ok("t1".to_string())),
                (
                    "beta".to_string(),
                    Err(RenderError::Rejected("bad".to_string())),
                ),
            ])),
            outputs: HashMap::from([(
                "t1".to_string(),
                vec!["Run_t/all_images/001_raw_0001.png".to_string()],
            )]),
        });

        let state = ImagesStage.execute(&ctx, seeded_state()).await.unwrap();

        assert_eq!(state.items[0].image_job.status, JobStatus::Completed);
        assert_eq!(state.items[0].artifacts.len(), 1);
        assert!(state.items[0].artifacts[0].exists_on_disk);
        assert_eq!(
            state.items[0].artifacts[0].engine_path,
            "Run_t/all_images/001_raw_0001.png"
        );

        assert_eq!(state.items[1].image_job.status, JobStatus::Failed);
        assert!(state.items[1].artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_stuck_job_times_out() {
        let temp = TempDir::new().unwrap();
        let mut ctx = test_context(&temp);
        ctx.render = Box::new(MapService {
            submits: Mutex::new(HashMap::from([("alpha".to_string(), Ok("t1".to_string()))])),
            // No outputs: t1 polls Running forever
            outputs: HashMap::new(),
        });

        let mut state = RunState::new(RunId::from_name("Run_t"));
        state.items.push(WorkItem::new(1, "alpha".to_string(), None));

        let state = ImagesStage.execute(&ctx, state).await.unwrap();
        assert_eq!(state.items[0].image_job.status, JobStatus::TimedOut);
        assert!(state.items[0].image_job.ticket.is_some());
    }

    #[tokio::test]
    async fn test_terminal_items_are_not_resubmitted() {
        let temp = TempDir::new().unwrap();
        let mut ctx = test_context(&temp);
        ctx.render = Box::new(MapService {
            submits: Mutex::new(HashMap::new()),
            outputs: HashMap::new(),
        });

        let mut state = seeded_state();
        state.items[0].image_job.failed().unwrap();
        state.items[1].image_job.submitted("t2".to_string()).unwrap();
        state.items[1].image_job.polling().unwrap();
        state.items[1].image_job.completed().unwrap();

        // MapService rejects any unexpected submit; none must happen
        let state = ImagesStage.execute(&ctx, state).await.unwrap();
        assert_eq!(state.items[0].image_job.status, JobStatus::Failed);
        assert_eq!(state.items[1].image_job.status, JobStatus::Completed);
    }

    #[test]
    fn test_spec_shape() {
        let item = WorkItem::new(3, "p".to_string(), Some("/faces/a.png".into()));
        let spec = image_spec(&item, "Run_x/all_images");
        assert_eq!(spec.face, "a.png");
        assert_eq!(spec.filename_prefix_text, "003_swapped");

        let bare = WorkItem::new(4, "p".to_string(), None);
        let spec = image_spec(&bare, "Run_x/all_images");
        assert_eq!(spec.face, "");
        assert_eq!(spec.filename_prefix_text, "004_raw");
    }
}

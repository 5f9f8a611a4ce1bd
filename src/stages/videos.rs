//! Video generation stage: one video job per approved artifact.
//!
//! Every approved image is first copied into the engine's input mount as
//! a temp start image, then submitted as its own video job and polled to
//! a terminal status. Items with no approved artifacts are left alone.
//!
//! Runs resumed directly into this stage may carry no stored decisions
//! (checkpoints written before the approval stage existed, or a cursor
//! forced past it). In that case each channel file gets one non-blocking
//! check; if nothing resolves, zero artifacts count as approved.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::adapters::{JobClient, RequestSpec, WaitOutcome};
use crate::approval::{ApprovalGate, FeedChannel, FormChannel};
use crate::core::{RunContext, Stage};
use crate::domain::{ApprovalDecisionSet, Decision, JobRecord, JobStatus, RunState, VideoJob};

use super::approvable_artifacts;

pub struct VideosStage;

#[async_trait]
impl Stage for VideosStage {
    fn name(&self) -> &'static str {
        "videos"
    }

    #[instrument(skip_all)]
    async fn execute(&self, ctx: &RunContext, mut state: RunState) -> Result<RunState> {
        let decisions = match &state.approvals {
            Some(set) => set.clone(),
            None => recheck_channels(ctx, &state).await?,
        };

        let client = JobClient::new(ctx.render.as_ref(), &ctx.config.limits);
        let subfolder = format!("{}/all_videos", state.run_id);
        let temp_dir = ctx.config.temp_start_dir();
        std::fs::create_dir_all(&temp_dir).context("Failed to create temp start-image folder")?;

        // Pass 1: submit a video job for every approved artifact that does
        // not already have one (resumed runs keep their existing jobs)
        for item in &mut state.items {
            let approved: Vec<PathBuf> = item
                .artifacts
                .iter()
                .filter(|a| decisions.decision_for(a) == Some(Decision::Approved))
                .map(|a| a.path.clone())
                .collect();

            for (k, source) in approved.into_iter().enumerate() {
                if item.video_jobs.iter().any(|v| v.source_artifact == source) {
                    continue;
                }

                let temp_start_image = stage_start_image(&temp_dir, item.index, k, &source);
                let start_path = temp_start_image.as_ref().and_then(|p| {
                    p.file_name().map(|n| {
                        format!("{}/{}", ctx.config.temp_start_subdir, n.to_string_lossy())
                    })
                });

                let spec = RequestSpec {
                    endpoint: "generate_video".to_string(),
                    prompt: item.prompt.clone(),
                    face: String::new(),
                    output_subfolder: subfolder.clone(),
                    filename_prefix_text: format!("{:03}_video_{}", item.index, k),
                    video_start_image_path: start_path,
                };

                let mut record = JobRecord::new();
                match client.submit(&spec).await {
                    Ok(ticket) => record.submitted(ticket)?,
                    Err(e) => {
                        warn!(index = item.index, error = %e, "Video submission failed");
                        record.failed()?;
                    }
                }
                item.video_jobs.push(VideoJob {
                    source_artifact: source,
                    temp_start_image,
                    record,
                });
                tokio::time::sleep(ctx.config.limits.submit_spacing).await;
            }
        }

        // Pass 2: poll every live video job to a terminal status
        for item in &mut state.items {
            for job in &mut item.video_jobs {
                if job.record.status != JobStatus::Submitted {
                    continue;
                }
                let Some(ticket) = job.record.ticket.clone() else {
                    continue;
                };
                job.record.polling()?;

                match client
                    .wait_for_completion(&ticket, ctx.config.limits.video_timeout)
                    .await
                {
                    Ok(WaitOutcome::Completed(_)) => {
                        job.record.completed()?;
                        info!(index = item.index, %ticket, "Video job completed");
                    }
                    Ok(WaitOutcome::TimedOut) => {
                        job.record.timed_out()?;
                        warn!(index = item.index, %ticket, "Video job timed out");
                    }
                    Err(e) => {
                        job.record.failed()?;
                        warn!(index = item.index, error = %e, "Video job failed");
                    }
                }
            }
        }

        let submitted: usize = state.items.iter().map(|i| i.video_jobs.len()).sum();
        info!(
            submitted,
            approved = decisions.approved_count(),
            "Video stage finished"
        );
        Ok(state)
    }
}

/// One non-blocking check of each channel file, no dispatch, no waiting
async fn recheck_channels(ctx: &RunContext, state: &RunState) -> Result<ApprovalDecisionSet> {
    let artifacts = approvable_artifacts(state);
    let run_dir = ctx.config.run_dir(&state.run_id);

    let mut gate = ApprovalGate::new(
        vec![
            Box::new(FormChannel::new(&run_dir, &artifacts)),
            Box::new(FeedChannel::new(&run_dir, &artifacts, None)),
        ],
        ctx.config.approval_poll_interval,
    );

    let set = gate.request_approval(&artifacts, false).await?;
    if set.complete {
        info!(
            approved = set.approved_count(),
            "Recovered approval decisions from channel files"
        );
    } else {
        warn!("No approval decisions available; no videos will be generated");
    }
    Ok(set)
}

/// Copy the approved image into the engine input mount. Failure is not
/// fatal: the job is still submitted, just without a start image.
fn stage_start_image(
    temp_dir: &std::path::Path,
    index: u32,
    k: usize,
    source: &std::path::Path,
) -> Option<PathBuf> {
    let file_name = source.file_name()?.to_string_lossy().into_owned();
    let dest = temp_dir.join(format!("start_{index:03}_{k}_{file_name}"));
    match std::fs::copy(source, &dest) {
        Ok(_) => Some(dest),
        Err(e) => {
            warn!(src = %source.display(), error = %e, "Could not stage start image");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{PollOutcome, RenderError, RenderService};
    use crate::core::sequencer::tests::test_context;
    use crate::domain::{ArtifactRef, RunId, WorkItem};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Accepts every submit with sequential tickets; every poll completes.
    /// Captures the submitted specs for assertions.
    struct RecordingService {
        specs: Mutex<Vec<RequestSpec>>,
    }

    impl RecordingService {
        fn new() -> Self {
            Self {
                specs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RenderService for RecordingService {
        async fn submit(&self, spec: &RequestSpec) -> Result<String, RenderError> {
            let mut specs = self.specs.lock().unwrap();
            specs.push(spec.clone());
            Ok(format!("v{}", specs.len()))
        }

        async fn poll(&self, _ticket: &str) -> Result<PollOutcome, RenderError> {
            Ok(PollOutcome::Completed(vec![]))
        }
    }

    fn completed_item(temp: &TempDir, index: u32, images: &[&str]) -> WorkItem {
        let mut item = WorkItem::new(index, format!("prompt {index}"), None);
        item.image_job.submitted(format!("t{index}")).unwrap();
        item.image_job.polling().unwrap();
        item.image_job.completed().unwrap();
        for name in images {
            let path = temp.path().join("engine_out").join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"img").unwrap();
            item.artifacts.push(ArtifactRef {
                path,
                engine_path: name.to_string(),
                exists_on_disk: true,
            });
        }
        item
    }

    #[tokio::test]
    async fn test_only_approved_artifacts_get_videos() {
        let temp = TempDir::new().unwrap();
        let mut ctx = test_context(&temp);
        ctx.render = Box::new(RecordingService::new());

        let mut state = RunState::new(RunId::from_name("Run_t"));
        state.items.push(completed_item(&temp, 1, &["1a.png", "1b.png"]));
        state.items.push(completed_item(&temp, 2, &["2a.png"]));

        // Approve 1a and 2a, reject 1b
        let dispatched: Vec<ArtifactRef> = state
            .items
            .iter()
            .flat_map(|i| i.artifacts.iter().cloned())
            .collect();
        let approved: Vec<String> = vec![
            state.items[0].artifacts[0].key(),
            state.items[1].artifacts[0].key(),
        ];
        state.approvals = Some(ApprovalDecisionSet::from_approved(&dispatched, &approved));

        let state = VideosStage.execute(&ctx, state).await.unwrap();

        assert_eq!(state.items[0].video_jobs.len(), 1);
        assert_eq!(state.items[1].video_jobs.len(), 1);
        for item in &state.items {
            for job in &item.video_jobs {
                assert_eq!(job.record.status, JobStatus::Completed);
                // The start image copy landed in the engine input mount
                let staged = job.temp_start_image.as_ref().unwrap();
                assert!(staged.is_file());
                assert!(staged.starts_with(ctx.config.temp_start_dir()));
            }
        }
    }

    #[tokio::test]
    async fn test_missing_decisions_mean_no_videos() {
        let temp = TempDir::new().unwrap();
        let mut ctx = test_context(&temp);
        ctx.render = Box::new(RecordingService::new());

        let mut state = RunState::new(RunId::from_name("Run_t"));
        state.items.push(completed_item(&temp, 1, &["1a.png"]));
        std::fs::create_dir_all(ctx.config.run_dir(&state.run_id)).unwrap();

        // approvals is None and no channel file exists
        let state = VideosStage.execute(&ctx, state).await.unwrap();
        assert!(state.items[0].video_jobs.is_empty());
    }

    #[tokio::test]
    async fn test_decisions_recovered_from_form_file() {
        let temp = TempDir::new().unwrap();
        let mut ctx = test_context(&temp);
        ctx.render = Box::new(RecordingService::new());

        let mut state = RunState::new(RunId::from_name("Run_t"));
        state.items.push(completed_item(&temp, 1, &["1a.png"]));
        let run_dir = ctx.config.run_dir(&state.run_id);
        std::fs::create_dir_all(&run_dir).unwrap();

        let doc = serde_json::json!({
            "approved_images": [{
                "original_index": 1,
                "batch_image_index": 0,
                "approved_image_path": state.items[0].artifacts[0].key(),
            }]
        });
        std::fs::write(
            run_dir.join(crate::approval::FORM_DECISION_FILE),
            serde_json::to_vec(&doc).unwrap(),
        )
        .unwrap();

        let state = VideosStage.execute(&ctx, state).await.unwrap();
        assert_eq!(state.items[0].video_jobs.len(), 1);
        assert_eq!(state.items[0].video_jobs[0].record.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_existing_video_jobs_not_resubmitted() {
        let temp = TempDir::new().unwrap();
        let mut ctx = test_context(&temp);
        ctx.render = Box::new(RecordingService::new());

        let mut state = RunState::new(RunId::from_name("Run_t"));
        let mut item = completed_item(&temp, 1, &["1a.png"]);
        let source = item.artifacts[0].path.clone();

        let mut record = JobRecord::new();
        record.submitted("old".to_string()).unwrap();
        record.polling().unwrap();
        record.completed().unwrap();
        item.video_jobs.push(VideoJob {
            source_artifact: source,
            temp_start_image: None,
            record,
        });

        let dispatched = item.artifacts.clone();
        let approved = vec![item.artifacts[0].key()];
        state.items.push(item);
        state.approvals = Some(ApprovalDecisionSet::from_approved(&dispatched, &approved));

        let state = VideosStage.execute(&ctx, state).await.unwrap();
        assert_eq!(state.items[0].video_jobs.len(), 1);
        assert_eq!(
            state.items[0].video_jobs[0].record.ticket.as_deref(),
            Some("old")
        );
    }
}

//! Human approval stage: dispatch the completed artifacts to both review
//! channels and block until one of them resolves.
//!
//! The resolved decision set is stored on the run state so it survives in
//! the checkpoint; the videos stage consumes it without re-asking.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::approval::{ApprovalGate, FeedChannel, FormChannel};
use crate::core::{RunContext, Stage};
use crate::domain::{Decision, RunState};

use super::approvable_artifacts;

pub struct ApprovalStage;

#[async_trait]
impl Stage for ApprovalStage {
    fn name(&self) -> &'static str {
        "approval"
    }

    #[instrument(skip_all)]
    async fn execute(&self, ctx: &RunContext, mut state: RunState) -> Result<RunState> {
        if let Some(existing) = &state.approvals {
            info!(
                approved = existing.approved_count(),
                rejected = existing.rejected_count(),
                "Approval already resolved, skipping review"
            );
            return Ok(state);
        }

        let artifacts = approvable_artifacts(&state);
        let run_dir = ctx.config.run_dir(&state.run_id);

        let mut gate = ApprovalGate::new(
            vec![
                Box::new(FormChannel::new(&run_dir, &artifacts)),
                Box::new(FeedChannel::new(
                    &run_dir,
                    &artifacts,
                    ctx.config.reviewer_command.clone(),
                )),
            ],
            ctx.config.approval_poll_interval,
        );

        let decisions = gate.request_approval(&artifacts, true).await?;
        info!(
            approved = decisions.approved_count(),
            rejected = decisions.rejected_count(),
            "Review resolved"
        );

        copy_approved(ctx, &state, &decisions)?;
        state.approvals = Some(decisions);
        Ok(state)
    }
}

/// Copy every approved artifact into the run's approved/ folder for easy
/// browsing. Copy failures are logged, not fatal; the originals stay put.
fn copy_approved(
    ctx: &RunContext,
    state: &RunState,
    decisions: &crate::domain::ApprovalDecisionSet,
) -> Result<()> {
    let approved_dir = ctx.config.run_dir(&state.run_id).join("approved");
    std::fs::create_dir_all(&approved_dir).context("Failed to create approved folder")?;

    for item in &state.items {
        for artifact in &item.artifacts {
            if decisions.decision_for(artifact) != Some(Decision::Approved) {
                continue;
            }
            let Some(file_name) = artifact.path.file_name() else {
                continue;
            };
            let dest = approved_dir.join(format!(
                "approved_{:03}_{}",
                item.index,
                file_name.to_string_lossy()
            ));
            if let Err(e) = std::fs::copy(&artifact.path, &dest) {
                warn!(src = %artifact.path.display(), error = %e, "Could not copy approved artifact");
            }
        }
    }
    Ok(())
}

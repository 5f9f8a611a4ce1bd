//! Stage sequencer: drives the named stages over a shared RunState.
//!
//! A checkpoint is saved after every stage, success or failure, so an
//! aborted run always leaves a resumable document behind. Stages isolate
//! per-item errors themselves; an error returned from a stage is treated
//! as unrecoverable for the run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use crate::domain::{RunId, RunState};

use super::context::RunContext;

/// One named pipeline stage, a pure function over RunState
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &RunContext, state: RunState) -> Result<RunState>;
}

pub struct Sequencer;

impl Sequencer {
    /// Run `stages` in order, skipping those before `start_index`.
    ///
    /// With `resume` set, the prior run's checkpoint is loaded instead of
    /// constructing fresh state; a corrupt checkpoint is fatal here.
    #[instrument(skip(ctx, stages), fields(start_index))]
    pub async fn run(
        ctx: &RunContext,
        stages: &[Box<dyn Stage>],
        start_index: usize,
        resume: Option<RunId>,
    ) -> Result<RunState> {
        anyhow::ensure!(
            start_index < stages.len(),
            "start index {} out of range for {} stages",
            start_index,
            stages.len()
        );

        let mut state = match resume {
            Some(run_id) => {
                let state = ctx
                    .checkpoints
                    .load(&run_id)
                    .with_context(|| format!("Cannot resume run {run_id}"))?;
                info!(%run_id, items = state.items.len(), cursor = ?state.stage_cursor, "Resumed run from checkpoint");
                state
            }
            None => {
                let run_id = RunId::now();
                info!(%run_id, "Starting fresh run");
                RunState::new(run_id)
            }
        };

        std::fs::create_dir_all(ctx.config.run_dir(&state.run_id))
            .context("Failed to create run directory")?;

        for (idx, stage) in stages.iter().enumerate() {
            if idx < start_index {
                info!(stage = stage.name(), "Skipping stage");
                continue;
            }

            info!(stage = stage.name(), "Executing stage");
            let snapshot = state.clone();

            match stage.execute(ctx, state).await {
                Ok(mut next) => {
                    next.advance_cursor(stage.name());
                    if let Err(e) = ctx.checkpoints.save(&next) {
                        // Best-effort durability: the run carries on in memory
                        warn!(stage = stage.name(), error = %e, "Checkpoint save failed");
                    }
                    state = next;
                }
                Err(e) => {
                    error!(stage = stage.name(), error = %e, "Stage failed, aborting run");
                    // Leave a resumable checkpoint pointing at the last
                    // completed stage before propagating.
                    if let Err(save_err) = ctx.checkpoints.save(&snapshot) {
                        warn!(error = %save_err, "Checkpoint save failed on abort path");
                    }
                    return Err(e).with_context(|| {
                        format!(
                            "stage '{}' failed (run {} is resumable)",
                            stage.name(),
                            snapshot.run_id
                        )
                    });
                }
            }
        }

        info!(run_id = %state.run_id, "Run completed");
        Ok(state)
    }
}

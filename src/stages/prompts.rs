//! Prompt synthesis stage: one prompt per work item, faces assigned
//! round-robin, with per-prompt retries against the external source.
//!
//! A prompt that fails all attempts is logged and skipped; the item is
//! never created, so later stages only ever see items with real prompts.
//! Zero successful prompts aborts the run.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::{RunContext, Stage};
use crate::domain::{RunState, WorkItem};

const FALLBACK_THEME: &str = "a striking everyday scene";

/// Record written to the run's prompt log
#[derive(Debug, Serialize)]
struct PromptLogEntry<'a> {
    index: u32,
    prompt: &'a str,
    face: Option<String>,
}

pub struct PromptsStage;

#[async_trait]
impl Stage for PromptsStage {
    fn name(&self) -> &'static str {
        "prompts"
    }

    #[instrument(skip_all)]
    async fn execute(&self, ctx: &RunContext, mut state: RunState) -> Result<RunState> {
        if !state.items.is_empty() {
            info!(
                items = state.items.len(),
                "Items already exist, skipping prompt synthesis"
            );
            return Ok(state);
        }

        let faces = discover_faces(ctx)?;
        if faces.is_empty() {
            info!("No face images configured, items will run without faces");
        } else {
            info!(count = faces.len(), "Face images assigned round-robin");
        }

        let themes = &ctx.config.prompts.themes;
        let count = ctx.config.prompts.count;
        let mut failures = 0u32;

        for n in 0..count {
            let index = n + 1;
            let theme = if themes.is_empty() {
                FALLBACK_THEME
            } else {
                themes[n as usize % themes.len()].as_str()
            };

            match generate_with_retries(ctx, theme).await {
                Ok(prompt) => {
                    let face = if faces.is_empty() {
                        None
                    } else {
                        Some(faces[n as usize % faces.len()].clone())
                    };
                    info!(index, theme, "Prompt generated");
                    state.items.push(WorkItem::new(index, prompt, face));
                }
                Err(e) => {
                    warn!(index, theme, error = %e, "Prompt generation failed, skipping item");
                    failures += 1;
                }
            }
        }

        anyhow::ensure!(
            !state.items.is_empty(),
            "all {count} prompt generations failed"
        );
        if failures > 0 {
            warn!(failures, "Some prompts could not be generated");
        }

        write_prompt_logs(ctx, &state)?;
        Ok(state)
    }
}

/// Retry the prompt source with the same bounded-retry policy used for
/// job submission.
async fn generate_with_retries(ctx: &RunContext, theme: &str) -> Result<String> {
    let max_attempts = ctx.config.limits.submit_max_attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=max_attempts {
        match ctx.prompter.generate(theme).await {
            Ok(prompt) => return Ok(prompt),
            Err(e) => {
                if attempt < max_attempts {
                    warn!(attempt, error = %e, "Prompt source failed, retrying");
                    tokio::time::sleep(ctx.config.limits.submit_retry_delay).await;
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no attempts made")))
}

/// Sorted face image paths from the configured folder, if any
fn discover_faces(ctx: &RunContext) -> Result<Vec<PathBuf>> {
    let Some(dir) = &ctx.config.faces_dir else {
        return Ok(Vec::new());
    };

    let pattern = dir.join("*").to_string_lossy().into_owned();
    let mut faces: Vec<PathBuf> = glob::glob(&pattern)
        .with_context(|| format!("Bad faces glob: {pattern}"))?
        .filter_map(|entry| entry.ok())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("png" | "jpg" | "jpeg" | "webp")
            )
        })
        .collect();
    faces.sort();
    Ok(faces)
}

/// Dump the accepted prompts as JSON (machine) and txt (human) logs
fn write_prompt_logs(ctx: &RunContext, state: &RunState) -> Result<()> {
    let run_dir = ctx.config.run_dir(&state.run_id);

    let entries: Vec<PromptLogEntry> = state
        .items
        .iter()
        .map(|item| PromptLogEntry {
            index: item.index,
            prompt: &item.prompt,
            face: item
                .face_ref
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        })
        .collect();

    let json = serde_json::to_vec_pretty(&entries).context("Failed to serialize prompt log")?;
    crate::core::atomic_write(&run_dir.join("prompts.json"), &json)
        .context("Failed to write prompt log")?;

    let mut text = String::new();
    for item in &state.items {
        text.push_str(&format!("[{:03}] {}\n", item.index, item.prompt));
    }
    std::fs::write(run_dir.join("prompts.txt"), text).context("Failed to write prompt text log")?;

    info!(path = %run_dir.join("prompts.json").display(), "Prompt logs written");
    Ok(())
}

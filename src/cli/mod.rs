//! Command-line interface.
//!
//! `run` drives the pipeline; `status` inspects the checkpoint of a past
//! or interrupted run without touching it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::adapters::{HttpRenderService, OllamaPrompter};
use crate::core::{CheckpointStore, RunContext, Sequencer};
use crate::domain::RunId;
use crate::stages::{pipeline, stage_index, STAGE_NAMES};

#[derive(Debug, Parser)]
#[command(name = "renderflow", version, about = "Batch render pipeline orchestrator")]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(long, global = true, default_value = "renderflow.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute the pipeline, optionally resuming an earlier run
    Run(RunArgs),

    /// Show the checkpointed state of a run
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// First stage to execute; earlier stages are skipped
    #[arg(long, default_value = "prompts", value_parser = STAGE_NAMES)]
    pub start_from: String,

    /// Resume this run's checkpoint instead of starting a fresh run
    #[arg(long, value_name = "RUN_ID")]
    pub resume_run: Option<String>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Run id, e.g. Run_20250829_153012
    pub run_id: String,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Command::Run(args) => run(&self.config, args).await,
            Command::Status(args) => status(&self.config, args),
        }
    }
}

async fn run(config_path: &PathBuf, args: RunArgs) -> Result<()> {
    let start_index = stage_index(&args.start_from)
        .with_context(|| format!("unknown stage '{}'", args.start_from))?;

    // Skipping past prompts without prior state would run later stages
    // against an empty item list; starting at prompts with a resumed run
    // would regenerate prompts for items that already exist.
    anyhow::ensure!(
        start_index == 0 || args.resume_run.is_some(),
        "starting from '{}' requires --resume-run to supply prior state",
        args.start_from
    );
    anyhow::ensure!(
        args.resume_run.is_none() || start_index > 0,
        "--resume-run must be combined with --start-from naming a stage after 'prompts'"
    );

    let config = crate::config::load(config_path)?;
    info!(config = %config_path.display(), start_from = %args.start_from, "Pipeline starting");

    let render = Box::new(HttpRenderService::new(&config.submit_url, &config.engine_url));
    let prompter = Box::new(OllamaPrompter::new(
        &config.prompts.source_url,
        &config.prompts.model,
    ));
    let ctx = RunContext::new(config, render, prompter);

    let stages = pipeline();
    let resume = args.resume_run.map(RunId::from_name);
    let state = Sequencer::run(&ctx, &stages, start_index, resume).await?;

    println!("Run {} finished ({} items)", state.run_id, state.items.len());
    Ok(())
}

fn status(config_path: &PathBuf, args: StatusArgs) -> Result<()> {
    let config = crate::config::load(config_path)?;
    let store = CheckpointStore::new(config.output_root.clone());
    let state = store.load(&RunId::from_name(&args.run_id))?;

    println!("run:    {}", state.run_id);
    println!(
        "cursor: {}",
        state.stage_cursor.as_deref().unwrap_or("(no stage completed)")
    );
    if let Some(decisions) = &state.approvals {
        println!(
            "review: {} approved, {} rejected",
            decisions.approved_count(),
            decisions.rejected_count()
        );
    } else {
        println!("review: unresolved");
    }
    println!("items:  {}", state.items.len());
    for item in &state.items {
        let videos: Vec<String> = item
            .video_jobs
            .iter()
            .map(|v| format!("{:?}", v.record.status))
            .collect();
        println!(
            "  [{:03}] image={:?} artifacts={} videos=[{}]",
            item.index,
            item.image_job.status,
            item.artifacts.len(),
            videos.join(", ")
        );
    }
    Ok(())
}

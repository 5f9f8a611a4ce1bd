//! Channel B: incremental review feed.
//!
//! An external reviewer process records one decision at a time into
//! `review_feed.json`, a map of artifact path to `{"status": ...}`. The
//! channel resolves only when every dispatched artifact carries a
//! decision; a partially-filled file is explicitly not a resolution.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::domain::{ApprovalDecisionSet, ArtifactRef};

use super::ApprovalChannel;

pub const FEED_FILE: &str = "review_feed.json";

/// Per-artifact entry the reviewer process maintains
#[derive(Debug, Deserialize)]
struct FeedEntry {
    /// "approve" / "reject"; null or absent while undecided
    #[serde(default)]
    status: Option<String>,
}

pub struct FeedChannel {
    run_dir: PathBuf,
    dispatched: Vec<ArtifactRef>,
    /// Reviewer command; artifact paths are appended as arguments
    command: Option<Vec<String>>,
    reviewer: Option<Child>,
}

impl FeedChannel {
    pub fn new(
        run_dir: impl Into<PathBuf>,
        artifacts: &[ArtifactRef],
        command: Option<Vec<String>>,
    ) -> Self {
        Self {
            run_dir: run_dir.into(),
            dispatched: artifacts.to_vec(),
            command,
            reviewer: None,
        }
    }

    fn feed_path(&self) -> PathBuf {
        self.run_dir.join(FEED_FILE)
    }
}

#[async_trait]
impl ApprovalChannel for FeedChannel {
    fn name(&self) -> &'static str {
        "feed"
    }

    async fn dispatch(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.run_dir).context("creating run dir for feed channel")?;

        // A feed left over from an earlier dispatch would satisfy the
        // completeness count with stale decisions.
        let feed = self.feed_path();
        if feed.exists() {
            std::fs::remove_file(&feed).context("clearing stale review feed")?;
        }

        if let Some(ref command) = self.command {
            let (program, args) = command
                .split_first()
                .context("reviewer command is empty")?;

            let child = Command::new(program)
                .args(args)
                .arg(&feed)
                .args(self.dispatched.iter().map(|a| a.path.as_os_str()))
                .spawn()
                .with_context(|| format!("failed to spawn reviewer '{program}'"))?;

            info!(
                program,
                artifacts = self.dispatched.len(),
                "Reviewer process started"
            );
            self.reviewer = Some(child);
        } else {
            info!(
                feed = %feed.display(),
                "No reviewer command configured; watching feed file only"
            );
        }

        Ok(())
    }

    async fn check(&self) -> Result<Option<ApprovalDecisionSet>> {
        let content = match std::fs::read_to_string(self.feed_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("reading review feed"),
        };

        let entries: HashMap<String, FeedEntry> =
            serde_json::from_str(&content).context("parsing review feed")?;

        let decided = self
            .dispatched
            .iter()
            .filter(|a| {
                entries
                    .get(&a.key())
                    .and_then(|e| e.status.as_deref())
                    .is_some()
            })
            .count();

        if decided < self.dispatched.len() {
            debug!(
                decided,
                dispatched = self.dispatched.len(),
                "Feed not yet complete"
            );
            return Ok(None);
        }

        let approved: Vec<String> = self
            .dispatched
            .iter()
            .map(|a| a.key())
            .filter(|key| {
                entries
                    .get(key)
                    .and_then(|e| e.status.as_deref())
                    .map(|s| s == "approve")
                    .unwrap_or(false)
            })
            .collect();

        Ok(Some(ApprovalDecisionSet::from_approved(
            &self.dispatched,
            &approved,
        )))
    }

    async fn shutdown(&mut self) {
        if let Some(mut child) = self.reviewer.take() {
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Failed to stop reviewer process");
            }
        }
    }
}

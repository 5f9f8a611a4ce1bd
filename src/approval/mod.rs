//! Approval gate: races two independent human-approval channels.
//!
//! Both channels receive the full artifact list. On every poll tick the
//! single-shot form channel is checked before the incremental feed
//! channel; the first channel to resolve wins and its decisions become
//! canonical. The loser is best-effort shut down and its result is
//! discarded, never merged.

pub mod feed;
pub mod form;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::{ApprovalDecisionSet, ArtifactRef};

pub use feed::{FeedChannel, FEED_FILE};
pub use form::{FormChannel, FORM_DECISION_FILE, FORM_MANIFEST_FILE};

/// One human-facing approval channel over a file-based contract
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Make the artifact list available to the channel's operator side
    /// (write a manifest, spawn a reviewer process, ...).
    async fn dispatch(&mut self) -> Result<()>;

    /// Non-blocking resolution check. None means not resolved yet; a
    /// returned set is always complete over the dispatched list.
    async fn check(&self) -> Result<Option<ApprovalDecisionSet>>;

    /// Best-effort signal to stop; called on the losing channel
    async fn shutdown(&mut self);
}

pub struct ApprovalGate {
    channels: Vec<Box<dyn ApprovalChannel>>,
    poll_interval: std::time::Duration,
}

impl ApprovalGate {
    /// Channel order is the tie-break order: earlier wins a shared tick
    pub fn new(
        channels: Vec<Box<dyn ApprovalChannel>>,
        poll_interval: std::time::Duration,
    ) -> Self {
        Self {
            channels,
            poll_interval,
        }
    }

    /// Resolve a decision set for `artifacts`.
    ///
    /// `wait=false` performs exactly one check of every channel and falls
    /// back to an empty set; it never dispatches and never blocks. An
    /// operator interrupt during the wait resolves to approve-all rather
    /// than crashing, since the channel processes may be mid-write.
    pub async fn request_approval(
        &mut self,
        artifacts: &[ArtifactRef],
        wait: bool,
    ) -> Result<ApprovalDecisionSet> {
        if artifacts.is_empty() {
            info!("No artifacts to approve; returning empty complete set");
            return Ok(ApprovalDecisionSet::empty_complete());
        }

        if !wait {
            for channel in &self.channels {
                match channel.check().await {
                    Ok(Some(set)) => {
                        info!(channel = channel.name(), "Found existing decisions");
                        return Ok(set);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(channel = channel.name(), error = %e, "Channel check failed")
                    }
                }
            }
            info!("No channel resolved; defaulting to empty decision set");
            return Ok(ApprovalDecisionSet::empty_incomplete());
        }

        // Dispatch to every channel; a channel whose dispatch fails is
        // dropped from the rotation. Fatal only if none survive.
        let mut active = Vec::with_capacity(self.channels.len());
        for channel in &mut self.channels {
            match channel.dispatch().await {
                Ok(()) => active.push(true),
                Err(e) => {
                    warn!(channel = channel.name(), error = %e, "Channel unavailable");
                    active.push(false);
                }
            }
        }
        anyhow::ensure!(
            active.iter().any(|a| *a),
            "all approval channels are unavailable"
        );

        info!(
            artifacts = artifacts.len(),
            "Waiting for approval on either channel"
        );

        let resolved = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted during approval wait; treating all pending artifacts as approved");
                    let keys: Vec<String> = artifacts.iter().map(|a| a.key()).collect();
                    break ApprovalDecisionSet::from_approved(artifacts, &keys);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let mut winner: Option<(usize, ApprovalDecisionSet)> = None;
            for (idx, channel) in self.channels.iter().enumerate() {
                if !active[idx] {
                    continue;
                }
                match channel.check().await {
                    Ok(Some(set)) => {
                        if winner.is_none() {
                            info!(channel = channel.name(), "Channel resolved first");
                            winner = Some((idx, set));
                        } else {
                            info!(
                                channel = channel.name(),
                                "Channel also resolved this tick; ignoring its decisions"
                            );
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(channel = channel.name(), error = %e, "Channel check failed")
                    }
                }
            }

            if let Some((winner_idx, set)) = winner {
                for (idx, channel) in self.channels.iter_mut().enumerate() {
                    if idx != winner_idx {
                        channel.shutdown().await;
                    }
                }
                break set;
            }
        };

        info!(
            approved = resolved.approved_count(),
            rejected = resolved.rejected_count(),
            "Approval resolved"
        );
        Ok(resolved)
    }
}

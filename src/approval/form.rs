//! Channel A: single-shot form file.
//!
//! The operator's review tool writes `approved_images.json` exactly once
//! with the complete approved list. The channel resolves the instant that
//! file exists, parses, and is non-empty; dispatched artifacts absent
//! from the list are recorded as rejected. An empty list means the tool
//! has not actually submitted yet and is NOT a resolution.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::atomic_write;
use crate::domain::{ApprovalDecisionSet, ArtifactRef};

use super::ApprovalChannel;

pub const FORM_DECISION_FILE: &str = "approved_images.json";
pub const FORM_MANIFEST_FILE: &str = "pending_review.json";

/// Document the form tool writes on submit
#[derive(Debug, Deserialize)]
struct FormDocument {
    approved_images: Vec<ApprovedImage>,
}

/// One approved entry; unknown extra fields are ignored
#[derive(Debug, Deserialize)]
struct ApprovedImage {
    #[allow(dead_code)]
    original_index: u32,
    #[allow(dead_code)]
    batch_image_index: u32,
    approved_image_path: String,
}

/// Manifest this side writes so the form tool knows what to show
#[derive(Debug, Serialize)]
struct ManifestEntry<'a> {
    index: u32,
    path: &'a str,
}

pub struct FormChannel {
    run_dir: PathBuf,
    dispatched: Vec<ArtifactRef>,
}

impl FormChannel {
    pub fn new(run_dir: impl Into<PathBuf>, artifacts: &[ArtifactRef]) -> Self {
        Self {
            run_dir: run_dir.into(),
            dispatched: artifacts.to_vec(),
        }
    }

    fn decision_path(&self) -> PathBuf {
        self.run_dir.join(FORM_DECISION_FILE)
    }

    fn parse(&self, path: &Path) -> Result<Option<ApprovalDecisionSet>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("reading form decision file"),
        };

        let doc: FormDocument =
            serde_json::from_str(&content).context("parsing form decision file")?;

        if doc.approved_images.is_empty() {
            debug!("Form file present but empty; not treating as resolved");
            return Ok(None);
        }

        let approved: Vec<String> = doc
            .approved_images
            .into_iter()
            .map(|a| a.approved_image_path)
            .collect();

        Ok(Some(ApprovalDecisionSet::from_approved(
            &self.dispatched,
            &approved,
        )))
    }
}

#[async_trait]
impl ApprovalChannel for FormChannel {
    fn name(&self) -> &'static str {
        "form"
    }

    async fn dispatch(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.run_dir).context("creating run dir for form channel")?;

        // Stale single-shot file from an earlier attempt would instantly
        // (and wrongly) resolve this dispatch.
        let decision_path = self.decision_path();
        if decision_path.exists() {
            std::fs::remove_file(&decision_path).context("clearing stale form decision file")?;
        }

        let keys: Vec<String> = self.dispatched.iter().map(|a| a.key()).collect();
        let entries: Vec<ManifestEntry<'_>> = self
            .dispatched
            .iter()
            .zip(keys.iter())
            .enumerate()
            .map(|(i, (_, key))| ManifestEntry {
                index: i as u32,
                path: key,
            })
            .collect();

        let manifest = serde_json::to_vec_pretty(&entries)?;
        atomic_write(&self.run_dir.join(FORM_MANIFEST_FILE), &manifest)
            .context("writing form manifest")?;

        info!(
            artifacts = self.dispatched.len(),
            path = %self.run_dir.join(FORM_MANIFEST_FILE).display(),
            "Form channel dispatched"
        );
        Ok(())
    }

    async fn check(&self) -> Result<Option<ApprovalDecisionSet>> {
        self.parse(&self.decision_path())
    }

    async fn shutdown(&mut self) {
        // No owned process; removing the manifest tells the tool to stop
        let _ = std::fs::remove_file(self.run_dir.join(FORM_MANIFEST_FILE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Decision;
    use tempfile::TempDir;

    fn artifact(path: &str) -> ArtifactRef {
        ArtifactRef {
            path: path.into(),
            engine_path: path.trim_start_matches('/').to_string(),
            exists_on_disk: true,
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_unresolved() {
        let temp = TempDir::new().unwrap();
        let channel = FormChannel::new(temp.path(), &[artifact("/out/1.png")]);
        assert!(channel.check().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_list_is_unresolved() {
        let temp = TempDir::new().unwrap();
        let channel = FormChannel::new(temp.path(), &[artifact("/out/1.png")]);
        std::fs::write(
            temp.path().join(FORM_DECISION_FILE),
            r#"{"approved_images": []}"#,
        )
        .unwrap();
        assert!(channel.check().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_empty_list_resolves_with_implicit_rejections() {
        let temp = TempDir::new().unwrap();
        let artifacts = vec![artifact("/out/1.png"), artifact("/out/2.png")];
        let channel = FormChannel::new(temp.path(), &artifacts);

        std::fs::write(
            temp.path().join(FORM_DECISION_FILE),
            r#"{"approved_images": [
                {"original_index": 1, "batch_image_index": 0,
                 "approved_image_path": "/out/1.png", "prompt": "ignored extra"}
            ]}"#,
        )
        .unwrap();

        let set = channel.check().await.unwrap().unwrap();
        assert!(set.complete);
        assert_eq!(set.decision_for(&artifacts[0]), Some(Decision::Approved));
        assert_eq!(set.decision_for(&artifacts[1]), Some(Decision::Rejected));
    }

    #[tokio::test]
    async fn test_dispatch_writes_manifest_and_clears_stale_decisions() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(FORM_DECISION_FILE),
            r#"{"approved_images": [{"original_index": 0, "batch_image_index": 0, "approved_image_path": "/stale.png"}]}"#,
        )
        .unwrap();

        let mut channel = FormChannel::new(temp.path(), &[artifact("/out/1.png")]);
        channel.dispatch().await.unwrap();

        assert!(temp.path().join(FORM_MANIFEST_FILE).exists());
        assert!(!temp.path().join(FORM_DECISION_FILE).exists());
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let channel = FormChannel::new(temp.path(), &[artifact("/out/1.png")]);
        std::fs::write(temp.path().join(FORM_DECISION_FILE), "{ nope").unwrap();
        assert!(channel.check().await.is_err());
    }
}

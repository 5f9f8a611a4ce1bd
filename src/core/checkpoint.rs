//! Checkpoint store: one JSON document per run, written atomically.
//!
//! Save is an idempotent overwrite via write-temp-then-rename, so no
//! reader (including a resuming process) ever observes a partial
//! document. Load distinguishes a missing checkpoint from a corrupt one.

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::domain::{RunId, RunState};

/// Errors from checkpoint persistence
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no checkpoint found for run {0}")]
    NotFound(RunId),

    #[error("checkpoint for run {run_id} is corrupt: {source}")]
    Corrupt {
        run_id: RunId,
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization error: {0}")]
    Serialization(serde_json::Error),
}

/// File-based checkpoint store rooted at the configured output directory
pub struct CheckpointStore {
    output_root: PathBuf,
}

impl CheckpointStore {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    /// Path of the checkpoint document for a run
    pub fn checkpoint_path(&self, run_id: &RunId) -> PathBuf {
        self.output_root.join(run_id.as_str()).join("checkpoint.json")
    }

    /// Persist the full run state, overwriting any previous checkpoint
    pub fn save(&self, state: &RunState) -> Result<(), CheckpointError> {
        let dir = self.output_root.join(state.run_id.as_str());
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("checkpoint.json");

        let json =
            serde_json::to_vec_pretty(state).map_err(CheckpointError::Serialization)?;

        atomic_write(&path, &json)?;
        debug!(run_id = %state.run_id, path = %path.display(), "Checkpoint saved");
        Ok(())
    }

    /// Load the run state for a previous run
    pub fn load(&self, run_id: &RunId) -> Result<RunState, CheckpointError> {
        let path = self.checkpoint_path(run_id);

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(run_id.clone()))
            }
            Err(e) => return Err(CheckpointError::Io(e)),
        };

        serde_json::from_str(&content).map_err(|source| CheckpointError::Corrupt {
            run_id: run_id.clone(),
            source,
        })
    }
}

/// Write bytes to `path` through a temp file in the same directory followed
/// by an atomic rename. Shared with the approval manifest writers.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArtifactRef, VideoJob, WorkItem};
    use tempfile::TempDir;

    fn sample_state() -> RunState {
        let mut state = RunState::new(RunId::from_name("Run_20240101_120000"));
        let mut item = WorkItem::new(1, "a dancer at dusk".to_string(), None);
        item.image_job.submitted("tick-1".to_string()).unwrap();
        item.image_job.polling().unwrap();
        item.image_job.completed().unwrap();
        item.artifacts.push(ArtifactRef {
            path: PathBuf::from("/engine/output/Run_x/all_images/001_raw_00001_.png"),
            engine_path: "Run_x/all_images/001_raw_00001_.png".to_string(),
            exists_on_disk: true,
        });
        item.video_jobs.push(VideoJob {
            source_artifact: PathBuf::from(
                "/engine/output/Run_x/all_images/001_raw_00001_.png",
            ),
            temp_start_image: Some(PathBuf::from("/engine/input/temp/start_001.png")),
            record: {
                let mut r = crate::domain::JobRecord::new();
                r.submitted("tick-2".to_string()).unwrap();
                r
            },
        });
        state.items.push(item);
        state.advance_cursor("images");
        state
    }

    #[test]
    fn test_save_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path());

        let state = sample_state();
        store.save(&state).unwrap();

        let loaded = store.load(&state.run_id).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_save_is_idempotent_overwrite() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path());

        let mut state = sample_state();
        store.save(&state).unwrap();
        state.advance_cursor("approval");
        store.save(&state).unwrap();

        let loaded = store.load(&state.run_id).unwrap();
        assert_eq!(loaded.stage_cursor.as_deref(), Some("approval"));
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path());

        let err = store.load(&RunId::from_name("Run_missing")).unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[test]
    fn test_load_corrupt_is_distinct() {
        let temp = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp.path());
        let run_id = RunId::from_name("Run_broken");

        let path = store.checkpoint_path(&run_id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let err = store.load(&run_id).unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }
}

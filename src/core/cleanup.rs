//! Cleanup of transient engine-input resources.
//!
//! A temp start image may only be deleted once its owning job's terminal
//! state proves the engine is done with it. TimedOut is ambiguous: the
//! engine may still be reading the file, so it is retained and reported.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::domain::{JobStatus, WorkItem};

/// What cleanup did, for the summary and the operator
#[derive(Debug, Default, Clone)]
pub struct CleanupReport {
    /// Paths removed
    pub deleted: Vec<PathBuf>,

    /// Paths retained because the owning job timed out: (item index, path)
    pub retained: Vec<(u32, PathBuf)>,

    /// Deletion attempts that failed (logged, non-fatal)
    pub errors: usize,
}

/// Deletes transient resources whose owning jobs are safely terminal
pub struct CleanupManager {
    /// Directory removed at the end if it is empty after file cleanup
    temp_dir: Option<PathBuf>,
}

impl CleanupManager {
    pub fn new(temp_dir: Option<PathBuf>) -> Self {
        Self { temp_dir }
    }

    pub fn cleanup(&self, items: &[WorkItem]) -> CleanupReport {
        let mut report = CleanupReport::default();

        for item in items {
            for job in &item.video_jobs {
                let Some(ref temp_path) = job.temp_start_image else {
                    continue;
                };

                match job.record.status {
                    JobStatus::Completed | JobStatus::Failed => {
                        match std::fs::remove_file(temp_path) {
                            Ok(()) => {
                                info!(item = item.index, path = %temp_path.display(), "Removed temp start image");
                                report.deleted.push(temp_path.clone());
                            }
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                                // Already gone; nothing to do
                                report.deleted.push(temp_path.clone());
                            }
                            Err(e) => {
                                warn!(item = item.index, path = %temp_path.display(), error = %e, "Failed to remove temp start image");
                                report.errors += 1;
                            }
                        }
                    }
                    JobStatus::TimedOut => {
                        warn!(
                            item = item.index,
                            path = %temp_path.display(),
                            "Job timed out; retaining temp start image (engine may still read it)"
                        );
                        report.retained.push((item.index, temp_path.clone()));
                    }
                    // Non-terminal records own their resources; leave them be
                    _ => {}
                }
            }
        }

        if let Some(ref dir) = self.temp_dir {
            // Only removed when empty; a retained file keeps it alive
            if std::fs::remove_dir(dir).is_ok() {
                info!(path = %dir.display(), "Removed empty temp start directory");
            }
        }

        report
    }
}

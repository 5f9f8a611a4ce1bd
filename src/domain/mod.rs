//! Domain types: run state, work items, job records, approval decisions.

pub mod approval;
pub mod item;
pub mod run;

pub use approval::{ApprovalDecisionSet, Decision};
pub use item::{ArtifactRef, InvalidTransition, JobRecord, JobStatus, VideoJob, WorkItem};
pub use run::{RunId, RunState};

//! Run state: the aggregate root persisted in the checkpoint.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::approval::ApprovalDecisionSet;
use super::item::WorkItem;

/// Stable identifier for a run, derived from its creation timestamp.
///
/// Doubles as the run folder name, e.g. `Run_20250829_153012`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// New id from the current wall clock
    pub fn now() -> Self {
        Self(format!("Run_{}", Utc::now().format("%Y%m%d_%H%M%S")))
    }

    /// Wrap an existing id (e.g. from `--resume-run`)
    pub fn from_name(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full state of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Run identity; also names the run folder
    pub run_id: RunId,

    /// Name of the last stage that completed, None before any did
    pub stage_cursor: Option<String>,

    /// All work items, in creation order; never removed once created
    pub items: Vec<WorkItem>,

    /// Canonical approval decisions, set once the approval stage resolves.
    /// Checkpoints taken before that stage carry None, which is what routes
    /// a resumed videos stage into the gate's one-shot re-check.
    #[serde(default)]
    pub approvals: Option<ApprovalDecisionSet>,
}

impl RunState {
    /// Fresh state for a new run
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            stage_cursor: None,
            items: Vec::new(),
            approvals: None,
        }
    }

    /// Record that a stage finished
    pub fn advance_cursor(&mut self, stage_name: &str) {
        self.stage_cursor = Some(stage_name.to_string());
    }

    /// Look up an item by its stable index
    pub fn item_mut(&mut self, index: u32) -> Option<&mut WorkItem> {
        self.items.iter_mut().find(|i| i.index == index)
    }
}

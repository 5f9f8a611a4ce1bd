//! Approval decisions over generated artifacts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::item::ArtifactRef;

/// Operator verdict on one artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

/// The canonical decision set produced by whichever channel resolved first.
///
/// Keys are absolute artifact paths as strings (the same normalization the
/// checkpoint uses), so the map survives serde round-trips unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecisionSet {
    /// Per-artifact verdicts
    pub decisions: BTreeMap<String, Decision>,

    /// True when every dispatched artifact carries a decision
    pub complete: bool,
}

impl ApprovalDecisionSet {
    /// Empty, complete set: what an empty dispatch resolves to
    pub fn empty_complete() -> Self {
        Self {
            decisions: BTreeMap::new(),
            complete: true,
        }
    }

    /// Empty, incomplete set: the `wait=false` default when no file exists
    pub fn empty_incomplete() -> Self {
        Self::default()
    }

    /// Build a complete set from an approved subset of the dispatched list;
    /// everything dispatched but not approved is recorded Rejected.
    pub fn from_approved(dispatched: &[ArtifactRef], approved_keys: &[String]) -> Self {
        let mut decisions = BTreeMap::new();
        for artifact in dispatched {
            let key = artifact.key();
            let verdict = if approved_keys.contains(&key) {
                Decision::Approved
            } else {
                Decision::Rejected
            };
            decisions.insert(key, verdict);
        }
        Self {
            decisions,
            complete: true,
        }
    }

    pub fn decision_for(&self, artifact: &ArtifactRef) -> Option<Decision> {
        self.decisions.get(&artifact.key()).copied()
    }

    pub fn approved_count(&self) -> usize {
        self.decisions
            .values()
            .filter(|d| **d == Decision::Approved)
            .count()
    }

    pub fn rejected_count(&self) -> usize {
        self.decisions
            .values()
            .filter(|d| **d == Decision::Rejected)
            .count()
    }
}

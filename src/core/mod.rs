//! Orchestration core: sequencer, checkpointing, cleanup, run context.

pub mod checkpoint;
pub mod cleanup;
pub mod context;
pub mod sequencer;

pub use checkpoint::{atomic_write, CheckpointError, CheckpointStore};
pub use cleanup::{CleanupManager, CleanupReport};
pub use context::RunContext;
pub use sequencer::{Sequencer, Stage};

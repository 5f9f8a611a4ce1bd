//! RunContext: everything a stage needs, threaded explicitly.
//!
//! There is deliberately no module-level state; the context owns the
//! resolved config, the external-service adapters, and the checkpoint
//! store, and every stage borrows it.

use crate::adapters::{PromptSource, RenderService};
use crate::config::ResolvedConfig;
use crate::core::checkpoint::CheckpointStore;

pub struct RunContext {
    pub config: ResolvedConfig,
    pub render: Box<dyn RenderService>,
    pub prompter: Box<dyn PromptSource>,
    pub checkpoints: CheckpointStore,
}

impl RunContext {
    pub fn new(
        config: ResolvedConfig,
        render: Box<dyn RenderService>,
        prompter: Box<dyn PromptSource>,
    ) -> Self {
        let checkpoints = CheckpointStore::new(config.output_root.clone());
        Self {
            config,
            render,
            prompter,
            checkpoints,
        }
    }
}

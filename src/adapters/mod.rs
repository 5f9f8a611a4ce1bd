//! Adapter interfaces for external systems.
//!
//! Adapters provide a unified seam to the render service and the prompt
//! source so the pipeline can run against mocks in tests.

pub mod prompter;
pub mod render;

pub use prompter::{OllamaPrompter, PromptSource};
pub use render::{
    HttpRenderService, JobClient, PollOutcome, RenderError, RenderService, RequestSpec,
    WaitOutcome,
};

//! renderflow: a resumable batch pipeline orchestrator for AI render
//! engines.
//!
//! A run generates prompts, submits image jobs to a flaky render engine,
//! routes the outputs through a human approval gate, animates the
//! approved images into videos, and cleans up after itself. Every stage
//! boundary is checkpointed to disk so an interrupted run resumes with
//! `run --start-from <stage> --resume-run <id>` and loses nothing.

pub mod adapters;
pub mod approval;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod stages;

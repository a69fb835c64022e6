//! Pipeline building and execution.
//!
//! This module provides:
//! - Linear pipeline definitions with validation
//! - Pipe allocation between adjacent stages
//! - Process launch, supervision and failure attribution
//! - Rename-then-index finalization of the produced artifact

mod builder;
mod finalize;
mod orchestrator;
pub mod pipe;
mod runner;
mod supervisor;

#[cfg(test)]
mod integration_tests;

pub use builder::{Pipeline, PipelineBuilder};
pub use finalize::Finalizer;
pub use orchestrator::{Orchestrator, PipelineRun, RunningStage};
pub use pipe::{connect, PipeLink, DEFAULT_PIPE_CAPACITY};
pub use runner::PipelineRunner;
pub use supervisor::{FailureMode, Supervisor};

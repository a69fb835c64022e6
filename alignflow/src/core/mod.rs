//! Core domain model types for alignflow.
//!
//! This module contains the fundamental types shared by the pipeline pieces:
//! - Stage and run status enums
//! - The produced artifact and its promotion state
//! - Lifecycle events

mod artifact;
mod event;
mod status;

pub use artifact::Artifact;
pub use event::PipelineEvent;
pub use status::{RunStatus, StageStatus, SIGPIPE};

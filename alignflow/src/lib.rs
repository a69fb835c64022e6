//! # Alignflow
//!
//! Streaming read alignment built from external tools.
//!
//! Alignflow chains `gunzip`, `NanoFilt`, `minimap2` and `samtools sort`
//! through OS pipes, supervises every process, and only then renames the
//! sorted BAM onto its final path and indexes it:
//!
//! - **Stage descriptors**: inert, structured descriptions of one tool call
//! - **Pipes**: kernel-buffered links between adjacent stages, the only flow control
//! - **Supervision**: every stage must exit 0; the root cause of a failure is reported
//! - **Finalization**: rename first, index second, with distinct errors for each
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use alignflow::prelude::*;
//!
//! let pipeline = PipelineBuilder::new("copy")
//!     .stage(StageDescriptor::new("decompress", "gunzip").arg("-c").arg("reads.fastq.gz"))
//!     .pipe_to(StageDescriptor::new("count", "wc").arg("-l").stdout_to("lines.tmp"))
//!     .promote_to("lines.txt")
//!     .build()?;
//!
//! let artifact = PipelineRunner::new()
//!     .run_and_finalize(&pipeline, &Finalizer::default())
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod input;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod tools;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{AlignmentConfig, FilterThresholds, IndexConfig, ToolCommand, ToolPaths};
    pub use crate::core::{Artifact, PipelineEvent, RunStatus, StageStatus};
    pub use crate::errors::{
        AlignflowError, FinalizeError, PipelineValidationError, StageFailure, StageLaunchError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        FailureMode, Finalizer, Orchestrator, Pipeline, PipelineBuilder, PipelineRun,
        PipelineRunner, Supervisor,
    };
    pub use crate::stages::{InputMode, OutputMode, StageDescriptor};
}

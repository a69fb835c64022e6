//! Error types for alignflow.
//!
//! Every failure names the offending stage or finalize step together with the
//! underlying OS status, so a caller can decide what (if anything) is safe to
//! retry.

use crate::core::{Artifact, StageStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for alignflow operations.
#[derive(Debug, Error)]
pub enum AlignflowError {
    /// A pipeline definition violated the chain invariants.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A stage executable could not be started.
    #[error("{0}")]
    StageLaunch(#[from] StageLaunchError),

    /// A stage exited non-zero or was killed by a signal.
    #[error("{0}")]
    StageExit(#[from] StageFailure),

    /// Promotion or indexing of the produced artifact failed.
    #[error("{0}")]
    Finalize(#[from] FinalizeError),

    /// The run deadline expired before every stage exited.
    #[error("Pipeline '{pipeline}' timed out after {after_secs:.1}s; still running: {}", stages.join(", "))]
    Timeout {
        /// The pipeline name.
        pipeline: String,
        /// Stages that were still running when the deadline expired.
        stages: Vec<String>,
        /// The configured deadline in seconds.
        after_secs: f64,
    },

    /// The run was cancelled from outside.
    #[error("Pipeline '{pipeline}' cancelled: {reason}")]
    Cancelled {
        /// The pipeline name.
        pipeline: String,
        /// The cancellation reason.
        reason: String,
    },

    /// Input preparation failed (missing or empty read directories).
    #[error("Input error: {0}")]
    Input(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AlignflowError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an input error.
    #[must_use]
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    /// Process exit code reported by the command line for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Io(_) | Self::Input(_) => 1,
            Self::StageLaunch(_) => 2,
            Self::StageExit(_) => 3,
            Self::Finalize(FinalizeError::Rename { .. } | FinalizeError::NotPromoted { .. }) => 4,
            Self::Finalize(FinalizeError::Index { .. }) => 5,
            Self::Timeout { .. } | Self::Cancelled { .. } => 6,
            Self::Validation(_) | Self::Config(_) => 7,
        }
    }

    /// Returns the stage this error is attributed to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageLaunch(err) => Some(&err.stage),
            Self::StageExit(err) => Some(&err.stage),
            _ => None,
        }
    }
}

/// Error raised when a pipeline definition is invalid.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Adds a single stage.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stages.push(stage.into());
        self
    }
}

/// Error raised when a stage process cannot be spawned.
#[derive(Debug, Error)]
#[error("Failed to launch stage '{stage}' ({program}): {source}")]
pub struct StageLaunchError {
    /// The stage name.
    pub stage: String,
    /// The executable that was invoked.
    pub program: String,
    /// The OS error from process creation or stdio setup.
    #[source]
    pub source: std::io::Error,
}

impl StageLaunchError {
    /// Creates a new launch error.
    #[must_use]
    pub fn new(stage: impl Into<String>, program: impl Into<String>, source: std::io::Error) -> Self {
        Self {
            stage: stage.into(),
            program: program.into(),
            source,
        }
    }
}

/// A stage that terminated unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Stage '{stage}' failed: {status}")]
pub struct StageFailure {
    /// The stage name.
    pub stage: String,
    /// Position of the stage in the chain, zero-based.
    pub index: usize,
    /// The terminal status observed for the stage.
    pub status: StageStatus,
}

impl StageFailure {
    /// Creates a new stage failure.
    #[must_use]
    pub fn new(stage: impl Into<String>, index: usize, status: StageStatus) -> Self {
        Self {
            stage: stage.into(),
            index,
            status,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!("StageExitError"));
        map.insert("stage".to_string(), serde_json::json!(self.stage));
        map.insert("index".to_string(), serde_json::json!(self.index));
        map.insert("status".to_string(), serde_json::json!(self.status.to_string()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Errors from the rename-then-index finalize sequence.
#[derive(Debug, Error)]
pub enum FinalizeError {
    /// The temporary artifact could not be renamed onto the canonical path.
    ///
    /// Nothing was indexed; the artifact is still at `temporary`.
    #[error("Failed to rename {} to {}: {source}", temporary.display(), canonical.display())]
    Rename {
        /// The temporary path produced by the pipeline.
        temporary: PathBuf,
        /// The canonical destination.
        canonical: PathBuf,
        /// The OS error.
        #[source]
        source: std::io::Error,
    },

    /// Indexing failed after a successful rename.
    ///
    /// The canonical artifact is complete; only the index is missing.
    #[error("Failed to index {}: {reason}", artifact.canonical_path().display())]
    Index {
        /// The promoted, unindexed artifact.
        artifact: Artifact,
        /// Why indexing failed.
        reason: String,
    },

    /// Indexing was requested for an artifact that is not at its canonical path.
    #[error("Refusing to index {}: artifact has not been promoted", path.display())]
    NotPromoted {
        /// The path that would have been indexed.
        path: PathBuf,
    },
}

impl FinalizeError {
    /// Returns true if the canonical artifact is intact and only indexing needs a retry.
    #[must_use]
    pub fn is_index_retryable(&self) -> bool {
        matches!(self, Self::Index { .. })
    }
}

//! The file produced by a pipeline and its promotion state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A pipeline's terminal output on its way to becoming the canonical artifact.
///
/// The state only moves forward: pending, then promoted (renamed onto the
/// canonical path), then indexed. An artifact is never marked indexed unless
/// it was promoted first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    temporary_path: PathBuf,
    canonical_path: PathBuf,
    promoted: bool,
    indexed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    promoted_at: Option<String>,
}

impl Artifact {
    /// Creates an artifact that still lives at its temporary path.
    #[must_use]
    pub fn pending(temporary_path: impl Into<PathBuf>, canonical_path: impl Into<PathBuf>) -> Self {
        Self {
            temporary_path: temporary_path.into(),
            canonical_path: canonical_path.into(),
            promoted: false,
            indexed: false,
            index_path: None,
            promoted_at: None,
        }
    }

    /// Creates an artifact already sitting at its canonical path.
    ///
    /// Used when only the index step is retried.
    #[must_use]
    pub fn promoted(canonical_path: impl Into<PathBuf>) -> Self {
        let canonical_path = canonical_path.into();
        Self {
            temporary_path: canonical_path.clone(),
            canonical_path,
            promoted: true,
            indexed: false,
            index_path: None,
            promoted_at: None,
        }
    }

    /// The path the pipeline wrote to.
    #[must_use]
    pub fn temporary_path(&self) -> &Path {
        &self.temporary_path
    }

    /// The caller-visible destination.
    #[must_use]
    pub fn canonical_path(&self) -> &Path {
        &self.canonical_path
    }

    /// Where the artifact currently lives on disk.
    #[must_use]
    pub fn current_path(&self) -> &Path {
        if self.promoted {
            &self.canonical_path
        } else {
            &self.temporary_path
        }
    }

    /// Whether the rename onto the canonical path has happened.
    #[must_use]
    pub fn is_promoted(&self) -> bool {
        self.promoted
    }

    /// Whether the canonical artifact has a companion index.
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// The companion index, once written.
    #[must_use]
    pub fn index_path(&self) -> Option<&Path> {
        self.index_path.as_deref()
    }

    /// When the promotion happened (ISO 8601).
    #[must_use]
    pub fn promoted_at(&self) -> Option<&str> {
        self.promoted_at.as_deref()
    }

    pub(crate) fn mark_promoted(&mut self) {
        self.promoted = true;
        self.promoted_at = Some(crate::utils::iso_timestamp());
    }

    pub(crate) fn mark_indexed(&mut self, index_path: PathBuf) {
        debug_assert!(self.promoted, "indexed before promotion");
        self.indexed = true;
        self.index_path = Some(index_path);
    }
}

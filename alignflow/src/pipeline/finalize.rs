//! Promoting a finished artifact and indexing it.
//!
//! The two steps are strictly ordered: the temporary output is renamed onto
//! its canonical path first, and only the canonical file is ever indexed. A
//! rename failure leaves the temporary file where it was and nothing is
//! indexed; an index failure leaves a complete canonical file behind that
//! can be indexed again later without re-running the pipeline.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use super::builder::PipelineBuilder;
use super::orchestrator::Orchestrator;
use super::supervisor::Supervisor;
use crate::cancellation::CancellationToken;
use crate::config::IndexConfig;
use crate::core::{Artifact, PipelineEvent};
use crate::errors::{AlignflowError, FinalizeError};
use crate::events::{default_sink, EventSink};

/// Renames and indexes pipeline outputs.
pub struct Finalizer {
    index: IndexConfig,
    sink: Arc<dyn EventSink>,
    cancellation: Option<Arc<CancellationToken>>,
}

impl std::fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finalizer")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl Default for Finalizer {
    fn default() -> Self {
        Self::new(IndexConfig::default())
    }
}

impl Finalizer {
    /// Creates a finalizer running the given indexer.
    #[must_use]
    pub fn new(index: IndexConfig) -> Self {
        Self {
            index,
            sink: default_sink(),
            cancellation: None,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Kills a running indexer when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// The index settings.
    #[must_use]
    pub fn index_config(&self) -> &IndexConfig {
        &self.index
    }

    /// Where the index of `canonical` is written.
    #[must_use]
    pub fn index_path(&self, canonical: &Path) -> std::path::PathBuf {
        self.index.index_path(canonical)
    }

    /// Renames the artifact onto its canonical path.
    ///
    /// An artifact that is already promoted is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`FinalizeError::Rename`] if the rename fails; the temporary
    /// file is left untouched.
    pub fn promote(&self, mut artifact: Artifact) -> Result<Artifact, FinalizeError> {
        if artifact.is_promoted() {
            return Ok(artifact);
        }

        let (temporary, canonical) = (artifact.temporary_path(), artifact.canonical_path());
        if let Err(source) = std::fs::rename(temporary, canonical) {
            warn!(
                temporary = %temporary.display(),
                canonical = %canonical.display(),
                error = %source,
                "Rename failed"
            );
            return Err(FinalizeError::Rename {
                temporary: temporary.to_path_buf(),
                canonical: canonical.to_path_buf(),
                source,
            });
        }

        info!(
            temporary = %temporary.display(),
            canonical = %canonical.display(),
            "Artifact promoted"
        );
        self.sink
            .try_emit(PipelineEvent::artifact_promoted(temporary, canonical));
        artifact.mark_promoted();
        Ok(artifact)
    }

    /// Builds the index of a promoted artifact.
    ///
    /// Running this again on an indexed artifact rebuilds the same index.
    ///
    /// # Errors
    ///
    /// - [`FinalizeError::NotPromoted`] if the artifact is not at its
    ///   canonical path yet; no process is started.
    /// - [`FinalizeError::Index`] if the indexer could not run, failed, or
    ///   did not write the index. The error carries the promoted artifact.
    pub async fn index(&self, artifact: Artifact) -> Result<Artifact, FinalizeError> {
        if !artifact.is_promoted() {
            return Err(FinalizeError::NotPromoted {
                path: artifact.temporary_path().to_path_buf(),
            });
        }

        let canonical = artifact.canonical_path().to_path_buf();
        let index_path = self.index_path(&canonical);

        match self.run_indexer(&canonical, &index_path).await {
            Ok(()) => {
                info!(
                    canonical = %canonical.display(),
                    index = %index_path.display(),
                    "Artifact indexed"
                );
                self.sink
                    .emit(PipelineEvent::artifact_indexed(&canonical, &index_path))
                    .await;
                let mut artifact = artifact;
                artifact.mark_indexed(index_path);
                Ok(artifact)
            }
            Err(reason) => {
                warn!(canonical = %canonical.display(), %reason, "Indexing failed");
                self.sink
                    .emit(PipelineEvent::artifact_index_failed(&canonical, &reason))
                    .await;
                Err(FinalizeError::Index { artifact, reason })
            }
        }
    }

    /// Promotes the artifact, then indexes it.
    ///
    /// # Errors
    ///
    /// See [`Finalizer::promote`] and [`Finalizer::index`]. A rename failure
    /// means no index was attempted.
    pub async fn finalize(&self, artifact: Artifact) -> Result<Artifact, AlignflowError> {
        let promoted = self.promote(artifact)?;
        Ok(self.index(promoted).await?)
    }

    /// Indexes a canonical file left behind by an earlier index failure.
    ///
    /// The canonical file itself is never modified.
    ///
    /// # Errors
    ///
    /// Returns [`FinalizeError::Index`] if the file is missing or indexing
    /// fails again.
    pub async fn retry_index(&self, canonical: &Path) -> Result<Artifact, AlignflowError> {
        Ok(self.index(Artifact::promoted(canonical)).await?)
    }

    async fn run_indexer(&self, canonical: &Path, index_path: &Path) -> Result<(), String> {
        if !canonical.is_file() {
            return Err(format!("{} does not exist", canonical.display()));
        }

        let stage = self
            .index
            .samtools
            .stage("index")
            .arg("index")
            .arg(format!("--threads={}", self.index.threads))
            .arg(canonical)
            .produces(index_path);
        let pipeline = PipelineBuilder::new("index")
            .stage(stage)
            .build()
            .map_err(|e| e.to_string())?;

        let mut supervisor = Supervisor::new().with_sink(self.sink.clone());
        if let Some(token) = &self.cancellation {
            supervisor = supervisor.with_cancellation(token.clone());
        }

        let mut run = Orchestrator::new()
            .with_sink(self.sink.clone())
            .start(&pipeline)
            .await
            .map_err(|e| e.to_string())?;
        supervisor
            .supervise(&mut run)
            .await
            .map_err(|e| e.to_string())?;

        if !index_path.is_file() {
            return Err(format!(
                "indexer exited cleanly but {} was not written",
                index_path.display()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolCommand;
    use crate::events::CollectingEventSink;

    const INDEXER: &str = r#"[ "$1" = index ] || exit 64
[ -f "$3" ] || exit 1
printf 'index of %s\n' "$3" > "$3.bai"
"#;

    fn indexer(dir: &Path, script: &str) -> IndexConfig {
        let path = dir.join("samtools.sh");
        std::fs::write(&path, script).unwrap();
        IndexConfig::default()
            .with_samtools(ToolCommand::new("sh").with_arg(path.display().to_string()))
            .with_threads(2)
    }

    fn produced(dir: &Path) -> Artifact {
        let temporary = dir.join("alignment.unsorted.bam");
        std::fs::write(&temporary, b"BAM\x01sorted").unwrap();
        Artifact::pending(temporary, dir.join("alignment.bam"))
    }

    #[test]
    fn test_promote_renames_onto_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CollectingEventSink::new());
        let finalizer = Finalizer::new(indexer(dir.path(), INDEXER)).with_sink(sink.clone());

        let artifact = finalizer.promote(produced(dir.path())).unwrap();

        assert!(artifact.is_promoted());
        assert!(artifact.promoted_at().is_some());
        assert!(!dir.path().join("alignment.unsorted.bam").exists());
        assert_eq!(std::fs::read(dir.path().join("alignment.bam")).unwrap(), b"BAM\x01sorted");
        assert_eq!(sink.event_types(), vec!["artifact.promoted"]);
    }

    #[tokio::test]
    async fn test_rename_failure_skips_index() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CollectingEventSink::new());
        let finalizer = Finalizer::new(indexer(dir.path(), INDEXER)).with_sink(sink.clone());

        let temporary = dir.path().join("alignment.unsorted.bam");
        std::fs::write(&temporary, b"BAM").unwrap();
        let artifact = Artifact::pending(&temporary, dir.path().join("missing/alignment.bam"));

        let err = finalizer.finalize(artifact).await.unwrap_err();

        assert!(matches!(err, AlignflowError::Finalize(FinalizeError::Rename { .. })));
        assert_eq!(err.exit_code(), 4);
        assert!(temporary.exists());
        assert!(sink.launched_stages().is_empty());
    }

    #[tokio::test]
    async fn test_index_requires_promotion() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CollectingEventSink::new());
        let finalizer = Finalizer::new(indexer(dir.path(), INDEXER)).with_sink(sink.clone());

        let err = finalizer.index(produced(dir.path())).await.unwrap_err();

        assert!(matches!(err, FinalizeError::NotPromoted { .. }));
        assert!(sink.launched_stages().is_empty());
        assert!(!dir.path().join("alignment.bam.bai").exists());
    }

    #[tokio::test]
    async fn test_finalize_promotes_then_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CollectingEventSink::new());
        let finalizer = Finalizer::new(indexer(dir.path(), INDEXER)).with_sink(sink.clone());

        let artifact = finalizer.finalize(produced(dir.path())).await.unwrap();

        let index = dir.path().join("alignment.bam.bai");
        assert!(artifact.is_indexed());
        assert_eq!(artifact.index_path(), Some(index.as_path()));
        assert!(index.exists());
        assert_eq!(
            sink.events_of_type("stage.launched")[0].data.get("command").unwrap(),
            &serde_json::json!(format!(
                "sh {} index --threads=2 {}",
                dir.path().join("samtools.sh").display(),
                dir.path().join("alignment.bam").display()
            ))
        );

        let types = sink.event_types();
        let promoted = types.iter().position(|t| t == "artifact.promoted").unwrap();
        let launched = types.iter().position(|t| t == "stage.launched").unwrap();
        assert!(promoted < launched);
    }

    #[tokio::test]
    async fn test_index_failure_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let failing = Finalizer::new(indexer(dir.path(), "exit 1\n"));

        let err = failing.finalize(produced(dir.path())).await.unwrap_err();
        let canonical = dir.path().join("alignment.bam");

        match &err {
            AlignflowError::Finalize(finalize) => {
                assert!(finalize.is_index_retryable());
                if let FinalizeError::Index { artifact, .. } = finalize {
                    assert!(artifact.is_promoted());
                    assert!(!artifact.is_indexed());
                }
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.exit_code(), 5);
        assert_eq!(std::fs::read(&canonical).unwrap(), b"BAM\x01sorted");

        let working = Finalizer::new(indexer(dir.path(), INDEXER));
        let artifact = working.retry_index(&canonical).await.unwrap();
        assert!(artifact.is_indexed());
        assert_eq!(std::fs::read(&canonical).unwrap(), b"BAM\x01sorted");
    }

    #[tokio::test]
    async fn test_indexer_without_output_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = Artifact::promoted(dir.path().join("alignment.bam"));
        std::fs::write(artifact.canonical_path(), b"BAM").unwrap();

        let err = Finalizer::new(indexer(dir.path(), "exit 0\n"))
            .index(artifact)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("was not written"));
    }

    #[tokio::test]
    async fn test_retry_index_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let finalizer = Finalizer::new(indexer(dir.path(), INDEXER));

        let err = finalizer
            .retry_index(&dir.path().join("absent.bam"))
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 5);
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_index_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let finalizer = Finalizer::new(indexer(dir.path(), INDEXER));

        let artifact = finalizer.finalize(produced(dir.path())).await.unwrap();
        let first = std::fs::read(artifact.index_path().unwrap()).unwrap();
        let again = finalizer.index(artifact).await.unwrap();
        let second = std::fs::read(again.index_path().unwrap()).unwrap();

        let expected = dir.path().join("alignment.bam.bai");
        assert_eq!(first, second);
        assert_eq!(again.index_path(), Some(expected.as_path()));
    }
}

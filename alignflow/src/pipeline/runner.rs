//! Start-then-supervise in one call.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::builder::Pipeline;
use super::finalize::Finalizer;
use super::orchestrator::Orchestrator;
use super::supervisor::{FailureMode, Supervisor};
use crate::cancellation::CancellationToken;
use crate::core::Artifact;
use crate::errors::AlignflowError;
use crate::events::EventSink;

/// Runs pipelines to completion.
///
/// Holds no state between runs, so one runner can drive several pipelines
/// concurrently as long as they target different outputs.
#[derive(Debug, Default)]
pub struct PipelineRunner {
    orchestrator: Orchestrator,
    supervisor: Supervisor,
}

impl PipelineRunner {
    /// Creates a runner with default supervision.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends every lifecycle event to `sink`.
    #[must_use]
    pub fn with_sink(self, sink: Arc<dyn EventSink>) -> Self {
        Self {
            orchestrator: self.orchestrator.with_sink(sink.clone()),
            supervisor: self.supervisor.with_sink(sink),
        }
    }

    /// Sets the failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.supervisor = self.supervisor.with_failure_mode(mode);
        self
    }

    /// Sets a deadline for each run.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.supervisor = self.supervisor.with_deadline(deadline);
        self
    }

    /// Aborts runs when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.supervisor = self.supervisor.with_cancellation(token);
        self
    }

    /// Starts every stage and waits for all of them.
    ///
    /// # Errors
    ///
    /// Returns the launch, exit, timeout or cancellation error of the run.
    pub async fn run(&self, pipeline: &Pipeline) -> Result<Artifact, AlignflowError> {
        let mut run = self.orchestrator.start(pipeline).await?;
        let artifact = self.supervisor.supervise(&mut run).await?;
        info!(
            pipeline = run.name(),
            run_id = %run.id(),
            output = %artifact.temporary_path().display(),
            "Pipeline output ready"
        );
        Ok(artifact)
    }

    /// Runs the pipeline, then promotes and indexes its output.
    ///
    /// Nothing is renamed unless every stage succeeded.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the run or of finalization.
    pub async fn run_and_finalize(
        &self,
        pipeline: &Pipeline,
        finalizer: &Finalizer,
    ) -> Result<Artifact, AlignflowError> {
        let artifact = self.run(pipeline).await?;
        finalizer.finalize(artifact).await
    }
}

//! Waiting on a started chain and deciding whether it succeeded.

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::process::Child;
use tracing::{debug, error, info, warn};

use super::orchestrator::PipelineRun;
use crate::cancellation::CancellationToken;
use crate::core::{Artifact, PipelineEvent, RunStatus, StageStatus};
use crate::errors::{AlignflowError, StageFailure};
use crate::events::{default_sink, EventSink};

/// What the supervisor does once a stage has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Keep waiting until every stage exits on its own (default).
    ///
    /// Closed pipe ends propagate the failure: readers see EOF, writers see
    /// `EPIPE`.
    #[default]
    WaitAll,
    /// Kill every stage still running as soon as one fails.
    FailFast,
}

enum Interrupt {
    Deadline(Duration),
    Cancelled(String),
}

/// Observes every process of a [`PipelineRun`] until it is reaped.
pub struct Supervisor {
    sink: Arc<dyn EventSink>,
    failure_mode: FailureMode,
    deadline: Option<Duration>,
    cancellation: Option<Arc<CancellationToken>>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("failure_mode", &self.failure_mode)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Creates a supervisor with no deadline that waits for every stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sink: default_sink(),
            failure_mode: FailureMode::default(),
            deadline: None,
            cancellation: None,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Kills the whole run if it has not finished within `deadline`.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Kills the whole run when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Returns the configured failure mode.
    #[must_use]
    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Waits for every stage of `run` and reports the outcome.
    ///
    /// Every process is reaped before this returns, on every path. Success is
    /// reported only if each stage's own exit status is zero; a stage that
    /// exits zero on truncated input does not hide an upstream crash.
    ///
    /// When several stages fail, the failure attributed to the run is the
    /// first one observed that is not a broken pipe, since a writer dying on
    /// `EPIPE` is a consequence of its reader going away.
    ///
    /// # Errors
    ///
    /// - [`AlignflowError::StageExit`] if any stage exited non-zero or was
    ///   signalled.
    /// - [`AlignflowError::Timeout`] / [`AlignflowError::Cancelled`] if the
    ///   deadline expired or the token was cancelled first.
    /// - [`AlignflowError::Io`] if waiting on a process failed.
    pub async fn supervise(&self, run: &mut PipelineRun) -> Result<Artifact, AlignflowError> {
        let terminate = Arc::new(CancellationToken::new());
        let mut waits = FuturesUnordered::new();
        for stage in run.stages_mut() {
            if let Some(child) = stage.take_child() {
                waits.push(wait_stage(stage.index(), child, terminate.clone()));
            }
        }

        let deadline = self.deadline;
        let expiry = async move {
            match deadline {
                Some(after) => {
                    tokio::time::sleep(after).await;
                    after
                }
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expiry);

        let external = self.cancellation.clone();
        let cancelled = async move {
            match external {
                Some(token) => {
                    token.cancelled().await;
                    token.reason().unwrap_or_else(|| "cancelled".to_string())
                }
                None => std::future::pending().await,
            }
        };
        tokio::pin!(cancelled);

        let mut failures: Vec<StageFailure> = Vec::new();
        let mut wait_error: Option<std::io::Error> = None;
        let mut interrupt: Option<(Interrupt, Vec<String>)> = None;

        while !waits.is_empty() {
            tokio::select! {
                Some((index, result)) = waits.next() => {
                    let stage = &mut run.stages_mut()[index];
                    match result {
                        Ok(exit) => {
                            let status = StageStatus::from(exit);
                            let duration_ms = stage.record_exit(status);
                            let name = stage.name().to_string();

                            if status.is_success() {
                                debug!(stage = %name, duration_ms, "Stage exited cleanly");
                            } else {
                                warn!(stage = %name, %status, duration_ms, "Stage failed");
                            }
                            self.sink
                                .emit(PipelineEvent::stage_exited(&name, status, duration_ms))
                                .await;

                            // Stages we killed ourselves are not failures of their own.
                            let killed_by_us =
                                terminate.is_cancelled() && matches!(status, StageStatus::Signalled(_));
                            if status.is_failure() && !killed_by_us {
                                failures.push(StageFailure::new(&name, index, status));
                                if self.failure_mode == FailureMode::FailFast && !terminate.is_cancelled() {
                                    warn!(stage = %name, "Terminating remaining stages");
                                    terminate.cancel(format!("stage '{name}' failed"));
                                }
                            }
                        }
                        Err(e) => {
                            error!(stage = stage.name(), error = %e, "Waiting on stage failed");
                            wait_error.get_or_insert(e);
                        }
                    }
                }
                after = &mut expiry, if interrupt.is_none() => {
                    let still_running = run.running_stages();
                    warn!(pipeline = run.name(), ?still_running, "Deadline expired, terminating stages");
                    interrupt = Some((Interrupt::Deadline(after), still_running));
                    terminate.cancel("deadline expired");
                }
                reason = &mut cancelled, if interrupt.is_none() => {
                    let still_running = run.running_stages();
                    warn!(pipeline = run.name(), %reason, "Run cancelled, terminating stages");
                    interrupt = Some((Interrupt::Cancelled(reason), still_running));
                    terminate.cancel("run cancelled");
                }
            }
        }

        let outcome = conclude(run, interrupt, &failures, wait_error);
        match &outcome {
            Ok(_) => {
                info!(pipeline = run.name(), duration_ms = run.elapsed_ms(), "Pipeline succeeded");
                self.sink
                    .emit(PipelineEvent::pipeline_completed(run.name(), run.elapsed_ms()))
                    .await;
            }
            Err(err) => {
                error!(pipeline = run.name(), error = %err, "Pipeline failed");
                let mut event = PipelineEvent::pipeline_failed(run.name(), &err.to_string());
                if let AlignflowError::StageExit(failure) = &err {
                    event = event.add_data("failure", serde_json::json!(failure.to_dict()));
                }
                self.sink.emit(event).await;
            }
        }
        outcome
    }
}

fn conclude(
    run: &mut PipelineRun,
    interrupt: Option<(Interrupt, Vec<String>)>,
    failures: &[StageFailure],
    wait_error: Option<std::io::Error>,
) -> Result<Artifact, AlignflowError> {
    if let Some((interrupt, stages)) = interrupt {
        let err = match interrupt {
            Interrupt::Deadline(after) => AlignflowError::Timeout {
                pipeline: run.name().to_string(),
                stages,
                after_secs: after.as_secs_f64(),
            },
            Interrupt::Cancelled(reason) => AlignflowError::Cancelled {
                pipeline: run.name().to_string(),
                reason,
            },
        };
        run.set_status(RunStatus::Aborted {
            reason: err.to_string(),
        });
        return Err(err);
    }

    if let Some(failure) = attribute_failure(failures) {
        run.set_status(RunStatus::Failed {
            stage: failure.stage.clone(),
            status: failure.status,
        });
        return Err(failure.clone().into());
    }

    if let Some(e) = wait_error {
        run.set_status(RunStatus::Aborted {
            reason: e.to_string(),
        });
        return Err(e.into());
    }

    // Every stage must be confirmed individually, not just the last one.
    if let Some(stage) = run.stages().iter().find(|s| !s.status().is_success()) {
        let failure = StageFailure::new(stage.name(), stage.index(), stage.status());
        run.set_status(RunStatus::Failed {
            stage: failure.stage.clone(),
            status: failure.status,
        });
        return Err(failure.into());
    }

    run.set_status(RunStatus::Succeeded);
    Ok(Artifact::pending(run.terminal_output(), run.canonical_output()))
}

fn attribute_failure(failures: &[StageFailure]) -> Option<&StageFailure> {
    failures
        .iter()
        .find(|f| !f.status.is_broken_pipe())
        .or_else(|| failures.first())
}

async fn wait_stage(
    index: usize,
    mut child: Child,
    terminate: Arc<CancellationToken>,
) -> (usize, std::io::Result<ExitStatus>) {
    let result = tokio::select! {
        biased;
        result = child.wait() => result,
        () = terminate.cancelled() => {
            if let Err(e) = child.start_kill() {
                debug!(index, error = %e, "Stage exited before it could be killed");
            }
            child.wait().await
        }
    };
    (index, result)
}

//! Starting a stage chain.
//!
//! The orchestrator walks a [`Pipeline`] source to sink. Before a stage that
//! writes downstream is spawned, the pipe to its consumer is allocated; the
//! write end goes to the producer and the read end is held only until the
//! consumer is spawned. Each end is owned by the `Command` that receives it,
//! and that `Command` is dropped immediately after `spawn`, so the
//! orchestrator never keeps a copy that could hold a pipe open after the real
//! writer exits.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::builder::Pipeline;
use super::pipe::{self, PipeLink};
use crate::core::{PipelineEvent, RunStatus, StageStatus};
use crate::errors::{AlignflowError, StageLaunchError};
use crate::events::{default_sink, EventSink};
use crate::observability::SpanTimer;
use crate::stages::{InputMode, OutputMode, StageDescriptor};

/// A stage whose process has been spawned.
#[derive(Debug)]
pub struct RunningStage {
    descriptor: StageDescriptor,
    index: usize,
    child: Option<Child>,
    pid: Option<u32>,
    status: StageStatus,
    started: Instant,
    duration_ms: Option<f64>,
}

impl RunningStage {
    /// The stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// The descriptor this stage was started from.
    #[must_use]
    pub fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    /// Position in the chain, zero-based.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// OS process id, if the process was still alive when spawned.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> StageStatus {
        self.status
    }

    /// Wall-clock time from spawn to reap, once reaped.
    #[must_use]
    pub fn duration_ms(&self) -> Option<f64> {
        self.duration_ms
    }

    pub(crate) fn take_child(&mut self) -> Option<Child> {
        self.child.take()
    }

    pub(crate) fn record_exit(&mut self, status: StageStatus) -> f64 {
        let duration_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.status = status;
        self.duration_ms = Some(duration_ms);
        duration_ms
    }
}

/// All processes of one pipeline execution.
///
/// Owns every child handle; dropping a run kills any stage still alive.
#[derive(Debug)]
pub struct PipelineRun {
    id: Uuid,
    name: String,
    stages: Vec<RunningStage>,
    status: RunStatus,
    terminal_output: PathBuf,
    canonical_output: PathBuf,
    timer: SpanTimer,
}

impl PipelineRun {
    /// Unique id of this run.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the pipeline being run.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The started stages in chain order.
    #[must_use]
    pub fn stages(&self) -> &[RunningStage] {
        &self.stages
    }

    /// Overall status.
    #[must_use]
    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    /// The file written by the last stage.
    #[must_use]
    pub fn terminal_output(&self) -> &Path {
        &self.terminal_output
    }

    /// Where the terminal output is to be promoted.
    #[must_use]
    pub fn canonical_output(&self) -> &Path {
        &self.canonical_output
    }

    /// Milliseconds since the first stage was started.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.timer.elapsed_ms()
    }

    /// Names of stages spawned but not yet reaped.
    #[must_use]
    pub fn running_stages(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Running)
            .map(|s| s.name().to_string())
            .collect()
    }

    pub(crate) fn stages_mut(&mut self) -> &mut [RunningStage] {
        &mut self.stages
    }

    pub(crate) fn set_status(&mut self, status: RunStatus) {
        self.status = status;
    }
}

/// Spawns the stages of a pipeline, wired together with pipes.
pub struct Orchestrator {
    sink: Arc<dyn EventSink>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator that discards events.
    #[must_use]
    pub fn new() -> Self {
        Self { sink: default_sink() }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Starts every stage of `pipeline`, source first.
    ///
    /// If any stage fails to launch, the stages already started are killed
    /// and reaped before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`AlignflowError::StageLaunch`] naming the stage that could not
    /// be started (missing executable, unreadable input file, uncreatable
    /// output file, or pipe allocation failure).
    pub async fn start(&self, pipeline: &Pipeline) -> Result<PipelineRun, AlignflowError> {
        let id = Uuid::new_v4();
        info!(
            pipeline = pipeline.name(),
            run_id = %id,
            stages = pipeline.len(),
            "Starting pipeline"
        );
        self.sink.try_emit(PipelineEvent::pipeline_started(
            pipeline.name(),
            &id.to_string(),
            pipeline.len(),
        ));

        let timer = SpanTimer::start(pipeline.name());
        let mut started = Vec::with_capacity(pipeline.len());

        if let Err(err) = self.launch_all(pipeline, &mut started) {
            abort_started(&mut started).await;
            self.sink.try_emit(PipelineEvent::pipeline_failed(pipeline.name(), &err.to_string()));
            return Err(err.into());
        }

        Ok(PipelineRun {
            id,
            name: pipeline.name().to_string(),
            stages: started,
            status: RunStatus::Running,
            terminal_output: pipeline.terminal_output().to_path_buf(),
            canonical_output: pipeline.canonical_output().to_path_buf(),
            timer,
        })
    }

    fn launch_all(
        &self,
        pipeline: &Pipeline,
        started: &mut Vec<RunningStage>,
    ) -> Result<(), StageLaunchError> {
        let stages = pipeline.stages();
        let mut incoming: Option<PipeLink> = None;

        for (index, stage) in stages.iter().enumerate() {
            let mut outgoing = match (stage.output_mode(), stages.get(index + 1)) {
                (OutputMode::Downstream, Some(consumer)) => Some(pipe::connect(stage, consumer)?),
                _ => None,
            };

            let running = self.spawn_stage(index, stage, incoming.take(), outgoing.as_mut())?;
            started.push(running);

            // The producer owns the write end now; only the read end is left.
            incoming = outgoing;
        }

        Ok(())
    }

    fn spawn_stage(
        &self,
        index: usize,
        stage: &StageDescriptor,
        incoming: Option<PipeLink>,
        outgoing: Option<&mut PipeLink>,
    ) -> Result<RunningStage, StageLaunchError> {
        let launch_error = |e: std::io::Error| {
            StageLaunchError::new(stage.name(), stage.program().display().to_string(), e)
        };

        let stdin = match stage.input_mode() {
            InputMode::Inherit => Stdio::inherit(),
            InputMode::Upstream => incoming
                .and_then(|mut link| link.take_read_end())
                .ok_or_else(|| launch_error(std::io::Error::other("no upstream pipe to read from")))?,
            InputMode::File(path) => Stdio::from(File::open(path).map_err(|e| {
                launch_error(std::io::Error::new(
                    e.kind(),
                    format!("cannot open input {}: {e}", path.display()),
                ))
            })?),
        };

        let stdout = match stage.output_mode() {
            OutputMode::Downstream => outgoing
                .and_then(PipeLink::take_write_end)
                .ok_or_else(|| launch_error(std::io::Error::other("no downstream pipe to write to")))?,
            OutputMode::File(path) => Stdio::from(File::create(path).map_err(|e| {
                launch_error(std::io::Error::new(
                    e.kind(),
                    format!("cannot create output {}: {e}", path.display()),
                ))
            })?),
            OutputMode::Produces(_) => Stdio::inherit(),
        };

        let mut command = Command::new(stage.program());
        command
            .args(stage.arguments())
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = command.spawn().map_err(launch_error)?;
        // Releases the orchestrator's copies of both stdio handles.
        drop(command);

        let pid = child.id();
        debug!(stage = stage.name(), index, pid, command = %stage.command_line(), "Stage launched");
        self.sink.try_emit(PipelineEvent::stage_launched(
            stage.name(),
            index,
            pid,
            &stage.command_line(),
        ));

        Ok(RunningStage {
            descriptor: stage.clone(),
            index,
            child: Some(child),
            pid,
            status: StageStatus::Running,
            started: Instant::now(),
            duration_ms: None,
        })
    }
}

async fn abort_started(started: &mut [RunningStage]) {
    for stage in started.iter_mut() {
        if let Some(mut child) = stage.take_child() {
            warn!(stage = stage.name(), pid = stage.pid, "Killing stage after launch failure");
            if let Err(e) = child.start_kill() {
                debug!(stage = stage.name(), error = %e, "Stage already gone");
            }
            match child.wait().await {
                Ok(status) => {
                    stage.record_exit(StageStatus::from(status));
                }
                Err(e) => warn!(stage = stage.name(), error = %e, "Could not reap killed stage"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::pipeline::PipelineBuilder;

    #[tokio::test]
    async fn test_start_emits_launch_events_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CollectingEventSink::new());
        let pipeline = PipelineBuilder::new("chain")
            .stage(StageDescriptor::new("emit", "sh").args(["-c", "echo hello"]))
            .pipe_to(StageDescriptor::new("copy", "cat").stdout_to(dir.path().join("out.txt")))
            .build()
            .unwrap();

        let mut run = Orchestrator::new().with_sink(sink.clone()).start(&pipeline).await.unwrap();

        assert_eq!(sink.launched_stages(), vec!["emit", "copy"]);
        assert_eq!(run.stages().len(), 2);
        assert!(run.stages().iter().all(|s| s.status() == StageStatus::Running));
        assert_eq!(run.running_stages(), vec!["emit", "copy"]);
        assert_eq!(run.status(), &RunStatus::Running);

        for stage in run.stages_mut() {
            stage.take_child().unwrap().wait().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CollectingEventSink::new());
        let pipeline = PipelineBuilder::new("broken")
            .stage(StageDescriptor::new("emit", "sh").args(["-c", "exec sleep 30"]))
            .pipe_to(
                StageDescriptor::new("missing", "/nonexistent/alignflow-tool")
                    .stdout_to(dir.path().join("out.txt")),
            )
            .build()
            .unwrap();

        let err = Orchestrator::new().with_sink(sink.clone()).start(&pipeline).await.unwrap_err();

        assert!(matches!(err, AlignflowError::StageLaunch(_)));
        assert_eq!(err.stage(), Some("missing"));
        assert_eq!(sink.launched_stages(), vec!["emit"]);
        assert_eq!(sink.events_of_type("pipeline.failed").len(), 1);

        // The started stage was killed and reaped, not left as a zombie.
        let launched = sink.events_of_type("stage.launched");
        let pid = launched[0].data["pid"].as_u64().unwrap();
        assert!(!Path::new(&format!("/proc/{pid}")).exists());
    }

    #[tokio::test]
    async fn test_unreadable_input_file_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = PipelineBuilder::new("input")
            .stage(
                StageDescriptor::new("copy", "cat")
                    .input(InputMode::File(dir.path().join("absent.txt")))
                    .stdout_to(dir.path().join("out.txt")),
            )
            .build()
            .unwrap();

        let err = Orchestrator::new().start(&pipeline).await.unwrap_err();
        assert_eq!(err.stage(), Some("copy"));
        assert!(err.to_string().contains("absent.txt"));
    }
}

//! Linear pipeline definition and validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::errors::PipelineValidationError;
use crate::stages::{InputMode, OutputMode, StageDescriptor};

/// A validated, ordered chain of stages.
///
/// Guarantees: at least one stage; stage *i* writes downstream exactly when
/// stage *i+1* reads upstream; the first stage does not read upstream; the
/// last stage's output is a file.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<StageDescriptor>,
    canonical: Option<PathBuf>,
}

impl Pipeline {
    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The stages in source-to-sink order.
    #[must_use]
    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a built pipeline.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The file written by the last stage.
    #[must_use]
    pub fn terminal_output(&self) -> &Path {
        self.stages
            .last()
            .and_then(|s| s.output_mode().file_path())
            .unwrap_or_else(|| Path::new(""))
    }

    /// Where the terminal output should be promoted to.
    ///
    /// Defaults to the terminal output itself when no target was set.
    #[must_use]
    pub fn canonical_output(&self) -> &Path {
        self.canonical.as_deref().unwrap_or_else(|| self.terminal_output())
    }
}

/// Builder for [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageDescriptor>,
    canonical: Option<PathBuf>,
}

impl PipelineBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            canonical: None,
        }
    }

    /// Appends a stage as-is.
    #[must_use]
    pub fn stage(mut self, stage: StageDescriptor) -> Self {
        self.stages.push(stage);
        self
    }

    /// Appends a stage fed by the current last stage.
    ///
    /// Rewrites the previous stage's output to a pipe and this stage's input
    /// to read from it.
    #[must_use]
    pub fn pipe_to(mut self, stage: StageDescriptor) -> Self {
        if let Some(previous) = self.stages.pop() {
            self.stages.push(previous.write_downstream());
        }
        self.stages.push(stage.read_upstream());
        self
    }

    /// Sets the canonical path the terminal output is promoted to.
    #[must_use]
    pub fn promote_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.canonical = Some(path.into());
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages added so far.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validates the chain and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank, the chain is empty, stage names
    /// repeat, or the pipe wiring between adjacent stages is inconsistent.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new(
                "Pipeline name cannot be empty or whitespace-only",
            ));
        }

        let Some(first) = self.stages.first() else {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{}' has no stages",
                self.name
            )));
        };

        let mut seen = HashSet::new();
        for stage in &self.stages {
            stage.validate()?;
            if !seen.insert(stage.name()) {
                return Err(PipelineValidationError::new(format!(
                    "Duplicate stage name '{}'",
                    stage.name()
                ))
                .with_stage(stage.name()));
            }
        }

        if *first.input_mode() == InputMode::Upstream {
            return Err(PipelineValidationError::new(format!(
                "First stage '{}' cannot read from an upstream pipe",
                first.name()
            ))
            .with_stage(first.name()));
        }

        for pair in self.stages.windows(2) {
            let (producer, consumer) = (&pair[0], &pair[1]);
            let writes_pipe = *producer.output_mode() == OutputMode::Downstream;
            let reads_pipe = *consumer.input_mode() == InputMode::Upstream;

            if writes_pipe != reads_pipe {
                return Err(PipelineValidationError::new(format!(
                    "Stages '{}' and '{}' disagree on their pipe connection",
                    producer.name(),
                    consumer.name()
                ))
                .with_stages(vec![producer.name().to_string(), consumer.name().to_string()]));
            }
        }

        if let Some(last) = self.stages.last() {
            if last.output_mode().file_path().is_none() {
                return Err(PipelineValidationError::new(format!(
                    "Last stage '{}' must write to a file",
                    last.name()
                ))
                .with_stage(last.name()));
            }
        }

        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
            canonical: self.canonical,
        })
    }
}

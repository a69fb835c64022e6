//! Inert descriptions of external transformation stages.

use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::PipelineValidationError;

/// Where a stage reads its standard input from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Inherit the orchestrator's stdin.
    Inherit,
    /// Read from the previous stage's stdout through a pipe.
    Upstream,
    /// Read from a file opened read-only.
    File(PathBuf),
}

/// Where a stage's output goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Write stdout into the next stage's stdin through a pipe.
    Downstream,
    /// Redirect stdout into a file (created or truncated).
    File(PathBuf),
    /// The tool writes this file itself (named in its arguments); stdout is inherited.
    Produces(PathBuf),
}

impl OutputMode {
    /// The file this output lands in, for the file-backed modes.
    #[must_use]
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            Self::Downstream => None,
            Self::File(path) | Self::Produces(path) => Some(path),
        }
    }
}

/// One external transformation: an executable, its arguments and its I/O wiring.
///
/// Built with the consuming setters below and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    name: String,
    program: PathBuf,
    #[serde(default)]
    args: Vec<OsString>,
    input: InputMode,
    output: OutputMode,
}

impl StageDescriptor {
    /// Creates a stage with no arguments, inheriting stdin and writing downstream.
    #[must_use]
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            input: InputMode::Inherit,
            output: OutputMode::Downstream,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Sets the input mode.
    #[must_use]
    pub fn input(mut self, input: InputMode) -> Self {
        self.input = input;
        self
    }

    /// Sets the output mode.
    #[must_use]
    pub fn output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// Reads stdin from the previous stage.
    #[must_use]
    pub fn read_upstream(self) -> Self {
        self.input(InputMode::Upstream)
    }

    /// Writes stdout to the next stage.
    #[must_use]
    pub fn write_downstream(self) -> Self {
        self.output(OutputMode::Downstream)
    }

    /// Redirects stdout into `path`.
    #[must_use]
    pub fn stdout_to(self, path: impl Into<PathBuf>) -> Self {
        self.output(OutputMode::File(path.into()))
    }

    /// Declares that the tool itself writes `path`.
    #[must_use]
    pub fn produces(self, path: impl Into<PathBuf>) -> Self {
        self.output(OutputMode::Produces(path.into()))
    }

    /// The stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The executable.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The ordered argument list.
    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// The input mode.
    #[must_use]
    pub fn input_mode(&self) -> &InputMode {
        &self.input
    }

    /// The output mode.
    #[must_use]
    pub fn output_mode(&self) -> &OutputMode {
        &self.output
    }

    /// The command line rendered for logs. Not suitable for a shell.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|s| s.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Validates the descriptor on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or program is empty.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage name cannot be empty"));
        }
        if self.program.as_os_str().is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' has no executable",
                self.name
            ))
            .with_stage(&self.name));
        }
        Ok(())
    }
}

impl fmt::Display for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.command_line())
    }
}

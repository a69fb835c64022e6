//! Stage and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::ExitStatus;

/// Signal number delivered to a writer whose pipe reader has gone away.
pub const SIGPIPE: i32 = 13;

/// Exit code a POSIX shell reports for a child killed by `SIGPIPE`.
const SHELL_SIGPIPE_EXIT: i32 = 128 + SIGPIPE;

/// The lifecycle status of one stage process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not started yet.
    Pending,
    /// Process spawned and not yet reaped.
    Running,
    /// Process exited with the given code.
    Exited(i32),
    /// Process was terminated by the given signal.
    Signalled(i32),
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Exited(code) => write!(f, "exit code {code}"),
            Self::Signalled(signal) => write!(f, "killed by signal {signal}"),
        }
    }
}

impl From<ExitStatus> for StageStatus {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signalled(signal);
            }
        }

        // Neither a code nor a signal: treat as an abnormal exit.
        Self::Exited(-1)
    }
}

impl StageStatus {
    /// Returns true if the process has been reaped.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited(_) | Self::Signalled(_))
    }

    /// Returns true only for a clean zero exit.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Returns true for a terminal status other than a clean exit.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.is_terminal() && !self.is_success()
    }

    /// Returns true if the stage most likely died writing into a closed pipe.
    ///
    /// Such a failure is a consequence of a downstream stage going away and is
    /// ranked below any other failure when attributing a pipeline error.
    #[must_use]
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, Self::Signalled(SIGPIPE) | Self::Exited(SHELL_SIGPIPE_EXIT))
    }
}

/// The overall status of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunStatus {
    /// At least one stage is still running.
    Running,
    /// Every stage exited zero.
    Succeeded,
    /// A stage failed; identifies which one and how.
    Failed {
        /// Name of the stage the failure is attributed to.
        stage: String,
        /// Terminal status of that stage.
        status: StageStatus,
    },
    /// The run was stopped by a deadline or a cancellation request.
    Aborted {
        /// Why the run was stopped.
        reason: String,
    },
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Running
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { stage, status } => write!(f, "failed ({stage}: {status})"),
            Self::Aborted { reason } => write!(f, "aborted ({reason})"),
        }
    }
}

impl RunStatus {
    /// Returns true once the run has reached a final state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Pending.to_string(), "pending");
        assert_eq!(StageStatus::Running.to_string(), "running");
        assert_eq!(StageStatus::Exited(2).to_string(), "exit code 2");
        assert_eq!(StageStatus::Signalled(9).to_string(), "killed by signal 9");
    }

    #[test]
    fn test_stage_status_predicates() {
        assert!(StageStatus::Exited(0).is_success());
        assert!(!StageStatus::Exited(1).is_success());
        assert!(StageStatus::Exited(1).is_failure());
        assert!(StageStatus::Signalled(15).is_failure());
        assert!(!StageStatus::Running.is_terminal());
        assert!(!StageStatus::Running.is_failure());
        assert!(!StageStatus::Pending.is_failure());
    }

    #[test]
    fn test_broken_pipe_detection() {
        assert!(StageStatus::Signalled(SIGPIPE).is_broken_pipe());
        assert!(StageStatus::Exited(141).is_broken_pipe());
        assert!(!StageStatus::Exited(1).is_broken_pipe());
        assert!(!StageStatus::Signalled(9).is_broken_pipe());
    }

    #[cfg(unix)]
    #[test]
    fn test_from_exit_status() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(StageStatus::from(ExitStatus::from_raw(0)), StageStatus::Exited(0));
        assert_eq!(StageStatus::from(ExitStatus::from_raw(3 << 8)), StageStatus::Exited(3));
        assert_eq!(StageStatus::from(ExitStatus::from_raw(9)), StageStatus::Signalled(9));
    }

    #[test]
    fn test_run_status_serialize() {
        let status = RunStatus::Failed {
            stage: "align".to_string(),
            status: StageStatus::Exited(1),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["stage"], "align");

        let back: RunStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
        assert!(back.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }
}

//! Supervisor error types.

use std::process::ExitStatus;
use std::time::Duration;

use crate::identity::IdentityError;

use super::JobControlError;

/// Error type for supervisor operations.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// Pipe creation or process start failed.
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// The working directory could not be determined.
    #[error("Failed to determine working directory: {0}")]
    WorkDir(std::io::Error),

    /// `start` was called while a previous child is still live.
    #[error("A supervised process is already running")]
    AlreadyRunning,

    /// The operation needs a live process and there is none.
    #[error("Subprocess already exited")]
    AlreadyExited,

    /// The child exited unsuccessfully. Captured stdout is kept.
    #[error("Process exited with {status}")]
    ExitStatus { status: ExitStatus, stdout: Vec<u8> },

    /// A signal or wait raced with the process's own exit.
    #[error("Process already finished")]
    ProcessDone,

    /// The configured deadline elapsed before the child exited.
    #[error("Process timed out after {0:?}")]
    Timeout(Duration),

    /// The run was interrupted by `close()`.
    #[error("Process run was cancelled")]
    Cancelled,

    /// The child wrote to stderr and the stderr policy treats that as failure.
    #[error("Process wrote to stderr: {0}")]
    StderrOutput(String),

    /// Identity resolution failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Pausing, resuming or inspecting the child failed.
    #[error("Job control failed: {0}")]
    JobControl(JobControlError),

    /// Waiting for the child failed.
    #[error("Failed to wait for process: {0}")]
    Wait(std::io::Error),

    /// Forwarding input to the child failed.
    #[error("Failed to forward input: {0}")]
    Input(std::io::Error),
}

impl SupervisorError {
    /// The child's exit code, for `ExitStatus` errors of processes that
    /// exited normally.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ExitStatus { status, .. } => status.code(),
            _ => None,
        }
    }

    /// Stdout captured before a failed exit.
    #[must_use]
    pub fn stdout(&self) -> Option<&[u8]> {
        match self {
            Self::ExitStatus { stdout, .. } => Some(stdout),
            _ => None,
        }
    }

    /// Whether this error only reports that the process had already
    /// finished, which callers generally treat as success.
    #[must_use]
    pub fn is_process_done(&self) -> bool {
        matches!(
            self,
            Self::ProcessDone | Self::JobControl(JobControlError::ProcessDone)
        )
    }
}

impl From<JobControlError> for SupervisorError {
    fn from(err: JobControlError) -> Self {
        match err {
            JobControlError::ProcessDone => Self::ProcessDone,
            other => Self::JobControl(other),
        }
    }
}

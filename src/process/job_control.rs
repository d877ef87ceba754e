//! Stopping, continuing and inspecting a child by pid.
//!
//! POSIX systems get [`SignalJobControl`], which uses `SIGTSTP`/`SIGCONT`.
//! Elsewhere [`NoopJobControl`] stands in and the startup pause is skipped.

use std::fmt::Debug;
use std::sync::Arc;

/// Error type for job-control operations.
#[derive(thiserror::Error, Debug)]
pub enum JobControlError {
    /// The process no longer exists (or is a zombie waiting to be reaped).
    #[error("Process already finished")]
    ProcessDone,

    /// Sending a signal failed.
    #[error("Failed to signal process {pid}: {source}")]
    Signal { pid: u32, source: std::io::Error },

    /// Reading the process state failed.
    #[error("Failed to inspect process {pid}: {source}")]
    Inspect { pid: u32, source: std::io::Error },

    /// The state report could not be understood.
    #[error("Unrecognized state for process {pid}: {detail}")]
    BadState { pid: u32, detail: String },
}

/// Platform capability for pausing and resuming a process.
pub trait JobControl: Send + Sync + Debug {
    /// Stop the process.
    ///
    /// # Errors
    ///
    /// Returns `JobControlError::ProcessDone` if the process is gone.
    fn pause(&self, pid: u32) -> Result<(), JobControlError>;

    /// Continue a stopped process.
    ///
    /// # Errors
    ///
    /// Returns `JobControlError::ProcessDone` if the process is gone.
    fn resume(&self, pid: u32) -> Result<(), JobControlError>;

    /// Whether the process is currently stopped by a signal.
    ///
    /// # Errors
    ///
    /// Returns `JobControlError::ProcessDone` if the process is gone.
    fn is_stopped(&self, pid: u32) -> Result<bool, JobControlError>;
}

/// Job control for the current platform.
#[must_use]
pub fn default_job_control() -> Arc<dyn JobControl> {
    #[cfg(unix)]
    {
        Arc::new(SignalJobControl)
    }

    #[cfg(not(unix))]
    {
        Arc::new(NoopJobControl)
    }
}

/// Job control that does nothing; processes are never reported stopped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopJobControl;

impl JobControl for NoopJobControl {
    fn pause(&self, _pid: u32) -> Result<(), JobControlError> {
        Ok(())
    }

    fn resume(&self, _pid: u32) -> Result<(), JobControlError> {
        Ok(())
    }

    fn is_stopped(&self, _pid: u32) -> Result<bool, JobControlError> {
        Ok(false)
    }
}

/// POSIX job control through `SIGTSTP`/`SIGCONT`.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalJobControl;

#[cfg(unix)]
impl SignalJobControl {
    fn send(pid: u32, signal: nix::sys::signal::Signal) -> Result<(), JobControlError> {
        use nix::errno::Errno;
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| JobControlError::ProcessDone)?;
        match nix::sys::signal::kill(Pid::from_raw(raw), signal) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(JobControlError::ProcessDone),
            Err(e) => Err(JobControlError::Signal {
                pid,
                source: e.into(),
            }),
        }
    }
}

#[cfg(unix)]
impl JobControl for SignalJobControl {
    fn pause(&self, pid: u32) -> Result<(), JobControlError> {
        Self::send(pid, nix::sys::signal::Signal::SIGTSTP)
    }

    fn resume(&self, pid: u32) -> Result<(), JobControlError> {
        Self::send(pid, nix::sys::signal::Signal::SIGCONT)
    }

    fn is_stopped(&self, pid: u32) -> Result<bool, JobControlError> {
        let state = read_state_code(pid)?;
        match state {
            'T' | 't' => Ok(true),
            'Z' | 'X' | 'x' => Err(JobControlError::ProcessDone),
            _ => Ok(false),
        }
    }
}

/// Single-letter state code of a process, as `ps` and `/proc` report it.
#[cfg(target_os = "linux")]
fn read_state_code(pid: u32) -> Result<char, JobControlError> {
    let stat_path = format!("/proc/{pid}/stat");
    let content = match std::fs::read_to_string(&stat_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(JobControlError::ProcessDone)
        }
        Err(e) => return Err(JobControlError::Inspect { pid, source: e }),
    };
    parse_stat_state(&content).ok_or_else(|| JobControlError::BadState {
        pid,
        detail: content.trim().to_string(),
    })
}

#[cfg(all(unix, not(target_os = "linux")))]
fn read_state_code(pid: u32) -> Result<char, JobControlError> {
    let output = std::process::Command::new("ps")
        .args(["-o", "stat=", "-p", &pid.to_string()])
        .output()
        .map_err(|e| JobControlError::Inspect { pid, source: e })?;
    let stat = String::from_utf8_lossy(&output.stdout);
    stat.trim().chars().next().ok_or(JobControlError::ProcessDone)
}

/// Extract the state field from a `/proc/<pid>/stat` line.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so the state is taken after the last `)`.
#[cfg(any(target_os = "linux", test))]
fn parse_stat_state(stat: &str) -> Option<char> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

//! The process supervisor.
//!
//! A child is spawned with all three stdio streams piped and is stopped
//! immediately, before anything drains its output. The drain tasks and the
//! stopped-process monitor are attached while it is paused, and `run`
//! continues it. Output written during the startup window sits in the pipe
//! until the readers pick it up, so nothing is lost.

use std::ffi::OsStr;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::identity::Identity;

use super::input::StdinHandle;
use super::{
    Console, JobControl, JobControlError, OutputBuffer, ProcessState, ProcessStateMachine,
    StderrPolicy, StdioKind, StreamReader, SupervisorBuilder, SupervisorError, SupervisorOptions,
};

/// How long drain tasks get to pick up the tail of a killed child's output.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// State shared with the background tasks of the current run.
#[derive(Debug, Default)]
struct Shared {
    slot: RwLock<RunSlot>,
}

#[derive(Debug, Default)]
struct RunSlot {
    machine: ProcessStateMachine,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    stdin: Option<StdinHandle>,
    cancel: CancellationToken,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, RunSlot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RunSlot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ProcessState {
        self.read().machine.state()
    }
}

/// Handles owned by whoever waits for the child.
#[derive(Debug)]
struct ActiveRun {
    pid: u32,
    child: Child,
    drains: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    monitor_stop: CancellationToken,
    deadline: Option<Instant>,
}

enum Interrupt {
    Finished(io::Result<ExitStatus>),
    Timeout,
    Cancelled,
}

/// Supervises one child process at a time.
#[derive(Debug)]
pub struct Supervisor {
    options: Arc<SupervisorOptions>,
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveRun>>,
    console: Mutex<Console>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    /// A supervisor with default options.
    #[must_use]
    pub fn new() -> Self {
        SupervisorBuilder::new().build()
    }

    #[must_use]
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::new()
    }

    pub(crate) fn from_parts(options: Arc<SupervisorOptions>, console: Console) -> Self {
        Self {
            options,
            shared: Arc::new(Shared::default()),
            active: Mutex::new(None),
            console: Mutex::new(console),
        }
    }

    #[must_use]
    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.options.identity()
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.shared.state()
    }

    /// Pid of the current (or last) child, once it has been paused.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.shared.read().machine.pid()
    }

    /// Spawn `command` paused and attach the output readers.
    ///
    /// The child stays stopped until [`Supervisor::run`] is called, so the
    /// caller can queue input or record the pid first. Starting again after
    /// a run has finished discards the previous output.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::AlreadyRunning` if a child is still live or
    /// another task is inside `start` or `run`,
    /// `SupervisorError::Spawn` if the process cannot be started, and
    /// `SupervisorError::JobControl` if it cannot be paused.
    #[allow(clippy::unused_async)]
    pub async fn start<I, S>(&self, command: &str, args: I) -> Result<u32, SupervisorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        // A run in progress holds the lock for as long as its child lives.
        let Ok(mut active) = self.active.try_lock() else {
            return Err(SupervisorError::AlreadyRunning);
        };
        if active.is_some() || self.shared.state().is_live() {
            return Err(SupervisorError::AlreadyRunning);
        }

        let mut cmd = self.build_command(command, args)?;
        if let Some(identity) = self.options.identity() {
            tracing::debug!(
                uid = identity.uid(),
                gid = identity.gid(),
                user = %identity.username(),
                "Launching under identity"
            );
        }

        let spawn_error = |source| SupervisorError::Spawn {
            command: command.to_string(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_error)?;
        let (Some(pid), Some(stdout), Some(stderr), Some(stdin)) = (
            child.id(),
            child.stdout.take(),
            child.stderr.take(),
            child.stdin.take(),
        ) else {
            let _ = child.start_kill();
            return Err(spawn_error(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "child stdio pipes unavailable",
            )));
        };

        let debug = self.options.debug();
        let stdout = StreamReader::attach(StdioKind::Stdout, stdout).with_echo(debug);
        let stderr = StreamReader::attach(StdioKind::Stderr, stderr).with_echo(debug);
        let cancel = CancellationToken::new();

        {
            let mut slot = self.shared.write();
            slot.machine.begin(pid);
            slot.stdout = stdout.buffer();
            slot.stderr = stderr.buffer();
            slot.cancel = cancel.clone();

            match self.options.job_control.pause(pid) {
                Ok(()) => {}
                Err(JobControlError::ProcessDone) => {
                    tracing::debug!(pid, "Process finished before it could be paused");
                }
                Err(e) => {
                    let _ = child.start_kill();
                    slot.machine.reset();
                    return Err(e.into());
                }
            }
            slot.machine.transition(ProcessState::Paused);
            slot.stdin = Some(StdinHandle::spawn(stdin, cancel.clone()));
        }

        let drains = vec![
            spawn_drain(stdout, cancel.clone()),
            spawn_drain(stderr, cancel.clone()),
        ];

        let monitor_stop = cancel.child_token();
        tokio::spawn(monitor(
            Arc::clone(&self.shared),
            Arc::clone(&self.options),
            pid,
            monitor_stop.clone(),
        ));

        tracing::info!(pid, command = %command, "Process started (paused)");

        *active = Some(ActiveRun {
            pid,
            child,
            drains,
            cancel,
            monitor_stop,
            deadline: self.options.timeout().and_then(deadline_after),
        });
        Ok(pid)
    }

    fn build_command<I, S>(&self, command: &str, args: I) -> Result<Command, SupervisorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(env) = self.options.child_environment() {
            cmd.env_clear().envs(env);
        }

        let dir = match self.options.working_dir() {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(SupervisorError::WorkDir)?,
        };
        cmd.current_dir(dir);

        #[cfg(unix)]
        apply_launch_attributes(&mut cmd, &self.options);

        Ok(cmd)
    }

    /// Stop the child.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::AlreadyExited` if there is no live child.
    pub fn pause(&self) -> Result<(), SupervisorError> {
        let mut slot = self.shared.write();
        let pid = live_pid(&slot.machine)?;
        self.options.job_control.pause(pid)?;
        slot.machine.transition(ProcessState::Paused);
        Ok(())
    }

    /// Continue a paused or externally stopped child. Resuming a running
    /// child is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::AlreadyExited` if there is no live child
    /// and `SupervisorError::ProcessDone` if it finished meanwhile.
    pub fn resume(&self) -> Result<(), SupervisorError> {
        let mut slot = self.shared.write();
        let pid = live_pid(&slot.machine)?;
        self.options.job_control.resume(pid)?;
        if slot.machine.state() != ProcessState::Running {
            slot.machine.transition(ProcessState::Running);
        }
        Ok(())
    }

    /// Resume the child and wait for it to exit.
    ///
    /// Both output streams are drained to end-of-stream before the exit
    /// status is read. On success the result follows
    /// [`Supervisor::get_output`]; a non-zero exit returns
    /// `SupervisorError::ExitStatus`, which carries the captured stdout.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::AlreadyExited` if there is nothing to wait
    /// for, `SupervisorError::Timeout` if the deadline passes,
    /// `SupervisorError::Cancelled` if `close` interrupts the run, and
    /// `SupervisorError::Wait` if waiting itself fails.
    pub async fn run(&self) -> Result<Vec<u8>, SupervisorError> {
        let mut guard = self.active.lock().await;
        let Some(mut active) = guard.take() else {
            tracing::debug!("run called without a started process");
            return Err(SupervisorError::AlreadyExited);
        };

        match self.resume() {
            Ok(()) => {}
            Err(e) if e.is_process_done() => {
                tracing::debug!(pid = active.pid, "Process finished before resume");
            }
            Err(e) => {
                *guard = Some(active);
                return Err(e);
            }
        }

        let cancel = active.cancel.clone();
        let interrupt = tokio::select! {
            biased;

            () = cancel.cancelled() => Interrupt::Cancelled,
            () = sleep_until(active.deadline) => Interrupt::Timeout,
            status = collect(&mut active.child, &mut active.drains) => Interrupt::Finished(status),
        };

        if !matches!(interrupt, Interrupt::Finished(_)) {
            if let Err(e) = active.child.start_kill() {
                tracing::debug!(pid = active.pid, error = %e, "Kill failed");
            }
            let _ = active.child.wait().await;
            if tokio::time::timeout(DRAIN_GRACE, join_drains(&mut active.drains))
                .await
                .is_err()
            {
                active.drains.iter().for_each(JoinHandle::abort);
            }
        }
        self.finish(&active);

        match interrupt {
            Interrupt::Finished(Ok(status)) if status.success() => {
                tracing::info!(pid = active.pid, "Process exited successfully");
                self.get_output()
            }
            Interrupt::Finished(Ok(status)) => {
                tracing::info!(pid = active.pid, exit_code = ?status.code(), "Process exited with failure");
                Err(SupervisorError::ExitStatus {
                    status,
                    stdout: self.stdout_snapshot(),
                })
            }
            Interrupt::Finished(Err(e)) if is_already_reaped(&e) => {
                tracing::debug!(pid = active.pid, error = %e, "Process already reaped");
                Ok(self.stdout_snapshot())
            }
            Interrupt::Finished(Err(e)) => {
                tracing::error!(pid = active.pid, error = %e, "Failed to wait for process");
                Err(SupervisorError::Wait(e))
            }
            Interrupt::Timeout => {
                let timeout = self.options.timeout().unwrap_or_default();
                tracing::warn!(pid = active.pid, ?timeout, "Process timed out and was killed");
                Err(SupervisorError::Timeout(timeout))
            }
            Interrupt::Cancelled => {
                tracing::info!(pid = active.pid, "Process run cancelled");
                Err(SupervisorError::Cancelled)
            }
        }
    }

    /// Same as [`Supervisor::run`].
    ///
    /// # Errors
    ///
    /// See [`Supervisor::run`].
    pub async fn wait(&self) -> Result<Vec<u8>, SupervisorError> {
        self.run().await
    }

    /// Start `command` and run it to completion.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Supervisor::start`] or [`Supervisor::run`].
    pub async fn run_command<I, S>(&self, command: &str, args: I) -> Result<Vec<u8>, SupervisorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.start(command, args).await?;
        self.run().await
    }

    fn finish(&self, active: &ActiveRun) {
        active.monitor_stop.cancel();
        let mut slot = self.shared.write();
        slot.stdin = None;
        slot.machine.transition(ProcessState::Exited);
    }

    /// Release the pipes and cancel the current run.
    ///
    /// A run in progress returns `SupervisorError::Cancelled`; a child that
    /// was started but never run is killed. Safe to call any number of
    /// times, before or after the child exits.
    pub fn close(&self) {
        let (cancel, stdin) = {
            let mut slot = self.shared.write();
            (slot.cancel.clone(), slot.stdin.take())
        };
        drop(stdin);
        cancel.cancel();

        // A run in progress holds the lock and handles the cancellation itself.
        if let Ok(mut guard) = self.active.try_lock() {
            if let Some(mut active) = guard.take() {
                tracing::debug!(pid = active.pid, "Killing process that was never run");
                let _ = active.child.start_kill();
                active.drains.iter().for_each(JoinHandle::abort);
                self.finish(&active);
            }
        }
    }

    /// Captured stdout, subject to the stderr policy.
    ///
    /// # Errors
    ///
    /// With `StderrPolicy::Fail`, returns `SupervisorError::StderrOutput`
    /// whenever anything was written to stderr.
    pub fn get_output(&self) -> Result<Vec<u8>, SupervisorError> {
        let slot = self.shared.read();
        if self.options.stderr_policy() == StderrPolicy::Fail && !slot.stderr.is_empty() {
            let stderr = slot.stderr.snapshot();
            return Err(SupervisorError::StderrOutput(
                String::from_utf8_lossy(&stderr).trim_end().to_string(),
            ));
        }
        Ok(slot.stdout.snapshot())
    }

    /// Everything captured from stdout so far.
    #[must_use]
    pub fn stdout_snapshot(&self) -> Vec<u8> {
        self.shared.read().stdout.snapshot()
    }

    /// Everything captured from stderr so far.
    #[must_use]
    pub fn get_stderr_output(&self) -> Vec<u8> {
        self.shared.read().stderr.snapshot()
    }

    /// Prompt on the console, read one line and forward it to the child.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::AlreadyExited` without a live child and
    /// `SupervisorError::Input` if reading or forwarding fails.
    pub async fn provide_input(&self, prompt: &str) -> Result<(), SupervisorError> {
        let stdin = self.stdin_handle()?;
        let line = {
            let mut console = self.console.lock().await;
            console.ask(prompt).await.map_err(SupervisorError::Input)?
        };
        stdin.write(line).await.map_err(SupervisorError::Input)
    }

    /// Write one line to the child's stdin, adding the newline if missing.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::AlreadyExited` without a live child and
    /// `SupervisorError::Input` if the write fails.
    pub async fn write_input(&self, line: &str) -> Result<(), SupervisorError> {
        let stdin = self.stdin_handle()?;
        let mut data = line.to_string();
        if !data.ends_with('\n') {
            data.push('\n');
        }
        stdin.write(data).await.map_err(SupervisorError::Input)
    }

    fn stdin_handle(&self) -> Result<StdinHandle, SupervisorError> {
        self.shared
            .read()
            .stdin
            .clone()
            .ok_or(SupervisorError::AlreadyExited)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.close();
    }
}

fn live_pid(machine: &ProcessStateMachine) -> Result<u32, SupervisorError> {
    match machine.pid() {
        Some(pid) if machine.state().is_live() => Ok(pid),
        _ => Err(SupervisorError::AlreadyExited),
    }
}

fn spawn_drain<R>(reader: StreamReader<R>, cancel: CancellationToken) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let kind = reader.kind();
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                tracing::debug!(stream = %kind, "Drain cancelled");
            }
            result = reader.drain() => {
                if let Err(e) = result {
                    tracing::error!(stream = %kind, error = %e, "Failed to read child output");
                }
            }
        }
    })
}

async fn join_drains(drains: &mut Vec<JoinHandle<()>>) {
    while let Some(drain) = drains.last_mut() {
        if let Err(e) = drain.await {
            tracing::debug!(error = %e, "Drain task ended abnormally");
        }
        drains.pop();
    }
}

/// Wait for both streams to reach end-of-stream, then for the exit status.
async fn collect(child: &mut Child, drains: &mut Vec<JoinHandle<()>>) -> io::Result<ExitStatus> {
    join_drains(drains).await;
    child.wait().await
}

/// The instant `timeout` from now, or `None` when that is too far out to
/// represent, which is as good as no deadline.
fn deadline_after(timeout: Duration) -> Option<Instant> {
    let deadline = Instant::now().checked_add(timeout);
    if deadline.is_none() {
        tracing::debug!(?timeout, "Timeout beyond the clock's range, running without a deadline");
    }
    deadline
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn is_already_reaped(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(nix::errno::Errno::ECHILD as i32)
    }

    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

/// Resume the child whenever something outside the supervisor stops it.
///
/// Only a `Running` child is checked; pauses the supervisor issued itself
/// are left alone.
async fn monitor(
    shared: Arc<Shared>,
    options: Arc<SupervisorOptions>,
    pid: u32,
    stop: CancellationToken,
) {
    let job_control: &dyn JobControl = options.job_control.as_ref();
    let debug = options.debug();

    loop {
        tokio::select! {
            biased;

            () = stop.cancelled() => return,
            () = tokio::time::sleep(options.monitor_interval()) => {}
        }

        match shared.state() {
            ProcessState::Running | ProcessState::StoppedExternally => {}
            ProcessState::Starting | ProcessState::Paused => continue,
            ProcessState::Idle | ProcessState::Exited => return,
        }

        match job_control.is_stopped(pid) {
            Ok(false) => {}
            Ok(true) => {
                let mut slot = shared.write();
                match slot.machine.state() {
                    ProcessState::Running => {
                        slot.machine.transition(ProcessState::StoppedExternally);
                    }
                    ProcessState::StoppedExternally => {}
                    _ => continue,
                }
                tracing::warn!(pid, "Process was stopped externally, resuming");
                match job_control.resume(pid) {
                    Ok(()) => {
                        slot.machine
                            .transition_from(ProcessState::StoppedExternally, ProcessState::Running);
                    }
                    Err(JobControlError::ProcessDone) => return,
                    Err(e) if debug => tracing::warn!(pid, error = %e, "Failed to resume process"),
                    Err(e) => tracing::debug!(pid, error = %e, "Failed to resume process"),
                }
            }
            Err(JobControlError::ProcessDone) => {
                tracing::debug!(pid, "Process gone, monitor exiting");
                return;
            }
            Err(e) if debug => tracing::warn!(pid, error = %e, "Process state check failed"),
            Err(e) => tracing::debug!(pid, error = %e, "Process state check failed"),
        }
    }
}

#[cfg(unix)]
fn apply_launch_attributes(cmd: &mut Command, options: &SupervisorOptions) {
    if let Some(pgid) = options.process_group() {
        cmd.process_group(pgid);
    }

    let Some(credential) = options.credential() else {
        return;
    };
    tracing::debug!(uid = credential.uid, gid = credential.gid, "Dropping privileges for child");
    if options.suppress_group_inheritance {
        switch_ids_keeping_groups(cmd, credential);
    } else {
        cmd.uid(credential.uid).gid(credential.gid);
    }
}

/// Switch ids in the forked child without touching supplementary groups,
/// which `Command::uid` would otherwise clear.
#[cfg(unix)]
#[allow(unsafe_code)]
fn switch_ids_keeping_groups(cmd: &mut Command, credential: super::Credential) {
    use nix::unistd::{setgid, setuid, Gid, Uid};

    // SAFETY: setgid and setuid are async-signal-safe and the closure
    // allocates nothing.
    unsafe {
        cmd.pre_exec(move || {
            setgid(Gid::from_raw(credential.gid))?;
            setuid(Uid::from_raw(credential.uid))?;
            Ok(())
        });
    }
}

//! Pausing, resuming and the stopped-process monitor.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use procvisor::process::{
    JobControl, JobControlError, LaunchAttributes, NoopJobControl, ProcessState, SignalJobControl,
    Supervisor,
};

/// Poll `is_stopped` until it matches `expected` or two seconds pass.
async fn wait_for_stopped(pid: u32, expected: bool) -> bool {
    for _ in 0..40 {
        if SignalJobControl.is_stopped(pid).unwrap_or(false) == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn monitor_resumes_an_externally_stopped_child() {
    let supervisor = Arc::new(
        Supervisor::builder()
            .monitor_interval(Duration::from_millis(100))
            .build(),
    );
    let pid = supervisor
        .start("/bin/sh", ["-c", "sleep 1; echo survived"])
        .await
        .unwrap();

    let runner = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.run().await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    kill(Pid::from_raw(i32::try_from(pid).unwrap()), Signal::SIGSTOP).unwrap();

    let output = tokio::time::timeout(Duration::from_secs(10), runner)
        .await
        .expect("monitor should have resumed the child")
        .unwrap()
        .unwrap();
    assert_eq!(output, b"survived\n");
    assert_eq!(supervisor.state(), ProcessState::Exited);
}

#[tokio::test]
async fn manual_pause_is_left_alone_by_the_monitor() {
    // A fresh process group keeps SIGTSTP effective even when the test
    // runner's own group is orphaned.
    let supervisor = Arc::new(
        Supervisor::builder()
            .monitor_interval(Duration::from_millis(50))
            .launch_attributes(LaunchAttributes {
                credential: None,
                process_group: Some(0),
            })
            .build(),
    );
    let pid = supervisor
        .start("/bin/sh", ["-c", "sleep 0.5; echo resumed"])
        .await
        .unwrap();

    let runner = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.run().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    supervisor.pause().unwrap();
    assert_eq!(supervisor.state(), ProcessState::Paused);
    assert!(wait_for_stopped(pid, true).await);

    // Several monitor periods pass without the child being continued.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(SignalJobControl.is_stopped(pid).unwrap());
    assert_eq!(supervisor.state(), ProcessState::Paused);

    supervisor.resume().unwrap();
    assert_eq!(supervisor.state(), ProcessState::Running);

    let output = tokio::time::timeout(Duration::from_secs(10), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(output, b"resumed\n");
}

#[tokio::test]
async fn pause_without_a_child_is_rejected() {
    let supervisor = Supervisor::new();
    assert!(supervisor.pause().is_err());
    assert!(supervisor.resume().is_err());
}

/// Delegates to real signals but reports one spurious stop.
#[derive(Debug, Default)]
struct FlakyJobControl {
    reported_stop: AtomicBool,
    resumes: AtomicU32,
}

impl JobControl for FlakyJobControl {
    fn pause(&self, pid: u32) -> Result<(), JobControlError> {
        SignalJobControl.pause(pid)
    }

    fn resume(&self, pid: u32) -> Result<(), JobControlError> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        SignalJobControl.resume(pid)
    }

    fn is_stopped(&self, pid: u32) -> Result<bool, JobControlError> {
        if self.reported_stop.swap(true, Ordering::SeqCst) {
            SignalJobControl.is_stopped(pid)
        } else {
            Ok(true)
        }
    }
}

#[tokio::test]
async fn monitor_resumes_when_job_control_reports_a_stop() {
    let job_control = Arc::new(FlakyJobControl::default());
    let supervisor = Supervisor::builder()
        .monitor_interval(Duration::from_millis(50))
        .job_control(job_control.clone())
        .build();

    supervisor.run_command("sleep", ["0.5"]).await.unwrap();

    assert!(job_control.reported_stop.load(Ordering::SeqCst));
    // One resume from `run`, one from the monitor.
    assert!(job_control.resumes.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn runs_without_job_control() {
    let supervisor = Supervisor::builder()
        .job_control(Arc::new(NoopJobControl))
        .build();
    let output = supervisor.run_command("echo", ["plain"]).await.unwrap();
    assert_eq!(output, b"plain\n");
}

#[tokio::test]
async fn signals_to_a_reaped_process_report_done() {
    let supervisor = Supervisor::new();
    let pid = supervisor.start("true", Vec::<String>::new()).await.unwrap();
    supervisor.run().await.unwrap();

    assert!(matches!(
        SignalJobControl.resume(pid),
        Err(JobControlError::ProcessDone)
    ));
}

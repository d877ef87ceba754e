//! Supervisor lifecycle tests.

use std::time::{Duration, Instant};

use procvisor::identity::Identity;
use procvisor::process::{ProcessState, Supervisor, SupervisorError};

#[tokio::test]
async fn start_pauses_and_reports_pid() {
    let supervisor = Supervisor::new();
    assert_eq!(supervisor.state(), ProcessState::Idle);
    assert_eq!(supervisor.pid(), None);

    let pid = supervisor.start("echo", ["hi"]).await.unwrap();
    assert!(pid > 0);
    assert_eq!(supervisor.pid(), Some(pid));
    assert_eq!(supervisor.state(), ProcessState::Paused);

    supervisor.run().await.unwrap();
    assert_eq!(supervisor.state(), ProcessState::Exited);
    assert_eq!(supervisor.pid(), Some(pid));
}

#[tokio::test]
async fn run_twice_reports_already_exited() {
    let supervisor = Supervisor::new();
    supervisor.start("true", Vec::<String>::new()).await.unwrap();
    supervisor.run().await.unwrap();

    let err = supervisor.run().await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyExited));
}

#[tokio::test]
async fn wait_behaves_like_run() {
    let supervisor = Supervisor::new();
    supervisor.start("echo", ["waited"]).await.unwrap();
    assert_eq!(supervisor.wait().await.unwrap(), b"waited\n");
}

#[tokio::test]
async fn second_start_while_live_is_rejected() {
    let supervisor = Supervisor::new();
    supervisor.start("sleep", ["5"]).await.unwrap();

    let err = supervisor.start("echo", ["nope"]).await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning));

    supervisor.close();
}

#[tokio::test]
async fn start_during_a_run_is_rejected_without_waiting() {
    let supervisor = std::sync::Arc::new(Supervisor::new());
    supervisor.start("sleep", ["5"]).await.unwrap();

    let runner = {
        let supervisor = std::sync::Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.run().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = tokio::time::timeout(Duration::from_secs(1), supervisor.start("echo", ["nope"]))
        .await
        .expect("start should not wait for the running child");
    assert!(matches!(second, Err(SupervisorError::AlreadyRunning)));

    supervisor.close();
    let result = runner.await.unwrap();
    assert!(matches!(result, Err(SupervisorError::Cancelled)));
}

#[tokio::test]
async fn spawn_failure_leaves_supervisor_idle() {
    let supervisor = Supervisor::new();
    let err = supervisor
        .start("/nonexistent/procvisor-binary", Vec::<String>::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SupervisorError::Spawn { .. }));
    assert_eq!(supervisor.state(), ProcessState::Idle);
    assert_eq!(supervisor.pid(), None);

    // The supervisor is still usable.
    assert_eq!(supervisor.run_command("echo", ["ok"]).await.unwrap(), b"ok\n");
}

#[tokio::test]
async fn timeout_kills_the_child_and_keeps_its_output() {
    let supervisor = Supervisor::builder()
        .timeout(Duration::from_millis(300))
        .build();
    let started = Instant::now();

    let err = supervisor
        .run_command("/bin/sh", ["-c", "echo before; echo warned >&2; exec sleep 10"])
        .await
        .unwrap_err();

    assert!(matches!(err, SupervisorError::Timeout(t) if t == Duration::from_millis(300)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(supervisor.state(), ProcessState::Exited);
    assert_eq!(supervisor.stdout_snapshot(), b"before\n");
    assert_eq!(supervisor.get_stderr_output(), b"warned\n");
}

#[tokio::test]
async fn failed_exit_keeps_stdout_and_stderr() {
    let supervisor = Supervisor::new();
    let err = supervisor
        .run_command("/bin/sh", ["-c", "echo partial; echo reason >&2; exit 4"])
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), Some(4));
    assert_eq!(err.stdout(), Some(&b"partial\n"[..]));
    assert_eq!(supervisor.get_stderr_output(), b"reason\n");
}

#[tokio::test]
async fn huge_timeout_runs_without_a_deadline() {
    let supervisor = Supervisor::builder().timeout(Duration::MAX).build();
    assert_eq!(supervisor.options().timeout(), Some(Duration::MAX));

    let output = supervisor.run_command("echo", ["x"]).await.unwrap();
    assert_eq!(output, b"x\n");
}

#[tokio::test]
async fn fast_child_beats_the_timeout() {
    let supervisor = Supervisor::builder().timeout(Duration::from_secs(10)).build();
    let output = supervisor.run_command("echo", ["quick"]).await.unwrap();
    assert_eq!(output, b"quick\n");
}

#[tokio::test]
async fn close_is_idempotent_before_and_after_exit() {
    let supervisor = Supervisor::new();
    supervisor.close();

    supervisor.start("sleep", ["30"]).await.unwrap();
    supervisor.close();
    supervisor.close();
    assert_eq!(supervisor.state(), ProcessState::Exited);
    assert!(matches!(
        supervisor.run().await,
        Err(SupervisorError::AlreadyExited)
    ));

    supervisor.run_command("true", Vec::<String>::new()).await.unwrap();
    supervisor.close();
    supervisor.close();
    assert_eq!(supervisor.state(), ProcessState::Exited);
}

#[tokio::test]
async fn working_directory_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = Supervisor::builder().working_dir(dir.path()).build();

    let output = supervisor.run_command("pwd", Vec::<String>::new()).await.unwrap();

    let reported = std::path::PathBuf::from(String::from_utf8(output).unwrap().trim_end());
    assert_eq!(
        reported.canonicalize().unwrap(),
        dir.path().canonicalize().unwrap()
    );
}

#[tokio::test]
async fn missing_working_directory_is_a_spawn_error() {
    let supervisor = Supervisor::builder()
        .working_dir("/nonexistent/procvisor-dir")
        .build();
    let err = supervisor.start("true", Vec::<String>::new()).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Spawn { .. }));
}

#[tokio::test]
async fn explicit_environment_replaces_inherited_one() {
    let supervisor = Supervisor::builder()
        .identity(Identity::current().unwrap())
        .environment(["GREETING=hello"])
        .build();

    let output = supervisor
        .run_command(
            "/bin/sh",
            ["-c", "echo $GREETING; echo ${USER:-nouser}; echo ${HOME:-nohome}"],
        )
        .await
        .unwrap();

    assert_eq!(output, b"hello\nnouser\nnohome\n");
}

#[tokio::test]
async fn identity_sets_user_and_home() {
    let identity = Identity::current().unwrap();
    let supervisor = Supervisor::builder().identity(identity.clone()).build();

    let output = supervisor
        .run_command("/bin/sh", ["-c", "echo \"$USER:$HOME\""])
        .await
        .unwrap();

    let expected = format!("{}:{}\n", identity.username(), identity.home_dir().display());
    assert_eq!(String::from_utf8(output).unwrap(), expected);
}

//! Output capture: completeness, ordering and concurrent snapshots.

use std::sync::Arc;

use procvisor::process::{StderrPolicy, Supervisor, SupervisorError};

const SH: &str = "/bin/sh";

#[tokio::test]
async fn captures_every_line_in_order() {
    let supervisor = Supervisor::new();
    let script = "i=1; while [ $i -le 500 ]; do echo line$i; i=$((i+1)); done";

    let output = supervisor.run_command(SH, ["-c", script]).await.unwrap();

    let expected: String = (1..=500).map(|i| format!("line{i}\n")).collect();
    assert_eq!(String::from_utf8(output).unwrap(), expected);
}

#[tokio::test]
async fn output_written_before_run_is_kept() {
    let supervisor = Supervisor::new();
    supervisor
        .start("printf", ["first\\nsecond\\n"])
        .await
        .unwrap();
    // Leave the child paused for a moment before continuing it.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let output = supervisor.run().await.unwrap();
    assert_eq!(output, b"first\nsecond\n");
}

#[tokio::test]
async fn unterminated_last_line_is_captured() {
    let supervisor = Supervisor::new();
    let output = supervisor
        .run_command("printf", ["no newline"])
        .await
        .unwrap();
    assert_eq!(output, b"no newline");
}

#[tokio::test]
async fn large_output_does_not_block_the_child() {
    let supervisor = Supervisor::new();
    // Well past a pipe buffer; the child would stall if nothing drained it.
    let output = supervisor
        .run_command("head", ["-c", "1048576", "/dev/zero"])
        .await
        .unwrap();
    assert_eq!(output.len(), 1_048_576);
}

#[tokio::test]
async fn stderr_fails_the_run_by_default() {
    let supervisor = Supervisor::new();
    let err = supervisor
        .run_command(SH, ["-c", "echo out; echo 'something broke' >&2"])
        .await
        .unwrap_err();

    match err {
        SupervisorError::StderrOutput(message) => assert_eq!(message, "something broke"),
        other => panic!("expected stderr error, got {other:?}"),
    }
    assert_eq!(supervisor.stdout_snapshot(), b"out\n");
    assert_eq!(supervisor.get_stderr_output(), b"something broke\n");
}

#[tokio::test]
async fn ignored_stderr_is_still_captured() {
    let supervisor = Supervisor::builder()
        .stderr_policy(StderrPolicy::Ignore)
        .build();

    let output = supervisor
        .run_command(SH, ["-c", "echo out; echo warn >&2"])
        .await
        .unwrap();

    assert_eq!(output, b"out\n");
    assert_eq!(supervisor.get_stderr_output(), b"warn\n");
    assert_eq!(supervisor.get_output().unwrap(), b"out\n");
}

#[tokio::test]
async fn nonzero_exit_carries_code_and_stdout() {
    let supervisor = Supervisor::new();
    let err = supervisor
        .run_command(SH, ["-c", "echo partial; exit 7"])
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), Some(7));
    assert_eq!(err.stdout(), Some(&b"partial\n"[..]));
    assert!(matches!(err, SupervisorError::ExitStatus { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshots_during_a_run_are_prefixes_of_the_final_output() {
    let supervisor = Arc::new(Supervisor::new());
    let script = "i=1; while [ $i -le 2000 ]; do echo row$i; i=$((i+1)); done";
    supervisor.start(SH, ["-c", script]).await.unwrap();

    let runner = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.run().await })
    };

    let mut snapshots = Vec::new();
    while !runner.is_finished() {
        snapshots.push(supervisor.stdout_snapshot());
        tokio::task::yield_now().await;
    }
    let output = runner.await.unwrap().unwrap();

    assert!(output.ends_with(b"row2000\n"));
    for snapshot in snapshots {
        assert!(output.starts_with(&snapshot));
        assert!(snapshot.is_empty() || snapshot.ends_with(b"\n"));
    }
}

#[tokio::test]
async fn restarting_discards_previous_output() {
    let supervisor = Supervisor::new();
    let first = supervisor.run_command("echo", ["one"]).await.unwrap();
    assert_eq!(first, b"one\n");

    let second = supervisor.run_command("echo", ["two"]).await.unwrap();
    assert_eq!(second, b"two\n");
    assert_eq!(supervisor.stdout_snapshot(), b"two\n");
}

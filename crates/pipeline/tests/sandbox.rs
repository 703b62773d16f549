//! Sandbox behaviour against real `sh` processes.

#![cfg(unix)]

use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use manimai_pipeline::sandbox::{run_isolated, SandboxError, SandboxLimits};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

fn sh(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

fn limits(timeout: Duration) -> SandboxLimits {
    SandboxLimits {
        timeout,
        cancel_grace: Duration::from_secs(2),
        ..SandboxLimits::default()
    }
}

#[tokio::test]
async fn captures_output_and_exit_code() {
    let out = run_isolated(
        sh("echo rendered; echo 'NameError: x' >&2; exit 3"),
        &limits(Duration::from_secs(10)),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(out.exit_code, 3);
    assert!(!out.success());
    assert_eq!(out.stdout, "rendered\n");
    assert_eq!(out.stderr, "NameError: x\n");
    assert!(out.diagnostics().contains("NameError: x"));
}

#[tokio::test]
async fn stdin_is_closed() {
    // `cat` would block forever on an open stdin.
    let out = run_isolated(
        sh("cat; echo done"),
        &limits(Duration::from_secs(5)),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert!(out.success());
    assert_eq!(out.stdout, "done\n");
}

#[tokio::test]
async fn timeout_kills_process_and_keeps_output() {
    let start = Instant::now();
    let err = run_isolated(
        sh("echo started; sleep 30"),
        &limits(Duration::from_millis(300)),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(start.elapsed() < Duration::from_secs(10));
    assert_matches!(err, SandboxError::Timeout { ref stdout, .. } if stdout == "started\n");
}

#[tokio::test]
async fn cancellation_is_confirmed() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = run_isolated(sh("sleep 30"), &limits(Duration::from_secs(60)), &cancel)
        .await
        .unwrap_err();

    assert!(start.elapsed() < Duration::from_secs(10));
    assert_matches!(err, SandboxError::Cancelled { .. });
}

#[tokio::test]
async fn background_children_are_reaped_with_the_group() {
    let start = Instant::now();
    let out = run_isolated(
        sh("sleep 30 & echo parent"),
        &SandboxLimits {
            timeout: Duration::from_secs(60),
            cancel_grace: Duration::from_millis(300),
            ..SandboxLimits::default()
        },
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(out.success());
    assert_eq!(out.stdout, "parent\n");
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn group_is_killed_before_exit_status_is_collected() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("bg.pid");
    let out = run_isolated(
        sh(&format!("sleep 30 & echo $! > {}; exit 4", pid_file.display())),
        &limits(Duration::from_secs(60)),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(out.exit_code, 4);

    let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        // Gone, or a zombie waiting on whoever inherited it.
        let alive = std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .map(|stat| stat.rsplit(") ").next().is_some_and(|rest| !rest.starts_with('Z')))
            .unwrap_or(false);
        if !alive {
            break;
        }
        assert!(Instant::now() < deadline, "background sleep {pid} survived");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn missing_binary_is_spawn_error() {
    let err = run_isolated(
        Command::new("/nonexistent/manim-binary"),
        &limits(Duration::from_secs(1)),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert_matches!(err, SandboxError::Spawn(_));
}

#[tokio::test]
async fn output_is_capped() {
    let out = run_isolated(
        sh("head -c 100000 /dev/zero | tr '\\0' 'a'"),
        &SandboxLimits {
            max_output_bytes: 1000,
            ..limits(Duration::from_secs(10))
        },
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(out.stdout.len(), 1000);
}

//! Integration test: real shells behind PTYs
//!
//! Runs framed commands through `/bin/sh` to check that markers survive a
//! real terminal, that stderr is captured, and that a session keeps working
//! after each command exits its shell.
//!
//! Run with: cargo test --test pty_sessions
#![cfg(unix)]

mod helpers;

use helpers::polling::within;
use shellpool::{ExecutionError, ExecutionEvent, PoolConfig, SessionPool};
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(20);

fn sh_pool() -> SessionPool {
    SessionPool::with_pty(PoolConfig {
        shell: vec!["/bin/sh".to_string()],
        command_timeout: Duration::from_secs(15),
        ..PoolConfig::default()
    })
}

async fn lines_of(handle: shellpool::ExecutionHandle) -> (Result<(), ExecutionError>, Vec<String>) {
    let mut events = handle.subscribe();
    let outcome = within("command", WAIT, handle).await;
    let mut lines = Vec::new();
    while let Some(event) = events.recv().await {
        if let ExecutionEvent::Line(line) = event {
            lines.push(line);
        }
    }
    (outcome, lines)
}

#[tokio::test]
async fn echo_hello_in_a_real_shell() {
    let pool = sh_pool();
    let dir = TempDir::new().unwrap();
    let session = pool.acquire_session(dir.path()).await.unwrap();

    let (outcome, lines) = lines_of(pool.submit_command(&session, "echo hello")).await;
    assert_eq!(outcome, Ok(()));
    assert_eq!(lines, vec!["hello"]);
    assert!(!session.is_busy());
}

#[tokio::test]
async fn stderr_is_merged_and_commands_run_in_the_session_directory() {
    let pool = sh_pool();
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "present\n").unwrap();
    let session = pool.acquire_session(dir.path()).await.unwrap();

    let (outcome, lines) = lines_of(pool.submit_command(&session, "cat marker.txt; echo oops >&2")).await;
    assert_eq!(outcome, Ok(()));
    assert_eq!(lines, vec!["present", "oops"]);
}

#[tokio::test]
async fn session_is_reusable_after_each_command() {
    let pool = sh_pool();
    let dir = TempDir::new().unwrap();

    let first = pool.acquire_session(dir.path()).await.unwrap();
    let (outcome, lines) = lines_of(pool.submit_command(&first, "echo one")).await;
    assert_eq!(outcome, Ok(()));
    assert_eq!(lines, vec!["one"]);

    let second = pool.acquire_session(dir.path()).await.unwrap();
    assert_eq!(second.id(), first.id());
    let (outcome, lines) = lines_of(pool.submit_command(&second, "echo two")).await;
    assert_eq!(outcome, Ok(()));
    assert_eq!(lines, vec!["two"]);

    assert_eq!(pool.list_sessions(false).len(), 1);
}

#[tokio::test]
async fn failing_command_still_completes() {
    let pool = sh_pool();
    let dir = TempDir::new().unwrap();
    let session = pool.acquire_session(dir.path()).await.unwrap();

    let (outcome, _lines) = lines_of(pool.submit_command(&session, "false")).await;
    assert_eq!(outcome, Ok(()));
    assert_eq!(session.last_command(), "false");
}

#[tokio::test]
async fn timed_out_command_does_not_leak_into_the_next_one() {
    let pool = SessionPool::with_pty(PoolConfig {
        shell: vec!["/bin/sh".to_string()],
        command_timeout: Duration::from_secs(1),
        ..PoolConfig::default()
    });
    let dir = TempDir::new().unwrap();
    let session = pool.acquire_session(dir.path()).await.unwrap();

    let (outcome, _lines) = lines_of(pool.submit_command(&session, "sleep 5; echo too-late")).await;
    assert_eq!(
        outcome,
        Err(ExecutionError::TimedOut {
            command: "sleep 5; echo too-late".into(),
            timeout_ms: 1_000
        })
    );
    assert!(!session.is_busy());

    let again = pool.acquire_session(dir.path()).await.unwrap();
    assert_eq!(again.id(), session.id());
    let (outcome, lines) = lines_of(pool.submit_command(&again, "echo next")).await;
    assert_eq!(outcome, Ok(()));
    assert_eq!(lines, vec!["next"]);
}

#[tokio::test]
async fn missing_directory_fails_acquisition() {
    let pool = sh_pool();
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope");

    let err = pool.acquire_session(&missing).await.unwrap_err();
    assert!(format!("{err:#}").contains("not a directory"));
}

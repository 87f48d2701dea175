//! Integration tests for shell_pool.
//!
//! These tests drive real bash workers end-to-end.

use shell_pool::{OutputStream, PoolConfig, RunError, ShellPool};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Collected = Arc<Mutex<Vec<(String, OutputStream)>>>;

/// Helper producing a callback that records every delivered line.
fn collector() -> (Collected, impl FnMut(&str, OutputStream)) {
    let lines: Collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    (lines, move |line: &str, stream: OutputStream| {
        sink.lock().unwrap().push((line.to_string(), stream));
    })
}

async fn started_pool(runners: usize) -> ShellPool {
    let pool = ShellPool::new();
    pool.start(runners).await.expect("pool starts");
    pool
}

#[tokio::test]
async fn echo_to_stdout() {
    let pool = started_pool(1).await;
    let (lines, cb) = collector();

    let status = pool.run("echo hello", cb).await.unwrap();

    assert_eq!(status, 0);
    assert_eq!(
        *lines.lock().unwrap(),
        vec![("hello".to_string(), OutputStream::Stdout)]
    );
}

#[tokio::test]
async fn echo_to_stderr() {
    let pool = started_pool(1).await;
    let (lines, cb) = collector();

    let status = pool.run("echo hello 1>&2", cb).await.unwrap();

    assert_eq!(status, 0);
    assert_eq!(
        *lines.lock().unwrap(),
        vec![("hello".to_string(), OutputStream::Stderr)]
    );
}

#[tokio::test]
async fn both_streams_and_a_nonzero_status() {
    let pool = started_pool(1).await;
    let (lines, cb) = collector();

    let status = pool
        .run("echo out; echo err 1>&2; exit 7", cb)
        .await
        .unwrap();

    assert_eq!(status, 7);
    let lines = lines.lock().unwrap();
    // Cross-stream interleaving is not promised; both lines must be present.
    assert!(lines.contains(&("out".to_string(), OutputStream::Stdout)));
    assert!(lines.contains(&("err".to_string(), OutputStream::Stderr)));
    assert_eq!(lines.len(), 2);
}

#[tokio::test]
async fn output_without_trailing_newline_is_delivered() {
    let pool = started_pool(1).await;
    let (lines, cb) = collector();

    let status = pool.run("printf 'no-newline'", cb).await.unwrap();

    assert_eq!(status, 0);
    assert_eq!(
        *lines.lock().unwrap(),
        vec![("no-newline".to_string(), OutputStream::Stdout)]
    );
}

#[tokio::test]
async fn blank_user_lines_are_delivered_as_empty_lines() {
    let pool = started_pool(1).await;
    let (lines, cb) = collector();

    let status = pool.run("echo; echo done", cb).await.unwrap();

    assert_eq!(status, 0);
    assert_eq!(
        *lines.lock().unwrap(),
        vec![
            ("".to_string(), OutputStream::Stdout),
            ("done".to_string(), OutputStream::Stdout),
        ]
    );
}

#[tokio::test]
async fn stdout_line_order_is_preserved() {
    let pool = started_pool(1).await;
    let (lines, cb) = collector();

    let status = pool.run("echo a; echo b; echo c", cb).await.unwrap();

    assert_eq!(status, 0);
    let texts: Vec<String> = lines.lock().unwrap().iter().map(|(l, _)| l.clone()).collect();
    assert_eq!(texts, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn round_trip_of_a_multiline_payload() {
    let pool = started_pool(1).await;
    let (lines, cb) = collector();

    let status = pool
        .run(r"printf 'first\nsecond\n\nfourth'", cb)
        .await
        .unwrap();

    assert_eq!(status, 0);
    let texts: Vec<String> = lines.lock().unwrap().iter().map(|(l, _)| l.clone()).collect();
    assert_eq!(texts, vec!["first", "second", "", "fourth"]);
}

#[tokio::test]
async fn exit_statuses_are_exact() {
    let pool = started_pool(1).await;

    assert_eq!(pool.run("true", |_, _| {}).await.unwrap(), 0);
    assert_eq!(pool.run("false", |_, _| {}).await.unwrap(), 1);
    assert_eq!(pool.run("exit 3", |_, _| {}).await.unwrap(), 3);
    assert_eq!(pool.run("exit 255", |_, _| {}).await.unwrap(), 255);
}

#[tokio::test]
async fn status_survives_a_pipeline_of_rewriters() {
    let pool = started_pool(1).await;
    // The framing pipes the command through two rewriters; pipefail must
    // still surface the command's own status.
    let status = pool
        .run("echo noise; echo more 1>&2; exit 41", |_, _| {})
        .await
        .unwrap();
    assert_eq!(status, 41);
}

#[tokio::test]
async fn stderr_only_commands_tag_every_line_stderr() {
    let pool = started_pool(1).await;
    let (lines, cb) = collector();

    pool.run("printf 'a\\nb\\n' 1>&2", cb).await.unwrap();

    let lines = lines.lock().unwrap();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|(_, s)| *s == OutputStream::Stderr));
}

#[tokio::test]
async fn shell_quoting_passes_through_untouched() {
    let pool = started_pool(1).await;
    let (lines, cb) = collector();

    let status = pool
        .run(r#"echo "it's \"quoted\" and $((2 + 2))""#, cb)
        .await
        .unwrap();

    assert_eq!(status, 0);
    assert_eq!(
        *lines.lock().unwrap(),
        vec![(r#"it's "quoted" and 4"#.to_string(), OutputStream::Stdout)]
    );
}

#[tokio::test]
async fn a_single_runner_is_reused_across_runs() {
    let pool = started_pool(1).await;

    for i in 0..3 {
        let (lines, cb) = collector();
        let status = pool.run(&format!("echo round-{i}"), cb).await.unwrap();
        assert_eq!(status, 0);
        assert_eq!(
            *lines.lock().unwrap(),
            vec![(format!("round-{i}"), OutputStream::Stdout)]
        );
    }

    // Accounting invariant: permits mirror the idle list, nothing leaked.
    assert_eq!(pool.available_permits(), 1);
    assert_eq!(pool.idle_runners().await, 1);
    assert_eq!(pool.runner_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn four_runs_gate_on_a_pool_of_two() {
    let pool = started_pool(2).await;
    let began = Instant::now();

    let mut handles = Vec::new();
    for n in 1..=4 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let (lines, cb) = collector();
            let status = pool
                .run(&format!("sleep 0.3; echo t{n}"), cb)
                .await
                .unwrap();
            (n, status, lines)
        }));
    }

    for handle in handles {
        let (n, status, lines) = handle.await.unwrap();
        assert_eq!(status, 0);
        // No cross-contamination: each run sees exactly its own line.
        assert_eq!(
            *lines.lock().unwrap(),
            vec![(format!("t{n}"), OutputStream::Stdout)]
        );
    }

    let elapsed = began.elapsed();
    // Two runners, four 0.3 s commands: at least two batches.
    assert!(elapsed >= Duration::from_millis(550), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "elapsed {elapsed:?}");

    assert_eq!(pool.available_permits(), 2);
    assert_eq!(pool.idle_runners().await, 2);
}

#[tokio::test]
async fn background_launch_is_fire_and_forget() {
    let pool = started_pool(1).await;
    let dir = tempfile::TempDir::new().unwrap();
    let marker = dir.path().join("background-marker");

    pool.run_background(&format!("touch '{}'", marker.display()))
        .await
        .unwrap();

    let mut found = false;
    for _ in 0..50 {
        if marker.exists() {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(found, "background command never ran");
}

#[tokio::test]
async fn run_requires_a_started_pool() {
    let pool = ShellPool::new();
    let result = pool.run("echo hi", |_, _| {}).await;
    assert!(matches!(result, Err(RunError::AuxDead)));
}

#[tokio::test]
async fn run_background_requires_a_started_pool() {
    let pool = ShellPool::new();
    let result = pool.run_background("echo hi").await;
    assert!(matches!(result, Err(RunError::AuxDead)));
}

#[tokio::test]
async fn debug_config_does_not_change_results() {
    let pool = ShellPool::with_config(PoolConfig::default().with_debug(true));
    pool.start(1).await.unwrap();
    let (lines, cb) = collector();
    let status = pool.run("echo traced", cb).await.unwrap();
    assert_eq!(status, 0);
    assert_eq!(
        *lines.lock().unwrap(),
        vec![("traced".to_string(), OutputStream::Stdout)]
    );
}

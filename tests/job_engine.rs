#![cfg(unix)]

use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;

use jobvisor::config::JobsConfig;
use jobvisor::jobs::{JobEngine, JobSpec, JobStatus};

fn engine() -> JobEngine {
    JobEngine::new(JobsConfig {
        default_yield: Duration::from_secs(2),
        ..JobsConfig::default()
    })
}

#[tokio::test]
async fn test_foreground_mode() {
    let engine = engine();
    let result = engine
        .submit(JobSpec::new("main", "echo X").with_yield_ms(0))
        .await
        .unwrap();

    assert!(!result.backgrounded);
    assert!(result.stdout.unwrap().contains('X'));
    assert_eq!(result.summary.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_auto_background() {
    let engine = engine();
    let started = Instant::now();
    let result = engine
        .submit(JobSpec::new("main", "sleep 60").with_yield_ms(2000))
        .await
        .unwrap();
    let waited = started.elapsed();

    assert!(result.backgrounded);
    assert_eq!(result.summary.status, JobStatus::Running);
    assert!(result.stdout.is_none());
    assert!(waited >= Duration::from_millis(1900), "{waited:?}");
    assert!(waited < Duration::from_secs(10), "{waited:?}");
    assert!(engine.kill(&result.summary.id));
}

#[tokio::test]
async fn test_explicit_background() {
    let engine = engine();
    let started = Instant::now();
    let result = engine
        .submit(JobSpec::new("main", "sleep 60").in_background())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(result.backgrounded);
    assert_eq!(result.summary.status, JobStatus::Running);
    assert!(result.summary.pid.is_some());
    engine.kill(&result.summary.id);
}

#[tokio::test]
async fn test_fast_job_inside_yield_window_is_not_backgrounded() {
    let engine = engine();
    let result = engine
        .submit(JobSpec::new("main", "printf done").with_yield_ms(5000))
        .await
        .unwrap();
    assert!(!result.backgrounded);
    assert_eq!(result.stdout.as_deref(), Some("done"));
}

#[tokio::test]
async fn test_kill_semantics() {
    let engine = engine();
    let job = engine
        .submit(JobSpec::new("main", "sleep 300").in_background())
        .await
        .unwrap();
    let id = job.summary.id;

    assert!(engine.kill(&id));
    let summary = engine.get(&id).unwrap();
    assert_eq!(summary.status, JobStatus::Killed);
    assert!(summary.ended_at.is_some());

    assert!(!engine.kill(&id));

    let finished = engine
        .submit(JobSpec::new("main", "true").with_yield_ms(0))
        .await
        .unwrap();
    assert!(!engine.kill(&finished.summary.id));
    assert!(!engine.kill("job_doesnotexist"));
}

#[tokio::test]
async fn test_kill_reaches_grandchildren() {
    let engine = engine();
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("survived");
    let command = format!("(sleep 2; touch {}) & wait", marker.display());
    let job = engine
        .submit(JobSpec::new("main", command).with_cwd(dir.path()).in_background())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(engine.kill(&job.summary.id));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_clear_requires_finished() {
    let engine = engine();
    let job = engine
        .submit(JobSpec::new("main", "sleep 30").in_background())
        .await
        .unwrap();
    let id = job.summary.id;

    assert!(!engine.clear(&id));
    assert_eq!(engine.get(&id).unwrap().status, JobStatus::Running);

    engine.kill(&id);
    assert!(engine.clear(&id));
    assert!(engine.get(&id).is_none());
    assert!(engine.poll(&id).is_none());
    assert!(engine.log(&id, None, None).is_none());
}

#[tokio::test]
async fn test_poll_deltas_partition_the_log() {
    let engine = engine();
    let job = engine
        .submit(
            JobSpec::new(
                "main",
                "for i in 1 2 3 4 5; do echo line$i; echo err$i >&2; sleep 0.1; done",
            )
            .in_background(),
        )
        .await
        .unwrap();
    let id = job.summary.id;

    let mut seen = String::new();
    loop {
        let poll = engine.poll(&id).unwrap();
        seen.push_str(&poll.delta);
        if poll.done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    // Drained: further polls are empty.
    assert_eq!(engine.poll(&id).unwrap().delta, "");

    let log = engine.log(&id, None, None).unwrap();
    assert_eq!(seen, log.log);
    assert_eq!(log.total, log.log.len());
    assert!(seen.contains("line5"));
    assert!(seen.contains("err5"));
}

#[tokio::test]
async fn test_log_pagination_ignores_poll_cursor() {
    let engine = engine();
    let job = engine
        .submit(JobSpec::new("main", "printf 0123456789").with_yield_ms(0))
        .await
        .unwrap();
    let id = job.summary.id;

    engine.poll(&id);
    let page = engine.log(&id, Some(3), Some(4)).unwrap();
    assert_eq!(page.log, "3456");
    assert_eq!(page.total, 10);
    assert_eq!(engine.log(&id, None, None).unwrap().log, "0123456789");
}

#[tokio::test]
async fn test_timeout_status() {
    let engine = engine();
    let result = engine
        .submit(
            JobSpec::new("main", "sleep 30")
                .with_timeout_secs(1)
                .with_yield_ms(0),
        )
        .await
        .unwrap();
    assert!(!result.backgrounded);
    assert_eq!(result.summary.status, JobStatus::Timeout);
}

#[tokio::test]
async fn test_truncation_is_sticky_and_bounded() {
    let engine = JobEngine::new(JobsConfig {
        max_output_bytes: 1024,
        tail_bytes: 64,
        ..JobsConfig::default()
    });
    let result = engine
        .submit(
            JobSpec::new("main", "head -c 5000 /dev/zero | tr '\\0' a; echo; echo end")
                .with_yield_ms(0),
        )
        .await
        .unwrap();

    assert!(result.summary.truncated);
    assert!(result.stdout.as_ref().unwrap().len() <= 1024);
    assert!(result.stdout.unwrap().ends_with("end\n"));
    assert!(result.summary.total_output_chars >= 5004);
    assert!(result.summary.tail.len() <= 64);
}

#[tokio::test]
async fn test_spawn_failure_is_reported_as_failed_job() {
    let engine = engine();
    let result = engine
        .submit(JobSpec::new("main", "true").with_cwd("/nonexistent/jobvisor/dir"))
        .await
        .unwrap();
    assert!(!result.backgrounded);
    assert_eq!(result.summary.status, JobStatus::Failed);
    assert_eq!(
        result.summary.exit_code,
        Some(jobvisor::jobs::SPAWN_FAILURE_EXIT_CODE)
    );
    assert_eq!(
        engine.get(&result.summary.id).unwrap().status,
        JobStatus::Failed
    );
}

#[tokio::test]
async fn test_list_filters_by_agent() {
    let engine = engine();
    engine
        .submit(JobSpec::new("alpha", "true").with_yield_ms(0))
        .await
        .unwrap();
    engine
        .submit(JobSpec::new("beta", "true").with_yield_ms(0))
        .await
        .unwrap();

    assert_eq!(engine.list(None).len(), 2);
    let alpha = engine.list(Some("alpha"));
    assert_eq!(alpha.len(), 1);
    assert_eq!(alpha[0].agent_id, "alpha");
}

#[tokio::test]
async fn test_engine_sweeps_expired_jobs_on_its_own() {
    let engine = JobEngine::new(JobsConfig {
        finished_ttl: Duration::from_millis(100),
        sweep_interval: Duration::from_millis(50),
        ..JobsConfig::default()
    });
    let done = engine
        .submit(JobSpec::new("main", "true").with_yield_ms(0))
        .await
        .unwrap();
    let running = engine
        .submit(JobSpec::new("main", "sleep 30").in_background())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(engine.get(&done.summary.id).is_none());
    assert_eq!(
        engine.get(&running.summary.id).unwrap().status,
        JobStatus::Running
    );

    engine.kill(&running.summary.id);
}

#[tokio::test]
async fn test_exclusivity_under_racing_kill_and_exit() {
    let engine = engine();
    for _ in 0..10 {
        let job = engine
            .submit(JobSpec::new("main", "sleep 0.05").in_background())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.kill(&job.summary.id);

        let summary = engine.wait(&job.summary.id).await.unwrap();
        assert!(summary.status.is_terminal());
        // Terminal status never changes afterwards.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.get(&job.summary.id).unwrap().status, summary.status);
    }
}

#[tokio::test]
async fn test_write_to_job_that_never_reads_returns_immediately() {
    let engine = engine();
    let job = engine
        .submit(JobSpec::new("main", "sleep 5").in_background())
        .await
        .unwrap();
    let id = job.summary.id;

    let started = Instant::now();
    engine.write(&id, &vec![b'x'; 1 << 20]);
    engine.write(&id, b"y");
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(engine.kill(&id));
}

//! Sandbox pool integration tests.
//!
//! Tests the full pipeline: SandboxPool → Executor / HealthMonitor → MockSandbox.
//! These tests do NOT require Docker.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use codemode_core::{Error, ErrorKind, ExecutionRequest, FirstSelection, Language};
use codemode_sandbox::{
    ExecOutput, HandleState, MockExec, MockSandbox, PoolConfig, ReleaseOutcome, SandboxPool,
    TRUNCATION_MARKER,
};

// =============================================================================
// Helpers
// =============================================================================

fn config(size: usize) -> PoolConfig {
    PoolConfig {
        size,
        exec_timeout: Duration::from_millis(150),
        acquire_timeout: Duration::from_secs(2),
        health_interval: Duration::from_secs(3600),
        shutdown_grace: Duration::from_millis(100),
        ..Default::default()
    }
}

async fn start(mock: &Arc<MockSandbox>, config: PoolConfig) -> SandboxPool {
    let pool = SandboxPool::with_selection(mock.clone(), config, Arc::new(FirstSelection));
    pool.start().await.unwrap();
    pool
}

/// Poll until `check` holds, failing the test after two seconds.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

fn python(code: &str) -> ExecutionRequest {
    ExecutionRequest::new(code, Language::Python)
}

// =============================================================================
// 1. Successful execution
// =============================================================================

#[tokio::test]
async fn test_execute_success() {
    let mock = Arc::new(MockSandbox::new(vec![MockExec::output("hi\n", 0)]));
    let pool = start(&mock, config(1)).await;

    let result = pool.execute(&python("print('hi')")).await.unwrap();
    assert_eq!(result.stdout, "hi\n");
    assert_eq!(result.exit_code, Some(0));
    assert!(result.success());
    assert!(!result.truncated);

    let executed = mock.executed().await;
    assert_eq!(
        executed[0].1,
        vec!["python".to_string(), "-c".to_string(), "print('hi')".to_string()]
    );
    pool.shutdown().await;
}

// =============================================================================
// 2. Concurrency never exceeds pool size
// =============================================================================

#[tokio::test]
async fn test_in_use_never_exceeds_pool_size() {
    let slow = MockExec::Delay(
        Duration::from_millis(30),
        ExecOutput {
            stdout: b"ok".to_vec(),
            exit_code: Some(0),
            ..Default::default()
        },
    );
    let mock = Arc::new(MockSandbox::new(vec![slow; 8]));
    let pool = Arc::new(start(&mock, config(2)).await);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            pool.execute(&python(&format!("print({})", i))).await
        }));
    }

    let watcher = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut max_in_use = 0;
            for _ in 0..50 {
                max_in_use = max_in_use.max(pool.stats().await.in_use);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            max_in_use
        })
    };

    for task in tasks {
        let result = task.await.unwrap().unwrap();
        assert_eq!(result.exit_code, Some(0));
    }
    assert!(watcher.await.unwrap() <= 2);
    assert_eq!(mock.created_count(), 2);
    pool.shutdown().await;
}

// =============================================================================
// 3. Exhaustion
// =============================================================================

#[tokio::test]
async fn test_zero_deadline_when_all_in_use() {
    let mock = Arc::new(MockSandbox::default());
    let pool = start(&mock, config(1)).await;

    let lease = pool.acquire_default().await.unwrap();
    let err = pool.acquire(Instant::now()).await.unwrap_err();
    assert!(matches!(err, Error::PoolExhausted { .. }));
    assert!(err.retryable());

    pool.release(lease, ReleaseOutcome::Reusable).await;
    pool.shutdown().await;
}

#[tokio::test]
async fn test_zero_deadline_succeeds_when_idle() {
    let mock = Arc::new(MockSandbox::default());
    let pool = start(&mock, config(1)).await;

    let lease = pool.acquire(Instant::now()).await.unwrap();
    pool.release(lease, ReleaseOutcome::Reusable).await;
    pool.shutdown().await;
}

#[tokio::test]
async fn test_waiting_acquire_gets_released_sandbox() {
    let mock = Arc::new(MockSandbox::default());
    let pool = Arc::new(start(&mock, config(1)).await);

    let lease = pool.acquire_default().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire_default().await.map(|l| l.id().clone()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let id = lease.id().clone();
    pool.release(lease, ReleaseOutcome::Reusable).await;

    // The waiter's lease is dropped inside the task, so the sandbox is replaced afterwards.
    assert_eq!(waiter.await.unwrap().unwrap(), id);
    pool.shutdown().await;
}

// =============================================================================
// 4. Timeout
// =============================================================================

#[tokio::test]
async fn test_timeout_keeps_partial_output_and_replaces_sandbox() {
    let mock = Arc::new(MockSandbox::new(vec![MockExec::Hang {
        stdout: "partial".into(),
    }]));
    let pool = start(&mock, config(1)).await;
    let original = pool.handles().await[0].id.clone();

    let result = pool.execute(&python("while True: pass")).await.unwrap();
    assert_eq!(result.error, Some(ErrorKind::Timeout));
    assert_eq!(result.exit_code, None);
    assert_eq!(result.stdout, "partial");
    assert!(result.message.unwrap().contains("timed out"));

    let (m, p) = (&mock, &pool);
    eventually(|| async move { m.created_count() == 2 && p.stats().await.idle == 1 }).await;
    assert!(mock.destroyed_ids().await.contains(&original));
    assert_ne!(pool.handles().await[0].id, original);
    pool.shutdown().await;
}

// =============================================================================
// 5. Environment failure
// =============================================================================

#[tokio::test]
async fn test_backend_failure_is_reported_and_replaced() {
    let mock = Arc::new(MockSandbox::new(vec![MockExec::Fail("container gone".into())]));
    let pool = start(&mock, config(1)).await;

    let result = pool.execute(&python("print(1)")).await.unwrap();
    assert_eq!(result.error, Some(ErrorKind::EnvironmentFailure));
    assert_eq!(result.exit_code, None);
    assert!(result.stdout.is_empty());

    let (m, p) = (&mock, &pool);
    eventually(|| async move { m.created_count() == 2 && p.stats().await.idle == 1 }).await;
    pool.shutdown().await;
}

// =============================================================================
// 6. Validation and truncation
// =============================================================================

#[tokio::test]
async fn test_empty_code_never_touches_pool() {
    let mock = Arc::new(MockSandbox::default());
    let pool = start(&mock, config(1)).await;
    let before = pool.stats().await;

    let err = pool.execute(&python("   \n")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    assert!(mock.executed().await.is_empty());
    assert_eq!(pool.stats().await, before);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_output_is_truncated_per_stream() {
    let mock = Arc::new(MockSandbox::new(vec![MockExec::streams("abcdefgh", "xy", 0)]));
    let pool = start(
        &mock,
        PoolConfig {
            max_output_chars: 5,
            ..config(1)
        },
    )
    .await;

    let result = pool.execute(&python("print('abcdefgh')")).await.unwrap();
    assert_eq!(result.stdout, format!("abcde{}", TRUNCATION_MARKER));
    assert_eq!(result.stderr, "xy");
    assert!(result.truncated);
    pool.shutdown().await;
}

// =============================================================================
// 7. Health monitor
// =============================================================================

#[tokio::test]
async fn test_monitor_repairs_drift_in_one_cycle() {
    let mock = Arc::new(MockSandbox::default());
    let pool = start(&mock, config(2)).await;
    let victim = pool.handles().await[0].id.clone();

    mock.kill(&victim).await;
    let report = pool.reconcile().await.unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(report.created, 1);

    let stats = pool.stats().await;
    assert_eq!(stats.idle, 2);
    assert!(pool.handles().await.iter().all(|h| h.id != victim));
    assert_eq!(mock.live_ids().await.len(), 2);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_monitor_repairs_drift_on_its_own_interval() {
    let mock = Arc::new(MockSandbox::default());
    let pool = start(
        &mock,
        PoolConfig {
            health_interval: Duration::from_millis(50),
            ..config(2)
        },
    )
    .await;
    let victim = pool.handles().await[0].id.clone();

    mock.kill(&victim).await;

    let (m, p, v) = (&mock, &pool, &victim);
    eventually(|| async move {
        p.stats().await.idle == 2
            && p.handles().await.iter().all(|h| &h.id != v)
            && m.live_ids().await.len() == 2
    })
    .await;
    assert_eq!(mock.created_count(), 3);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_reclaimed_sandbox_passes_through_destroyed() {
    let mock = Arc::new(MockSandbox::default());
    mock.set_destroy_delay(Duration::from_millis(200));
    let pool = start(&mock, config(1)).await;

    let lease = pool.acquire_default().await.unwrap();
    let id = lease.id().clone();
    pool.release(lease, ReleaseOutcome::Compromised).await;

    let (p, i) = (&pool, &id);
    eventually(|| async move {
        p.handles()
            .await
            .iter()
            .any(|h| &h.id == i && h.state == HandleState::Destroyed)
    })
    .await;
    // Being torn down does not count toward the pool.
    assert_eq!(pool.stats().await.total(), 0);

    eventually(|| async move {
        let handles = p.handles().await;
        handles.len() == 1 && handles[0].state == HandleState::Idle && &handles[0].id != i
    })
    .await;
    assert!(mock.destroyed_ids().await.contains(&id));

    mock.set_destroy_delay(Duration::ZERO);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_monitor_never_removes_in_use_sandbox() {
    let mock = Arc::new(MockSandbox::default());
    let pool = start(&mock, config(1)).await;

    let lease = pool.acquire_default().await.unwrap();
    mock.kill(lease.id()).await;

    let report = pool.reconcile().await.unwrap();
    assert_eq!(report.stale, 1);
    assert_eq!(report.created, 0);
    assert_eq!(pool.stats().await.in_use, 1);

    // A stale sandbox is retired even when released as reusable.
    pool.release(lease, ReleaseOutcome::Reusable).await;
    assert_eq!(pool.stats().await.unhealthy, 1);

    let report = pool.reconcile().await.unwrap();
    assert_eq!(report.destroyed, 1);
    assert_eq!(report.created, 1);
    assert_eq!(pool.stats().await.idle, 1);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_monitor_survives_backend_errors() {
    let mock = Arc::new(MockSandbox::default());
    let pool = start(&mock, config(1)).await;

    mock.set_list_failing(true);
    assert!(pool.reconcile().await.is_err());
    mock.set_list_failing(false);

    let victim = pool.handles().await[0].id.clone();
    mock.kill(&victim).await;
    mock.fail_next_creates(1);
    let report = pool.reconcile().await.unwrap();
    assert_eq!(report.failed_creates, 1);
    assert_eq!(pool.stats().await.total(), 0);

    let report = pool.reconcile().await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(pool.stats().await.idle, 1);
    pool.shutdown().await;
}

// =============================================================================
// 8. Workspace reset on release
// =============================================================================

fn resetting(size: usize) -> PoolConfig {
    PoolConfig {
        reset_workspace_on_release: true,
        ..config(size)
    }
}

#[tokio::test]
async fn test_reusable_release_wipes_workspace() {
    let mock = Arc::new(MockSandbox::default());
    let pool = start(&mock, resetting(1)).await;
    let id = pool.handles().await[0].id.clone();

    let path = pool.write_file("notes/a.txt", b"left behind").await.unwrap();
    assert_eq!(path, "/workspace/notes/a.txt");
    assert!(mock.files_in(&id).await.is_empty());

    assert!(matches!(
        pool.read_file("notes/a.txt").await,
        Err(Error::FileNotFound(_))
    ));
    assert_eq!(pool.stats().await.idle, 1);
    assert!(mock.destroyed_ids().await.is_empty());
    pool.shutdown().await;
}

#[tokio::test]
async fn test_failed_wipe_retires_sandbox() {
    let mock = Arc::new(MockSandbox::default());
    let pool = start(&mock, resetting(1)).await;
    let original = pool.handles().await[0].id.clone();

    mock.set_clear_failing(true);
    pool.write_file("a.txt", b"x").await.unwrap();

    let (m, p) = (&mock, &pool);
    eventually(|| async move { m.created_count() == 2 && p.stats().await.idle == 1 }).await;
    assert!(mock.destroyed_ids().await.contains(&original));
    assert!(pool.handles().await.iter().all(|h| h.id != original));
    pool.shutdown().await;
}

// =============================================================================
// 9. Lease drop guard
// =============================================================================

#[tokio::test]
async fn test_dropped_lease_is_reclaimed() {
    let mock = Arc::new(MockSandbox::default());
    let pool = start(&mock, config(1)).await;

    let lease = pool.acquire_default().await.unwrap();
    let id = lease.id().clone();
    drop(lease);

    let (m, p) = (&mock, &pool);
    eventually(|| async move { m.created_count() == 2 && p.stats().await.idle == 1 }).await;
    assert!(mock.destroyed_ids().await.contains(&id));
    pool.shutdown().await;
}

// =============================================================================
// 10. Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_destroys_every_sandbox() {
    let mock = Arc::new(MockSandbox::default());
    let pool = start(&mock, config(3)).await;

    pool.shutdown().await;
    assert!(mock.live_ids().await.is_empty());
    assert_eq!(mock.destroyed_ids().await.len(), 3);
    assert_eq!(pool.stats().await.total(), 0);
    assert!(matches!(
        pool.execute(&python("print(1)")).await,
        Err(Error::ShuttingDown)
    ));
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_after_grace() {
    let mock = Arc::new(MockSandbox::new(vec![MockExec::Hang {
        stdout: "working".into(),
    }]));
    let pool = Arc::new(
        start(
            &mock,
            PoolConfig {
                exec_timeout: Duration::from_secs(30),
                ..config(1)
            },
        )
        .await,
    );

    let running = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.execute(&python("import time; time.sleep(60)")).await })
    };
    let p = &pool;
    eventually(|| async move { p.stats().await.in_use == 1 }).await;

    pool.shutdown().await;
    let result = running.await.unwrap().unwrap();
    assert_eq!(result.error, Some(ErrorKind::EnvironmentFailure));
    assert_eq!(result.stdout, "working");
    assert!(mock.live_ids().await.is_empty());
}

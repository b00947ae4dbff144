//! End-to-end behaviour of the worker pool writing results into the repository.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use throttled_job_server::{
    job::WriteItemJob,
    pool::{PoolState, WorkerPool},
    repo::{InMemoryRepository, Item, RepoError, Repository},
};
use tokio::{sync::oneshot, time::timeout};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(3);

/// Polls until `check` passes or `WAIT` elapses.
async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn single_worker_queue_of_one_applies_backpressure() -> Result<()> {
    let repo = Arc::new(InMemoryRepository::new());
    let pool = WorkerPool::new(1, 1);
    pool.start();

    // Job A: announce it has been dequeued, sleep 100ms, then write "x".
    let (started_tx, started_rx) = oneshot::channel();
    let repo_a = Arc::clone(&repo);
    assert!(pool.submit_fn(move |cancel: CancellationToken| async move {
        let _ = started_tx.send(());
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
        let _ = repo_a.put(&cancel, Item::new("x", "a"));
    }));
    timeout(WAIT, started_rx).await??;
    assert_eq!(pool.queued(), 0);

    // The single worker is busy with A, so B takes the only queue slot.
    let b_accepted = pool.submit(WriteItemJob::new(
        repo.clone(),
        Item::new("y", "b"),
        Duration::ZERO,
    ));
    assert!(b_accepted, "B should fit in the queue while A runs");
    assert_eq!(pool.queued(), 1);

    // A is running and B is queued: a third submit has nowhere to go.
    let c_accepted = pool.submit(WriteItemJob::new(
        repo.clone(),
        Item::new("z", "c"),
        Duration::ZERO,
    ));
    assert!(!c_accepted, "C should be rejected while the queue is full");
    assert_eq!(pool.queued(), 1);

    assert!(eventually(|| repo.get("x").is_ok() && repo.get("y").is_ok()).await);
    assert!(matches!(repo.get("z"), Err(RepoError::NotFound { .. })));

    pool.stop().await;
    Ok(())
}

#[tokio::test]
async fn stop_aborts_delayed_writes_and_blocks_new_work() -> Result<()> {
    let repo = Arc::new(InMemoryRepository::new());
    let pool = WorkerPool::new(2, 8);
    pool.start();

    for key in ["slow-1", "slow-2"] {
        assert!(pool.submit(WriteItemJob::new(
            repo.clone(),
            Item::new(key, "v"),
            Duration::from_secs(60),
        )));
    }
    assert!(eventually(|| pool.queued() == 0).await, "both jobs should be picked up");

    timeout(WAIT, pool.stop()).await?;
    assert_eq!(pool.state(), PoolState::Stopped);
    assert!(repo.is_empty(), "cancelled jobs must not write");

    let accepted = pool.submit(WriteItemJob::new(
        repo.clone(),
        Item::new("late", "v"),
        Duration::ZERO,
    ));
    assert!(!accepted);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(repo.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_jobs_all_complete() -> Result<()> {
    let repo = Arc::new(InMemoryRepository::new());
    let pool = WorkerPool::new(4, 64);
    pool.start();

    for i in 0..50 {
        assert!(pool.submit(WriteItemJob::new(
            repo.clone(),
            Item::new(format!("k{i}"), i.to_string()),
            Duration::from_millis(1),
        )));
    }

    assert!(eventually(|| repo.len() == 50).await);
    let item = repo.get("k42")?;
    assert_eq!(item.value, "42");

    pool.stop().await;
    Ok(())
}

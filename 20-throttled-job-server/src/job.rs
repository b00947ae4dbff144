//! Units of deferred work executed by the [`WorkerPool`](crate::pool::WorkerPool).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::repo::{Item, Repository};

/// A job owned and executed by the pool.
///
/// `cancel` fires when the pool stops. Jobs that suspend should watch it and
/// return early; the pool never forcibly aborts a job.
#[async_trait]
pub trait Job: Send + 'static {
    async fn run(self: Box<Self>, cancel: CancellationToken);
}

/// Adapts an async closure into a [`Job`].
pub struct FnJob<F> {
    f: F,
}

impl<F, Fut> FnJob<F>
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn run(self: Box<Self>, cancel: CancellationToken) {
        (self.f)(cancel).await;
    }
}

/// Waits `delay`, then stores `value` under `key`.
///
/// Returns without writing if cancelled during the wait.
pub struct WriteItemJob {
    repo: Arc<dyn Repository>,
    item: Item,
    delay: Duration,
}

impl WriteItemJob {
    pub fn new(repo: Arc<dyn Repository>, item: Item, delay: Duration) -> Self {
        Self { repo, item, delay }
    }
}

#[async_trait]
impl Job for WriteItemJob {
    async fn run(self: Box<Self>, cancel: CancellationToken) {
        let WriteItemJob { repo, item, delay } = *self;

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(key = %item.key, "write job cancelled before completion");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let key = item.key.clone();
        match repo.put(&cancel, item) {
            Ok(()) => debug!(%key, "write job stored result"),
            Err(err) => warn!(%key, error = %err, "write job failed to store result"),
        }
    }
}

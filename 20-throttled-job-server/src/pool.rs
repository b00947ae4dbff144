//! Fixed-size worker pool draining a bounded FIFO queue.
//!
//! The pool runs `N` Tokio tasks that share one `flume` receiver. Each worker
//! loops on whichever comes first: the pool's cancellation token, or the next
//! job from the queue.
//!
//! # Lifecycle
//!
//! `Created -> Running -> Stopping -> Stopped`. [`WorkerPool::start`] and
//! [`WorkerPool::stop`] are both idempotent. `Stopped` is terminal.
//!
//! # Backpressure
//!
//! [`WorkerPool::submit`] never blocks. When the queue is full, or the pool is
//! stopping, the job is handed back to the caller as a `false` return and
//! dropped.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::job::{FnJob, Job};

type BoxedJob = Box<dyn Job>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Constructed; jobs may be queued but nothing runs yet.
    Created,
    /// Workers are draining the queue.
    Running,
    /// `stop` has begun and is waiting for workers to exit.
    Stopping,
    /// Every worker has exited. Terminal.
    Stopped,
}

struct Lifecycle {
    state: PoolState,
    sender: Option<flume::Sender<BoxedJob>>,
    receiver: Option<flume::Receiver<BoxedJob>>,
    handles: Vec<JoinHandle<()>>,
}

pub struct WorkerPool {
    workers: usize,
    capacity: usize,
    cancel: CancellationToken,
    // Fires once `stop` has joined every worker.
    stopped: CancellationToken,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl WorkerPool {
    /// Creates a pool of `workers` tasks over a queue holding `queue_size`
    /// pending jobs.
    ///
    /// `workers` is raised to at least 1. A `queue_size` of 0 yields a
    /// rendezvous queue: `submit` only succeeds while some worker is idle and
    /// already waiting for a job.
    pub fn new(workers: usize, queue_size: usize) -> Self {
        let (sender, receiver) = flume::bounded(queue_size);
        Self {
            workers: workers.max(1),
            capacity: queue_size,
            cancel: CancellationToken::new(),
            stopped: CancellationToken::new(),
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: PoolState::Created,
                sender: Some(sender),
                receiver: Some(receiver),
                handles: Vec::new(),
            })),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> PoolState {
        self.lifecycle.lock().state
    }

    /// Number of accepted jobs not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.lifecycle
            .lock()
            .sender
            .as_ref()
            .map_or(0, |sender| sender.len())
    }

    /// Spawns the workers onto the current Tokio runtime.
    ///
    /// Only the first call on a `Created` pool does anything.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != PoolState::Created {
            debug!(state = ?lifecycle.state, "worker pool start ignored");
            return;
        }
        let Some(receiver) = lifecycle.receiver.take() else {
            return;
        };

        lifecycle.handles = (0..self.workers)
            .map(|id| tokio::spawn(run_worker(id, receiver.clone(), self.cancel.clone())))
            .collect();
        lifecycle.state = PoolState::Running;
        info!(
            workers = self.workers,
            queue_size = self.capacity,
            "worker pool started"
        );
    }

    /// Enqueues `job` without blocking.
    ///
    /// Returns `false` if the queue is full or the pool is stopping or stopped.
    /// Jobs accepted before `start` run once the pool starts.
    pub fn submit<J: Job>(&self, job: J) -> bool {
        self.submit_boxed(Box::new(job))
    }

    /// Convenience wrapper around [`submit`](Self::submit) for async closures.
    pub fn submit_fn<F, Fut>(&self, f: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.submit(FnJob::new(f))
    }

    fn submit_boxed(&self, job: BoxedJob) -> bool {
        let lifecycle = self.lifecycle.lock();
        let Some(sender) = lifecycle.sender.as_ref() else {
            debug!("job rejected: worker pool stopped");
            return false;
        };
        match sender.try_send(job) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(_)) => {
                debug!(queued = sender.len(), "job rejected: queue full");
                false
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        }
    }

    /// Cancels every worker and in-flight job, closes the queue, and waits for
    /// all workers to exit.
    ///
    /// Jobs still waiting in the queue are dropped. There is no internal
    /// deadline: a job that ignores cancellation keeps `stop` waiting, so wrap
    /// the call in [`tokio::time::timeout`] if a bound is needed. Workers are
    /// joined by a background task, so a caller that gives up early leaves the
    /// shutdown running and a later `stop` still observes `Stopped`.
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.state {
                PoolState::Stopped => return,
                PoolState::Stopping => {}
                PoolState::Created => {
                    self.cancel.cancel();
                    lifecycle.sender = None;
                    lifecycle.receiver = None;
                    lifecycle.state = PoolState::Stopped;
                    self.stopped.cancel();
                    info!("worker pool stopped before start");
                    return;
                }
                PoolState::Running => {
                    lifecycle.state = PoolState::Stopping;
                    self.cancel.cancel();
                    lifecycle.sender = None;
                    lifecycle.receiver = None;
                    let handles = std::mem::take(&mut lifecycle.handles);
                    tokio::spawn(join_workers(
                        handles,
                        Arc::clone(&self.lifecycle),
                        self.stopped.clone(),
                    ));
                }
            }
        }

        self.stopped.cancelled().await;
    }
}

async fn join_workers(
    handles: Vec<JoinHandle<()>>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    stopped: CancellationToken,
) {
    for result in futures::future::join_all(handles).await {
        if let Err(err) = result {
            warn!(error = %err, "worker task ended abnormally");
        }
    }

    lifecycle.lock().state = PoolState::Stopped;
    stopped.cancel();
    info!("worker pool stopped");
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers hold their own receiver clones; make sure they exit.
        self.cancel.cancel();
    }
}

async fn run_worker(id: usize, jobs: flume::Receiver<BoxedJob>, cancel: CancellationToken) {
    debug!(worker = id, "worker started");
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = jobs.recv_async() => match job {
                Ok(job) => job,
                Err(_) => break,
            },
        };

        let outcome = AssertUnwindSafe(job.run(cancel.child_token()))
            .catch_unwind()
            .await;
        if outcome.is_err() {
            warn!(worker = id, "job panicked");
        }
    }
    debug!(worker = id, "worker exiting");
}

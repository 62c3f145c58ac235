//! Bounded worker pool for fire-and-forget side effects
//!
//! Match saves, ban dispatch and other external calls are submitted here
//! instead of being spawned ad hoc, so concurrency stays bounded and shutdown
//! can wait for every worker. Jobs that must not be lost go through
//! [`WorkerPool::submit_or_spawn`], which overflows onto a tracked task.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker queue full, dropped job '{0}'")]
    Full(&'static str),

    #[error("worker pool closed, dropped job '{0}'")]
    Closed(&'static str),
}

/// Handle used to submit jobs. Cheap to clone.
#[derive(Clone)]
pub struct WorkerPool {
    tx: mpsc::Sender<(&'static str, Job)>,
    tracker: TaskTracker,
}

impl WorkerPool {
    /// Start `workers` workers sharing one queue of `capacity` jobs
    pub fn spawn(
        workers: usize,
        capacity: usize,
        cancel: CancellationToken,
        tracker: &TaskTracker,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for id in 0..workers {
            tracker.spawn(worker_loop(id, Arc::clone(&rx), cancel.clone()));
        }

        tracing::info!(workers, capacity, "Worker pool started");
        Self {
            tx,
            tracker: tracker.clone(),
        }
    }

    /// Queue a job without waiting for room
    pub fn submit<F>(&self, name: &'static str, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx
            .try_send((name, Box::pin(job)))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PoolError::Full(name),
                mpsc::error::TrySendError::Closed(_) => PoolError::Closed(name),
            })
    }

    /// Queue a job, or run it on its own tracked task when the queue is full.
    /// Fails only once the pool is shut down.
    pub fn submit_or_spawn<F>(&self, name: &'static str, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.tx.try_send((name, Box::pin(job))) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full((name, job))) => {
                tracing::warn!(job = name, "Worker queue full, running job on its own task");
                self.tracker.spawn(job);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PoolError::Closed(name)),
        }
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<(&'static str, Job)>>>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = async { rx.lock().await.recv().await } => next,
        };

        let Some((name, job)) = next else {
            break;
        };

        // Jobs carry their own deadlines; a running job is not interrupted
        let started = Instant::now();
        job.await;
        tracing::debug!(
            worker = id,
            job = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job complete"
        );
    }

    tracing::debug!(worker = id, "Worker stopped");
}

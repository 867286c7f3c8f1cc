use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub type Job = BoxFuture<'static, ()>;

type ReadySlot = oneshot::Sender<Job>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is closed")]
    Closed,
}

/// Fixed-size pool of tokio workers fed by a single dispatcher.
///
/// Workers announce readiness by sending a oneshot slot over the ready
/// channel; the dispatcher fills the next slot with the next queued job.
pub struct WorkerPool {
    size: usize,
    intake: mpsc::Sender<Job>,
    pending: Option<mpsc::Receiver<Job>>,
    dispatcher: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (intake, pending) = mpsc::channel(size);
        Self {
            size,
            intake,
            pending: Some(pending),
            dispatcher: None,
            workers: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn start(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let (ready_tx, ready_rx) = mpsc::channel::<ReadySlot>(self.size);
        for worker in 0..self.size {
            self.workers
                .push(tokio::spawn(run_worker(worker, ready_tx.clone())));
        }
        drop(ready_tx);
        self.dispatcher = Some(tokio::spawn(dispatch(pending, ready_rx)));
        tracing::debug!(workers = self.size, "worker pool started");
    }

    /// Waits for intake capacity; never drops the job.
    pub async fn submit(&self, job: Job) -> Result<(), PoolError> {
        self.intake.send(job).await.map_err(|_| PoolError::Closed)
    }

    /// Closes intake, drains every queued job and waits for all workers to go idle.
    pub async fn stop(mut self) {
        self.start();
        drop(self.intake);
        if let Some(dispatcher) = self.dispatcher.take()
            && let Err(err) = dispatcher.await
        {
            tracing::error!(error = %err, "dispatcher task failed");
        }
        for worker in self.workers.drain(..) {
            if let Err(err) = worker.await {
                tracing::error!(error = %err, "worker task failed");
            }
        }
        tracing::debug!("worker pool stopped");
    }
}

async fn dispatch(mut pending: mpsc::Receiver<Job>, mut ready: mpsc::Receiver<ReadySlot>) {
    while let Some(mut job) = pending.recv().await {
        loop {
            let Some(slot) = ready.recv().await else {
                tracing::error!("no workers left; dropping queued job");
                return;
            };
            match slot.send(job) {
                Ok(()) => break,
                Err(returned) => job = returned,
            }
        }
    }
    // Dropping `ready` here lets idle workers observe shutdown.
}

async fn run_worker(worker: usize, ready: mpsc::Sender<ReadySlot>) {
    loop {
        let (slot, job) = oneshot::channel();
        if ready.send(slot).await.is_err() {
            break;
        }
        let Ok(job) = job.await else {
            break;
        };
        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            tracing::error!(worker, "job panicked");
        }
    }
}

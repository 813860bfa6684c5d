//! In-process job queue and worker pool
//!
//! One bounded channel feeds every worker. Workers share the receiver behind
//! a mutex, so whichever worker is idle takes the next job. The bound is the
//! only backpressure: `submit` waits a short while for space and then
//! reports `QueueFull`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::processor::JobProcessor;
use crate::jobs::JobRequest;
use crate::types::{Result, RisklineError};

type SharedReceiver = Arc<Mutex<mpsc::Receiver<JobRequest>>>;

/// Bounded FIFO of jobs waiting for a worker
pub struct JobQueue {
    tx: mpsc::Sender<JobRequest>,
    rx: SharedReceiver,
    capacity: usize,
    submit_wait: Duration,
}

impl JobQueue {
    pub fn new(capacity: usize, submit_wait: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            capacity: capacity.max(1),
            submit_wait,
        }
    }

    /// Enqueue, waiting up to `submit_wait` for space
    pub async fn submit(&self, request: JobRequest) -> Result<()> {
        self.tx
            .send_timeout(request, self.submit_wait)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => RisklineError::QueueFull,
                mpsc::error::SendTimeoutError::Closed(_) => {
                    RisklineError::Internal("Job queue closed".into())
                }
            })
    }

    /// Jobs waiting for a worker
    pub fn depth(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn receiver(&self) -> SharedReceiver {
        Arc::clone(&self.rx)
    }
}

/// Fixed set of worker tasks draining a [`JobQueue`]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    busy: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers; they exit when `shutdown` flips to `true`
    pub fn spawn(
        worker_count: usize,
        queue: &JobQueue,
        processor: Arc<JobProcessor>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let busy = Arc::new(AtomicUsize::new(0));

        let handles = (0..worker_count)
            .map(|worker_id| {
                let rx = queue.receiver();
                let processor = Arc::clone(&processor);
                let shutdown = shutdown.clone();
                let busy = Arc::clone(&busy);
                tokio::spawn(async move {
                    worker_task(worker_id, rx, processor, shutdown, busy).await;
                })
            })
            .collect();

        info!("Worker pool started with {} workers", worker_count);

        Self { handles, busy }
    }

    /// Workers currently processing a job
    pub fn busy_count(&self) -> usize {
        self.busy.load(Ordering::Relaxed)
    }

    /// Wait for every worker to finish its current job and exit
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_task(
    worker_id: usize,
    rx: SharedReceiver,
    processor: Arc<JobProcessor>,
    mut shutdown: watch::Receiver<bool>,
    busy: Arc<AtomicUsize>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let request = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            request = async { rx.lock().await.recv().await } => match request {
                Some(request) => request,
                None => break,
            },
        };

        busy.fetch_add(1, Ordering::Relaxed);
        debug!(worker_id, job_id = %request.job_id, "Worker picked up job");
        processor.process(request).await;
        busy.fetch_sub(1, Ordering::Relaxed);
    }

    debug!("Worker {} stopped", worker_id);
}

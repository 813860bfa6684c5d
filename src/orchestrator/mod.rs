//! Orchestrator - owns the job lifecycle from submission to final artifact
//!
//! ## Components
//!
//! - bounded job queue + worker pool (`worker::pool`)
//! - response correlator on the shared response queue (`worker::correlator`)
//! - recovery loop: re-enqueues `pending` jobs shortly after start
//! - cleanup loop: deletes old terminal jobs
//!
//! ## Flow
//!
//! ```text
//! HTTP --submit_job--> pending --queue--> worker --publish--> submitted
//!                                                                 │
//!                        completed/failed <--router<--correlator<─┘
//! ```
//!
//! The job store is the only synchronization point between components;
//! nothing in memory tracks outstanding requests.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{what_if_key, ResultCache};
use crate::clock::Clock;
use crate::features::{missing_profile_fields, WhatIfOverride};
use crate::jobs::{new_job_id, Job, JobStatus};
use crate::logging::{JobEvent, JobEventKind};
use crate::nats::{BusPublisher, MlDispatchClient, NatsClient, QueueNames};
use crate::store::models::{Prediction, UserId};
use crate::store::{JobStore, PredictionStore, UserDirectory};
use crate::types::{Result, RisklineError};
use crate::worker::{JobProcessor, JobQueue, ResponseCorrelator, ResultRouter, WorkerPool};

/// Default worker count: one per CPU, never fewer than three
pub fn default_worker_count() -> usize {
    num_cpus::get().max(3)
}

/// Orchestrator tunables
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub worker_count: usize,
    /// Capacity of the in-process job queue
    pub queue_capacity: usize,
    /// How long `submit_job` waits for queue space
    pub submit_wait: Duration,
    /// Deadline for one ML publish
    pub publish_timeout: Duration,
    /// Delay between start and the recovery pass
    pub recovery_delay: Duration,
    /// Pending jobs re-enqueued per recovery pass
    pub recovery_batch: usize,
    pub cleanup_interval: Duration,
    /// Terminal jobs older than this are deleted
    pub retention: Duration,
    /// Lifetime of cached what-if results
    pub what_if_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_capacity: 2000,
            submit_wait: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(30),
            recovery_delay: Duration::from_secs(5),
            recovery_batch: 50,
            cleanup_interval: Duration::from_secs(30 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            what_if_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Backends the orchestrator runs against
pub struct OrchestratorDeps {
    pub jobs: Arc<dyn JobStore>,
    pub predictions: Arc<dyn PredictionStore>,
    pub users: Arc<dyn UserDirectory>,
    pub cache: Arc<dyn ResultCache>,
    pub bus: Arc<dyn BusPublisher>,
    pub queues: QueueNames,
    pub clock: Arc<dyn Clock>,
}

/// Outcome of a result lookup for a job the caller owns
#[derive(Debug, Clone)]
pub enum ResultLookup {
    /// Completed canonical job and its stored prediction
    Prediction { job: Job, prediction: Prediction },
    /// Completed what-if job and its cached result map
    WhatIf { job: Job, result: Value },
    /// Completed what-if job whose cached result is gone
    Expired { job: Job },
    /// Job has not completed (yet), or failed
    NotReady { job: Job },
}

/// Snapshot for health output
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub running: bool,
    pub worker_count: usize,
    pub busy_workers: usize,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub cache_backend: &'static str,
}

#[derive(Debug, Default)]
struct RunState {
    running: bool,
    worker_count: usize,
}

struct RunningTasks {
    shutdown_tx: watch::Sender<bool>,
    pool: WorkerPool,
    correlator: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    jobs: Arc<dyn JobStore>,
    predictions: Arc<dyn PredictionStore>,
    users: Arc<dyn UserDirectory>,
    cache: Arc<dyn ResultCache>,
    dispatch: MlDispatchClient,
    clock: Arc<dyn Clock>,
    queue: Arc<JobQueue>,
    processor: Arc<JobProcessor>,
    correlator: Arc<ResponseCorrelator>,
    nats: Option<NatsClient>,
    state: RwLock<RunState>,
    tasks: Mutex<Option<RunningTasks>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, deps: OrchestratorDeps) -> Self {
        let OrchestratorDeps {
            jobs,
            predictions,
            users,
            cache,
            bus,
            queues,
            clock,
        } = deps;

        let dispatch = MlDispatchClient::new(bus, queues, Arc::clone(&clock));
        let queue = Arc::new(JobQueue::new(config.queue_capacity, config.submit_wait));
        let processor = Arc::new(JobProcessor::new(
            Arc::clone(&jobs),
            Arc::clone(&users),
            dispatch.clone(),
            Arc::clone(&clock),
            config.publish_timeout,
        ));
        let router = ResultRouter::new(
            Arc::clone(&jobs),
            Arc::clone(&predictions),
            Arc::clone(&users),
            Arc::clone(&cache),
            Arc::clone(&clock),
            config.what_if_ttl,
        );
        let correlator = Arc::new(ResponseCorrelator::new(
            Arc::clone(&jobs),
            router,
            Arc::clone(&clock),
        ));

        Self {
            config,
            jobs,
            predictions,
            users,
            cache,
            dispatch,
            clock,
            queue,
            processor,
            correlator,
            nats: None,
            state: RwLock::new(RunState::default()),
            tasks: Mutex::new(None),
        }
    }

    /// Attach the NATS connection; `start` then declares the queues and
    /// consumes responses
    pub fn with_nats(mut self, nats: NatsClient) -> Self {
        self.nats = Some(nats);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Consumer-side entry point, also driven directly by tests
    pub fn correlator(&self) -> Arc<ResponseCorrelator> {
        Arc::clone(&self.correlator)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start workers, correlator and background loops. Idempotent.
    ///
    /// `stop` closes the bus for good, so a stopped orchestrator cannot be
    /// restarted; build a new one instead.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.running {
            debug!("Orchestrator already running");
            return Ok(());
        }
        if !self.dispatch.is_open() {
            return Err(RisklineError::BusUnavailable(
                "Bus connection was closed by stop; orchestrator cannot restart".to_string(),
            ));
        }

        info!("Starting orchestrator...");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let correlator = match self.nats {
            Some(ref nats) => {
                let queues = self.dispatch.queues();
                nats.ensure_queues(queues).await?;
                let consumer = nats.response_consumer(&queues.response).await?;
                let correlator = Arc::clone(&self.correlator);
                let shutdown = shutdown_rx.clone();
                Some(tokio::spawn(async move {
                    correlator.run(consumer, shutdown).await;
                }))
            }
            None => {
                warn!("No NATS connection attached; responses will not be consumed");
                None
            }
        };

        let pool = WorkerPool::spawn(
            self.config.worker_count,
            &self.queue,
            Arc::clone(&self.processor),
            shutdown_rx.clone(),
        );

        let recovery = tokio::spawn(recovery_loop(
            Arc::clone(&self.jobs),
            Arc::clone(&self.queue),
            Arc::clone(&self.clock),
            self.config.clone(),
            shutdown_rx.clone(),
        ));
        let cleanup = tokio::spawn(cleanup_loop(
            Arc::clone(&self.jobs),
            Arc::clone(&self.clock),
            self.config.clone(),
            shutdown_rx,
        ));

        *self.tasks.lock().await = Some(RunningTasks {
            shutdown_tx,
            pool,
            correlator,
            background: vec![recovery, cleanup],
        });

        state.running = true;
        state.worker_count = self.config.worker_count;

        info!(
            workers = self.config.worker_count,
            queue_capacity = self.queue.capacity(),
            "Orchestrator started"
        );
        Ok(())
    }

    /// Drain workers and the correlator, then close the bus and cache. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.running {
            debug!("Orchestrator not running");
            return Ok(());
        }

        info!("Stopping orchestrator...");

        if let Some(tasks) = self.tasks.lock().await.take() {
            let _ = tasks.shutdown_tx.send(true);

            if let Some(correlator) = tasks.correlator {
                let _ = correlator.await;
            }
            tasks.pool.join().await;
            for handle in tasks.background {
                let _ = handle.await;
            }
        }

        if let Err(e) = self.dispatch.close().await {
            warn!("Error closing bus connection: {}", e);
        }
        if let Err(e) = self.cache.close().await {
            warn!("Error closing cache: {}", e);
        }

        state.running = false;
        state.worker_count = 0;
        info!("Orchestrator stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    /// Re-enqueue up to one batch of `pending` jobs; returns how many were queued
    pub async fn recover_pending(&self) -> Result<usize> {
        recover_pending(&*self.jobs, &self.queue, &*self.clock, self.config.recovery_batch).await
    }

    /// Delete terminal jobs past the retention window
    pub async fn cleanup(&self) -> Result<u64> {
        cleanup_old_jobs(&*self.jobs, &*self.clock, self.config.retention).await
    }

    // ========================================================================
    // Job API
    // ========================================================================

    /// Validate, persist and enqueue a job. Returns the `pending` job.
    pub async fn submit_job(
        &self,
        user_id: UserId,
        what_if: Option<WhatIfOverride>,
    ) -> Result<Job> {
        if let Some(ref overrides) = what_if {
            overrides.validate()?;
        }
        self.check_profile(user_id, what_if.is_some()).await?;

        let job = Job::new(new_job_id(), user_id, what_if, self.clock.now());
        self.jobs.save_job(&job).await?;

        JobEvent::new(JobEventKind::Created, &job.job_id, self.clock.now())
            .with_user(user_id)
            .with_transition(None, JobStatus::Pending)
            .with_what_if(job.is_what_if)
            .emit();

        if let Err(e) = self.queue.submit(job.request()).await {
            let reason = format!("Failed to enqueue job: {}", e);
            match self
                .jobs
                .update_job_status(&job.job_id, JobStatus::Failed, Some(&reason))
                .await
            {
                Ok(_) => JobEvent::new(JobEventKind::Transitioned, &job.job_id, self.clock.now())
                    .with_user(user_id)
                    .with_transition(Some(JobStatus::Pending), JobStatus::Failed)
                    .with_error(&reason)
                    .emit(),
                Err(update_err) => warn!(
                    job_id = %job.job_id,
                    "Could not mark unqueued job failed: {}",
                    update_err
                ),
            }
            return Err(e);
        }

        JobEvent::new(JobEventKind::Enqueued, &job.job_id, self.clock.now())
            .with_user(user_id)
            .with_what_if(job.is_what_if)
            .emit();
        Ok(job)
    }

    async fn check_profile(&self, user_id: UserId, what_if: bool) -> Result<()> {
        self.users.get_user(user_id).await?;

        let missing = match self.users.get_profile(user_id).await? {
            Some(profile) => missing_profile_fields(&profile, what_if),
            None => vec!["health profile is required".to_string()],
        };
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RisklineError::IncompleteProfile(missing))
        }
    }

    /// Job owned by `user_id`
    pub async fn get_job(&self, job_id: &str, user_id: UserId) -> Result<Job> {
        let job = self.jobs.get_job_by_id(job_id).await?;
        if job.user_id != user_id {
            return Err(RisklineError::Forbidden(
                "You do not have access to this job".to_string(),
            ));
        }
        Ok(job)
    }

    /// Stored prediction of a completed canonical job
    pub async fn prediction_for(&self, job: &Job) -> Result<Option<Prediction>> {
        if job.status != JobStatus::Completed || job.is_what_if {
            return Ok(None);
        }
        let prediction = match job.prediction_ref {
            Some(id) => self.predictions.get_prediction(id).await?,
            None => self.predictions.get_prediction_by_job_id(&job.job_id).await?,
        };
        Ok(Some(prediction))
    }

    pub async fn get_result(&self, job_id: &str, user_id: UserId) -> Result<ResultLookup> {
        let job = self.get_job(job_id, user_id).await?;
        if job.status != JobStatus::Completed {
            return Ok(ResultLookup::NotReady { job });
        }

        if !job.is_what_if {
            return match self.prediction_for(&job).await? {
                Some(prediction) => Ok(ResultLookup::Prediction { job, prediction }),
                None => Ok(ResultLookup::NotReady { job }),
            };
        }

        match self.cache.get(&what_if_key(&job.job_id)).await {
            Ok(Some(result)) => Ok(ResultLookup::WhatIf { job, result }),
            Ok(None) => Ok(ResultLookup::Expired { job }),
            Err(e) => {
                warn!(job_id = %job.job_id, "What-if cache lookup failed: {}", e);
                Ok(ResultLookup::Expired { job })
            }
        }
    }

    /// Cancel a `pending` or `processing` job the caller owns
    pub async fn cancel_job(&self, job_id: &str, user_id: UserId) -> Result<Job> {
        let job = self.get_job(job_id, user_id).await?;
        let cancelled = self.jobs.cancel_job(&job.job_id).await?;

        JobEvent::new(JobEventKind::Transitioned, &job.job_id, self.clock.now())
            .with_user(user_id)
            .with_transition(Some(job.status), JobStatus::Cancelled)
            .since(job.created_at)
            .emit();
        Ok(cancelled)
    }

    /// Caller's jobs, newest first
    pub async fn list_jobs(
        &self,
        user_id: UserId,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>> {
        match status {
            Some(status) => {
                self.jobs
                    .get_jobs_by_user_id_and_status(user_id, status, limit)
                    .await
            }
            None => self.jobs.get_jobs_by_user_id(user_id, limit).await,
        }
    }

    /// Publish an ML keep-alive probe; returns its correlation id
    pub async fn health_check_ml(&self) -> Result<String> {
        self.dispatch.health_check_async().await
    }

    pub async fn stats(&self) -> OrchestratorStats {
        let state = self.state.read().await;
        let busy_workers = self
            .tasks
            .lock()
            .await
            .as_ref()
            .map(|tasks| tasks.pool.busy_count())
            .unwrap_or(0);

        OrchestratorStats {
            running: state.running,
            worker_count: state.worker_count,
            busy_workers,
            queue_depth: self.queue.depth(),
            queue_capacity: self.queue.capacity(),
            cache_backend: self.cache.backend(),
        }
    }

    /// Store reachable and bus open
    pub async fn ready(&self) -> Result<()> {
        self.jobs.ping().await?;
        let bus_up = match self.nats {
            Some(ref nats) => nats.is_connected(),
            None => self.dispatch.is_open(),
        };
        if !bus_up {
            return Err(RisklineError::BusUnavailable(
                "Message bus is not connected".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Background loops
// ============================================================================

async fn recover_pending(
    jobs: &dyn JobStore,
    queue: &JobQueue,
    clock: &dyn Clock,
    batch: usize,
) -> Result<usize> {
    let pending = jobs.get_pending_jobs(batch).await?;
    let mut recovered = 0;

    for job in pending {
        match queue.submit(job.request()).await {
            Ok(()) => {
                recovered += 1;
                JobEvent::new(JobEventKind::Recovered, &job.job_id, clock.now())
                    .with_user(job.user_id)
                    .with_what_if(job.is_what_if)
                    .since(job.created_at)
                    .emit();
            }
            Err(e) => {
                warn!(job_id = %job.job_id, "Recovery stopped: {}", e);
                break;
            }
        }
    }

    if recovered > 0 {
        info!("Recovered {} pending jobs", recovered);
    }
    Ok(recovered)
}

async fn cleanup_old_jobs(
    jobs: &dyn JobStore,
    clock: &dyn Clock,
    retention: Duration,
) -> Result<u64> {
    let retention = chrono::Duration::from_std(retention)
        .map_err(|e| RisklineError::Config(format!("Invalid retention: {}", e)))?;
    let cutoff = clock.now() - retention;

    let deleted = jobs.cleanup_old_jobs(cutoff).await?;
    if deleted > 0 {
        info!(deleted, %cutoff, "Deleted old terminal jobs");
    }
    Ok(deleted)
}

async fn recovery_loop(
    jobs: Arc<dyn JobStore>,
    queue: Arc<JobQueue>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = shutdown.changed() => return,
        _ = tokio::time::sleep(config.recovery_delay) => {}
    }

    if let Err(e) = recover_pending(&*jobs, &queue, &*clock, config.recovery_batch).await {
        warn!("Job recovery failed: {}", e);
    }
}

async fn cleanup_loop(
    jobs: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let start = tokio::time::Instant::now() + config.cleanup_interval;
    let mut interval = tokio::time::interval_at(start, config.cleanup_interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                if let Err(e) = cleanup_old_jobs(&*jobs, &*clock, config.retention).await {
                    warn!("Job cleanup failed: {}", e);
                }
            }
        }
    }
}

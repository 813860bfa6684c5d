//! Worker phase of a job: everything up to the publish
//!
//! load user, profile, activities -> assemble -> processing -> publish -> submitted
//!
//! The worker never waits for the ML answer. Any failure on the way moves
//! the job to `failed` with a readable reason; nothing is re-raised.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::features::{AssembledFeatures, AssemblyInput, FeatureAssembler};
use crate::jobs::{Job, JobRequest, JobStatus};
use crate::logging::{JobEvent, JobEventKind};
use crate::nats::MlDispatchClient;
use crate::store::{JobStore, UserDirectory};
use crate::types::{Result, RisklineError};

/// Prefix of the failure reason when the request cannot be published
pub const SUBMIT_FAILURE_PREFIX: &str = "Failed to submit to ML service";

pub struct JobProcessor {
    jobs: Arc<dyn JobStore>,
    users: Arc<dyn UserDirectory>,
    assembler: FeatureAssembler,
    dispatch: MlDispatchClient,
    clock: Arc<dyn Clock>,
    publish_timeout: Duration,
}

impl JobProcessor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        users: Arc<dyn UserDirectory>,
        dispatch: MlDispatchClient,
        clock: Arc<dyn Clock>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            jobs,
            users,
            assembler: FeatureAssembler::new(Arc::clone(&clock)),
            dispatch,
            clock,
            publish_timeout,
        }
    }

    /// Run one job through the worker phase
    pub async fn process(&self, request: JobRequest) {
        let job = match self.jobs.get_job_by_id(&request.job_id).await {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %request.job_id, "Dropping queued job: {}", e);
                return;
            }
        };

        // Cancelled while queued, or a duplicate enqueue from recovery
        if job.status != JobStatus::Pending {
            debug!(
                job_id = %job.job_id,
                status = %job.status,
                "Skipping job that is no longer pending"
            );
            return;
        }

        let assembled = match self.assemble(&job).await {
            Ok(assembled) => assembled,
            Err(e) => {
                self.fail(&job, JobStatus::Pending, &e.to_string()).await;
                return;
            }
        };

        if let Err(e) = self.jobs.record_features(&job.job_id, &assembled.info).await {
            warn!(job_id = %job.job_id, "Failed to record features: {}", e);
        }

        // Conditional: loses against a concurrent cancel or a duplicate worker
        if let Err(e) = self.transition(&job, JobStatus::Pending, JobStatus::Processing).await {
            debug!(job_id = %job.job_id, "Not processing job: {}", e);
            return;
        }

        if self.cancelled_since_pickup(&job.job_id).await {
            info!(job_id = %job.job_id, "Job cancelled before publish");
            return;
        }

        let publish = tokio::time::timeout(
            self.publish_timeout,
            self.dispatch.predict_async(&job.job_id, &assembled.vector),
        )
        .await
        .unwrap_or_else(|_| {
            Err(RisklineError::Timeout(format!(
                "publish did not complete within {}s",
                self.publish_timeout.as_secs()
            )))
        });

        if let Err(e) = publish {
            let reason = format!("{}: {}", SUBMIT_FAILURE_PREFIX, e);
            self.fail(&job, JobStatus::Processing, &reason).await;
            return;
        }

        JobEvent::new(JobEventKind::Published, &job.job_id, self.clock.now())
            .with_user(job.user_id)
            .with_what_if(job.is_what_if)
            .since(job.created_at)
            .emit();

        if let Err(e) = self
            .transition(&job, JobStatus::Processing, JobStatus::Submitted)
            .await
        {
            // The request is already on the bus; the correlator drops its answer
            warn!(job_id = %job.job_id, "Published job could not be marked submitted: {}", e);
        }
    }

    async fn assemble(&self, job: &Job) -> Result<AssembledFeatures> {
        let user = self.users.get_user(job.user_id).await?;
        let profile = self
            .users
            .get_profile(job.user_id)
            .await?
            .ok_or_else(|| {
                RisklineError::IncompleteProfile(vec!["health profile is required".into()])
            })?;
        let activities = self.users.list_activities(job.user_id).await?;

        self.assembler.assemble(AssemblyInput {
            user: &user,
            profile: &profile,
            activities: &activities,
            what_if: job.what_if_input.as_ref(),
        })
    }

    async fn cancelled_since_pickup(&self, job_id: &str) -> bool {
        match self.jobs.get_job_by_id(job_id).await {
            Ok(job) => job.status != JobStatus::Processing,
            Err(_) => true,
        }
    }

    async fn transition(&self, job: &Job, from: JobStatus, to: JobStatus) -> Result<()> {
        self.jobs.update_job_status(&job.job_id, to, None).await?;
        JobEvent::new(JobEventKind::Transitioned, &job.job_id, self.clock.now())
            .with_user(job.user_id)
            .with_transition(Some(from), to)
            .since(job.created_at)
            .emit();
        Ok(())
    }

    async fn fail(&self, job: &Job, from: JobStatus, reason: &str) {
        match self
            .jobs
            .update_job_status(&job.job_id, JobStatus::Failed, Some(reason))
            .await
        {
            Ok(updated) => {
                JobEvent::new(JobEventKind::Transitioned, &job.job_id, self.clock.now())
                    .with_user(job.user_id)
                    .with_transition(Some(from), updated.status)
                    .since(job.created_at)
                    .with_error(reason)
                    .emit();
            }
            Err(e) => warn!(job_id = %job.job_id, "Could not mark job failed ({}): {}", reason, e),
        }
    }
}

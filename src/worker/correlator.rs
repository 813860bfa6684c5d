//! Response correlator - single JetStream consumer on the shared response queue
//!
//! Matches each ML response to its job by correlation id and hands it to the
//! result router. Responses for jobs that are unknown or no longer
//! `submitted` are acknowledged and dropped. Undecodable messages are
//! terminated so they are never redelivered.

use async_nats::jetstream::{self, consumer::PullConsumer, AckKind};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::router::{ResultRouter, RouteOutcome};
use crate::clock::Clock;
use crate::jobs::JobStatus;
use crate::logging::{JobEvent, JobEventKind};
use crate::nats::messages::{MlResponseEnvelope, HEADER_CORRELATION_ID};
use crate::store::JobStore;
use crate::types::RisklineError;

/// Delay before a message is redelivered after a store error
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// How long one fetch waits for a message before checking for shutdown
const FETCH_EXPIRY: Duration = Duration::from_secs(5);

/// What to tell the broker about a handled message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done with it (applied or dropped)
    Ack,
    /// Poison message, never redeliver
    Term,
    /// Transient failure, redeliver later
    Retry,
}

pub struct ResponseCorrelator {
    jobs: Arc<dyn JobStore>,
    router: ResultRouter,
    clock: Arc<dyn Clock>,
}

impl ResponseCorrelator {
    pub fn new(jobs: Arc<dyn JobStore>, router: ResultRouter, clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs,
            router,
            clock,
        }
    }

    /// Handle one raw response. `header_correlation_id` is used when the body has none.
    pub async fn handle_payload(
        &self,
        payload: &[u8],
        header_correlation_id: Option<&str>,
    ) -> Disposition {
        let response = match MlResponseEnvelope::from_bytes(payload) {
            Ok(response) => response,
            Err(e) => {
                error!("{}", RisklineError::MalformedResponse(e.to_string()));
                return Disposition::Term;
            }
        };

        let correlation_id = match response
            .correlation_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or(header_correlation_id)
        {
            Some(id) => id.to_string(),
            None => {
                error!("ML response carries no correlation id");
                return Disposition::Term;
            }
        };

        let job = match self.jobs.get_job_by_id(&correlation_id).await {
            Ok(job) => job,
            Err(RisklineError::NotFound(_)) => {
                warn!(correlation_id = %correlation_id, "Response for unknown job dropped");
                return Disposition::Ack;
            }
            Err(e) => {
                warn!(correlation_id = %correlation_id, "Job lookup failed, will retry: {}", e);
                return Disposition::Retry;
            }
        };

        if job.status != JobStatus::Submitted {
            JobEvent::new(JobEventKind::ResponseDropped, &job.job_id, self.clock.now())
                .with_user(job.user_id)
                .with_transition(Some(job.status), job.status)
                .emit();
            return Disposition::Ack;
        }

        if let Some(reason) = response.error.as_deref().filter(|e| !e.is_empty()) {
            warn!(job_id = %job.job_id, "{}", RisklineError::MlService(reason.to_string()));
            self.fail_from_service(&job.job_id, job.user_id, job.created_at, reason)
                .await;
            return Disposition::Ack;
        }

        match self.router.route(&job, &response).await {
            RouteOutcome::Completed { prediction_ref } => {
                debug!(job_id = %job.job_id, ?prediction_ref, "Job completed");
            }
            RouteOutcome::Failed(reason) => {
                debug!(job_id = %job.job_id, "Job failed: {}", reason);
            }
            RouteOutcome::Duplicate => {
                debug!(job_id = %job.job_id, "Duplicate response ignored");
            }
            RouteOutcome::Retry(reason) => {
                warn!(job_id = %job.job_id, "Response not applied, will retry: {}", reason);
                return Disposition::Retry;
            }
        }
        Disposition::Ack
    }

    async fn fail_from_service(
        &self,
        job_id: &str,
        user_id: i64,
        created_at: chrono::DateTime<chrono::Utc>,
        reason: &str,
    ) {
        match self
            .jobs
            .update_job_status(job_id, JobStatus::Failed, Some(reason))
            .await
        {
            Ok(_) => JobEvent::new(JobEventKind::ResponseApplied, job_id, self.clock.now())
                .with_user(user_id)
                .with_transition(Some(JobStatus::Submitted), JobStatus::Failed)
                .since(created_at)
                .with_error(reason)
                .emit(),
            Err(e) => warn!(job_id, "Could not record ML failure: {}", e),
        }
    }

    /// Consume the response queue until `shutdown` flips to `true`
    pub async fn run(self: Arc<Self>, consumer: PullConsumer, mut shutdown: watch::Receiver<bool>) {
        info!("Response correlator started");

        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                result = self.process_batch(&consumer) => {
                    if let Err(e) = result {
                        error!("Error fetching responses: {}", e);
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }

        info!("Response correlator stopped");
    }

    async fn process_batch(&self, consumer: &PullConsumer) -> crate::types::Result<usize> {
        let mut messages = consumer
            .fetch()
            .max_messages(1)
            .expires(FETCH_EXPIRY)
            .messages()
            .await
            .map_err(|e| RisklineError::Nats(format!("Failed to fetch responses: {e}")))?;

        let mut count = 0;
        while let Some(msg_result) = messages.next().await {
            match msg_result {
                Ok(msg) => {
                    count += 1;
                    self.process_message(msg).await;
                }
                Err(e) => warn!("Error receiving response: {}", e),
            }
        }
        Ok(count)
    }

    async fn process_message(&self, msg: jetstream::Message) {
        let header_correlation_id = msg
            .headers
            .as_ref()
            .and_then(|headers| headers.get(HEADER_CORRELATION_ID))
            .map(|value| value.as_str().to_string());

        let disposition = self
            .handle_payload(&msg.payload, header_correlation_id.as_deref())
            .await;

        let acked = match disposition {
            Disposition::Ack => msg.ack().await,
            Disposition::Term => msg.ack_with(AckKind::Term).await,
            Disposition::Retry => msg.ack_with(AckKind::Nak(Some(RETRY_DELAY))).await,
        };
        if let Err(e) = acked {
            warn!("Failed to ack response ({:?}): {}", disposition, e);
        }
    }
}

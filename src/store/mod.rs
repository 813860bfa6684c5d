//! Persistence seams
//!
//! The orchestrator only talks to the traits below. Two backends exist:
//! MongoDB for deployment and DashMap-backed memory stores for tests and
//! local runs. Status transitions are conditional updates: a write only
//! lands if the stored status is still a legal predecessor, so concurrent
//! writers (worker, correlator, cancel requests) cannot move a job backwards.

pub mod memory;
pub mod models;
pub mod mongo;

pub use memory::{MemoryJobStore, MemoryPredictionStore, MemoryUserDirectory};
pub use mongo::{MongoJobStore, MongoPredictionStore, MongoUserDirectory};

use chrono::{DateTime, Utc};

use crate::features::FeatureInfo;
use crate::jobs::{Job, JobStatus};
use crate::types::{Result, RisklineError};
use models::{Activity, Prediction, User, UserId, UserProfile};

// ============================================================================
// Job Store
// ============================================================================

#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job; `Conflict` if the id already exists
    async fn save_job(&self, job: &Job) -> Result<()>;

    /// `NotFound` when the id is unknown
    async fn get_job_by_id(&self, job_id: &str) -> Result<Job>;

    /// Move a job to `status`, recording `error` when given.
    ///
    /// `InvalidTransition` if the stored status does not permit the move.
    async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Job>;

    /// Move a `submitted` job to `completed` and link its prediction
    async fn update_job_status_with_result(
        &self,
        job_id: &str,
        prediction_ref: Option<i64>,
    ) -> Result<Job>;

    /// Attach the assembled inputs to the job
    async fn record_features(&self, job_id: &str, features: &FeatureInfo) -> Result<()>;

    /// Cancel a `pending` or `processing` job
    async fn cancel_job(&self, job_id: &str) -> Result<Job>;

    /// Oldest `pending` jobs first
    async fn get_pending_jobs(&self, limit: usize) -> Result<Vec<Job>>;

    /// Newest first
    async fn get_jobs_by_user_id(&self, user_id: UserId, limit: usize) -> Result<Vec<Job>>;

    /// Newest first
    async fn get_jobs_by_user_id_and_status(
        &self,
        user_id: UserId,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<Job>>;

    /// Delete terminal jobs last updated before `cutoff`
    async fn cleanup_old_jobs(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}

// ============================================================================
// Prediction Store
// ============================================================================

#[async_trait::async_trait]
pub trait PredictionStore: Send + Sync {
    /// Assign an id and insert; `Conflict` when the job already has a prediction
    async fn save_prediction(&self, prediction: Prediction) -> Result<Prediction>;

    async fn get_prediction(&self, id: i64) -> Result<Prediction>;

    async fn get_prediction_by_job_id(&self, job_id: &str) -> Result<Prediction>;
}

// ============================================================================
// User Directory
// ============================================================================

/// Read access to data owned by the user service
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: UserId) -> Result<User>;

    /// `None` when the user never filled in a profile
    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>>;

    async fn list_activities(&self, user_id: UserId) -> Result<Vec<Activity>>;

    async fn touch_last_prediction(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()>;
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Error for a transition refused by the stored state
pub(crate) fn transition_error(job_id: &str, from: JobStatus, to: JobStatus) -> RisklineError {
    if to == JobStatus::Cancelled {
        cancel_error(from)
    } else {
        tracing::debug!(job_id, %from, %to, "Refused job transition");
        RisklineError::InvalidTransition { from, to }
    }
}

/// Reason a job in `status` cannot be cancelled
pub(crate) fn cancel_error(status: JobStatus) -> RisklineError {
    match status {
        JobStatus::Submitted => RisklineError::CannotCancel(
            "Cannot cancel job that has been submitted to ML service".to_string(),
        ),
        other => RisklineError::CannotCancel(format!("Cannot cancel job in {} state", other)),
    }
}

pub(crate) fn job_not_found(job_id: &str) -> RisklineError {
    RisklineError::NotFound(format!("Job {} not found", job_id))
}

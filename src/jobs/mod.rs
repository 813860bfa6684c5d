//! Prediction jobs and their state machine
//!
//! ```text
//! pending ──► processing ──► submitted ──► completed
//!    │            │              │
//!    ├──► failed  ├──► failed    └──► failed
//!    └──► cancelled └──► cancelled
//! ```
//!
//! Only the forward transitions above are legal. Once a job is `submitted`
//! its request is on the bus, so it can no longer be cancelled; the response
//! decides between `completed` and `failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::features::{FeatureInfo, WhatIfOverride};
use crate::store::models::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Submitted,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Submitted,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Submitted => "submitted",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    /// Whether `self -> next` is a legal transition. Self-transitions are not.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Processing, Submitted)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Submitted, Completed)
                | (Submitted, Failed)
        )
    }

    /// States from which `next` may be entered
    pub fn predecessors(next: JobStatus) -> Vec<JobStatus> {
        JobStatus::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

/// Durable record of one scoring request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub user_id: UserId,
    pub status: JobStatus,
    pub is_what_if: bool,
    /// Hypothetical inputs, kept so recovery can re-enqueue what-if jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub what_if_input: Option<WhatIfOverride>,
    /// Assembled inputs, recorded before the request is published
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureInfo>,
    /// Prediction id; only for completed canonical jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction_ref: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// New `pending` job
    pub fn new(
        job_id: String,
        user_id: UserId,
        what_if_input: Option<WhatIfOverride>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            user_id,
            status: JobStatus::Pending,
            is_what_if: what_if_input.is_some(),
            what_if_input,
            features: None,
            prediction_ref: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Queue entry that drives this job
    pub fn request(&self) -> JobRequest {
        JobRequest {
            job_id: self.job_id.clone(),
            user_id: self.user_id,
            what_if: self.what_if_input.clone(),
        }
    }
}

/// Mint a globally unique, client-visible job id
pub fn new_job_id() -> String {
    format!("job_{}", uuid::Uuid::new_v4().simple())
}

/// Entry on the in-process job queue
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub job_id: String,
    pub user_id: UserId,
    pub what_if: Option<WhatIfOverride>,
}

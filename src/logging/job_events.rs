//! Job lifecycle audit events
//!
//! One structured line per lifecycle step on the `job_events` target, so a
//! subscriber filter can route the audit trail separately from debug noise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::jobs::JobStatus;
use crate::store::models::UserId;

/// Tracing target for audit events
pub const JOB_EVENT_TARGET: &str = "job_events";

/// Lifecycle step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    /// Job row created by an API call
    Created,
    /// Accepted onto the in-process queue
    Enqueued,
    /// Re-enqueued by the recovery loop
    Recovered,
    /// Status changed
    Transitioned,
    /// Request stored by the broker
    Published,
    /// Response applied to the job
    ResponseApplied,
    /// Response ignored (unknown job, duplicate, cancelled)
    ResponseDropped,
}

impl JobEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventKind::Created => "created",
            JobEventKind::Enqueued => "enqueued",
            JobEventKind::Recovered => "recovered",
            JobEventKind::Transitioned => "transitioned",
            JobEventKind::Published => "published",
            JobEventKind::ResponseApplied => "response_applied",
            JobEventKind::ResponseDropped => "response_dropped",
        }
    }
}

/// Audit record for one lifecycle step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: JobEventKind,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub what_if: Option<bool>,
    /// Milliseconds since the job was created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobEvent {
    pub fn new(kind: JobEventKind, job_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            kind,
            job_id: job_id.into(),
            user_id: None,
            from: None,
            to: None,
            what_if: None,
            elapsed_ms: None,
            error: None,
        }
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_transition(mut self, from: Option<JobStatus>, to: JobStatus) -> Self {
        self.from = from;
        self.to = Some(to);
        self
    }

    pub fn with_what_if(mut self, what_if: bool) -> Self {
        self.what_if = Some(what_if);
        self
    }

    /// Elapsed time measured from `created_at` to the event timestamp
    pub fn since(mut self, created_at: DateTime<Utc>) -> Self {
        self.elapsed_ms = Some((self.timestamp - created_at).num_milliseconds());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Write the event on the audit target
    pub fn emit(&self) {
        let from = self.from.map(|s| s.as_str()).unwrap_or("-");
        let to = self.to.map(|s| s.as_str()).unwrap_or("-");

        if let Some(ref error) = self.error {
            warn!(
                target: JOB_EVENT_TARGET,
                event = self.kind.as_str(),
                job_id = %self.job_id,
                user_id = ?self.user_id,
                from,
                to,
                elapsed_ms = ?self.elapsed_ms,
                error = %error,
                "job event"
            );
        } else {
            info!(
                target: JOB_EVENT_TARGET,
                event = self.kind.as_str(),
                job_id = %self.job_id,
                user_id = ?self.user_id,
                from,
                to,
                what_if = ?self.what_if,
                elapsed_ms = ?self.elapsed_ms,
                "job event"
            );
        }
    }
}

//! Prediction job document schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::features::{FeatureInfo, WhatIfOverride};
use crate::jobs::{Job, JobStatus};
use crate::store::models::UserId;

/// Collection name for prediction jobs
pub const JOB_COLLECTION: &str = "prediction_jobs";

/// Prediction job stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct JobDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Client-visible job id
    pub job_id: String,

    pub user_id: UserId,

    pub status: JobStatus,

    #[serde(default)]
    pub is_what_if: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub what_if_input: Option<WhatIfOverride>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureInfo>,

    /// Prediction id once a canonical job completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction_ref: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime,

    pub updated_at: DateTime,
}

impl From<&Job> for JobDoc {
    fn from(job: &Job) -> Self {
        Self {
            _id: None,
            job_id: job.job_id.clone(),
            user_id: job.user_id,
            status: job.status,
            is_what_if: job.is_what_if,
            what_if_input: job.what_if_input.clone(),
            features: job.features.clone(),
            prediction_ref: job.prediction_ref,
            error: job.error.clone(),
            created_at: DateTime::from_chrono(job.created_at),
            updated_at: DateTime::from_chrono(job.updated_at),
        }
    }
}

impl From<JobDoc> for Job {
    fn from(doc: JobDoc) -> Self {
        Self {
            job_id: doc.job_id,
            user_id: doc.user_id,
            status: doc.status,
            is_what_if: doc.is_what_if,
            what_if_input: doc.what_if_input,
            features: doc.features,
            prediction_ref: doc.prediction_ref,
            error: doc.error,
            created_at: doc.created_at.to_chrono(),
            updated_at: doc.updated_at.to_chrono(),
        }
    }
}

impl IntoIndexes for JobDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "job_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("job_id_unique".to_string())
                        .build(),
                ),
            ),
            // Per-user listings, optionally filtered by status
            (
                doc! { "user_id": 1, "status": 1 },
                Some(
                    IndexOptions::builder()
                        .name("user_status_index".to_string())
                        .build(),
                ),
            ),
            // Recovery scan and retention cleanup
            (
                doc! { "status": 1, "updated_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_updated_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

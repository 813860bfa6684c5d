//! MongoDB-backed stores

use bson::{doc, Bson, DateTime as BsonDateTime};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use super::models::{Activity, Prediction, User, UserId, UserProfile};
use super::{job_not_found, transition_error, JobStore, PredictionStore, UserDirectory};
use crate::clock::Clock;
use crate::db::schemas::{
    ActivityDoc, CounterDoc, JobDoc, PredictionDoc, ProfileDoc, UserDoc, ACTIVITY_COLLECTION,
    COUNTER_COLLECTION, JOB_COLLECTION, PREDICTION_COLLECTION, PREDICTION_COUNTER,
    PROFILE_COLLECTION, USER_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::features::FeatureInfo;
use crate::jobs::{Job, JobStatus};
use crate::types::{Result, RisklineError};

fn status_list(statuses: impl IntoIterator<Item = JobStatus>) -> Vec<Bson> {
    statuses
        .into_iter()
        .map(|status| Bson::String(status.as_str().to_string()))
        .collect()
}

fn to_bson<T: serde::Serialize>(value: &T) -> Result<Bson> {
    bson::to_bson(value)
        .map_err(|e| RisklineError::Database(format!("Failed to encode document: {}", e)))
}

// ============================================================================
// Jobs
// ============================================================================

pub struct MongoJobStore {
    jobs: MongoCollection<JobDoc>,
    clock: Arc<dyn Clock>,
}

impl MongoJobStore {
    pub async fn new(client: &MongoClient, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            jobs: client.collection(JOB_COLLECTION).await?,
            clock,
        })
    }

    /// Conditional update: only matches while the stored status is a legal predecessor
    async fn transition(
        &self,
        job_id: &str,
        next: JobStatus,
        mut set: bson::Document,
    ) -> Result<Job> {
        set.insert("status", next.as_str());
        set.insert("updated_at", BsonDateTime::from_chrono(self.clock.now()));

        let filter = doc! {
            "job_id": job_id,
            "status": { "$in": status_list(JobStatus::predecessors(next)) },
        };

        match self
            .jobs
            .find_one_and_update(filter, doc! { "$set": set }, false)
            .await?
        {
            Some(updated) => Ok(updated.into()),
            None => {
                let current = self
                    .jobs
                    .find_one(doc! { "job_id": job_id })
                    .await?
                    .ok_or_else(|| job_not_found(job_id))?;
                Err(transition_error(job_id, current.status, next))
            }
        }
    }

    async fn find_jobs(
        &self,
        filter: bson::Document,
        newest_first: bool,
        limit: usize,
    ) -> Result<Vec<Job>> {
        let order = if newest_first { -1 } else { 1 };
        let docs = self
            .jobs
            .find_many(
                filter,
                doc! { "created_at": order, "job_id": order },
                Some(limit as i64),
            )
            .await?;
        Ok(docs.into_iter().map(Job::from).collect())
    }
}

#[async_trait::async_trait]
impl JobStore for MongoJobStore {
    async fn save_job(&self, job: &Job) -> Result<()> {
        self.jobs.insert_one(&JobDoc::from(job)).await
    }

    async fn get_job_by_id(&self, job_id: &str) -> Result<Job> {
        self.jobs
            .find_one(doc! { "job_id": job_id })
            .await?
            .map(Job::from)
            .ok_or_else(|| job_not_found(job_id))
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Job> {
        let mut set = bson::Document::new();
        if let Some(error) = error {
            set.insert("error", error);
        }
        self.transition(job_id, status, set).await
    }

    async fn update_job_status_with_result(
        &self,
        job_id: &str,
        prediction_ref: Option<i64>,
    ) -> Result<Job> {
        let mut set = bson::Document::new();
        if let Some(prediction_ref) = prediction_ref {
            set.insert("prediction_ref", prediction_ref);
        }
        self.transition(job_id, JobStatus::Completed, set).await
    }

    async fn record_features(&self, job_id: &str, features: &FeatureInfo) -> Result<()> {
        let result = self
            .jobs
            .update_one(
                doc! { "job_id": job_id },
                doc! { "$set": {
                    "features": to_bson(features)?,
                    "updated_at": BsonDateTime::from_chrono(self.clock.now()),
                }},
            )
            .await?;

        if result.matched_count == 0 {
            return Err(job_not_found(job_id));
        }
        Ok(())
    }

    async fn cancel_job(&self, job_id: &str) -> Result<Job> {
        self.transition(job_id, JobStatus::Cancelled, bson::Document::new())
            .await
    }

    async fn get_pending_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        self.find_jobs(
            doc! { "status": JobStatus::Pending.as_str() },
            false,
            limit,
        )
        .await
    }

    async fn get_jobs_by_user_id(&self, user_id: UserId, limit: usize) -> Result<Vec<Job>> {
        self.find_jobs(doc! { "user_id": user_id }, true, limit).await
    }

    async fn get_jobs_by_user_id_and_status(
        &self,
        user_id: UserId,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<Job>> {
        self.find_jobs(
            doc! { "user_id": user_id, "status": status.as_str() },
            true,
            limit,
        )
        .await
    }

    async fn cleanup_old_jobs(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let terminal = JobStatus::ALL.into_iter().filter(JobStatus::is_terminal);
        self.jobs
            .delete_many(doc! {
                "status": { "$in": status_list(terminal) },
                "updated_at": { "$lt": BsonDateTime::from_chrono(cutoff) },
            })
            .await
    }

    async fn ping(&self) -> Result<()> {
        self.jobs
            .inner()
            .estimated_document_count()
            .await
            .map(|_| ())
            .map_err(|e| RisklineError::Database(format!("Job store unreachable: {}", e)))
    }
}

// ============================================================================
// Predictions
// ============================================================================

pub struct MongoPredictionStore {
    predictions: MongoCollection<PredictionDoc>,
    counters: MongoCollection<CounterDoc>,
}

impl MongoPredictionStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            predictions: client.collection(PREDICTION_COLLECTION).await?,
            counters: client.collection(COUNTER_COLLECTION).await?,
        })
    }

    async fn next_id(&self) -> Result<i64> {
        let counter = self
            .counters
            .find_one_and_update(
                doc! { "_id": PREDICTION_COUNTER },
                doc! { "$inc": { "seq": 1_i64 } },
                true,
            )
            .await?
            .ok_or_else(|| RisklineError::Database("Prediction counter missing".to_string()))?;
        Ok(counter.seq)
    }
}

#[async_trait::async_trait]
impl PredictionStore for MongoPredictionStore {
    async fn save_prediction(&self, mut prediction: Prediction) -> Result<Prediction> {
        prediction.id = self.next_id().await?;
        // The unique job_id index turns a redelivered response into Conflict
        self.predictions
            .insert_one(&PredictionDoc::from(&prediction))
            .await?;
        debug!(prediction_id = prediction.id, job_id = %prediction.job_id, "Stored prediction");
        Ok(prediction)
    }

    async fn get_prediction(&self, id: i64) -> Result<Prediction> {
        self.predictions
            .find_one(doc! { "prediction_id": id })
            .await?
            .map(Prediction::from)
            .ok_or_else(|| RisklineError::NotFound(format!("Prediction {} not found", id)))
    }

    async fn get_prediction_by_job_id(&self, job_id: &str) -> Result<Prediction> {
        self.predictions
            .find_one(doc! { "job_id": job_id })
            .await?
            .map(Prediction::from)
            .ok_or_else(|| {
                RisklineError::NotFound(format!("Prediction for job {} not found", job_id))
            })
    }
}

// ============================================================================
// Users
// ============================================================================

pub struct MongoUserDirectory {
    users: MongoCollection<UserDoc>,
    profiles: MongoCollection<ProfileDoc>,
    activities: MongoCollection<ActivityDoc>,
}

impl MongoUserDirectory {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            users: client.collection(USER_COLLECTION).await?,
            profiles: client.collection(PROFILE_COLLECTION).await?,
            activities: client.collection(ACTIVITY_COLLECTION).await?,
        })
    }
}

#[async_trait::async_trait]
impl UserDirectory for MongoUserDirectory {
    async fn get_user(&self, user_id: UserId) -> Result<User> {
        self.users
            .find_one(doc! { "user_id": user_id })
            .await?
            .map(User::from)
            .ok_or_else(|| RisklineError::NotFound(format!("User {} not found", user_id)))
    }

    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>> {
        Ok(self
            .profiles
            .find_one(doc! { "user_id": user_id })
            .await?
            .map(UserProfile::from))
    }

    async fn list_activities(&self, user_id: UserId) -> Result<Vec<Activity>> {
        let docs = self
            .activities
            .find_many(
                doc! { "user_id": user_id },
                doc! { "activity_date": -1 },
                None,
            )
            .await?;
        Ok(docs.into_iter().map(Activity::from).collect())
    }

    async fn touch_last_prediction(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()> {
        let result = self
            .users
            .update_one(
                doc! { "user_id": user_id },
                doc! { "$set": { "last_prediction_at": BsonDateTime::from_chrono(at) } },
            )
            .await?;

        if result.matched_count == 0 {
            return Err(RisklineError::NotFound(format!("User {} not found", user_id)));
        }
        Ok(())
    }
}

//! In-memory stores
//!
//! DashMap-backed implementations used by tests and `--dev-mode` runs.
//! Transitions happen under the entry's shard lock, which gives the same
//! compare-and-set behaviour as the conditional updates in MongoDB.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::models::{Activity, Prediction, User, UserId, UserProfile};
use super::{job_not_found, transition_error, JobStore, PredictionStore, UserDirectory};
use crate::clock::Clock;
use crate::features::FeatureInfo;
use crate::jobs::{Job, JobStatus};
use crate::types::{Result, RisklineError};

// ============================================================================
// Jobs
// ============================================================================

pub struct MemoryJobStore {
    jobs: DashMap<String, Job>,
    clock: Arc<dyn Clock>,
}

impl MemoryJobStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Apply `mutate` if the job may move to `next`
    fn transition(
        &self,
        job_id: &str,
        next: JobStatus,
        mutate: impl FnOnce(&mut Job),
    ) -> Result<Job> {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| job_not_found(job_id))?;

        if !entry.status.can_transition_to(next) {
            return Err(transition_error(job_id, entry.status, next));
        }

        entry.status = next;
        entry.updated_at = self.clock.now();
        mutate(&mut entry);
        Ok(entry.clone())
    }

    fn collect_sorted(
        &self,
        predicate: impl Fn(&Job) -> bool,
        newest_first: bool,
        limit: usize,
    ) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        // Tie-break on id so equal timestamps still give a stable order
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        if newest_first {
            jobs.reverse();
        }
        jobs.truncate(limit);
        jobs
    }
}

#[async_trait::async_trait]
impl JobStore for MemoryJobStore {
    async fn save_job(&self, job: &Job) -> Result<()> {
        match self.jobs.entry(job.job_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RisklineError::Conflict(format!(
                "Job {} already exists",
                job.job_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(job.clone());
                Ok(())
            }
        }
    }

    async fn get_job_by_id(&self, job_id: &str) -> Result<Job> {
        self.jobs
            .get(job_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| job_not_found(job_id))
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<Job> {
        self.transition(job_id, status, |job| {
            if let Some(error) = error {
                job.error = Some(error.to_string());
            }
        })
    }

    async fn update_job_status_with_result(
        &self,
        job_id: &str,
        prediction_ref: Option<i64>,
    ) -> Result<Job> {
        self.transition(job_id, JobStatus::Completed, |job| {
            job.prediction_ref = prediction_ref;
        })
    }

    async fn record_features(&self, job_id: &str, features: &FeatureInfo) -> Result<()> {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| job_not_found(job_id))?;
        entry.features = Some(features.clone());
        entry.updated_at = self.clock.now();
        Ok(())
    }

    async fn cancel_job(&self, job_id: &str) -> Result<Job> {
        self.transition(job_id, JobStatus::Cancelled, |_| {})
    }

    async fn get_pending_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        Ok(self.collect_sorted(|job| job.status == JobStatus::Pending, false, limit))
    }

    async fn get_jobs_by_user_id(&self, user_id: UserId, limit: usize) -> Result<Vec<Job>> {
        Ok(self.collect_sorted(|job| job.user_id == user_id, true, limit))
    }

    async fn get_jobs_by_user_id_and_status(
        &self,
        user_id: UserId,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<Job>> {
        Ok(self.collect_sorted(
            |job| job.user_id == user_id && job.status == status,
            true,
            limit,
        ))
    }

    async fn cleanup_old_jobs(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let before = self.jobs.len();
        self.jobs
            .retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        Ok((before - self.jobs.len()) as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Predictions
// ============================================================================

pub struct MemoryPredictionStore {
    predictions: DashMap<i64, Prediction>,
    by_job: DashMap<String, i64>,
    next_id: AtomicI64,
}

impl MemoryPredictionStore {
    pub fn new() -> Self {
        Self {
            predictions: DashMap::new(),
            by_job: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

impl Default for MemoryPredictionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PredictionStore for MemoryPredictionStore {
    async fn save_prediction(&self, mut prediction: Prediction) -> Result<Prediction> {
        // Reserve the job slot first so two racing saves cannot both insert
        match self.by_job.entry(prediction.job_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(RisklineError::Conflict(format!(
                    "Prediction for job {} already exists",
                    prediction.job_id
                )))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                prediction.id = self.next_id.fetch_add(1, Ordering::SeqCst);
                slot.insert(prediction.id);
            }
        }

        self.predictions.insert(prediction.id, prediction.clone());
        Ok(prediction)
    }

    async fn get_prediction(&self, id: i64) -> Result<Prediction> {
        self.predictions
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or_else(|| RisklineError::NotFound(format!("Prediction {} not found", id)))
    }

    async fn get_prediction_by_job_id(&self, job_id: &str) -> Result<Prediction> {
        let id = self
            .by_job
            .get(job_id)
            .map(|entry| *entry)
            .ok_or_else(|| {
                RisklineError::NotFound(format!("Prediction for job {} not found", job_id))
            })?;
        self.get_prediction(id).await
    }
}

// ============================================================================
// Users
// ============================================================================

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: DashMap<UserId, User>,
    profiles: DashMap<UserId, UserProfile>,
    activities: DashMap<UserId, Vec<Activity>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn insert_profile(&self, profile: UserProfile) {
        self.profiles.insert(profile.user_id, profile);
    }

    pub fn add_activity(&self, activity: Activity) {
        self.activities
            .entry(activity.user_id)
            .or_default()
            .push(activity);
    }
}

#[async_trait::async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get_user(&self, user_id: UserId) -> Result<User> {
        self.users
            .get(&user_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| RisklineError::NotFound(format!("User {} not found", user_id)))
    }

    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>> {
        Ok(self.profiles.get(&user_id).map(|entry| entry.clone()))
    }

    async fn list_activities(&self, user_id: UserId) -> Result<Vec<Activity>> {
        Ok(self
            .activities
            .get(&user_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn touch_last_prediction(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()> {
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| RisklineError::NotFound(format!("User {} not found", user_id)))?;
        user.last_prediction_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{Duration, TimeZone};

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn store() -> (MemoryJobStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(epoch()));
        (MemoryJobStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_duplicate_job_is_conflict() {
        let (store, _) = store();
        let job = Job::new("job_1".into(), 1, None, epoch());
        store.save_job(&job).await.unwrap();
        assert!(matches!(
            store.save_job(&job).await,
            Err(RisklineError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_transitions_refuse_backwards_moves() {
        let (store, clock) = store();
        store
            .save_job(&Job::new("job_1".into(), 1, None, epoch()))
            .await
            .unwrap();

        clock.advance(Duration::seconds(1));
        let job = store
            .update_job_status("job_1", JobStatus::Processing, None)
            .await
            .unwrap();
        assert_eq!(job.updated_at, epoch() + Duration::seconds(1));

        store
            .update_job_status("job_1", JobStatus::Submitted, None)
            .await
            .unwrap();

        let err = store
            .update_job_status("job_1", JobStatus::Processing, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RisklineError::InvalidTransition { .. }));

        let err = store.cancel_job("job_1").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot cancel job that has been submitted to ML service"
        );
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (store, _) = store();
        assert!(matches!(
            store.get_job_by_id("job_missing").await,
            Err(RisklineError::NotFound(_))
        ));
        assert!(matches!(
            store.cancel_job("job_missing").await,
            Err(RisklineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_listing_order_and_filters() {
        let (store, _) = store();
        for i in 0..4 {
            let mut job = Job::new(format!("job_{i}"), 1, None, epoch() + Duration::minutes(i));
            if i == 3 {
                job.user_id = 2;
            }
            store.save_job(&job).await.unwrap();
        }
        store.cancel_job("job_1").await.unwrap();

        let pending = store.get_pending_jobs(10).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids, ["job_0", "job_2", "job_3"]);

        let mine = store.get_jobs_by_user_id(1, 2).await.unwrap();
        let ids: Vec<_> = mine.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids, ["job_2", "job_1"]);

        let cancelled = store
            .get_jobs_by_user_id_and_status(1, JobStatus::Cancelled, 10)
            .await
            .unwrap();
        assert_eq!(cancelled.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_only_removes_old_terminal_jobs() {
        let (store, clock) = store();
        store
            .save_job(&Job::new("job_old".into(), 1, None, epoch()))
            .await
            .unwrap();
        store
            .save_job(&Job::new("job_live".into(), 1, None, epoch()))
            .await
            .unwrap();
        store.cancel_job("job_old").await.unwrap();

        clock.advance(Duration::days(8));
        let removed = store
            .cleanup_old_jobs(clock.now() - Duration::days(7))
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(store.get_job_by_id("job_live").await.is_ok());
    }

    #[tokio::test]
    async fn test_prediction_per_job_is_unique() {
        let store = MemoryPredictionStore::new();
        let prediction = Prediction {
            id: 0,
            job_id: "job_1".into(),
            user_id: 1,
            risk_score: 0.42,
            inputs: FeatureInfo::default(),
            attributions: Default::default(),
            explanations: None,
            summary: None,
            created_at: epoch(),
        };

        let saved = store.save_prediction(prediction.clone()).await.unwrap();
        assert_eq!(saved.id, 1);
        assert!(matches!(
            store.save_prediction(prediction).await,
            Err(RisklineError::Conflict(_))
        ));
        assert_eq!(store.get_prediction_by_job_id("job_1").await.unwrap().id, 1);
        assert_eq!(store.len(), 1);
    }
}

//! Shared fixtures: an orchestrator over in-memory backends and a fixed clock

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

use riskline::cache::MemoryResultCache;
use riskline::clock::FixedClock;
use riskline::features::WhatIfOverride;
use riskline::jobs::{Job, JobStatus};
use riskline::nats::messages::MlRequestEnvelope;
use riskline::nats::{MemoryBus, QueueNames};
use riskline::orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorDeps};
use riskline::store::models::{Activity, ActivityType, User, UserProfile};
use riskline::store::{JobStore, MemoryJobStore, MemoryPredictionStore, MemoryUserDirectory};
use riskline::worker::Disposition;

pub const USER_ID: i64 = 7;
pub const OTHER_USER_ID: i64 = 8;

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        worker_count: 2,
        queue_capacity: 16,
        submit_wait: Duration::from_millis(50),
        publish_timeout: Duration::from_secs(2),
        recovery_delay: Duration::from_millis(50),
        ..OrchestratorConfig::default()
    }
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub jobs: Arc<MemoryJobStore>,
    pub predictions: Arc<MemoryPredictionStore>,
    pub users: Arc<MemoryUserDirectory>,
    pub cache: Arc<MemoryResultCache>,
    pub bus: Arc<MemoryBus>,
    pub clock: Arc<FixedClock>,
    pub queues: QueueNames,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let clock = Arc::new(FixedClock::new(epoch()));
        let jobs = Arc::new(MemoryJobStore::new(clock.clone()));
        let predictions = Arc::new(MemoryPredictionStore::new());
        let users = Arc::new(MemoryUserDirectory::new());
        let cache = Arc::new(MemoryResultCache::new());
        let bus = Arc::new(MemoryBus::new());
        let queues = QueueNames::default();

        let orchestrator = Arc::new(Orchestrator::new(
            config,
            OrchestratorDeps {
                jobs: jobs.clone(),
                predictions: predictions.clone(),
                users: users.clone(),
                cache: cache.clone(),
                bus: bus.clone(),
                queues: queues.clone(),
                clock: clock.clone(),
            },
        ));

        let harness = Self {
            orchestrator,
            jobs,
            predictions,
            users,
            cache,
            bus,
            clock,
            queues,
        };
        harness.seed_user(USER_ID, complete_profile(USER_ID));
        harness.seed_user(OTHER_USER_ID, complete_profile(OTHER_USER_ID));
        harness
    }

    pub fn seed_user(&self, user_id: i64, profile: UserProfile) {
        self.users.insert_user(User {
            id: user_id,
            name: format!("User {}", user_id),
            email: format!("user{}@example.com", user_id),
            last_prediction_at: None,
        });
        self.users.insert_profile(profile);
        self.users.add_activity(Activity {
            user_id,
            activity_type: ActivityType::Workout,
            value: 3,
            activity_date: Utc.with_ymd_and_hms(2024, 12, 28, 9, 0, 0).unwrap(),
        });
    }

    pub async fn job(&self, job_id: &str) -> Job {
        self.jobs.get_job_by_id(job_id).await.unwrap()
    }

    /// Poll until the job reaches `status`; panics after two seconds
    pub async fn wait_for_status(&self, job_id: &str, status: JobStatus) -> Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let job = self.job(job_id).await;
            if job.status == status {
                return job;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("job {} stuck in {} waiting for {}", job_id, job.status, status);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Request envelope the worker published for `job_id`
    pub fn published_request(&self, job_id: &str) -> MlRequestEnvelope {
        let message = self
            .bus
            .published_to(&self.queues.request)
            .into_iter()
            .find(|message| message.correlation_id == job_id)
            .unwrap_or_else(|| panic!("no request published for {}", job_id));
        serde_json::from_slice(&message.payload).unwrap()
    }

    pub async fn respond(&self, body: serde_json::Value) -> Disposition {
        let payload = serde_json::to_vec(&body).unwrap();
        self.orchestrator
            .correlator()
            .handle_payload(&payload, None)
            .await
    }
}

/// Profile with every field the canonical and what-if paths need
pub fn complete_profile(user_id: i64) -> UserProfile {
    UserProfile {
        user_id,
        date_of_birth: Some("1975-06-01".into()),
        height: Some(175.0),
        weight: Some(83.6),
        bmi: Some(27.3),
        smoking_start_age: None,
        smoking_stop_age: None,
        avg_smoke_count: None,
        physical_activity_frequency: Some(1),
        is_bloodline: Some(false),
        is_hypertension: Some(false),
        is_cholesterol: Some(false),
        macrosomic_baby: Some(0),
        created_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
    }
}

pub fn what_if_override() -> WhatIfOverride {
    WhatIfOverride {
        smoking_status: 2,
        avg_smoke_count: 15,
        weight: 80.0,
        is_hypertension: true,
        is_cholesterol: false,
        physical_activity_frequency: 2,
    }
}

/// Successful response for `job_id`
pub fn ml_response(job_id: &str, prediction: f64) -> serde_json::Value {
    serde_json::json!({
        "prediction": prediction,
        "explanation": {
            "age": {"shap": 0.12, "contribution": 0.3, "impact": 1, "value": 49.0},
            "BMI": {"shap": 0.08, "contribution": 0.2, "impact": 1, "value": 27.3},
            "moderate_physical_activity_frequency": {"shap": -0.05, "contribution": 0.1, "impact": -1, "value": 3.0}
        },
        "elapsed_time": 0.153,
        "timestamp": "2025-01-01T00:00:01.123456",
        "correlation_id": job_id
    })
}

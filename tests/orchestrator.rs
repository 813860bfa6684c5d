//! End-to-end job lifecycle over in-memory backends

mod common;

use std::time::Duration;

use common::*;
use riskline::cache::{what_if_key, ResultCache};
use riskline::jobs::{Job, JobStatus};
use riskline::orchestrator::ResultLookup;
use riskline::features::{FeatureInfo, WhatIfOverride};
use riskline::store::models::{FeatureAttributions, Prediction, User, UserProfile};
use riskline::store::{JobStore, PredictionStore, UserDirectory};
use riskline::types::RisklineError;
use riskline::worker::{Disposition, SUBMIT_FAILURE_PREFIX};

async fn submitted_job(harness: &Harness) -> Job {
    let job = harness.orchestrator.submit_job(USER_ID, None).await.unwrap();
    harness.wait_for_status(&job.job_id, JobStatus::Submitted).await
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_canonical_job_completes_with_prediction() {
    let harness = Harness::new();
    harness.orchestrator.start().await.unwrap();

    let job = harness.orchestrator.submit_job(USER_ID, None).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.job_id.starts_with("job_"));

    harness.wait_for_status(&job.job_id, JobStatus::Submitted).await;

    let request = harness.published_request(&job.job_id);
    assert_eq!(
        request.features.as_slice(),
        &[49.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 27.3, 0.0]
    );
    assert_eq!(request.correlation_id, job.job_id);

    let published = harness.bus.published_to(&harness.queues.request);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].reply_to, harness.queues.response);

    let disposition = harness.respond(ml_response(&job.job_id, 0.42)).await;
    assert_eq!(disposition, Disposition::Ack);

    let done = harness.job(&job.job_id).await;
    assert_eq!(done.status, JobStatus::Completed);
    let prediction_ref = done.prediction_ref.expect("canonical job links its prediction");

    let prediction = harness.predictions.get_prediction(prediction_ref).await.unwrap();
    assert_eq!(prediction.user_id, USER_ID);
    assert_eq!(prediction.job_id, job.job_id);
    assert!((prediction.risk_score - 0.42).abs() < f64::EPSILON);
    assert_eq!(prediction.inputs.age, 49);
    assert_eq!(prediction.inputs.physical_activity_frequency, 3);
    assert!((prediction.attributions.age.shap - 0.12).abs() < 1e-9);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_incomplete_profile_rejected_before_any_row() {
    let harness = Harness::new();
    let mut profile = complete_profile(USER_ID);
    profile.is_cholesterol = None;
    harness.users.insert_profile(profile);

    let err = harness.orchestrator.submit_job(USER_ID, None).await.unwrap_err();
    match err {
        RisklineError::IncompleteProfile(missing) => {
            assert_eq!(missing, vec!["cholesterol status is required".to_string()]);
        }
        other => panic!("expected IncompleteProfile, got {:?}", other),
    }
    assert!(harness.jobs.is_empty());
}

#[tokio::test]
async fn test_pending_row_with_incomplete_profile_fails_in_worker() {
    let harness = Harness::new();
    let mut profile = complete_profile(USER_ID);
    profile.is_cholesterol = None;
    harness.users.insert_profile(profile);

    let job = Job::new("job_orphan".to_string(), USER_ID, None, epoch());
    harness.jobs.save_job(&job).await.unwrap();

    harness.orchestrator.start().await.unwrap();
    let failed = harness.wait_for_status("job_orphan", JobStatus::Failed).await;
    assert_eq!(failed.error.as_deref(), Some("cholesterol status is required"));
    assert!(harness.bus.published().is_empty());

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_what_if_job_caches_result_without_prediction() {
    let harness = Harness::new();
    let mut profile = complete_profile(USER_ID);
    profile.smoking_start_age = Some(20);
    harness.users.insert_profile(profile);
    harness.orchestrator.start().await.unwrap();

    let job = harness
        .orchestrator
        .submit_job(USER_ID, Some(what_if_override()))
        .await
        .unwrap();
    assert!(job.is_what_if);
    harness.wait_for_status(&job.job_id, JobStatus::Submitted).await;

    let request = harness.published_request(&job.job_id);
    assert_eq!(
        request.features.as_slice(),
        &[49.0, 2.0, 0.0, 0.0, 2.0, 0.0, 2.0, 26.1, 1.0]
    );

    let disposition = harness.respond(ml_response(&job.job_id, 0.31)).await;
    assert_eq!(disposition, Disposition::Ack);

    let done = harness.job(&job.job_id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.prediction_ref, None);
    assert!(harness.predictions.is_empty());

    let key = what_if_key(&job.job_id);
    let ttl = harness.cache.ttl(&key).await.unwrap().expect("cached what-if result");
    assert!(ttl >= Duration::from_secs(3599));

    match harness.orchestrator.get_result(&job.job_id, USER_ID).await.unwrap() {
        ResultLookup::WhatIf { result, .. } => {
            assert_eq!(result["is_what_if"], true);
            assert_eq!(result["risk_percentage"], 31.0);
            assert_eq!(result["what_if_input"]["smoking_status"], 2);
        }
        other => panic!("expected what-if result, got {:?}", other),
    }

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_response_stores_one_prediction() {
    let harness = Harness::new();
    harness.orchestrator.start().await.unwrap();
    let job = submitted_job(&harness).await;

    let response = ml_response(&job.job_id, 0.42);
    assert_eq!(harness.respond(response.clone()).await, Disposition::Ack);
    let first = harness.job(&job.job_id).await;

    assert_eq!(harness.respond(response).await, Disposition::Ack);
    let second = harness.job(&job.job_id).await;

    assert_eq!(harness.predictions.len(), 1);
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(first.prediction_ref, second.prediction_ref);
    assert_eq!(first.updated_at, second.updated_at);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_redelivery_after_stored_prediction_completes_job() {
    let harness = Harness::new();
    harness.orchestrator.start().await.unwrap();
    let job = submitted_job(&harness).await;

    // Stored by an earlier delivery that never reached the job update
    let stored = harness
        .predictions
        .save_prediction(Prediction {
            id: 0,
            job_id: job.job_id.clone(),
            user_id: USER_ID,
            risk_score: 0.42,
            inputs: FeatureInfo::default(),
            attributions: FeatureAttributions::default(),
            explanations: None,
            summary: None,
            created_at: epoch(),
        })
        .await
        .unwrap();

    let disposition = harness.respond(ml_response(&job.job_id, 0.42)).await;
    assert_eq!(disposition, Disposition::Ack);

    let done = harness.job(&job.job_id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.prediction_ref, Some(stored.id));
    assert_eq!(harness.predictions.len(), 1);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_publish_failure_fails_job() {
    let harness = Harness::new();
    harness.bus.fail_publishes(true);
    harness.orchestrator.start().await.unwrap();

    let job = harness.orchestrator.submit_job(USER_ID, None).await.unwrap();
    let failed = harness.wait_for_status(&job.job_id, JobStatus::Failed).await;

    let error = failed.error.unwrap_or_default();
    assert!(
        error.starts_with(SUBMIT_FAILURE_PREFIX),
        "unexpected error text: {}",
        error
    );

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancel_after_submit_is_refused_and_response_still_completes() {
    let harness = Harness::new();
    harness.orchestrator.start().await.unwrap();
    let job = submitted_job(&harness).await;

    let err = harness
        .orchestrator
        .cancel_job(&job.job_id, USER_ID)
        .await
        .unwrap_err();
    assert!(matches!(err, RisklineError::CannotCancel(_)));
    assert_eq!(
        err.to_string(),
        "Cannot cancel job that has been submitted to ML service"
    );

    harness.respond(ml_response(&job.job_id, 0.42)).await;
    let done = harness.job(&job.job_id).await;
    assert_eq!(done.status, JobStatus::Completed);

    harness.orchestrator.stop().await.unwrap();
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_cancelled_pending_job_is_never_published() {
    let harness = Harness::new();

    // Queued while the pool is down, cancelled before any worker sees it
    let job = harness.orchestrator.submit_job(USER_ID, None).await.unwrap();
    let cancelled = harness
        .orchestrator
        .cancel_job(&job.job_id, USER_ID)
        .await
        .unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    harness.orchestrator.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(harness.bus.published().is_empty());
    assert_eq!(harness.job(&job.job_id).await.status, JobStatus::Cancelled);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_pending_jobs_recovered_after_start() {
    let harness = Harness::new();
    for id in ["job_left_a", "job_left_b"] {
        let job = Job::new(id.to_string(), USER_ID, None, epoch());
        harness.jobs.save_job(&job).await.unwrap();
    }

    harness.orchestrator.start().await.unwrap();
    for id in ["job_left_a", "job_left_b"] {
        harness.wait_for_status(id, JobStatus::Submitted).await;
    }
    assert_eq!(harness.bus.published_to(&harness.queues.request).len(), 2);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_recovered_what_if_job_keeps_overrides() {
    let harness = Harness::new();
    let job = Job::new("job_left_what_if".to_string(), USER_ID, Some(what_if_override()), epoch());
    harness.jobs.save_job(&job).await.unwrap();

    harness.orchestrator.start().await.unwrap();
    harness.wait_for_status(&job.job_id, JobStatus::Submitted).await;

    let request = harness.published_request(&job.job_id);
    assert_eq!(request.features.as_slice()[1], 2.0);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_response_from_service_fails_job() {
    let harness = Harness::new();
    harness.orchestrator.start().await.unwrap();
    let job = submitted_job(&harness).await;

    let disposition = harness
        .respond(serde_json::json!({
            "correlation_id": job.job_id,
            "error": "model not loaded"
        }))
        .await;
    assert_eq!(disposition, Disposition::Ack);

    let failed = harness.job(&job.job_id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("model not loaded"));
    assert!(harness.predictions.is_empty());

    // A late success cannot move a failed job
    harness.respond(ml_response(&job.job_id, 0.42)).await;
    assert_eq!(harness.job(&job.job_id).await.status, JobStatus::Failed);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_error_reply_with_null_fields_fails_job() {
    let harness = Harness::new();
    harness.orchestrator.start().await.unwrap();
    let job = submitted_job(&harness).await;

    let disposition = harness
        .respond(serde_json::json!({
            "prediction": null,
            "explanation": null,
            "elapsed_time": null,
            "correlation_id": job.job_id,
            "error": "model crashed"
        }))
        .await;
    assert_eq!(disposition, Disposition::Ack);

    let failed = harness.job(&job.job_id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("model crashed"));

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_out_of_range_prediction_fails_job() {
    let harness = Harness::new();
    harness.orchestrator.start().await.unwrap();
    let job = submitted_job(&harness).await;

    harness.respond(ml_response(&job.job_id, 1.7)).await;
    let failed = harness.job(&job.job_id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(harness.predictions.is_empty());

    harness.orchestrator.stop().await.unwrap();
}

// ============================================================================
// Correlator edge cases
// ============================================================================

#[tokio::test]
async fn test_response_for_unknown_job_is_acked() {
    let harness = Harness::new();
    let disposition = harness.respond(ml_response("job_unknown", 0.5)).await;
    assert_eq!(disposition, Disposition::Ack);
    assert!(harness.predictions.is_empty());
}

#[tokio::test]
async fn test_malformed_response_is_terminated() {
    let harness = Harness::new();
    let disposition = harness
        .orchestrator
        .correlator()
        .handle_payload(b"{not json", None)
        .await;
    assert_eq!(disposition, Disposition::Term);
}

#[tokio::test]
async fn test_response_without_correlation_id_is_terminated() {
    let harness = Harness::new();
    let disposition = harness.respond(serde_json::json!({"prediction": 0.4})).await;
    assert_eq!(disposition, Disposition::Term);
}

#[tokio::test]
async fn test_header_correlation_id_is_used_when_body_has_none() {
    let harness = Harness::new();
    harness.orchestrator.start().await.unwrap();
    let job = submitted_job(&harness).await;

    let mut body = ml_response(&job.job_id, 0.42);
    body.as_object_mut().unwrap().remove("correlation_id");
    let payload = serde_json::to_vec(&body).unwrap();

    let disposition = harness
        .orchestrator
        .correlator()
        .handle_payload(&payload, Some(&job.job_id))
        .await;
    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(harness.job(&job.job_id).await.status, JobStatus::Completed);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_response_for_pending_job_is_dropped() {
    let harness = Harness::new();
    let job = harness.orchestrator.submit_job(USER_ID, None).await.unwrap();

    let disposition = harness.respond(ml_response(&job.job_id, 0.42)).await;
    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(harness.job(&job.job_id).await.status, JobStatus::Pending);
    assert!(harness.predictions.is_empty());
}

// ============================================================================
// Job API
// ============================================================================

#[tokio::test]
async fn test_queue_full_fails_the_new_job() {
    let mut config = test_config();
    config.queue_capacity = 1;
    let harness = Harness::with_config(config);

    // Pool not started: the first job occupies the only slot
    harness.orchestrator.submit_job(USER_ID, None).await.unwrap();
    let err = harness.orchestrator.submit_job(USER_ID, None).await.unwrap_err();
    assert!(matches!(err, RisklineError::QueueFull));

    let failed = harness
        .jobs
        .get_jobs_by_user_id_and_status(USER_ID, JobStatus::Failed, 10)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .starts_with("Failed to enqueue job"));
}

#[tokio::test]
async fn test_invalid_what_if_creates_no_job() {
    let harness = Harness::new();
    let mut overrides = what_if_override();
    overrides.smoking_status = 5;

    let err = harness
        .orchestrator
        .submit_job(USER_ID, Some(overrides))
        .await
        .unwrap_err();
    assert!(matches!(err, RisklineError::InvalidWhatIfInput(_)));
    assert!(harness.jobs.is_empty());
}

#[tokio::test]
async fn test_missing_profile_is_reported() {
    let harness = Harness::new();
    harness.users.insert_user(User {
        id: 99,
        name: "No Profile".into(),
        email: "none@example.com".into(),
        last_prediction_at: None,
    });

    let err = harness.orchestrator.submit_job(99, None).await.unwrap_err();
    match err {
        RisklineError::IncompleteProfile(missing) => {
            assert_eq!(missing, vec!["health profile is required".to_string()])
        }
        other => panic!("expected IncompleteProfile, got {:?}", other),
    }
}

#[tokio::test]
async fn test_jobs_are_private_to_their_owner() {
    let harness = Harness::new();
    let job = harness.orchestrator.submit_job(USER_ID, None).await.unwrap();

    let err = harness
        .orchestrator
        .get_job(&job.job_id, OTHER_USER_ID)
        .await
        .unwrap_err();
    assert!(matches!(err, RisklineError::Forbidden(_)));

    let err = harness
        .orchestrator
        .cancel_job(&job.job_id, OTHER_USER_ID)
        .await
        .unwrap_err();
    assert!(matches!(err, RisklineError::Forbidden(_)));
    assert_eq!(harness.job(&job.job_id).await.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_result_not_ready_until_completed() {
    let harness = Harness::new();
    let job = harness.orchestrator.submit_job(USER_ID, None).await.unwrap();

    match harness.orchestrator.get_result(&job.job_id, USER_ID).await.unwrap() {
        ResultLookup::NotReady { job } => assert_eq!(job.status, JobStatus::Pending),
        other => panic!("expected NotReady, got {:?}", other),
    }
}

#[tokio::test]
async fn test_expired_what_if_result() {
    let harness = Harness::new();
    harness.orchestrator.start().await.unwrap();

    let job = harness
        .orchestrator
        .submit_job(USER_ID, Some(what_if_override()))
        .await
        .unwrap();
    harness.wait_for_status(&job.job_id, JobStatus::Submitted).await;
    harness.respond(ml_response(&job.job_id, 0.2)).await;
    harness.orchestrator.stop().await.unwrap();

    // Stop closes the cache, so the lookup degrades to "expired"
    match harness.orchestrator.get_result(&job.job_id, USER_ID).await.unwrap() {
        ResultLookup::Expired { job } => assert_eq!(job.status, JobStatus::Completed),
        other => panic!("expected Expired, got {:?}", other),
    }
}

#[tokio::test]
async fn test_list_jobs_filters_and_limits() {
    let harness = Harness::new();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let job = harness.orchestrator.submit_job(USER_ID, None).await.unwrap();
        ids.push(job.job_id);
        harness.clock.advance(chrono::Duration::seconds(1));
    }
    harness.orchestrator.submit_job(OTHER_USER_ID, None).await.unwrap();
    harness.orchestrator.cancel_job(&ids[0], USER_ID).await.unwrap();

    let all = harness.orchestrator.list_jobs(USER_ID, None, 10).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|job| job.user_id == USER_ID));

    let limited = harness.orchestrator.list_jobs(USER_ID, None, 2).await.unwrap();
    assert_eq!(limited.len(), 2);

    let cancelled = harness
        .orchestrator
        .list_jobs(USER_ID, Some(JobStatus::Cancelled), 10)
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].job_id, ids[0]);
}

#[tokio::test]
async fn test_cleanup_removes_old_terminal_jobs_only() {
    let harness = Harness::new();
    let done = harness.orchestrator.submit_job(USER_ID, None).await.unwrap();
    harness.orchestrator.cancel_job(&done.job_id, USER_ID).await.unwrap();
    let open = harness.orchestrator.submit_job(USER_ID, None).await.unwrap();

    assert_eq!(harness.orchestrator.cleanup().await.unwrap(), 0);

    harness.clock.advance(chrono::Duration::days(8));
    assert_eq!(harness.orchestrator.cleanup().await.unwrap(), 1);

    assert!(matches!(
        harness.jobs.get_job_by_id(&done.job_id).await,
        Err(RisklineError::NotFound(_))
    ));
    assert_eq!(harness.job(&open.job_id).await.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_completed_user_gets_last_prediction_timestamp() {
    let harness = Harness::new();
    harness.orchestrator.start().await.unwrap();
    let job = submitted_job(&harness).await;
    harness.respond(ml_response(&job.job_id, 0.42)).await;

    let user = harness.users.get_user(USER_ID).await.unwrap();
    assert_eq!(user.last_prediction_at, Some(epoch()));

    harness.orchestrator.stop().await.unwrap();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let harness = Harness::new();
    assert!(!harness.orchestrator.is_running().await);

    harness.orchestrator.start().await.unwrap();
    harness.orchestrator.start().await.unwrap();
    assert!(harness.orchestrator.is_running().await);

    let stats = harness.orchestrator.stats().await;
    assert!(stats.running);
    assert_eq!(stats.worker_count, 2);
    assert_eq!(stats.cache_backend, harness.cache.backend());

    harness.orchestrator.stop().await.unwrap();
    harness.orchestrator.stop().await.unwrap();
    assert!(!harness.orchestrator.is_running().await);
    assert_eq!(harness.orchestrator.stats().await.worker_count, 0);
}

#[tokio::test]
async fn test_start_after_stop_is_refused() {
    let harness = Harness::new();
    harness.orchestrator.start().await.unwrap();
    harness.orchestrator.stop().await.unwrap();

    let err = harness.orchestrator.start().await.unwrap_err();
    assert!(matches!(err, RisklineError::BusUnavailable(_)));
    assert!(!harness.orchestrator.is_running().await);

    harness.orchestrator.submit_job(USER_ID, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.bus.published().is_empty());
}

#[tokio::test]
async fn test_ready_tracks_bus_state() {
    let harness = Harness::new();
    harness.orchestrator.ready().await.unwrap();

    harness.orchestrator.start().await.unwrap();
    harness.orchestrator.stop().await.unwrap();

    let err = harness.orchestrator.ready().await.unwrap_err();
    assert!(matches!(err, RisklineError::BusUnavailable(_)));
}

#[tokio::test]
async fn test_ml_health_probe_publishes_to_health_queue() {
    let harness = Harness::new();
    let correlation_id = harness.orchestrator.health_check_ml().await.unwrap();

    let probes = harness.bus.published_to(&harness.queues.health_request);
    assert_eq!(probes.len(), 1);
    assert_eq!(probes[0].correlation_id, correlation_id);
    assert_eq!(probes[0].reply_to, harness.queues.health_response);
}

// ============================================================================
// Published features
// ============================================================================

fn profile_variant(user_id: i64, tweak: impl FnOnce(&mut UserProfile)) -> UserProfile {
    let mut profile = complete_profile(user_id);
    tweak(&mut profile);
    profile
}

#[tokio::test]
async fn test_published_features_match_recorded_inputs() {
    let harness = Harness::new();

    let cases: Vec<(UserProfile, Option<WhatIfOverride>)> = vec![
        (complete_profile(101), None),
        (
            profile_variant(102, |p| {
                p.smoking_start_age = Some(18);
                p.smoking_stop_age = Some(40);
                p.avg_smoke_count = Some(20);
                p.is_bloodline = Some(true);
                p.macrosomic_baby = Some(1);
                p.is_hypertension = Some(true);
                p.bmi = Some(31.4);
            }),
            None,
        ),
        (
            profile_variant(103, |p| {
                p.smoking_start_age = Some(20);
                p.avg_smoke_count = Some(10);
                p.is_cholesterol = Some(true);
                p.macrosomic_baby = Some(2);
            }),
            None,
        ),
        (
            profile_variant(104, |p| p.smoking_start_age = Some(20)),
            Some(what_if_override()),
        ),
        (
            profile_variant(105, |p| {
                p.smoking_start_age = Some(18);
                p.smoking_stop_age = Some(30);
                p.height = Some(162.0);
            }),
            Some(WhatIfOverride {
                smoking_status: 1,
                avg_smoke_count: 5,
                weight: 95.0,
                is_hypertension: false,
                is_cholesterol: true,
                physical_activity_frequency: 0,
            }),
        ),
        (
            profile_variant(106, |p| p.is_bloodline = Some(true)),
            Some(WhatIfOverride {
                smoking_status: 0,
                avg_smoke_count: 0,
                weight: 60.0,
                is_hypertension: false,
                is_cholesterol: false,
                physical_activity_frequency: 5,
            }),
        ),
    ];

    harness.orchestrator.start().await.unwrap();
    let mut submitted = Vec::new();
    for (profile, what_if) in cases {
        let user_id = profile.user_id;
        harness.seed_user(user_id, profile);
        let job = harness
            .orchestrator
            .submit_job(user_id, what_if)
            .await
            .unwrap();
        submitted.push(job.job_id);
    }

    for job_id in &submitted {
        let job = harness.wait_for_status(job_id, JobStatus::Submitted).await;
        let recorded = job.features.expect("worker records the assembled inputs");
        let published = harness.published_request(job_id).features;
        assert_eq!(
            published.to_named_map(),
            recorded.to_named_map(),
            "job {}",
            job_id
        );
    }

    harness.orchestrator.stop().await.unwrap();
}

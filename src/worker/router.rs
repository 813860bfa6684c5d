//! Result router
//!
//! Turns a successful ML response into the job's final artifact: a cached
//! what-if map, or a stored prediction for canonical jobs. The job only
//! reaches `completed` after its artifact has been written (the what-if
//! cache write is best-effort).

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{what_if_key, ResultCache};
use crate::clock::Clock;
use crate::features::{Feature, FeatureInfo};
use crate::jobs::{Job, JobStatus};
use crate::logging::{JobEvent, JobEventKind};
use crate::nats::messages::{ExplanationEntry, MlResponseEnvelope};
use crate::store::models::{Attribution, FeatureAttributions, Prediction};
use crate::store::{JobStore, PredictionStore, UserDirectory};
use crate::types::RisklineError;

/// What happened to a routed response
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Job completed; canonical jobs carry their prediction id
    Completed { prediction_ref: Option<i64> },
    /// Job failed with the given reason
    Failed(String),
    /// Another delivery of the same response already won
    Duplicate,
    /// Store error after the artifact may have been written; redeliver
    Retry(String),
}

pub struct ResultRouter {
    jobs: Arc<dyn JobStore>,
    predictions: Arc<dyn PredictionStore>,
    users: Arc<dyn UserDirectory>,
    cache: Arc<dyn ResultCache>,
    clock: Arc<dyn Clock>,
    what_if_ttl: Duration,
}

impl ResultRouter {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        predictions: Arc<dyn PredictionStore>,
        users: Arc<dyn UserDirectory>,
        cache: Arc<dyn ResultCache>,
        clock: Arc<dyn Clock>,
        what_if_ttl: Duration,
    ) -> Self {
        Self {
            jobs,
            predictions,
            users,
            cache,
            clock,
            what_if_ttl,
        }
    }

    /// Apply a response without an `error` to its `submitted` job
    pub async fn route(&self, job: &Job, response: &MlResponseEnvelope) -> RouteOutcome {
        let risk_score = match response.prediction {
            Some(score) if score.is_finite() && (0.0..=1.0).contains(&score) => score,
            Some(score) => {
                return self
                    .fail(job, &format!("ML response prediction out of range: {}", score))
                    .await
            }
            None => return self.fail(job, "ML response carried no prediction").await,
        };

        let outcome = if job.is_what_if {
            self.route_what_if(job, risk_score, response).await
        } else {
            self.route_canonical(job, risk_score, response).await
        };

        if let RouteOutcome::Completed { .. } = outcome {
            JobEvent::new(JobEventKind::ResponseApplied, &job.job_id, self.clock.now())
                .with_user(job.user_id)
                .with_transition(Some(JobStatus::Submitted), JobStatus::Completed)
                .with_what_if(job.is_what_if)
                .since(job.created_at)
                .emit();
        }
        outcome
    }

    async fn route_what_if(
        &self,
        job: &Job,
        risk_score: f64,
        response: &MlResponseEnvelope,
    ) -> RouteOutcome {
        let result = what_if_result(job, risk_score, response, &self.clock.now());
        let key = what_if_key(&job.job_id);

        // Best effort: the job still completes, `/result` then reports the miss
        if let Err(e) = self.cache.put(&key, &result, self.what_if_ttl).await {
            warn!(job_id = %job.job_id, "What-if result not cached: {}", e);
        }

        self.complete(job, None).await
    }

    async fn route_canonical(
        &self,
        job: &Job,
        risk_score: f64,
        response: &MlResponseEnvelope,
    ) -> RouteOutcome {
        let prediction = Prediction {
            id: 0,
            job_id: job.job_id.clone(),
            user_id: job.user_id,
            risk_score,
            inputs: inputs_for(job, &response.explanation),
            attributions: attributions_from(&response.explanation),
            explanations: None,
            summary: None,
            created_at: self.clock.now(),
        };

        let saved = match self.predictions.save_prediction(prediction).await {
            Ok(saved) => saved,
            Err(RisklineError::Conflict(_)) => {
                // A previous delivery stored it but may not have completed the job
                debug!(job_id = %job.job_id, "Prediction already stored for job");
                return match self.predictions.get_prediction_by_job_id(&job.job_id).await {
                    Ok(existing) => self.complete(job, Some(existing.id)).await,
                    Err(e) => {
                        RouteOutcome::Retry(format!("Failed to load stored prediction: {}", e))
                    }
                };
            }
            Err(e) => {
                return self
                    .fail(job, &format!("Failed to store prediction: {}", e))
                    .await
            }
        };

        if let Err(e) = self
            .users
            .touch_last_prediction(job.user_id, saved.created_at)
            .await
        {
            warn!(user_id = job.user_id, "Could not update last prediction time: {}", e);
        }

        info!(
            job_id = %job.job_id,
            prediction_id = saved.id,
            risk_score,
            "Prediction stored"
        );
        self.complete(job, Some(saved.id)).await
    }

    async fn complete(&self, job: &Job, prediction_ref: Option<i64>) -> RouteOutcome {
        match self
            .jobs
            .update_job_status_with_result(&job.job_id, prediction_ref)
            .await
        {
            Ok(_) => RouteOutcome::Completed { prediction_ref },
            Err(RisklineError::InvalidTransition { from, .. }) => {
                debug!(job_id = %job.job_id, status = %from, "Job already settled");
                RouteOutcome::Duplicate
            }
            Err(e) => RouteOutcome::Retry(format!("Failed to complete job: {}", e)),
        }
    }

    async fn fail(&self, job: &Job, reason: &str) -> RouteOutcome {
        match self
            .jobs
            .update_job_status(&job.job_id, JobStatus::Failed, Some(reason))
            .await
        {
            Ok(_) => {
                JobEvent::new(JobEventKind::ResponseApplied, &job.job_id, self.clock.now())
                    .with_user(job.user_id)
                    .with_transition(Some(JobStatus::Submitted), JobStatus::Failed)
                    .since(job.created_at)
                    .with_error(reason)
                    .emit();
                RouteOutcome::Failed(reason.to_string())
            }
            Err(RisklineError::InvalidTransition { .. }) => RouteOutcome::Duplicate,
            Err(e) => {
                warn!(job_id = %job.job_id, "Could not mark job failed ({}): {}", reason, e);
                RouteOutcome::Failed(reason.to_string())
            }
        }
    }
}

fn attribution(entry: &ExplanationEntry) -> Attribution {
    Attribution {
        shap: entry.shap,
        contribution: entry.contribution,
        impact: entry.impact.round() as i32,
    }
}

/// Attribution triples for all nine features; missing keys stay zero
pub fn attributions_from(explanation: &HashMap<String, ExplanationEntry>) -> FeatureAttributions {
    let mut attributions = FeatureAttributions::default();
    for feature in Feature::WIRE_ORDER {
        if let Some(entry) = explanation.get(feature.explanation_key()) {
            attributions.set(feature, attribution(entry));
        }
    }
    attributions
}

/// Inputs recorded by the worker, or the values echoed in the explanation
fn inputs_for(job: &Job, explanation: &HashMap<String, ExplanationEntry>) -> FeatureInfo {
    if let Some(ref features) = job.features {
        return features.clone();
    }

    let value = |feature: Feature| {
        explanation
            .get(feature.explanation_key())
            .map(|entry| entry.value)
            .unwrap_or_default()
    };
    FeatureInfo {
        age: value(Feature::Age).round() as i32,
        smoking_status: value(Feature::SmokingStatus).round() as i32,
        is_cholesterol: value(Feature::IsCholesterol) >= 0.5,
        is_macrosomic_baby: value(Feature::IsMacrosomicBaby).round() as i32,
        physical_activity_frequency: value(Feature::PhysicalActivityFrequency).round() as i32,
        is_bloodline: value(Feature::IsBloodline) >= 0.5,
        brinkman_index: value(Feature::BrinkmanIndex).round() as i32,
        bmi: value(Feature::Bmi),
        is_hypertension: value(Feature::IsHypertension) >= 0.5,
        avg_smoke_count: job
            .what_if_input
            .as_ref()
            .map(|w| w.avg_smoke_count)
            .unwrap_or_default(),
    }
}

/// Score as a percentage with two decimals
pub fn risk_percentage(risk_score: f64) -> f64 {
    (risk_score * 10_000.0).round() / 100.0
}

/// Map stored under `whatif:<job_id>`
pub fn what_if_result(
    job: &Job,
    risk_score: f64,
    response: &MlResponseEnvelope,
    now: &chrono::DateTime<chrono::Utc>,
) -> Value {
    let explanation: Map<String, Value> = Feature::WIRE_ORDER
        .into_iter()
        .map(|feature| {
            let triple = response
                .explanation
                .get(feature.explanation_key())
                .map(attribution)
                .unwrap_or_default();
            (
                feature.name().to_string(),
                json!({
                    "shap": triple.shap,
                    "contribution": triple.contribution,
                    "impact": triple.impact,
                }),
            )
        })
        .collect();

    let processing_time = response
        .elapsed_time
        .map(|secs| format!("{:.2}s", secs))
        .unwrap_or_else(|| "unknown".to_string());

    json!({
        "job_id": job.job_id,
        "user_id": job.user_id,
        "is_what_if": true,
        "risk_score": risk_score,
        "risk_percentage": risk_percentage(risk_score),
        "feature_info": inputs_for(job, &response.explanation),
        "what_if_input": job.what_if_input,
        "explanation": explanation,
        "processing_time": processing_time,
        "timestamp": response.timestamp_or(*now).to_rfc3339(),
    })
}

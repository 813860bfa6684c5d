//! HTTP routes for prediction jobs
//!
//! - POST /prediction                       - Submit a canonical job
//! - POST /prediction/what-if               - Submit a hypothetical job
//! - GET  /prediction/job/{job_id}/status   - Poll job state
//! - GET  /prediction/job/{job_id}/result   - Fetch the final result
//! - POST /prediction/job/{job_id}/cancel   - Cancel a job not yet submitted
//! - GET  /prediction/jobs                  - List the caller's jobs
//!
//! Every route requires a bearer token; jobs are only visible to their owner.

use bytes::Bytes;
use hyper::body::Body;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    authenticate, cors_preflight, error_response, json_response, method_not_allowed,
    not_found_response, parse_json_body, parse_query, BoxBody, ErrorResponse,
};
use crate::features::{Feature, FeatureInfo, WhatIfOverride};
use crate::jobs::{Job, JobStatus};
use crate::orchestrator::ResultLookup;
use crate::server::AppState;
use crate::store::models::{Prediction, UserId};
use crate::types::RisklineError;
use crate::worker::risk_percentage;

const DEFAULT_LIST_LIMIT: usize = 10;
const MAX_LIST_LIMIT: usize = 100;

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub poll_url: String,
    pub submit_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub what_if_input: Option<WhatIfOverride>,
}

impl SubmitResponse {
    fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            poll_url: format!("/prediction/job/{}/status", job.job_id),
            submit_time: job.created_at.to_rfc3339(),
            what_if_input: job.what_if_input.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub is_what_if: bool,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Only for completed canonical jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PredictionDocument>,
}

/// Attribution triple plus the explanation text, when one has been written
#[derive(Debug, Serialize)]
pub struct FeatureExplanation {
    pub shap: f64,
    pub contribution: f64,
    pub impact: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Canonical result document
#[derive(Debug, Serialize)]
pub struct PredictionDocument {
    pub job_id: String,
    pub prediction_id: i64,
    pub user_id: UserId,
    pub is_what_if: bool,
    pub risk_score: f64,
    pub risk_percentage: f64,
    pub feature_info: FeatureInfo,
    pub explanation: BTreeMap<&'static str, FeatureExplanation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_at: String,
}

impl From<Prediction> for PredictionDocument {
    fn from(prediction: Prediction) -> Self {
        let explanation = Feature::WIRE_ORDER
            .into_iter()
            .map(|feature| {
                let attribution = prediction.attributions.get(feature);
                let text = prediction
                    .explanations
                    .as_ref()
                    .and_then(|texts| texts.get(feature.name()))
                    .cloned();
                (
                    feature.name(),
                    FeatureExplanation {
                        shap: attribution.shap,
                        contribution: attribution.contribution,
                        impact: attribution.impact,
                        explanation: text,
                    },
                )
            })
            .collect();

        Self {
            job_id: prediction.job_id,
            prediction_id: prediction.id,
            user_id: prediction.user_id,
            is_what_if: false,
            risk_score: prediction.risk_score,
            risk_percentage: risk_percentage(prediction.risk_score),
            feature_info: prediction.inputs,
            explanation,
            summary: prediction.summary,
            created_at: prediction.created_at.to_rfc3339(),
        }
    }
}

/// Body of `/result` for a job without a result
#[derive(Debug, Serialize)]
pub struct NotReadyResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub cancelled_at: String,
}

#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub is_what_if: bool,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            is_what_if: job.is_what_if,
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
            error: job.error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
    pub count: usize,
}

// =============================================================================
// Router
// =============================================================================

/// Handle `/prediction*` requests; `None` when the path is not ours
pub async fn handle_prediction_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>>
where
    B: Body<Data = Bytes>,
    B::Error: std::fmt::Display,
{
    let path = req.uri().path().trim_end_matches('/').to_string();
    let method = req.method().clone();

    if !path.starts_with("/prediction") {
        return None;
    }
    if method == Method::OPTIONS {
        return Some(cors_preflight());
    }

    let user_id = match authenticate(&state, &req) {
        Ok(user_id) => user_id,
        Err(e) => return Some(error_response(&e)),
    };

    let response = match (method, path.as_str()) {
        (Method::POST, "/prediction") => handle_submit(&state, user_id).await,
        (Method::POST, "/prediction/what-if") => handle_submit_what_if(req, &state, user_id).await,
        (Method::GET, "/prediction/jobs") => handle_list(&req, &state, user_id).await,
        (_, "/prediction") | (_, "/prediction/what-if") | (_, "/prediction/jobs") => {
            method_not_allowed()
        }
        (method, path) => match parse_job_path(path) {
            Some((job_id, "status")) if method == Method::GET => {
                handle_status(&state, job_id, user_id).await
            }
            Some((job_id, "result")) if method == Method::GET => {
                handle_result(&state, job_id, user_id).await
            }
            Some((job_id, "cancel")) if method == Method::POST => {
                handle_cancel(&state, job_id, user_id).await
            }
            Some((_, "status" | "result" | "cancel")) => method_not_allowed(),
            _ => not_found_response(path),
        },
    };

    Some(response)
}

/// `/prediction/job/{job_id}/{action}`
fn parse_job_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix("/prediction/job/")?;
    let (job_id, action) = rest.split_once('/')?;
    if job_id.is_empty() || action.contains('/') {
        return None;
    }
    Some((job_id, action))
}

// =============================================================================
// Handlers
// =============================================================================

async fn handle_submit(state: &AppState, user_id: UserId) -> Response<BoxBody> {
    match state.orchestrator.submit_job(user_id, None).await {
        Ok(job) => json_response(StatusCode::ACCEPTED, &SubmitResponse::from_job(&job)),
        Err(e) => submit_error(user_id, &e),
    }
}

async fn handle_submit_what_if<B>(
    req: Request<B>,
    state: &AppState,
    user_id: UserId,
) -> Response<BoxBody>
where
    B: Body<Data = Bytes>,
    B::Error: std::fmt::Display,
{
    let overrides: WhatIfOverride = match parse_json_body(req).await {
        Ok(overrides) => overrides,
        Err(e) => {
            return error_response(&RisklineError::InvalidWhatIfInput(e.to_string()));
        }
    };

    match state.orchestrator.submit_job(user_id, Some(overrides)).await {
        Ok(job) => json_response(StatusCode::ACCEPTED, &SubmitResponse::from_job(&job)),
        Err(e) => submit_error(user_id, &e),
    }
}

fn submit_error(user_id: UserId, err: &RisklineError) -> Response<BoxBody> {
    if err.status_code().is_server_error() {
        warn!(user_id, "Job submission failed: {}", err);
    } else {
        debug!(user_id, "Job submission rejected: {}", err);
    }
    error_response(err)
}

async fn handle_status(state: &AppState, job_id: &str, user_id: UserId) -> Response<BoxBody> {
    let job = match state.orchestrator.get_job(job_id, user_id).await {
        Ok(job) => job,
        Err(e) => return error_response(&e),
    };

    let result = match state.orchestrator.prediction_for(&job).await {
        Ok(prediction) => prediction.map(PredictionDocument::from),
        Err(e) => {
            warn!(job_id, "Prediction lookup failed: {}", e);
            None
        }
    };

    json_response(
        StatusCode::OK,
        &StatusResponse {
            job_id: job.job_id,
            status: job.status,
            is_what_if: job.is_what_if,
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
            error: job.error,
            result,
        },
    )
}

async fn handle_result(state: &AppState, job_id: &str, user_id: UserId) -> Response<BoxBody> {
    match state.orchestrator.get_result(job_id, user_id).await {
        Ok(ResultLookup::Prediction { prediction, .. }) => {
            json_response(StatusCode::OK, &PredictionDocument::from(prediction))
        }
        Ok(ResultLookup::WhatIf { result, .. }) => json_response(StatusCode::OK, &result),
        Ok(ResultLookup::Expired { job }) => json_response(
            StatusCode::NOT_FOUND,
            &ErrorResponse::new(
                format!("What-if result for job {} is no longer available", job.job_id),
                "RESULT_EXPIRED",
            )
            .with_help("What-if results are kept for one hour; submit the what-if request again"),
        ),
        Ok(ResultLookup::NotReady { job }) => {
            let message = match job.status {
                JobStatus::Failed => "Job failed".to_string(),
                JobStatus::Cancelled => "Job was cancelled".to_string(),
                status => format!("Job is {}, result not available yet", status),
            };
            json_response(
                StatusCode::NOT_FOUND,
                &NotReadyResponse {
                    job_id: job.job_id,
                    status: job.status,
                    message,
                    error: job.error,
                },
            )
        }
        Err(e) => error_response(&e),
    }
}

async fn handle_cancel(state: &AppState, job_id: &str, user_id: UserId) -> Response<BoxBody> {
    match state.orchestrator.cancel_job(job_id, user_id).await {
        Ok(job) => json_response(
            StatusCode::OK,
            &CancelResponse {
                job_id: job.job_id,
                status: job.status,
                cancelled_at: job.updated_at.to_rfc3339(),
            },
        ),
        Err(e) => error_response(&e),
    }
}

/// Query of `GET /prediction/jobs`; both values stay raw for error messages
#[derive(Debug, Default, Deserialize)]
struct ListJobsQuery {
    status: Option<String>,
    limit: Option<String>,
}

async fn handle_list<B>(req: &Request<B>, state: &AppState, user_id: UserId) -> Response<BoxBody> {
    let query: ListJobsQuery = match parse_query(req) {
        Ok(query) => query,
        Err(e) => return error_response(&e),
    };

    let status = match query.status.as_deref().filter(|value| !value.is_empty()) {
        Some(value) => match value.parse::<JobStatus>() {
            Ok(parsed) => Some(parsed),
            Err(e) => return error_response(&RisklineError::Http(e)),
        },
        None => None,
    };

    let limit = match query.limit.as_deref() {
        None => DEFAULT_LIST_LIMIT,
        Some(value) => match value.parse::<usize>() {
            Ok(parsed) if parsed > 0 => parsed.min(MAX_LIST_LIMIT),
            _ => {
                return error_response(&RisklineError::Http(format!(
                    "limit must be a positive integer, got '{}'",
                    value
                )))
            }
        },
    };

    match state.orchestrator.list_jobs(user_id, status, limit).await {
        Ok(jobs) => {
            let jobs: Vec<JobSummary> = jobs.iter().map(JobSummary::from).collect();
            json_response(
                StatusCode::OK,
                &JobListResponse {
                    count: jobs.len(),
                    jobs,
                },
            )
        }
        Err(e) => error_response(&e),
    }
}

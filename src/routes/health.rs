//! Health check endpoints
//!
//! - /health  - Liveness probe, 200 while the process is up
//! - /ready   - Readiness probe, 200 only when the job store and bus are reachable
//! - /version - Build information
//! - POST /health/ml - Publish a keep-alive probe to the ML service

use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use super::{error_response, json_response, BoxBody};
use crate::orchestrator::OrchestratorStats;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    /// `online` while the orchestrator runs, `degraded` otherwise
    pub status: &'static str,
    pub version: &'static str,
    /// Seconds since the server started
    pub uptime: u64,
    pub timestamp: String,
    pub dev_mode: bool,
    pub orchestrator: OrchestratorStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn build_health_response(state: &AppState) -> HealthResponse {
    let stats = state.orchestrator.stats().await;
    HealthResponse {
        healthy: true,
        status: if stats.running { "online" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        dev_mode: state.dev_mode,
        orchestrator: stats,
        error: None,
    }
}

/// Handle liveness probe (/health)
pub async fn health_check(state: Arc<AppState>) -> Response<BoxBody> {
    let response = build_health_response(&state).await;
    json_response(StatusCode::OK, &response)
}

/// Handle readiness probe (/ready)
pub async fn readiness_check(state: Arc<AppState>) -> Response<BoxBody> {
    let mut response = build_health_response(&state).await;

    let ready = match state.orchestrator.ready().await {
        Ok(()) => response.orchestrator.running,
        Err(e) => {
            response.error = Some(e.to_string());
            false
        }
    };
    if !response.orchestrator.running && response.error.is_none() {
        response.error = Some("Orchestrator is not running".to_string());
    }

    response.healthy = ready;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json_response(status, &response)
}

#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

/// Handle version endpoint (/version)
pub fn version_info() -> Response<BoxBody> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "riskline",
    };
    json_response(StatusCode::OK, &response)
}

#[derive(Serialize)]
pub struct MlProbeResponse {
    pub correlation_id: String,
    pub status: &'static str,
}

/// Handle POST /health/ml
pub async fn ml_health_probe(state: Arc<AppState>) -> Response<BoxBody> {
    match state.orchestrator.health_check_ml().await {
        Ok(correlation_id) => json_response(
            StatusCode::ACCEPTED,
            &MlProbeResponse {
                correlation_id,
                status: "published",
            },
        ),
        Err(e) => error_response(&e),
    }
}

//! HTTP routes for Riskline
//!
//! - `prediction`: job submission, polling, results, cancellation, listing
//! - `health`: liveness, readiness, version, ML keep-alive probe
//!
//! Handlers are generic over the request body so they can be driven with
//! in-memory bodies as well as hyper's `Incoming`.

pub mod health;
pub mod prediction;

pub use health::{health_check, ml_health_probe, readiness_check, version_info};
pub use prediction::handle_prediction_request;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{self, HeaderValue};
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::server::AppState;
use crate::store::models::UserId;
use crate::types::RisklineError;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Largest JSON body accepted
const MAX_BODY_BYTES: usize = 10 * 1024;

/// Error payload of every failed request
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl From<&RisklineError> for ErrorResponse {
    fn from(err: &RisklineError) -> Self {
        let response = ErrorResponse::new(err.to_string(), err.code());
        match err {
            RisklineError::IncompleteProfile(missing) => response.with_help(format!(
                "Complete your health profile: {}",
                missing.join(", ")
            )),
            RisklineError::QueueFull => {
                response.with_help("The service is busy, retry with backoff")
            }
            _ => response,
        }
    }
}

// =============================================================================
// Response helpers
// =============================================================================

fn with_cors(mut response: Response<BoxBody>) -> Response<BoxBody> {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    response
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    let mut response = Response::new(full_body(json));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    with_cors(response)
}

pub fn error_response(err: &RisklineError) -> Response<BoxBody> {
    json_response(err.status_code(), &ErrorResponse::from(err))
}

pub fn not_found_response(path: &str) -> Response<BoxBody> {
    json_response(
        StatusCode::NOT_FOUND,
        &ErrorResponse::new(format!("No route for {}", path), "NOT_FOUND"),
    )
}

pub fn method_not_allowed() -> Response<BoxBody> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &ErrorResponse::new("Method not allowed", "METHOD_NOT_ALLOWED"),
    )
}

pub fn cors_preflight() -> Response<BoxBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    with_cors(response)
}

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

fn empty_body() -> BoxBody {
    full_body(Bytes::new())
}

// =============================================================================
// Request helpers
// =============================================================================

/// Read and decode a JSON body; an empty body decodes as `null`
pub async fn parse_json_body<T, B>(req: Request<B>) -> Result<T, RisklineError>
where
    T: DeserializeOwned,
    B: Body<Data = Bytes>,
    B::Error: std::fmt::Display,
{
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| RisklineError::Http(format!("Failed to read body: {}", e)))?;

    let bytes = body.to_bytes();
    if bytes.len() > MAX_BODY_BYTES {
        return Err(RisklineError::Http("Request body too large".into()));
    }

    let bytes = if bytes.iter().all(u8::is_ascii_whitespace) {
        Bytes::from_static(b"null")
    } else {
        bytes
    };

    serde_json::from_slice(&bytes).map_err(|e| RisklineError::Http(format!("Invalid JSON: {}", e)))
}

fn get_auth_header<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Caller's user id from the bearer token
pub fn authenticate<B>(state: &AppState, req: &Request<B>) -> Result<UserId, RisklineError> {
    let token = crate::auth::extract_token_from_header(get_auth_header(req))
        .ok_or_else(|| RisklineError::Unauthorized("Missing bearer token".into()))?;

    state.jwt.verify_token(token).map(|claims| claims.user_id)
}

/// Decode the percent-encoded query string into `T`
pub fn parse_query<T, B>(req: &Request<B>) -> Result<T, RisklineError>
where
    T: serde::de::DeserializeOwned,
{
    let query = req.uri().query().unwrap_or("");
    serde_urlencoded::from_str(query)
        .map_err(|e| RisklineError::Http(format!("Invalid query parameters: {}", e)))
}

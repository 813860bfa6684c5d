//! Shared error type for Riskline

use hyper::StatusCode;
use thiserror::Error;

use crate::jobs::JobStatus;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, RisklineError>;

#[derive(Error, Debug)]
pub enum RisklineError {
    /// User data cannot be assembled into a feature vector.
    /// Each entry is a human-readable reason ("cholesterol status is required").
    #[error("{}", .0.join("; "))]
    IncompleteProfile(Vec<String>),

    #[error("Invalid what-if input: {0}")]
    InvalidWhatIfInput(String),

    #[error("Job queue is full, retry later")]
    QueueFull,

    #[error("ML bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("ML service error: {0}")]
    MlService(String),

    #[error("Malformed ML response: {0}")]
    MalformedResponse(String),

    #[error("Invalid feature vector: {0}")]
    InvalidFeatures(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    CannotCancel(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RisklineError {
    /// HTTP status used when this error reaches a client
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::IncompleteProfile(_)
            | Self::InvalidWhatIfInput(_)
            | Self::InvalidFeatures(_)
            | Self::CannotCancel(_)
            | Self::Http(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::IncompleteProfile(_) => "INCOMPLETE_PROFILE",
            Self::InvalidWhatIfInput(_) => "INVALID_WHAT_IF_INPUT",
            Self::QueueFull => "QUEUE_FULL",
            Self::BusUnavailable(_) | Self::Nats(_) => "BUS_UNAVAILABLE",
            Self::MlService(_) => "ML_SERVICE_ERROR",
            Self::MalformedResponse(_) => "MALFORMED_RESPONSE",
            Self::InvalidFeatures(_) => "INVALID_FEATURES",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::CannotCancel(_) => "CANNOT_CANCEL",
            Self::Conflict(_) => "CONFLICT",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::CacheUnavailable(_) => "CACHE_UNAVAILABLE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Http(_) => "BAD_REQUEST",
            Self::Timeout(_) => "TIMEOUT",
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

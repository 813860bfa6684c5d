//! Configuration for Riskline
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::{IpAddr, SocketAddr};

use crate::logging::LogFormat;
use crate::nats::QueueNames;
use crate::orchestrator::{default_worker_count, OrchestratorConfig};
use crate::types::RisklineError;

/// Insecure secret used only with `--dev-mode`
const DEV_JWT_SECRET: &str = "dev-only-insecure-secret";

/// Riskline - diabetes risk prediction job orchestrator
#[derive(Parser, Debug, Clone)]
#[command(name = "riskline")]
#[command(about = "Prediction job orchestrator between the mobile API and the ML scoring service")]
pub struct Args {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// HTTP port
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Enable development mode (insecure JWT secret, in-process cache fallback)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Message bus configuration
    #[command(flatten)]
    pub bus: BusArgs,

    /// Redis URL for the what-if result cache
    #[arg(long, env = "REDIS_URL", default_value = "redis://:redis123@localhost:6379/0")]
    pub redis_url: String,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "riskline")]
    pub mongodb_db: String,

    /// HS256 secret for bearer tokens (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Number of job workers [default: max(cpu count, 3)]
    #[arg(long, env = "WORKER_COUNT")]
    pub worker_count: Option<usize>,

    /// Capacity of the in-process job queue
    #[arg(long, env = "QUEUE_CAPACITY", default_value = "2000")]
    pub queue_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log line format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

/// Message bus connection and queue names
#[derive(Parser, Debug, Clone)]
pub struct BusArgs {
    /// NATS server URL
    #[arg(long, env = "BUS_URL", default_value = "nats://127.0.0.1:4222")]
    pub bus_url: String,

    /// NATS username (optional)
    #[arg(long, env = "BUS_USER")]
    pub bus_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "BUS_PASSWORD")]
    pub bus_password: Option<String>,

    /// Queue the ML service reads scoring requests from
    #[arg(long, env = "ML_REQUEST_QUEUE", default_value = "ml.prediction.hybrid_request")]
    pub request_queue: String,

    /// Shared queue scoring responses arrive on
    #[arg(long, env = "ML_RESPONSE_QUEUE", default_value = "ml.prediction.hybrid_response")]
    pub response_queue: String,

    #[arg(long, env = "ML_HEALTH_REQUEST_QUEUE", default_value = "ml.health.request")]
    pub health_request_queue: String,

    #[arg(long, env = "ML_HEALTH_RESPONSE_QUEUE", default_value = "ml.health.response")]
    pub health_response_queue: String,
}

impl BusArgs {
    pub fn queue_names(&self) -> QueueNames {
        QueueNames {
            request: self.request_queue.clone(),
            response: self.response_queue.clone(),
            health_request: self.health_request_queue.clone(),
            health_response: self.health_response_queue.clone(),
        }
    }
}

impl Args {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Effective JWT secret (falls back to an insecure default in dev mode)
    pub fn jwt_secret(&self) -> Result<String, RisklineError> {
        match (&self.jwt_secret, self.dev_mode) {
            (Some(secret), _) => Ok(secret.clone()),
            (None, true) => Ok(DEV_JWT_SECRET.to_string()),
            (None, false) => Err(RisklineError::Config(
                "JWT_SECRET is required in production mode".to_string(),
            )),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(default_worker_count)
    }

    /// Orchestrator tunables derived from the arguments
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            worker_count: self.worker_count(),
            queue_capacity: self.queue_capacity,
            ..OrchestratorConfig::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.as_deref().map_or(true, str::is_empty) {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if self.worker_count == Some(0) {
            return Err("WORKER_COUNT must be at least 1".to_string());
        }

        if self.queue_capacity == 0 {
            return Err("QUEUE_CAPACITY must be at least 1".to_string());
        }

        let queues = self.bus.queue_names();
        let mut names = queues.all().to_vec();
        names.sort_unstable();
        names.dedup();
        if names.len() != 4 {
            return Err("ML queue names must be distinct".to_string());
        }

        Ok(())
    }
}

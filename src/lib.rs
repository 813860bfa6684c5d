//! Riskline - diabetes risk prediction job orchestrator
//!
//! Riskline sits between the mobile-facing HTTP API and the external ML
//! scoring service. Requests become durable jobs, workers assemble the
//! feature vector and publish it on NATS, and a single response consumer
//! correlates results back to their job.
//!
//! ## Services
//!
//! - **Features**: 9-element feature vector derivation from profile + activity history
//! - **Jobs**: job state machine, bounded in-process queue and worker pool
//! - **NATS**: ML request dispatch and shared response queue consumption
//! - **Worker**: response correlator and result router
//! - **Cache**: TTL cache for what-if results
//! - **Orchestrator**: start/stop lifecycle, pending-job recovery, cleanup

pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod features;
pub mod jobs;
pub mod logging;
pub mod nats;
pub mod orchestrator;
pub mod routes;
pub mod server;
pub mod store;
pub mod types;
pub mod worker;

pub use config::Args;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use server::{run, AppState};
pub use types::{Result, RisklineError};

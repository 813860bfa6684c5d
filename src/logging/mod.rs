//! Logging infrastructure for Riskline
//!
//! Process-wide `tracing` subscriber plus the job lifecycle audit events.

pub mod job_events;

pub use job_events::{JobEvent, JobEventKind, JOB_EVENT_TARGET};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log line layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Default filter when `RUST_LOG` is unset
pub fn default_filter(level: &str) -> String {
    format!("riskline={level},{target}={level},info", target = JOB_EVENT_TARGET)
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
pub fn init(level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init(),
    }
}

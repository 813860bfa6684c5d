//! Database schemas for Riskline
//!
//! Jobs, predictions and the id counter are owned by the orchestrator. Users,
//! profiles and activities belong to other services and are only read.

mod activity;
mod counter;
mod job;
mod prediction;
mod user;

pub use activity::{ActivityDoc, ACTIVITY_COLLECTION};
pub use counter::{CounterDoc, COUNTER_COLLECTION, PREDICTION_COUNTER};
pub use job::{JobDoc, JOB_COLLECTION};
pub use prediction::{PredictionDoc, PREDICTION_COLLECTION};
pub use user::{ProfileDoc, UserDoc, PROFILE_COLLECTION, USER_COLLECTION};

//! ML dispatch client
//!
//! Fire-and-forget: `predict_async` returns once the request is stored by
//! the broker. There is deliberately no synchronous predict call.

use std::sync::Arc;
use tracing::{debug, info};

use super::client::QueueNames;
use super::messages::{HealthRequestEnvelope, MlRequestEnvelope, CONTENT_TYPE_JSON};
use super::{BusPublisher, OutboundMessage};
use crate::clock::Clock;
use crate::features::{Feature, FeatureVector};
use crate::types::{Result, RisklineError};

#[derive(Clone)]
pub struct MlDispatchClient {
    bus: Arc<dyn BusPublisher>,
    queues: QueueNames,
    clock: Arc<dyn Clock>,
}

impl MlDispatchClient {
    pub fn new(bus: Arc<dyn BusPublisher>, queues: QueueNames, clock: Arc<dyn Clock>) -> Self {
        Self { bus, queues, clock }
    }

    pub fn queues(&self) -> &QueueNames {
        &self.queues
    }

    /// Validate and publish a scoring request correlated by `correlation_id`
    pub async fn predict_async(
        &self,
        correlation_id: &str,
        features: &FeatureVector,
    ) -> Result<()> {
        validate_features(features)?;

        let envelope = MlRequestEnvelope::new(correlation_id, *features, self.clock.now());
        self.bus
            .publish(OutboundMessage {
                subject: self.queues.request.clone(),
                correlation_id: correlation_id.to_string(),
                reply_to: self.queues.response.clone(),
                content_type: CONTENT_TYPE_JSON.to_string(),
                payload: envelope.to_bytes()?,
            })
            .await?;

        debug!(correlation_id, queue = %self.queues.request, "Published ML request");
        Ok(())
    }

    /// Publish a keep-alive probe; returns its correlation id
    pub async fn health_check_async(&self) -> Result<String> {
        let envelope = HealthRequestEnvelope::new(self.clock.now());
        let correlation_id = envelope.correlation_id.clone();

        self.bus
            .publish(OutboundMessage {
                subject: self.queues.health_request.clone(),
                correlation_id: correlation_id.clone(),
                reply_to: self.queues.health_response.clone(),
                content_type: CONTENT_TYPE_JSON.to_string(),
                payload: envelope.to_bytes()?,
            })
            .await?;

        info!(correlation_id = %correlation_id, "Published ML health probe");
        Ok(correlation_id)
    }

    pub fn is_open(&self) -> bool {
        self.bus.is_open()
    }

    pub async fn close(&self) -> Result<()> {
        self.bus.close().await
    }
}

/// Wire rules for the request vector; checked before anything is published
pub fn validate_features(features: &FeatureVector) -> Result<()> {
    fn one_of(value: f64, allowed: &[f64]) -> bool {
        allowed.contains(&value)
    }

    let mut problems = Vec::new();

    if features.as_slice().iter().any(|v| !v.is_finite()) {
        problems.push("all features must be finite numbers".to_string());
    }

    let age = features.get(Feature::Age);
    if age <= 0.0 {
        problems.push(format!("age must be positive, got {}", age));
    }
    if !one_of(features.get(Feature::SmokingStatus), &[0.0, 1.0, 2.0]) {
        problems.push("smoking_status must be 0, 1 or 2".to_string());
    }
    for flag in [
        Feature::IsCholesterol,
        Feature::IsBloodline,
        Feature::IsHypertension,
    ] {
        if !one_of(features.get(flag), &[0.0, 1.0]) {
            problems.push(format!("{} must be 0 or 1", flag.name()));
        }
    }
    if !one_of(features.get(Feature::IsMacrosomicBaby), &[0.0, 1.0, 2.0]) {
        problems.push("is_macrosomic_baby must be 0, 1 or 2".to_string());
    }
    if features.get(Feature::PhysicalActivityFrequency) < 0.0 {
        problems.push("physical_activity_frequency must not be negative".to_string());
    }
    if !one_of(features.get(Feature::BrinkmanIndex), &[0.0, 1.0, 2.0, 3.0]) {
        problems.push("brinkman_index must be 0, 1, 2 or 3".to_string());
    }
    let bmi = features.get(Feature::Bmi);
    if !(10.0..=60.0).contains(&bmi) {
        problems.push(format!("bmi must be between 10 and 60, got {}", bmi));
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(RisklineError::InvalidFeatures(problems.join("; ")))
    }
}

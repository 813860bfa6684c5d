//! Wire envelopes exchanged with the ML service
//!
//! All bodies are JSON. Requests carry the positional feature vector; the
//! response names features with the ML service's own keys (see
//! [`Feature::explanation_key`](crate::features::Feature::explanation_key)).

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use crate::features::FeatureVector;

/// Content type of every envelope
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Header carrying the correlation id (the job id)
pub const HEADER_CORRELATION_ID: &str = "Correlation-Id";

/// Header naming the queue the answer must go to
pub const HEADER_REPLY_TO: &str = "Reply-To";

pub const HEADER_CONTENT_TYPE: &str = "Content-Type";

/// Scoring request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MlRequestEnvelope {
    pub features: FeatureVector,
    pub correlation_id: String,
    /// ISO-8601, UTC
    pub timestamp: String,
}

impl MlRequestEnvelope {
    pub fn new(correlation_id: &str, features: FeatureVector, now: DateTime<Utc>) -> Self {
        Self {
            features,
            correlation_id: correlation_id.to_string(),
            timestamp: now.to_rfc3339(),
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// Attribution of one feature as reported by the ML service
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ExplanationEntry {
    #[serde(default, deserialize_with = "null_as_default")]
    pub shap: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub contribution: f64,
    /// Sign of the effect; some model builds send it as a float
    #[serde(default, deserialize_with = "null_as_default")]
    pub impact: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: f64,
}

/// Scoring response
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MlResponseEnvelope {
    #[serde(default)]
    pub prediction: Option<f64>,
    /// Error replies send `null` here
    #[serde(default, deserialize_with = "null_as_default")]
    pub explanation: HashMap<String, ExplanationEntry>,
    /// Seconds spent in inference
    #[serde(default)]
    pub elapsed_time: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Treat an explicit `null` like a missing key
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl MlResponseEnvelope {
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Response time, or `fallback` when missing or unparseable
    pub fn timestamp_or(&self, fallback: DateTime<Utc>) -> DateTime<Utc> {
        self.timestamp
            .as_deref()
            .and_then(parse_response_timestamp)
            .unwrap_or(fallback)
    }
}

/// Keep-alive probe for the ML service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthRequestEnvelope {
    pub correlation_id: String,
    pub timestamp: String,
}

impl HealthRequestEnvelope {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            correlation_id: format!("health_{}", uuid::Uuid::new_v4().simple()),
            timestamp: now.to_rfc3339(),
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// Answer to a keep-alive probe
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthResponseEnvelope {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub elapsed_time: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Naive layouts tried in order after the offset-aware ones fail
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.6f",
    "%Y-%m-%dT%H:%M:%S",
];

const UTC_SUFFIXED_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%d %H:%M:%S%.f UTC",
    "%Y-%m-%d %H:%M:%S UTC",
];

const SPACE_SEPARATED_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

/// Parse the response `timestamp`, which different ML service builds render
/// differently. Naive values are taken as UTC.
///
/// Order: microsecond ISO, second ISO, RFC 3339 with offset (any fraction),
/// UTC-suffixed, space-separated.
pub fn parse_response_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    let naive = |formats: &[&str]| {
        formats
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| naive.and_utc())
    };

    naive(NAIVE_FORMATS)
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|| naive(UTC_SUFFIXED_FORMATS))
        .or_else(|| naive(SPACE_SEPARATED_FORMATS))
}

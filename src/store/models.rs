//! Domain records read and written by the orchestrator
//!
//! Users, profiles and activities are owned by other services; the
//! orchestrator only reads them. Predictions are created here and later
//! enriched (explanation text only) by other components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::features::{Feature, FeatureInfo};

/// Numeric user identifier
pub type UserId = i64;

/// Registered user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    /// Set every time a canonical prediction completes
    pub last_prediction_at: Option<DateTime<Utc>>,
}

/// Health profile consumed by the feature assembler
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub user_id: UserId,
    /// ISO-8601, either full RFC 3339 or `YYYY-MM-DD`
    pub date_of_birth: Option<String>,
    /// Centimetres
    pub height: Option<f64>,
    /// Kilograms
    pub weight: Option<f64>,
    pub bmi: Option<f64>,
    pub smoking_start_age: Option<i32>,
    pub smoking_stop_age: Option<i32>,
    /// Self-reported cigarettes per day
    pub avg_smoke_count: Option<i32>,
    /// Self-reported weekly activity, used until the activity log covers a full week
    pub physical_activity_frequency: Option<i32>,
    pub is_bloodline: Option<bool>,
    pub is_hypertension: Option<bool>,
    pub is_cholesterol: Option<bool>,
    /// 0 = no, 1 = yes, 2 = not applicable
    pub macrosomic_baby: Option<i32>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Smoke,
    Workout,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Smoke => "smoke",
            ActivityType::Workout => "workout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "smoke" => Some(ActivityType::Smoke),
            "workout" => Some(ActivityType::Workout),
            _ => None,
        }
    }
}

/// Logged activity event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub user_id: UserId,
    pub activity_type: ActivityType,
    /// Cigarettes counted, or workout units
    pub value: i32,
    pub activity_date: DateTime<Utc>,
}

/// Per-feature attribution triple returned by the ML service
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Attribution {
    pub shap: f64,
    pub contribution: f64,
    pub impact: i32,
}

/// Attribution triples for all nine model inputs
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureAttributions {
    pub age: Attribution,
    pub bmi: Attribution,
    pub brinkman_index: Attribution,
    pub is_hypertension: Attribution,
    pub is_cholesterol: Attribution,
    pub is_bloodline: Attribution,
    pub is_macrosomic_baby: Attribution,
    pub smoking_status: Attribution,
    pub physical_activity_frequency: Attribution,
}

impl FeatureAttributions {
    pub fn get(&self, feature: Feature) -> &Attribution {
        match feature {
            Feature::Age => &self.age,
            Feature::Bmi => &self.bmi,
            Feature::BrinkmanIndex => &self.brinkman_index,
            Feature::IsHypertension => &self.is_hypertension,
            Feature::IsCholesterol => &self.is_cholesterol,
            Feature::IsBloodline => &self.is_bloodline,
            Feature::IsMacrosomicBaby => &self.is_macrosomic_baby,
            Feature::SmokingStatus => &self.smoking_status,
            Feature::PhysicalActivityFrequency => &self.physical_activity_frequency,
        }
    }

    pub fn set(&mut self, feature: Feature, attribution: Attribution) {
        let slot = match feature {
            Feature::Age => &mut self.age,
            Feature::Bmi => &mut self.bmi,
            Feature::BrinkmanIndex => &mut self.brinkman_index,
            Feature::IsHypertension => &mut self.is_hypertension,
            Feature::IsCholesterol => &mut self.is_cholesterol,
            Feature::IsBloodline => &mut self.is_bloodline,
            Feature::IsMacrosomicBaby => &mut self.is_macrosomic_baby,
            Feature::SmokingStatus => &mut self.smoking_status,
            Feature::PhysicalActivityFrequency => &mut self.physical_activity_frequency,
        };
        *slot = attribution;
    }
}

/// Durable scoring artifact of a canonical job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    /// Surrogate id; assigned by the store on insert
    pub id: i64,
    /// Owning job (unique)
    pub job_id: String,
    pub user_id: UserId,
    /// Probability in [0, 1]
    pub risk_score: f64,
    /// The nine model inputs (plus average cigarette count) in natural types
    pub inputs: FeatureInfo,
    pub attributions: FeatureAttributions,
    /// LLM explanation text per feature, filled in later by another component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanations: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

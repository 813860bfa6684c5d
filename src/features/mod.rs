//! Feature vector for the diabetes risk model
//!
//! The ML service consumes a positional 9-element vector. The order is part
//! of the wire contract and must change in lockstep with the model:
//!
//! ```text
//! [age, smoking_status, is_cholesterol, is_macrosomic_baby,
//!  physical_activity_frequency, is_bloodline, brinkman_index, bmi,
//!  is_hypertension]
//! ```
//!
//! Responses name features with a different key set (`BMI`,
//! `moderate_physical_activity_frequency`); [`Feature`] maps between both.

pub mod assembler;
pub mod derive;

pub use assembler::{missing_profile_fields, AssembledFeatures, AssemblyInput, FeatureAssembler};
pub use derive::SmokingStatus;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Result, RisklineError};

/// Number of model inputs
pub const FEATURE_COUNT: usize = 9;

/// One model input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feature {
    Age,
    SmokingStatus,
    IsCholesterol,
    IsMacrosomicBaby,
    PhysicalActivityFrequency,
    IsBloodline,
    BrinkmanIndex,
    Bmi,
    IsHypertension,
}

impl Feature {
    /// All features in wire order
    pub const WIRE_ORDER: [Feature; FEATURE_COUNT] = [
        Feature::Age,
        Feature::SmokingStatus,
        Feature::IsCholesterol,
        Feature::IsMacrosomicBaby,
        Feature::PhysicalActivityFrequency,
        Feature::IsBloodline,
        Feature::BrinkmanIndex,
        Feature::Bmi,
        Feature::IsHypertension,
    ];

    /// Position in the request vector
    pub fn wire_index(self) -> usize {
        match self {
            Feature::Age => 0,
            Feature::SmokingStatus => 1,
            Feature::IsCholesterol => 2,
            Feature::IsMacrosomicBaby => 3,
            Feature::PhysicalActivityFrequency => 4,
            Feature::IsBloodline => 5,
            Feature::BrinkmanIndex => 6,
            Feature::Bmi => 7,
            Feature::IsHypertension => 8,
        }
    }

    /// Name used in feature info maps and stored predictions
    pub fn name(self) -> &'static str {
        match self {
            Feature::Age => "age",
            Feature::SmokingStatus => "smoking_status",
            Feature::IsCholesterol => "is_cholesterol",
            Feature::IsMacrosomicBaby => "is_macrosomic_baby",
            Feature::PhysicalActivityFrequency => "physical_activity_frequency",
            Feature::IsBloodline => "is_bloodline",
            Feature::BrinkmanIndex => "brinkman_index",
            Feature::Bmi => "bmi",
            Feature::IsHypertension => "is_hypertension",
        }
    }

    /// Key used in the ML response `explanation` map
    pub fn explanation_key(self) -> &'static str {
        match self {
            Feature::Bmi => "BMI",
            Feature::PhysicalActivityFrequency => "moderate_physical_activity_frequency",
            other => other.name(),
        }
    }

    pub fn from_explanation_key(key: &str) -> Option<Feature> {
        Feature::WIRE_ORDER
            .into_iter()
            .find(|feature| feature.explanation_key() == key)
    }
}

/// Ordered feature values as sent on the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn new(values: [f64; FEATURE_COUNT]) -> Self {
        Self(values)
    }

    pub fn from_slice(values: &[f64]) -> Result<Self> {
        let array: [f64; FEATURE_COUNT] = values.try_into().map_err(|_| {
            RisklineError::InvalidFeatures(format!(
                "expected {} features, got {}",
                FEATURE_COUNT,
                values.len()
            ))
        })?;
        Ok(Self(array))
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.0[feature.wire_index()]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Name -> value view, keyed by [`Feature::name`]
    pub fn to_named_map(&self) -> BTreeMap<&'static str, f64> {
        Feature::WIRE_ORDER
            .into_iter()
            .map(|feature| (feature.name(), self.get(feature)))
            .collect()
    }
}

impl TryFrom<Vec<f64>> for FeatureVector {
    type Error = RisklineError;

    fn try_from(values: Vec<f64>) -> Result<Self> {
        Self::from_slice(&values)
    }
}

impl From<FeatureVector> for Vec<f64> {
    fn from(vector: FeatureVector) -> Self {
        vector.0.to_vec()
    }
}

/// Feature values in their natural types, persisted with the job and the prediction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureInfo {
    pub age: i32,
    pub smoking_status: i32,
    pub is_cholesterol: bool,
    pub is_macrosomic_baby: i32,
    pub physical_activity_frequency: i32,
    pub is_bloodline: bool,
    pub brinkman_index: i32,
    pub bmi: f64,
    pub is_hypertension: bool,
    /// Not a model input; kept for display and what-if comparisons
    pub avg_smoke_count: i32,
}

impl FeatureInfo {
    pub fn value(&self, feature: Feature) -> f64 {
        fn flag(b: bool) -> f64 {
            if b {
                1.0
            } else {
                0.0
            }
        }

        match feature {
            Feature::Age => f64::from(self.age),
            Feature::SmokingStatus => f64::from(self.smoking_status),
            Feature::IsCholesterol => flag(self.is_cholesterol),
            Feature::IsMacrosomicBaby => f64::from(self.is_macrosomic_baby),
            Feature::PhysicalActivityFrequency => f64::from(self.physical_activity_frequency),
            Feature::IsBloodline => flag(self.is_bloodline),
            Feature::BrinkmanIndex => f64::from(self.brinkman_index),
            Feature::Bmi => self.bmi,
            Feature::IsHypertension => flag(self.is_hypertension),
        }
    }

    pub fn to_vector(&self) -> FeatureVector {
        FeatureVector(Feature::WIRE_ORDER.map(|feature| self.value(feature)))
    }

    pub fn to_named_map(&self) -> BTreeMap<&'static str, f64> {
        Feature::WIRE_ORDER
            .into_iter()
            .map(|feature| (feature.name(), self.value(feature)))
            .collect()
    }
}

/// Hypothetical inputs for a what-if job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhatIfOverride {
    pub smoking_status: i32,
    pub avg_smoke_count: i32,
    /// Kilograms
    pub weight: f64,
    pub is_hypertension: bool,
    pub is_cholesterol: bool,
    pub physical_activity_frequency: i32,
}

impl WhatIfOverride {
    /// Range checks applied before any job is created
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if SmokingStatus::from_code(self.smoking_status).is_none() {
            problems.push("smoking_status must be 0, 1 or 2");
        }
        if self.avg_smoke_count < 0 {
            problems.push("avg_smoke_count must not be negative");
        }
        if !self.weight.is_finite() || self.weight <= 0.0 || self.weight > 500.0 {
            problems.push("weight must be between 0 and 500 kg");
        }
        if self.physical_activity_frequency < 0 {
            problems.push("physical_activity_frequency must not be negative");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RisklineError::InvalidWhatIfInput(problems.join("; ")))
        }
    }
}

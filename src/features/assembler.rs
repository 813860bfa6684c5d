//! Feature assembler
//!
//! Builds the model input from the stored user, profile and activity log,
//! optionally overlaid with what-if values. Pure apart from reading the clock:
//! it never touches the bus or the stores, so it is safe to call concurrently.
//!
//! Source selection per field:
//!
//! | Feature            | Canonical                         | What-if                         |
//! |--------------------|-----------------------------------|---------------------------------|
//! | age                | date of birth                     | date of birth                   |
//! | bmi                | profile BMI                       | override weight + profile height|
//! | smoking_status     | classifier over profile + log     | override                        |
//! | avg smoke count    | reported, else derived from log   | override                        |
//! | brinkman_index     | ages x avg smoke count            | ages x override count           |
//! | activity frequency | log (established profile) / profile | override                      |
//! | hypertension       | profile                           | override                        |
//! | cholesterol        | profile                           | override                        |
//! | bloodline, macrosomic baby | profile                   | profile                         |

use std::sync::Arc;
use tracing::debug;

use super::derive::{
    age_on, average_smoke_count, brinkman_category, classify_smoking_status, compute_bmi,
    has_recent_smoking, parse_date_of_birth, physical_activity_frequency, smoking_years,
    SmokingFacts,
};
use super::{FeatureInfo, FeatureVector, WhatIfOverride};
use crate::clock::Clock;
use crate::store::models::{Activity, User, UserProfile};
use crate::types::{Result, RisklineError};

/// Everything the assembler reads for one job
#[derive(Debug, Clone, Copy)]
pub struct AssemblyInput<'a> {
    pub user: &'a User,
    pub profile: &'a UserProfile,
    pub activities: &'a [Activity],
    pub what_if: Option<&'a WhatIfOverride>,
}

/// Wire vector plus the same values in natural types
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledFeatures {
    pub vector: FeatureVector,
    pub info: FeatureInfo,
}

#[derive(Clone)]
pub struct FeatureAssembler {
    clock: Arc<dyn Clock>,
}

impl FeatureAssembler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn assemble(&self, input: AssemblyInput<'_>) -> Result<AssembledFeatures> {
        let missing = missing_profile_fields(input.profile, input.what_if.is_some());
        if !missing.is_empty() {
            return Err(RisklineError::IncompleteProfile(missing));
        }

        let profile = input.profile;
        let now = self.clock.now();

        let dob = profile
            .date_of_birth
            .as_deref()
            .and_then(parse_date_of_birth)
            .ok_or_else(|| {
                RisklineError::IncompleteProfile(vec!["date of birth is invalid".into()])
            })?;
        let age = age_on(dob, now.date_naive());

        let start_age = profile.smoking_start_age.filter(|a| *a > 0);
        let stop_age = profile.smoking_stop_age.filter(|a| *a > 0);
        // Presence of every flag below was checked by missing_profile_fields.
        let is_bloodline = profile.is_bloodline.unwrap_or_default();
        let is_macrosomic_baby = profile.macrosomic_baby.unwrap_or_default();

        let info = match input.what_if {
            None => {
                let smoking_status = classify_smoking_status(SmokingFacts {
                    start_age,
                    stop_age,
                    has_recent_activity: has_recent_smoking(input.activities, now),
                    current_age: age,
                });
                let avg_smoke_count = average_smoke_count(
                    profile.avg_smoke_count,
                    dob,
                    start_age,
                    input.activities,
                    now,
                );
                let brinkman_raw =
                    smoking_years(start_age, stop_age, age) * i64::from(avg_smoke_count);

                FeatureInfo {
                    age,
                    smoking_status: smoking_status.code(),
                    is_cholesterol: profile.is_cholesterol.unwrap_or_default(),
                    is_macrosomic_baby,
                    physical_activity_frequency: physical_activity_frequency(
                        profile.created_at,
                        profile.physical_activity_frequency,
                        input.activities,
                        now,
                    ),
                    is_bloodline,
                    brinkman_index: brinkman_category(brinkman_raw),
                    bmi: profile.bmi.unwrap_or_default(),
                    is_hypertension: profile.is_hypertension.unwrap_or_default(),
                    avg_smoke_count,
                }
            }
            Some(what_if) => {
                let height = profile.height.unwrap_or_default();
                let brinkman_raw =
                    smoking_years(start_age, stop_age, age) * i64::from(what_if.avg_smoke_count);

                FeatureInfo {
                    age,
                    smoking_status: what_if.smoking_status,
                    is_cholesterol: what_if.is_cholesterol,
                    is_macrosomic_baby,
                    physical_activity_frequency: what_if.physical_activity_frequency,
                    is_bloodline,
                    brinkman_index: brinkman_category(brinkman_raw),
                    bmi: compute_bmi(what_if.weight, height),
                    is_hypertension: what_if.is_hypertension,
                    avg_smoke_count: what_if.avg_smoke_count,
                }
            }
        };

        debug!(
            user_id = input.user.id,
            what_if = input.what_if.is_some(),
            ?info,
            "Assembled feature vector"
        );

        Ok(AssembledFeatures {
            vector: info.to_vector(),
            info,
        })
    }
}

/// Required-field check shared by the HTTP pre-check and the assembler.
///
/// Returns one human-readable reason per missing field; empty when complete.
pub fn missing_profile_fields(profile: &UserProfile, what_if: bool) -> Vec<String> {
    let mut missing = Vec::new();

    match profile.date_of_birth.as_deref() {
        None => missing.push("date of birth is required".to_string()),
        Some(raw) if parse_date_of_birth(raw).is_none() => {
            missing.push("date of birth must be RFC 3339 or YYYY-MM-DD".to_string())
        }
        Some(_) => {}
    }

    if what_if {
        if !profile.height.is_some_and(|h| h > 0.0) {
            missing.push("height is required".to_string());
        }
    } else {
        if profile.bmi.is_none() {
            missing.push("BMI is required".to_string());
        }
        if profile.is_hypertension.is_none() {
            missing.push("hypertension status is required".to_string());
        }
        if profile.is_cholesterol.is_none() {
            missing.push("cholesterol status is required".to_string());
        }
    }

    if profile.is_bloodline.is_none() {
        missing.push("bloodline status is required".to_string());
    }
    if profile.macrosomic_baby.is_none() {
        missing.push("macrosomic baby status is required".to_string());
    }

    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::models::ActivityType;
    use chrono::{TimeZone, Utc};

    fn assembler() -> FeatureAssembler {
        FeatureAssembler::new(Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        )))
    }

    fn user() -> User {
        User {
            id: 7,
            name: "Test User".into(),
            email: "test@example.com".into(),
            last_prediction_at: None,
        }
    }

    fn profile() -> UserProfile {
        UserProfile {
            user_id: 7,
            date_of_birth: Some("1975-06-01".into()),
            height: Some(175.0),
            weight: Some(83.6),
            bmi: Some(27.3),
            smoking_start_age: None,
            smoking_stop_age: None,
            avg_smoke_count: None,
            physical_activity_frequency: Some(1),
            is_bloodline: Some(false),
            is_hypertension: Some(false),
            is_cholesterol: Some(false),
            macrosomic_baby: Some(0),
            created_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    fn workout() -> Activity {
        Activity {
            user_id: 7,
            activity_type: ActivityType::Workout,
            value: 3,
            activity_date: Utc.with_ymd_and_hms(2024, 12, 28, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_canonical_vector() {
        let user = user();
        let profile = profile();
        let activities = vec![workout()];

        let assembled = assembler()
            .assemble(AssemblyInput {
                user: &user,
                profile: &profile,
                activities: &activities,
                what_if: None,
            })
            .unwrap();

        assert_eq!(
            assembled.vector.as_slice(),
            &[49.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 27.3, 0.0]
        );
        assert_eq!(assembled.info.avg_smoke_count, 0);
    }

    #[test]
    fn test_what_if_vector() {
        let user = user();
        let mut profile = profile();
        profile.smoking_start_age = Some(20);
        let activities = vec![workout()];
        let what_if = WhatIfOverride {
            smoking_status: 2,
            avg_smoke_count: 15,
            weight: 80.0,
            is_hypertension: true,
            is_cholesterol: false,
            physical_activity_frequency: 2,
        };

        let assembled = assembler()
            .assemble(AssemblyInput {
                user: &user,
                profile: &profile,
                activities: &activities,
                what_if: Some(&what_if),
            })
            .unwrap();

        assert_eq!(
            assembled.vector.as_slice(),
            &[49.0, 2.0, 0.0, 0.0, 2.0, 0.0, 2.0, 26.1, 1.0]
        );
    }

    #[test]
    fn test_current_smoker_from_profile_ages() {
        let user = user();
        let mut profile = profile();
        profile.smoking_start_age = Some(20);
        profile.avg_smoke_count = Some(25);

        let assembled = assembler()
            .assemble(AssemblyInput {
                user: &user,
                profile: &profile,
                activities: &[],
                what_if: None,
            })
            .unwrap();

        assert_eq!(assembled.info.smoking_status, 2);
        // 29 years x 25 = 725
        assert_eq!(assembled.info.brinkman_index, 3);
    }

    #[test]
    fn test_former_smoker() {
        let user = user();
        let mut profile = profile();
        profile.smoking_start_age = Some(20);
        profile.smoking_stop_age = Some(30);
        profile.avg_smoke_count = Some(10);

        let assembled = assembler()
            .assemble(AssemblyInput {
                user: &user,
                profile: &profile,
                activities: &[],
                what_if: None,
            })
            .unwrap();

        assert_eq!(assembled.info.smoking_status, 1);
        // 10 years x 10 = 100
        assert_eq!(assembled.info.brinkman_index, 1);
    }

    #[test]
    fn test_missing_cholesterol_is_incomplete() {
        let user = user();
        let mut profile = profile();
        profile.is_cholesterol = None;

        let err = assembler()
            .assemble(AssemblyInput {
                user: &user,
                profile: &profile,
                activities: &[],
                what_if: None,
            })
            .unwrap_err();

        assert!(matches!(err, RisklineError::IncompleteProfile(_)));
        assert_eq!(err.to_string(), "cholesterol status is required");
    }

    #[test]
    fn test_what_if_does_not_need_overridden_flags() {
        let mut profile = profile();
        profile.is_cholesterol = None;
        profile.is_hypertension = None;
        profile.bmi = None;
        assert!(missing_profile_fields(&profile, true).is_empty());

        profile.height = None;
        assert_eq!(
            missing_profile_fields(&profile, true),
            vec!["height is required".to_string()]
        );
    }

    #[test]
    fn test_invalid_date_of_birth() {
        let mut profile = profile();
        profile.date_of_birth = Some("June 1st".into());
        let missing = missing_profile_fields(&profile, false);
        assert_eq!(missing.len(), 1);
        assert!(missing[0].contains("date of birth"));
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let user = user();
        let profile = profile();
        let activities = vec![workout()];
        let input = AssemblyInput {
            user: &user,
            profile: &profile,
            activities: &activities,
            what_if: None,
        };

        let assembler = assembler();
        assert_eq!(assembler.assemble(input).unwrap(), assembler.assemble(input).unwrap());
    }
}

//! User and profile document schemas (read-only here)
//!
//! These collections belong to the user service, so only plain lookup
//! indexes are declared; uniqueness is the owner's concern.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::store::models::{User, UserId, UserProfile};

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// Collection name for health profiles
pub const PROFILE_COLLECTION: &str = "user_profiles";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    pub user_id: UserId,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_prediction_at: Option<DateTime>,
}

impl From<UserDoc> for User {
    fn from(doc: UserDoc) -> Self {
        Self {
            id: doc.user_id,
            name: doc.name,
            email: doc.email,
            last_prediction_at: doc.last_prediction_at.map(DateTime::to_chrono),
        }
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "user_id": 1 },
            Some(
                IndexOptions::builder()
                    .name("user_id_index".to_string())
                    .build(),
            ),
        )]
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ProfileDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    pub user_id: UserId,

    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub bmi: Option<f64>,
    #[serde(default)]
    pub smoking_start_age: Option<i32>,
    #[serde(default)]
    pub smoking_stop_age: Option<i32>,
    #[serde(default)]
    pub avg_smoke_count: Option<i32>,
    #[serde(default)]
    pub physical_activity_frequency: Option<i32>,
    #[serde(default)]
    pub is_bloodline: Option<bool>,
    #[serde(default)]
    pub is_hypertension: Option<bool>,
    #[serde(default)]
    pub is_cholesterol: Option<bool>,
    #[serde(default)]
    pub macrosomic_baby: Option<i32>,
    #[serde(default)]
    pub created_at: Option<DateTime>,
}

impl From<ProfileDoc> for UserProfile {
    fn from(doc: ProfileDoc) -> Self {
        Self {
            user_id: doc.user_id,
            date_of_birth: doc.date_of_birth,
            height: doc.height,
            weight: doc.weight,
            bmi: doc.bmi,
            smoking_start_age: doc.smoking_start_age,
            smoking_stop_age: doc.smoking_stop_age,
            avg_smoke_count: doc.avg_smoke_count,
            physical_activity_frequency: doc.physical_activity_frequency,
            is_bloodline: doc.is_bloodline,
            is_hypertension: doc.is_hypertension,
            is_cholesterol: doc.is_cholesterol,
            macrosomic_baby: doc.macrosomic_baby,
            created_at: doc.created_at.map(DateTime::to_chrono),
        }
    }
}

impl IntoIndexes for ProfileDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "user_id": 1 },
            Some(
                IndexOptions::builder()
                    .name("profile_user_index".to_string())
                    .build(),
            ),
        )]
    }
}

//! Prediction document schema

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::mongo::IntoIndexes;
use crate::features::FeatureInfo;
use crate::store::models::{FeatureAttributions, Prediction, UserId};

/// Collection name for predictions
pub const PREDICTION_COLLECTION: &str = "predictions";

/// Prediction stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PredictionDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Numeric id drawn from the `predictions` counter
    pub prediction_id: i64,

    /// Owning job; unique so a redelivered response cannot store twice
    pub job_id: String,

    pub user_id: UserId,

    pub risk_score: f64,

    pub inputs: FeatureInfo,

    pub attributions: FeatureAttributions,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanations: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    pub created_at: DateTime,
}

impl From<&Prediction> for PredictionDoc {
    fn from(prediction: &Prediction) -> Self {
        Self {
            _id: None,
            prediction_id: prediction.id,
            job_id: prediction.job_id.clone(),
            user_id: prediction.user_id,
            risk_score: prediction.risk_score,
            inputs: prediction.inputs.clone(),
            attributions: prediction.attributions.clone(),
            explanations: prediction.explanations.clone(),
            summary: prediction.summary.clone(),
            created_at: DateTime::from_chrono(prediction.created_at),
        }
    }
}

impl From<PredictionDoc> for Prediction {
    fn from(doc: PredictionDoc) -> Self {
        Self {
            id: doc.prediction_id,
            job_id: doc.job_id,
            user_id: doc.user_id,
            risk_score: doc.risk_score,
            inputs: doc.inputs,
            attributions: doc.attributions,
            explanations: doc.explanations,
            summary: doc.summary,
            created_at: doc.created_at.to_chrono(),
        }
    }
}

impl IntoIndexes for PredictionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "prediction_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("prediction_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "job_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("job_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "user_id": 1, "created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("user_created_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

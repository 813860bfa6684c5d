//! Activity log document schema (read-only here)

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::store::models::{Activity, ActivityType, UserId};

/// Collection name for logged activities
pub const ACTIVITY_COLLECTION: &str = "activities";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ActivityDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    pub user_id: UserId,

    pub activity_type: ActivityType,

    pub value: i32,

    pub activity_date: DateTime,
}

impl From<ActivityDoc> for Activity {
    fn from(doc: ActivityDoc) -> Self {
        Self {
            user_id: doc.user_id,
            activity_type: doc.activity_type,
            value: doc.value,
            activity_date: doc.activity_date.to_chrono(),
        }
    }
}

impl IntoIndexes for ActivityDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "user_id": 1, "activity_date": -1 },
            Some(
                IndexOptions::builder()
                    .name("user_date_index".to_string())
                    .build(),
            ),
        )]
    }
}

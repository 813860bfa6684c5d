//! Monotonic id counters

use bson::Document;
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;

/// Collection name for counters
pub const COUNTER_COLLECTION: &str = "counters";

/// Counter that numbers predictions
pub const PREDICTION_COUNTER: &str = "predictions";

/// One named sequence; `_id` is the sequence name
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CounterDoc {
    pub _id: String,
    pub seq: i64,
}

impl IntoIndexes for CounterDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        // `_id` is indexed by the server
        Vec::new()
    }
}

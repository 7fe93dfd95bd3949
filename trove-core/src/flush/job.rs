use serde::{Deserialize, Serialize};

use crate::aggregation::AggregationKey;

/// Deferred flush of one buffer generation.
///
/// `epoch` is the creation timestamp of the buffer the job was scheduled
/// for; a flush only emits a buffer whose timestamp still matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlushJob {
    pub key: AggregationKey,
    pub epoch: i64,
}

impl FlushJob {
    pub fn new(key: AggregationKey, epoch: i64) -> Self {
        Self { key, epoch }
    }

    /// Member string used in the due index.
    pub fn to_member(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_member(member: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(member)
    }
}

//! Wire codec for shipping records between processes.
//!
//! Shard workers in this crate live in the coordinator's process and
//! exchange records over channels; producers on other machines serialize
//! their append batches with this codec and hand the decoded batches to a
//! [`ShardWriter`](crate::ShardWriter) on the coordinator side.

use anyhow::Result;
use kioku_core::Transition;
use serde::{Deserialize, Serialize};

/// One append batch in transit: records paired with optional priorities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBatch {
    /// Records with the priority each should be appended with, if any.
    pub items: Vec<(Transition, Option<f32>)>,
}

impl WireBatch {
    /// Wraps records appended with default priorities.
    pub fn from_records(records: Vec<Transition>) -> Self {
        Self {
            items: records.into_iter().map(|r| (r, None)).collect(),
        }
    }

    /// Serializes the batch.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = bincode::serialize(self)?;
        Ok(bytes)
    }

    /// Deserializes a batch.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let batch = bincode::deserialize(bytes)?;
        Ok(batch)
    }
}

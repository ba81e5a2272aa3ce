//! Task record: the unit stored in the ordered queues and in the lease store.

use serde::{Deserialize, Serialize};

use super::TaskId;
use crate::error::Result;

/// Priority assigned when the producer does not specify one (mid-value).
pub const DEFAULT_PRIORITY: u8 = 128;

/// Highest rank (lower value = served first). Reclaimed tasks re-enter with it.
pub const TOP_PRIORITY: u8 = 0;

/// A queued task.
///
/// Design:
/// - `value` is opaque; the engine never interprets it.
/// - `retry_count` only grows: `start_lease` is the single place it changes.
/// - `value` is stored as a base64 string, not a JSON number array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
    pub priority: u8,
    pub retry_count: u32,
}

impl TaskRecord {
    pub fn new(id: TaskId, value: impl Into<Vec<u8>>) -> Self {
        Self::with_priority(id, value, DEFAULT_PRIORITY)
    }

    pub fn with_priority(id: TaskId, value: impl Into<Vec<u8>>, priority: u8) -> Self {
        Self {
            id,
            value: value.into(),
            priority,
            retry_count: 0,
        }
    }

    /// Count the lease about to be created. Returns the previous retry count.
    pub fn start_lease(&mut self) -> u32 {
        let previous = self.retry_count;
        self.retry_count = self.retry_count.saturating_add(1);
        previous
    }

    /// Prepare an expired lease for redelivery ahead of fresh work.
    pub fn reclaim(&mut self) {
        self.priority = TOP_PRIORITY;
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(de::Error::custom)
    }
}

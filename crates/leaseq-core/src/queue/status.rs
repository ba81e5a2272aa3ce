//! Status snapshot for monitoring.

use serde::{Deserialize, Serialize};

/// Point-in-time counts. Not transactionally consistent with concurrent
/// mutations; it is a monitoring signal only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queue_length: u64,
    pub retry_queue_length: u64,
    pub total_queue_length: u64,
    /// Leases currently in flight (unconfirmed).
    pub running_count: i64,
}

impl QueueStatus {
    pub fn new(queue_length: u64, retry_queue_length: u64, running_count: i64) -> Self {
        Self {
            queue_length,
            retry_queue_length,
            total_queue_length: queue_length + retry_queue_length,
            running_count,
        }
    }
}

//! Retry policy: decides whether a dequeue still gets a lease.

/// Retry limit for lease-and-reclaim cycles.
///
/// A task whose `retry_count` has reached the limit is handed to the caller
/// without a lease (no further automatic redelivery).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// `None` = unlimited.
    pub limit: Option<u32>,
}

impl RetryPolicy {
    pub fn unlimited() -> Self {
        Self { limit: None }
    }

    /// `0` is treated as unlimited.
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit: (limit > 0).then_some(limit),
        }
    }

    /// Can a task that has already been leased `retry_count` times be leased again?
    pub fn allows_lease(&self, retry_count: u32) -> bool {
        self.limit.is_none_or(|limit| retry_count < limit)
    }
}

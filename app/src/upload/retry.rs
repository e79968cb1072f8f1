// ==============================================================================
// upload/retry.rs - Chunk Retry Schedule
// ==============================================================================
// Description: Fixed delay schedule applied to transient chunk failures
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use std::time::Duration;

/// Delays applied before each successive retry of a failing chunk
///
/// The schedule length is the retry budget; once every delay has been used
/// the upload fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::from_millis(&[0, 3_000, 5_000, 10_000, 20_000])
    }
}

impl RetrySchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_millis(delays: &[u64]) -> Self {
        Self::new(delays.iter().copied().map(Duration::from_millis).collect())
    }

    /// Schedule that fails on the first transient error
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    /// Delay before retry number `retry` (0-based), or `None` once exhausted
    pub fn delay_for(&self, retry: usize) -> Option<Duration> {
        self.delays.get(retry).copied()
    }

    pub fn max_retries(&self) -> usize {
        self.delays.len()
    }
}

//! Exponential backoff utilities for failed reconciles.

use crate::constants::{MAX_BACKOFF_DELAY_MS, STARTING_BACKOFF_DELAY_MS};
use std::time::Duration;

/// Computes the delay before retrying a key that failed `failures` times in a row.
///
/// Implements exponential backoff: 5ms, 10ms, 20ms... capped at 5 minutes.
///
/// # Arguments
/// * `failures` - Number of consecutive failures so far (0-based)
pub fn exponential_backoff_delay(failures: u32) -> Duration {
    let factor = 1u64.checked_shl(failures).unwrap_or(u64::MAX);
    let delay = STARTING_BACKOFF_DELAY_MS.saturating_mul(factor).min(MAX_BACKOFF_DELAY_MS);
    Duration::from_millis(delay)
}

//! Cancellable delays used for retry backoff and inter-record pauses.
//!
//! All waiting in the pipeline goes through [`cancellable_sleep`] so that a
//! shutdown request (Ctrl-C / SIGTERM) cuts the wait short instead of letting
//! the run linger.

use rand::{Rng, rng};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Outcome of a [`cancellable_sleep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slept {
    /// The full duration elapsed.
    Completed,
    /// The token fired before the duration elapsed.
    Cancelled,
}

/// Sleep for `duration` unless `cancel` fires first.
pub async fn cancellable_sleep(duration: Duration, cancel: &CancellationToken) -> Slept {
    if cancel.is_cancelled() {
        return Slept::Cancelled;
    }
    tokio::select! {
        _ = cancel.cancelled() => Slept::Cancelled,
        _ = sleep(duration) => Slept::Completed,
    }
}

/// Pick a pause duration uniformly in `[min, max]` (millisecond resolution).
///
/// If `max <= min`, `min` is returned unchanged.
pub fn pick_pause(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let lo = min.as_millis() as u64;
    let hi = max.as_millis() as u64;
    Duration::from_millis(rng().random_range(lo..=hi))
}

//! Batch selection: which records a run will process.

use crate::errors::BackfillError;
use crate::models::ArticleSummary;
use crate::store::ArticleStore;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, instrument};

/// Hard cap on one batch, keeping a run finite.
pub const MAX_BATCH_LIMIT: u32 = 1000;

/// Clamp a requested limit into `1..=MAX_BATCH_LIMIT`.
pub fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_BATCH_LIMIT)
}

/// Epoch-second cutoff for a recency window ending at `now`.
pub fn window_cutoff(now: DateTime<Utc>, window: Duration) -> i64 {
    now.timestamp()
        .saturating_sub(i64::try_from(window.as_secs()).unwrap_or(i64::MAX))
}

/// Select up to `limit` records missing content, newest first.
///
/// With a `window`, only records published within that span before `now`
/// are eligible.
///
/// # Errors
///
/// Any storage error; the caller treats it as fatal for the run.
#[instrument(level = "info", skip(store))]
pub async fn select_batch<S: ArticleStore>(
    store: &S,
    limit: u32,
    window: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<Vec<ArticleSummary>, BackfillError> {
    let limit = clamp_limit(limit);
    let cutoff = window.map(|w| window_cutoff(now, w));
    let batch = store.select_pending(limit, cutoff).await?;
    info!(count = batch.len(), limit, ?cutoff, "Selected batch");
    Ok(batch)
}

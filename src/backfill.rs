//! The backfill driver: one finite, sequential run over one batch.
//!
//! ```text
//! Idle -> Selecting -> Empty -> Done
//!                   -> Processing { resolve -> persist -> (every Nth success: pause) } -> Done
//! ```
//!
//! Records are processed strictly one at a time. A failed write is counted
//! and the loop moves on; only a failed selection ends the run with an error.

use crate::errors::BackfillError;
use crate::fetcher::FetchHtml;
use crate::models::{ArticleSummary, BatchRun};
use crate::pacing::{Slept, cancellable_sleep, pick_pause};
use crate::resolver::{ContentResolver, Resolution};
use crate::selector::{clamp_limit, select_batch};
use crate::store::ArticleStore;
use chrono::Utc;
use clap::ValueEnum;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// What to do with a record whose content could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FallbackPolicy {
    /// Write the fallback text. The record leaves the pending set for good.
    Persist,
    /// Leave content null so the next run retries the record.
    LeaveNull,
}

/// Tunables for one run.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub batch_limit: u32,
    /// Only records published within this span before now are selected.
    pub window: Option<Duration>,
    /// Pause after every `pause_every` successful writes.
    pub pause_every: u32,
    pub pause_min: Duration,
    pub pause_max: Duration,
    pub fallback_policy: FallbackPolicy,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            window: None,
            pause_every: 5,
            pause_min: Duration::from_secs(30),
            pause_max: Duration::from_secs(40),
            fallback_policy: FallbackPolicy::Persist,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Written,
    Skipped,
    Failed,
}

/// Drives one backfill run against a store and a resolver.
pub struct BackfillDriver<'a, S, T> {
    store: &'a S,
    resolver: &'a ContentResolver<T>,
    config: BackfillConfig,
    cancel: CancellationToken,
}

impl<'a, S, T> BackfillDriver<'a, S, T>
where
    S: ArticleStore,
    T: FetchHtml,
{
    pub fn new(
        store: &'a S,
        resolver: &'a ContentResolver<T>,
        config: BackfillConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            resolver,
            config,
            cancel,
        }
    }

    /// Select a batch and process it to completion (or until cancelled).
    ///
    /// # Errors
    ///
    /// Only a selection failure is returned; per-record problems end up in
    /// the counters of the returned [`BatchRun`].
    #[instrument(level = "info", skip(self))]
    pub async fn run(&self) -> Result<BatchRun, BackfillError> {
        let t0 = Instant::now();
        let limit = clamp_limit(self.config.batch_limit);
        let batch = select_batch(self.store, limit, self.config.window, Utc::now()).await?;

        let mut run = BatchRun {
            total: batch.len(),
            more_remaining: batch.len() >= limit as usize,
            ..BatchRun::default()
        };

        if batch.is_empty() {
            info!("No articles missing content; nothing to do");
            return Ok(run);
        }
        info!(count = batch.len(), "Found articles missing content");

        let pause_every = self.config.pause_every.max(1);
        for (i, article) in batch.iter().enumerate() {
            if self.cancel.is_cancelled() {
                run.cancelled = true;
                break;
            }

            info!(
                position = i + 1,
                total = batch.len(),
                id = %article.id,
                title = %article.title,
                "Processing article"
            );
            let resolution = self.resolver.resolve(&article.id).await;

            // Interrupted fetches leave the record pending.
            if let Resolution::Fallback {
                error: BackfillError::Cancelled,
                ..
            } = resolution
            {
                run.cancelled = true;
                break;
            }

            match self.persist(article, &resolution).await {
                RecordOutcome::Written => run.success_count += 1,
                RecordOutcome::Skipped => {
                    run.skipped_count += 1;
                    continue;
                }
                RecordOutcome::Failed => {
                    run.fail_count += 1;
                    continue;
                }
            }

            if run.success_count % pause_every == 0 {
                let delay = pick_pause(self.config.pause_min, self.config.pause_max);
                info!(
                    success_count = run.success_count,
                    ?delay,
                    "Pausing to keep the request rate low"
                );
                run.pauses += 1;
                if cancellable_sleep(delay, &self.cancel).await == Slept::Cancelled {
                    run.cancelled = true;
                    break;
                }
            }
        }

        if run.cancelled {
            warn!(
                processed = run.processed(),
                total = run.total,
                "Shutdown requested; stopping early"
            );
        }
        info!(
            total = run.total,
            success = run.success_count,
            failed = run.fail_count,
            skipped = run.skipped_count,
            pauses = run.pauses,
            cancelled = run.cancelled,
            elapsed_secs = t0.elapsed().as_secs(),
            "Backfill run complete"
        );
        if run.more_remaining {
            info!(limit, "Batch limit reached; more articles may need content, run again");
        }
        Ok(run)
    }

    async fn persist(&self, article: &ArticleSummary, resolution: &Resolution) -> RecordOutcome {
        if resolution.is_fallback() && self.config.fallback_policy == FallbackPolicy::LeaveNull {
            warn!(id = %article.id, "Leaving content empty for a later retry");
            return RecordOutcome::Skipped;
        }

        match self
            .store
            .write_content(&article.id, resolution.content())
            .await
        {
            Ok(()) => {
                info!(id = %article.id, fallback = resolution.is_fallback(), "Saved article content");
                RecordOutcome::Written
            }
            Err(e) => {
                error!(
                    id = %article.id,
                    url = %self.resolver.source_url(&article.id),
                    error = %e,
                    "Failed to save article content"
                );
                RecordOutcome::Failed
            }
        }
    }
}

//! Command-line interface definitions for the backfill job.
//!
//! Every option can also come from the environment (a `.env` file is loaded
//! first when present), so the job can run from cron with no arguments.

use crate::backfill::{BackfillConfig, FallbackPolicy};
use crate::fetcher::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT};
use crate::resolver::{DEFAULT_FALLBACK_MESSAGE, DEFAULT_SOURCE_TEMPLATE};
use crate::sanitizer::CONTENT_SELECTOR;
use crate::selector::clamp_limit;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

const DAY: u64 = 24 * 60 * 60;

/// Command-line arguments for the backfill job.
///
/// # Examples
///
/// ```sh
/// # Defaults: 100 newest records, pause 30-40s after every 5 saves
/// article_backfill --database-url sqlite:articles.db
///
/// # Only the last 3 days, up to 1000 records, retry failures next run
/// article_backfill --window-days 3 --batch-limit 1000 --fallback-policy leave-null
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Article database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:articles.db?mode=rwc")]
    pub database_url: String,

    /// Maximum pooled database connections
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Create the articles table if it does not exist
    #[arg(long, env = "BACKFILL_INIT_SCHEMA")]
    pub init_schema: bool,

    /// JSON file of article records to insert before the run
    #[arg(long, env = "BACKFILL_SEED_FILE", value_name = "PATH")]
    pub seed: Option<PathBuf>,

    /// Maximum records selected per run (clamped to 1..=1000)
    #[arg(short = 'n', long, env = "BACKFILL_BATCH_LIMIT", default_value_t = 100)]
    pub batch_limit: u32,

    /// Only backfill records published within this many days
    #[arg(short, long, env = "BACKFILL_WINDOW_DAYS")]
    pub window_days: Option<u64>,

    /// Pause after every N successful writes
    #[arg(long, env = "BACKFILL_PAUSE_EVERY", default_value_t = 5)]
    pub pause_every: u32,

    /// Lower bound of a pause, in seconds
    #[arg(long, env = "BACKFILL_PAUSE_MIN_SECS", default_value_t = 30)]
    pub pause_min_secs: u64,

    /// Upper bound of a pause, in seconds
    #[arg(long, env = "BACKFILL_PAUSE_MAX_SECS", default_value_t = 40)]
    pub pause_max_secs: u64,

    /// Per-request timeout, in seconds
    #[arg(long, env = "BACKFILL_FETCH_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub fetch_timeout_secs: u64,

    /// Total attempts per fetch
    #[arg(long, env = "BACKFILL_FETCH_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub fetch_attempts: u32,

    /// Base retry delay in milliseconds (multiplied by the attempt number)
    #[arg(long, env = "BACKFILL_RETRY_BASE_MS", default_value_t = DEFAULT_BASE_DELAY.as_millis() as u64)]
    pub retry_base_ms: u64,

    /// Upstream page URL; `{id}` is replaced by the record id
    #[arg(long, env = "BACKFILL_SOURCE_URL", default_value = DEFAULT_SOURCE_TEMPLATE)]
    pub source_url: String,

    /// CSS selector of the article body container
    #[arg(long, env = "BACKFILL_CONTENT_SELECTOR", default_value = CONTENT_SELECTOR)]
    pub content_selector: String,

    /// Text stored when content cannot be fetched
    #[arg(long, env = "BACKFILL_FALLBACK_MESSAGE", default_value = DEFAULT_FALLBACK_MESSAGE)]
    pub fallback_message: String,

    /// What to do when content cannot be fetched
    #[arg(long, env = "BACKFILL_FALLBACK_POLICY", value_enum, default_value_t = FallbackPolicy::Persist)]
    pub fallback_policy: FallbackPolicy,

    /// Also print the run summary to stdout as JSON
    #[arg(long)]
    pub summary_json: bool,
}

impl Cli {
    /// Typed, clamped run configuration.
    pub fn backfill_config(&self) -> BackfillConfig {
        let pause_min = Duration::from_secs(self.pause_min_secs);
        let pause_max = Duration::from_secs(self.pause_max_secs.max(self.pause_min_secs));
        BackfillConfig {
            batch_limit: clamp_limit(self.batch_limit),
            window: self.window_days.map(|d| Duration::from_secs(d.saturating_mul(DAY))),
            pause_every: self.pause_every.max(1),
            pause_min,
            pause_max,
            fallback_policy: self.fallback_policy,
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }
}

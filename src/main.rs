//! # Article Backfill
//!
//! A batch job that fills in the body of stored articles whose content is
//! still empty. For each record it fetches the upstream article page,
//! extracts and cleans the article container, and writes the resulting
//! HTML fragment back to the store.
//!
//! ## Usage
//!
//! ```sh
//! DATABASE_URL=sqlite:articles.db article_backfill --window-days 3
//! ```
//!
//! ## Architecture
//!
//! 1. **Selecting**: newest records with null content, bounded by a limit
//! 2. **Fetching**: browser-like GET with timeout and linear backoff retries
//! 3. **Sanitizing**: container extraction, lazy-image and hiding rewrites,
//!    style prelude, minification
//! 4. **Persisting**: one write per record, pausing every few successes
//!
//! Records are processed one at a time to stay under the upstream's
//! rate limits. Ctrl-C / SIGTERM stop the run at the next wait point.

use clap::Parser;
use std::error::Error;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod backfill;
mod cli;
mod errors;
mod fetcher;
mod models;
mod pacing;
mod resolver;
mod sanitizer;
mod selector;
mod store;
mod utils;

use backfill::BackfillDriver;
use cli::Cli;
use fetcher::{HttpFetcher, RetryFetch};
use models::ArticleRecord;
use resolver::ContentResolver;
use sanitizer::Sanitizer;
use store::SqliteArticleStore;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    info!("article_backfill starting up");

    let args = Cli::parse();
    let config = args.backfill_config();
    debug!(?config, "Parsed CLI arguments");

    // ---- Shutdown wiring ----
    let cancel = CancellationToken::new();
    tokio::spawn(watch_shutdown(cancel.clone()));

    // ---- Collaborators ----
    let sanitizer = Sanitizer::new(&args.content_selector)?;
    let fetcher = RetryFetch::new(
        HttpFetcher::new(args.fetch_timeout())?,
        args.fetch_attempts,
        args.retry_base_delay(),
        cancel.clone(),
    );
    let resolver = ContentResolver::new(
        fetcher,
        sanitizer,
        args.source_url.clone(),
        args.fallback_message.clone(),
    );
    resolver.check_source_template()?;

    let store = SqliteArticleStore::connect(&args.database_url, args.max_connections).await?;
    if let Err(e) = prepare_store(&store, &args).await {
        store.close().await;
        return Err(e);
    }

    // ---- Run ----
    let outcome = BackfillDriver::new(&store, &resolver, config, cancel)
        .run()
        .await;
    store.close().await;
    let run = outcome?;

    if args.summary_json {
        println!("{}", serde_json::to_string(&run)?);
    }
    if run.cancelled {
        warn!("Run ended early on shutdown request");
    }
    info!("article_backfill finished");
    Ok(())
}

/// Optional schema creation and seeding ahead of the run.
async fn prepare_store(store: &SqliteArticleStore, args: &Cli) -> Result<(), Box<dyn Error>> {
    if args.init_schema {
        store.ensure_schema().await?;
    }
    if let Some(path) = &args.seed {
        let records = read_seed(path).await?;
        store.seed(&records).await?;
    }
    Ok(())
}

async fn read_seed(path: &Path) -> Result<Vec<ArticleRecord>, Box<dyn Error>> {
    let raw = tokio::fs::read_to_string(path).await?;
    let records: Vec<ArticleRecord> = serde_json::from_str(&raw)?;
    debug!(path = %path.display(), count = records.len(), "Loaded seed file");
    Ok(records)
}

/// Cancel `token` on Ctrl-C, or SIGTERM on unix.
async fn watch_shutdown(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not install SIGTERM handler; only Ctrl-C will stop the run");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Received shutdown signal");
    token.cancel();
}

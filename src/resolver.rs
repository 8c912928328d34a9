//! Resolve a record id into storable content.
//!
//! The resolver composes [`RetryFetch`] and [`Sanitizer`] and never fails
//! outward: a fetch failure becomes [`Resolution::Fallback`]
//! carrying the configured fallback text and the cause. Whether that text is
//! written is the driver's decision (see `FallbackPolicy`).

use crate::errors::BackfillError;
use crate::fetcher::{FetchHtml, RetryFetch};
use crate::sanitizer::Sanitizer;
use std::time::Instant;
use tracing::{error, info, instrument};
use url::Url;

/// Upstream article page, `{id}` replaced by the url-encoded record id.
pub const DEFAULT_SOURCE_TEMPLATE: &str = "https://mp.weixin.qq.com/s/{id}";

/// Stored in place of content when fetching or sanitizing fails.
pub const DEFAULT_FALLBACK_MESSAGE: &str = "获取全文失败，请重试~";

/// Outcome of resolving one record.
#[derive(Debug)]
pub enum Resolution {
    /// Sanitized upstream content.
    Content(String),
    /// Fetching failed; `content` is the fallback text.
    Fallback {
        content: String,
        error: BackfillError,
    },
}

impl Resolution {
    /// The text to persist, whichever branch was taken.
    pub fn content(&self) -> &str {
        match self {
            Resolution::Content(c) => c,
            Resolution::Fallback { content, .. } => content,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Resolution::Fallback { .. })
    }
}

/// Fetch + sanitize for a single record.
#[derive(Debug)]
pub struct ContentResolver<T> {
    fetcher: RetryFetch<T>,
    sanitizer: Sanitizer,
    source_template: String,
    fallback: String,
}

impl<T> ContentResolver<T>
where
    T: FetchHtml,
{
    pub fn new(
        fetcher: RetryFetch<T>,
        sanitizer: Sanitizer,
        source_template: impl Into<String>,
        fallback: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            sanitizer,
            source_template: source_template.into(),
            fallback: fallback.into(),
        }
    }

    /// Upstream URL for `id`.
    pub fn source_url(&self, id: &str) -> String {
        self.source_template
            .replace("{id}", &urlencoding::encode(id))
    }

    /// Check that the source template expands to an absolute URL.
    pub fn check_source_template(&self) -> Result<(), url::ParseError> {
        Url::parse(&self.source_url("probe")).map(|_| ())
    }

    /// Fetch and sanitize the page for `id`.
    ///
    /// Failures are logged with the id and URL and returned as
    /// [`Resolution::Fallback`].
    #[instrument(level = "info", skip(self))]
    pub async fn resolve(&self, id: &str) -> Resolution {
        let url = self.source_url(id);
        let t0 = Instant::now();

        let result = self
            .fetcher
            .fetch(&url)
            .await
            .map(|raw| self.sanitizer.sanitize(&raw));

        match result {
            Ok(content) => {
                info!(
                    %id,
                    bytes = content.len(),
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    "Resolved article content"
                );
                Resolution::Content(content)
            }
            Err(e) => {
                error!(%id, %url, kind = e.kind(), error = %e, "Failed to resolve article content");
                Resolution::Fallback {
                    content: self.fallback.clone(),
                    error: e,
                }
            }
        }
    }
}

//! Upstream page fetching with a browser header profile and linear backoff.
//!
//! The module follows a small trait-based design:
//! - [`FetchHtml`]: one HTTP GET attempt returning the raw body
//! - [`HttpFetcher`]: the `reqwest` implementation with the fixed header set
//!   and per-request timeout
//! - [`RetryFetch`]: decorator adding bounded retries to any [`FetchHtml`]
//!
//! # Retry Strategy
//!
//! - At most `max_attempts` attempts in total (3 by default)
//! - Linear backoff: `base_delay * attempt` (2s, 4s with the defaults)
//! - Every retry is announced with a `warn!` event before sleeping
//! - Backoff sleeps are cut short by the run's cancellation token

use crate::errors::{BackfillError, TransportError};
use crate::pacing::{Slept, cancellable_sleep};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Desktop Chrome on macOS.
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/101.0.4951.64 Safari/537.36";

// accept-encoding is left to reqwest so compressed bodies get decoded.
const BROWSER_HEADERS: &[(&str, &str)] = &[
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.9",
    ),
    ("accept-language", "en-US,en;q=0.9"),
    ("cache-control", "max-age=0"),
    (
        "sec-ch-ua",
        "\" Not A;Brand\";v=\"99\", \"Chromium\";v=\"101\", \"Google Chrome\";v=\"101\"",
    ),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"macOS\""),
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("sec-fetch-site", "none"),
    ("sec-fetch-user", "?1"),
    ("upgrade-insecure-requests", "1"),
    ("user-agent", USER_AGENT),
];

/// A single attempt at fetching a page body.
pub trait FetchHtml {
    /// Perform one GET against `url` and return the body text.
    async fn fetch(&self, url: &str) -> Result<String, TransportError>;
}

/// `reqwest`-backed fetcher impersonating a desktop browser.
///
/// The client is built once and reused for the whole run.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a client with the browser header profile and `timeout` per request.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .default_headers(browser_headers())
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(BROWSER_HEADERS.len());
    for &(name, value) in BROWSER_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    headers
}

impl FetchHtml for HttpFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<String, TransportError> {
        let t0 = Instant::now();
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(TransportError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        debug!(
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched upstream page"
        );
        Ok(body)
    }
}

/// Wrapper that adds bounded linear-backoff retries to any [`FetchHtml`].
pub struct RetryFetch<T> {
    inner: T,
    max_attempts: u32,
    base_delay: Duration,
    cancel: CancellationToken,
}

impl<T> RetryFetch<T>
where
    T: FetchHtml,
{
    /// Wrap `inner`. `max_attempts` is clamped to at least one.
    pub fn new(
        inner: T,
        max_attempts: u32,
        base_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
            cancel,
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Fetch `url`, retrying transport failures.
    ///
    /// # Errors
    ///
    /// - [`BackfillError::Network`] once every attempt has failed, carrying
    ///   the URL and the last transport error
    /// - [`BackfillError::Cancelled`] if shutdown fires during a backoff sleep
    #[instrument(level = "info", skip(self))]
    pub async fn fetch(&self, url: &str) -> Result<String, BackfillError> {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let attempt_t0 = Instant::now();
            match self.inner.fetch(url).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    let elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64;
                    let elapsed_ms_total = total_t0.elapsed().as_millis() as u64;

                    if attempt >= self.max_attempts {
                        error!(
                            attempt,
                            max = self.max_attempts,
                            elapsed_ms_attempt,
                            elapsed_ms_total,
                            error = %e,
                            "fetch exhausted retries"
                        );
                        return Err(BackfillError::Network {
                            url: url.to_string(),
                            attempts: attempt,
                            cause: e.to_string(),
                        });
                    }

                    let delay = self.backoff_for(attempt);
                    warn!(
                        attempt,
                        max = self.max_attempts,
                        elapsed_ms_attempt,
                        ?delay,
                        error = %e,
                        "fetch attempt failed; retrying"
                    );
                    if cancellable_sleep(delay, &self.cancel).await == Slept::Cancelled {
                        return Err(BackfillError::Cancelled);
                    }
                }
            }
        }
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Fails with a timeout for the first `failures` calls, then serves `body`.
    pub(crate) struct FlakyTransport {
        pub failures: u32,
        pub body: String,
        pub calls: AtomicU32,
    }

    impl FlakyTransport {
        pub(crate) fn new(failures: u32, body: &str) -> Self {
            Self {
                failures,
                body: body.to_string(),
                calls: AtomicU32::new(0),
            }
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl FetchHtml for FlakyTransport {
        async fn fetch(&self, _url: &str) -> Result<String, TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(TransportError::Timeout)
            } else {
                Ok(self.body.clone())
            }
        }
    }

    impl FetchHtml for &FlakyTransport {
        async fn fetch(&self, url: &str) -> Result<String, TransportError> {
            (**self).fetch(url).await
        }
    }

    fn retrying(inner: &FlakyTransport) -> RetryFetch<&FlakyTransport> {
        RetryFetch::new(
            inner,
            DEFAULT_MAX_ATTEMPTS,
            DEFAULT_BASE_DELAY,
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let transport = FlakyTransport::new(2, "<p>ok</p>");
        let started = tokio::time::Instant::now();

        let body = retrying(&transport).fetch("https://upstream.test/s/a").await.unwrap();

        assert_eq!(body, "<p>ok</p>");
        assert_eq!(transport.calls(), 3);
        // 2s after the first failure, 4s after the second
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_three_attempts() {
        let transport = FlakyTransport::new(u32::MAX, "");

        let err = retrying(&transport)
            .fetch("https://upstream.test/s/b")
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 3);
        match err {
            BackfillError::Network { url, attempts, cause } => {
                assert_eq!(url, "https://upstream.test/s/b");
                assert_eq!(attempts, 3);
                assert!(cause.contains("timed out"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retrying() {
        let transport = FlakyTransport::new(u32::MAX, "");
        let token = CancellationToken::new();
        let fetcher = RetryFetch::new(&transport, 3, Duration::from_secs(60), token.clone());
        token.cancel();

        let err = fetcher.fetch("https://upstream.test/s/c").await.unwrap_err();

        assert!(matches!(err, BackfillError::Cancelled));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_backoff_is_linear() {
        let transport = FlakyTransport::new(0, "");
        let fetcher = retrying(&transport);
        assert_eq!(fetcher.backoff_for(1), Duration::from_secs(2));
        assert_eq!(fetcher.backoff_for(2), Duration::from_secs(4));
        assert_eq!(fetcher.backoff_for(3), Duration::from_secs(6));
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let transport = FlakyTransport::new(0, "");
        let fetcher = RetryFetch::new(&transport, 0, Duration::ZERO, CancellationToken::new());
        assert_eq!(fetcher.max_attempts, 1);
    }

    #[tokio::test]
    async fn test_http_fetcher_sends_browser_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/s/abc123"))
            .and(header("sec-fetch-mode", "navigate"))
            .and(header("upgrade-insecure-requests", "1"))
            .and(header_exists("sec-ch-ua"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hi</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(DEFAULT_TIMEOUT).unwrap();
        let body = fetcher
            .fetch(&format!("{}/s/abc123", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "<html>hi</html>");

        let requests = server.received_requests().await.unwrap();
        let ua = requests[0].headers.get("user-agent").unwrap().to_str().unwrap();
        assert_eq!(ua, USER_AGENT);
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(DEFAULT_TIMEOUT).unwrap();
        let err = fetcher.fetch(&server.uri()).await.unwrap_err();
        assert!(matches!(err, TransportError::Status(503)));
    }

    #[tokio::test]
    async fn test_http_fetcher_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_millis(100)).unwrap();
        let err = fetcher.fetch(&server.uri()).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }

    #[tokio::test]
    async fn test_retry_over_http_recovers_after_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .mount(&server)
            .await;

        let fetcher = RetryFetch::new(
            HttpFetcher::new(DEFAULT_TIMEOUT).unwrap(),
            3,
            Duration::from_millis(10),
            CancellationToken::new(),
        );
        let body = fetcher.fetch(&server.uri()).await.unwrap();
        assert_eq!(body, "recovered");
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }
}

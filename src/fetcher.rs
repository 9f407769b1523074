use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::apis::{CitationSource, Direction, RelatedWork, RequestGate, SourceError};
use crate::graph::BuildError;

/// Bounded retry with exponential backoff for transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries per source after the first attempt.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt + 1` (zero-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Paced, retrying access to the configured citation sources.
///
/// Pacing is global to one fetcher: every outbound HTTP request, whichever
/// build or source issues it, waits until `delay` has passed since the
/// previous one. Sources see the pacing as the `RequestGate` they are handed.
pub struct RateLimitedFetcher {
    sources: Vec<Arc<dyn CitationSource>>,
    retry: RetryPolicy,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimitedFetcher {
    pub fn new(sources: Vec<Arc<dyn CitationSource>>, retry: RetryPolicy) -> Self {
        Self {
            sources,
            retry,
            last_request: Mutex::new(None),
        }
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Related works for `doi`, asking each source in order until one has data.
    ///
    /// Provider failures and missing records both come back as an empty list.
    /// The only error is cancellation.
    pub async fn fetch(
        &self,
        doi: &str,
        direction: Direction,
        limit: usize,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<RelatedWork>, BuildError> {
        for source in &self.sources {
            let works = self
                .fetch_from(source.as_ref(), doi, direction, limit, delay, cancel)
                .await?;
            if !works.is_empty() {
                return Ok(works);
            }
        }
        Ok(Vec::new())
    }

    async fn fetch_from(
        &self,
        source: &dyn CitationSource,
        doi: &str,
        direction: Direction,
        limit: usize,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<RelatedWork>, BuildError> {
        let gate = Turn { fetcher: self, delay, cancel };
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(BuildError::Cancelled);
            }
            match source.related(doi, direction, limit, &gate).await {
                Ok(works) => {
                    tracing::debug!(
                        "{} returned {} {} for {}",
                        source.name(), works.len(), direction, doi
                    );
                    return Ok(works);
                }
                Err(SourceError::Cancelled) => return Err(BuildError::Cancelled),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let wait = self.retry.backoff_for(attempt);
                    tracing::debug!(
                        "{} failed for {} (attempt {}), retrying after {:?}: {}",
                        source.name(), doi, attempt + 1, wait, e
                    );
                    sleep_or_cancel(wait, cancel).await?;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "{} {} unavailable for {} after {} attempt(s): {}",
                        source.name(), direction, doi, attempt + 1, e
                    );
                    return Ok(Vec::new());
                }
            }
        }
    }

    /// Wait out the global inter-request delay, then claim the next slot.
    async fn pace(&self, delay: Duration, cancel: &CancellationToken) -> Result<(), BuildError> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < delay {
                sleep_or_cancel(delay - elapsed, cancel).await?;
            }
        }
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        *last = Some(Instant::now());
        Ok(())
    }
}

/// The gate handed to sources for one lookup.
struct Turn<'a> {
    fetcher: &'a RateLimitedFetcher,
    delay: Duration,
    cancel: &'a CancellationToken,
}

#[async_trait]
impl<'a> RequestGate for Turn<'a> {
    async fn wait_turn(&self) -> Result<(), SourceError> {
        self.fetcher
            .pace(self.delay, self.cancel)
            .await
            .map_err(|_| SourceError::Cancelled)
    }
}

async fn sleep_or_cancel(wait: Duration, cancel: &CancellationToken) -> Result<(), BuildError> {
    if wait.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(BuildError::Cancelled),
        _ = sleep(wait) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::openalex::OpenAlexClient;
    use crate::testing::FakeSource;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn sources(fakes: &[Arc<FakeSource>]) -> Vec<Arc<dyn CitationSource>> {
        fakes.iter().map(|f| f.clone() as Arc<dyn CitationSource>).collect()
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(30), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let source = Arc::new(FakeSource::new().refs("10.1/a", &["10.1/b"]).flaky("10.1/a", 2));
        let fetcher = RateLimitedFetcher::new(sources(&[source.clone()]), fast_retry(2));
        let works = fetcher
            .fetch("10.1/a", Direction::References, 10, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(works.len(), 1);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_yield_empty() {
        let source = Arc::new(FakeSource::new().refs("10.1/a", &["10.1/b"]).failing("10.1/a"));
        let fetcher = RateLimitedFetcher::new(sources(&[source.clone()]), fast_retry(2));
        let works = fetcher
            .fetch("10.1/a", Direction::References, 10, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap();
        assert!(works.is_empty());
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let source = Arc::new(FakeSource::new().rejecting("10.1/a"));
        let fetcher = RateLimitedFetcher::new(sources(&[source.clone()]), fast_retry(3));
        let works = fetcher
            .fetch("10.1/a", Direction::References, 10, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap();
        assert!(works.is_empty());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_falls_through_to_next_source() {
        let empty = Arc::new(FakeSource::named("crossref"));
        let full = Arc::new(FakeSource::named("openalex").cites("10.1/a", &["10.1/z"]));
        let fetcher = RateLimitedFetcher::new(sources(&[empty.clone(), full.clone()]), fast_retry(0));
        let works = fetcher
            .fetch("10.1/a", Direction::Citations, 10, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(works[0].id, "10.1/z");
        assert_eq!(empty.calls(), 1);
        assert_eq!(full.calls(), 1);
    }

    #[tokio::test]
    async fn test_global_pacing_between_calls() {
        let source = Arc::new(FakeSource::new());
        let fetcher = RateLimitedFetcher::new(sources(&[source]), fast_retry(0));
        let cancel = CancellationToken::new();
        let delay = Duration::from_millis(40);
        let start = Instant::now();
        for doi in ["10.1/a", "10.1/b", "10.1/c"] {
            fetcher.fetch(doi, Direction::References, 5, delay, &cancel).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let source = Arc::new(FakeSource::new().refs("10.1/a", &["10.1/b"]));
        let fetcher = RateLimitedFetcher::new(sources(&[source.clone()]), fast_retry(0));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = fetcher
            .fetch("10.1/a", Direction::References, 5, Duration::ZERO, &cancel)
            .await;
        assert!(matches!(result, Err(BuildError::Cancelled)));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_retries_means_one_attempt() {
        let source = Arc::new(FakeSource::new().failing("10.1/a"));
        let fetcher = RateLimitedFetcher::new(sources(&[source.clone()]), fast_retry(0));
        let works = fetcher
            .fetch("10.1/a", Direction::References, 5, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap();
        assert!(works.is_empty());
        assert_eq!(source.calls(), 1);
    }

    /// Replies with a fixed body and stamps when each request arrived.
    struct Stamped {
        body: serde_json::Value,
        arrivals: Arc<std::sync::Mutex<Vec<Instant>>>,
    }

    impl Respond for Stamped {
        fn respond(&self, _: &Request) -> ResponseTemplate {
            self.arrivals.lock().unwrap().push(Instant::now());
            ResponseTemplate::new(200).set_body_json(self.body.clone())
        }
    }

    #[tokio::test]
    async fn test_every_http_request_is_paced() {
        let server = MockServer::start().await;
        let arrivals = Arc::new(std::sync::Mutex::new(Vec::new()));
        Mock::given(method("GET"))
            .and(path("/works/doi:10.1/a"))
            .respond_with(Stamped {
                body: json!({"id": "https://openalex.org/W1", "doi": "https://doi.org/10.1/a"}),
                arrivals: arrivals.clone(),
            })
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(Stamped {
                body: json!({"results": [{"id": "https://openalex.org/W2", "doi": "https://doi.org/10.1/b"}]}),
                arrivals: arrivals.clone(),
            })
            .mount(&server)
            .await;

        let client = OpenAlexClient::with_base_url(None, &server.uri()).unwrap();
        let fetcher = RateLimitedFetcher::new(vec![Arc::new(client) as Arc<dyn CitationSource>], fast_retry(0));
        let delay = Duration::from_millis(200);
        let works = fetcher
            .fetch("10.1/a", Direction::References, 5, delay, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(works[0].id, "10.1/b");

        let arrivals = arrivals.lock().unwrap().clone();
        assert_eq!(arrivals.len(), 2);
        // The first arrival also carries connection setup, so allow a little slack.
        assert!(arrivals[1] - arrivals[0] >= delay - Duration::from_millis(20));
    }
}

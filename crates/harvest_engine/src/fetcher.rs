use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, Stream, StreamExt};
use harvest_logging::{harvest_debug, harvest_info, harvest_warn};
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::FetchSettings;
use crate::limiter::RateLimiter;
use crate::retry::{classify, retry_with_backoff, RetryError};
use crate::stats::{CompletionEstimate, FetchStats, FetchStatsSnapshot};
use crate::transport::{ReqwestTransport, Transport};
use crate::{FailureKind, FetchError, FetchOutput, FetchResult};

/// Fetches URLs behind two admission gates (a concurrency semaphore and a
/// requests-per-second limiter), retrying transient failures with
/// exponential backoff.
///
/// Every submitted URL yields exactly one [`FetchResult`]; failures are
/// reported in the result and never raised.
pub struct RateLimitedFetcher {
    transport: Arc<dyn Transport>,
    settings: FetchSettings,
    semaphore: Semaphore,
    limiter: RateLimiter,
    stats: FetchStats,
    known_bad: Mutex<HashMap<String, FetchError>>,
    first_request: Mutex<Option<Instant>>,
}

impl RateLimitedFetcher {
    pub fn new(transport: Arc<dyn Transport>, settings: FetchSettings) -> Self {
        let permits = settings.max_concurrent.max(1);
        Self {
            transport,
            semaphore: Semaphore::new(permits),
            limiter: RateLimiter::per_second(settings.requests_per_second),
            stats: FetchStats::default(),
            known_bad: Mutex::new(HashMap::new()),
            first_request: Mutex::new(None),
            settings,
        }
    }

    /// Fetcher over HTTP with a pooled client built from `settings`.
    pub fn with_reqwest(settings: FetchSettings) -> Result<Self, FetchError> {
        let transport = ReqwestTransport::new(&settings)?;
        harvest_info!(
            "HTTP client ready: {} concurrent, {} req/s",
            settings.max_concurrent,
            settings.requests_per_second
        );
        Ok(Self::new(Arc::new(transport), settings))
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    pub fn stats(&self) -> FetchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Clears counters and the known-bad set.
    pub fn reset(&self) {
        self.stats.reset();
        self.known_bad
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self
            .first_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Time left for `remaining` URLs at the success rate observed since the
    /// first request, or at 70% of the configured rate before any success.
    pub fn estimate_completion(&self, remaining: usize) -> CompletionEstimate {
        let successes = self.stats.snapshot().successful_requests;
        let elapsed = self
            .first_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map_or(0.0, |started| started.elapsed().as_secs_f64());
        let rate = if successes > 0 && elapsed > 0.0 {
            successes as f64 / elapsed
        } else {
            f64::from(self.settings.requests_per_second) * 0.7
        };
        CompletionEstimate::at_rate(remaining, rate)
    }

    /// Fetches every URL concurrently, yielding results as they complete.
    pub fn fetch_stream<'a>(
        &'a self,
        urls: &'a [String],
        cancel: &'a CancellationToken,
    ) -> impl Stream<Item = FetchResult> + 'a {
        urls.iter()
            .map(move |url| self.fetch_one(url, cancel))
            .collect::<FuturesUnordered<_>>()
    }

    pub async fn fetch_batch(&self, urls: &[String], cancel: &CancellationToken) -> Vec<FetchResult> {
        self.fetch_stream(urls, cancel).collect().await
    }

    pub async fn fetch_one(&self, url: &str, cancel: &CancellationToken) -> FetchResult {
        if let Some(error) = self.known_failure(url) {
            self.stats.short_circuit();
            return FetchResult {
                url: url.to_string(),
                outcome: Err(error),
            };
        }

        let policy = &self.settings.retry;
        let outcome = retry_with_backoff(
            policy,
            Some(cancel),
            |_| self.attempt(url, cancel),
            |err: &FetchError| classify(&err.kind, policy),
            |attempt, delay, err| {
                self.stats.retry();
                harvest_debug!("Retry {} for {} in {:?}: {}", attempt, url, delay, err);
            },
        )
        .await;

        let outcome = match outcome {
            Ok(output) => Ok(output),
            Err(RetryError::Failed { error, .. }) if error.is_cancelled() => Err(error),
            Err(RetryError::Failed { error, attempts }) => {
                if !error.is_not_found() {
                    harvest_warn!("Giving up on {} after {} attempt(s): {}", url, attempts, error);
                }
                self.remember_failure(url, &error);
                Err(error)
            }
            Err(RetryError::Cancelled { .. }) => Err(cancelled()),
        };

        FetchResult {
            url: url.to_string(),
            outcome,
        }
    }

    /// One fetch against `url`; passes when it yields a body or a clean 404.
    pub async fn health_check(&self, url: &str) -> bool {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let result = self.fetch_one(url, &cancel).await;
        let healthy = match &result.outcome {
            Ok(_) => true,
            Err(err) => err.is_not_found(),
        };
        harvest_info!(
            "Health check against {} finished in {:.2}s: {}",
            url,
            started.elapsed().as_secs_f64(),
            if healthy { "PASS" } else { "FAIL" }
        );
        healthy
    }

    async fn attempt(&self, url: &str, cancel: &CancellationToken) -> Result<FetchOutput, FetchError> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            permit = self.semaphore.acquire() => permit.map_err(|_| cancelled())?,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            _ = self.limiter.acquire() => {}
        }

        let (jitter, user_agent) = self.disguise();
        if !jitter.is_zero() {
            sleep(jitter).await;
        }

        self.stats.request();
        self.first_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(Instant::now);
        match self.transport.get(url, &user_agent).await {
            Ok(output) => {
                self.stats.success();
                Ok(output)
            }
            Err(err) => {
                self.stats.failure(&err.kind);
                harvest_debug!("Fetch of {} failed: {}", url, err);
                Err(err)
            }
        }
    }

    /// Random pause and User-Agent for one request.
    fn disguise(&self) -> (Duration, String) {
        let mut rng = rand::thread_rng();
        let low = self.settings.jitter_min.as_millis() as u64;
        let high = (self.settings.jitter_max.as_millis() as u64).max(low);
        let jitter = Duration::from_millis(rng.gen_range(low..=high));
        let agents = &self.settings.user_agents;
        let user_agent = if agents.is_empty() {
            String::new()
        } else {
            agents[rng.gen_range(0..agents.len())].clone()
        };
        (jitter, user_agent)
    }

    fn known_failure(&self, url: &str) -> Option<FetchError> {
        self.known_bad
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }

    fn remember_failure(&self, url: &str, error: &FetchError) {
        self.known_bad
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), error.clone());
    }
}

fn cancelled() -> FetchError {
    FetchError::new(FailureKind::Cancelled, "shutdown requested")
}

//! Async HTTP client with a rotating User-Agent, bounded retries, and optional per-host rate limits.

use crate::scraper::error::ScraperError;
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_REDIRECTS: usize = 10;

/// Default number of retries after the first failed attempt.
pub const DEFAULT_RETRY_COUNT: u32 = 5;
/// Default base delay; the n-th retry waits n times this.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;

/// Browser identities; one is picked at random for every request.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

/// Anything that can GET a page body. The engine only talks to this trait.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, ScraperError>;
}

/// Per-host politeness: minimum spacing between request starts and an optional in-flight cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimit {
    pub min_interval_ms: u64,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

/// Enforces one [RateLimit]. Scoped to the client that owns it.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_start: Mutex<Option<Instant>>,
    slots: Option<Arc<Semaphore>>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            min_interval: Duration::from_millis(limit.min_interval_ms),
            next_start: Mutex::new(None),
            slots: limit
                .max_concurrent
                .map(|n| Arc::new(Semaphore::new(n.max(1)))),
        }
    }

    /// Wait for a free slot and for the spacing since the previous start.
    /// Hold the returned permit until the request has completed.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        let permit = match &self.slots {
            Some(slots) => slots.clone().acquire_owned().await.ok(),
            None => None,
        };
        let start = {
            let mut next = self.next_start.lock().await;
            let now = Instant::now();
            let start = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(start + self.min_interval);
            start
        };
        tokio::time::sleep_until(start).await;
        permit
    }
}

/// Async HTTP client. Cheap to share behind an `Arc`; all state is per instance.
#[derive(Debug)]
pub struct FetchClient {
    inner: reqwest::Client,
    user_agent: Option<String>,
    retry_count: u32,
    retry_delay: Duration,
    limiters: HashMap<String, RateLimiter>,
}

impl FetchClient {
    /// Build a client with default timeout, retries, and no rate limits.
    pub fn new() -> Result<Self, ScraperError> {
        Self::builder().build()
    }

    pub fn builder() -> FetchClientBuilder {
        FetchClientBuilder::default()
    }

    /// The User-Agent for the next request: the configured one, or a random browser identity.
    fn identity(&self) -> String {
        match &self.user_agent {
            Some(ua) => ua.clone(),
            None => random_user_agent().to_string(),
        }
    }

    fn limiter_for(&self, url: &str) -> Option<&RateLimiter> {
        if self.limiters.is_empty() {
            return None;
        }
        let parsed = Url::parse(url).ok()?;
        self.limiters.get(parsed.host_str()?)
    }

    async fn get_once(&self, url: &str) -> Result<String, ScraperError> {
        let response = self
            .inner
            .get(url)
            .header(USER_AGENT, self.identity())
            .send()
            .await
            .map_err(|e| ScraperError::Network {
                url: url.to_string(),
                source: e,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScraperError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response.text().await.map_err(|e| ScraperError::BodyRead {
            url: url.to_string(),
            source: e,
        })
    }

    /// GET with retries for transient failures.
    ///
    /// Retries on transport errors, unreadable bodies, HTTP 5xx, and HTTP 429, waiting
    /// `attempt * retry_delay` between attempts. Other failures return immediately.
    /// Exhausting the retries yields [ScraperError::RetriesExhausted].
    pub async fn get_with_retry(&self, url: &str) -> Result<String, ScraperError> {
        let max_attempts = self.retry_count + 1;
        let limiter = self.limiter_for(url);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = {
                let _slot = match limiter {
                    Some(l) => l.acquire().await,
                    None => None,
                };
                self.get_once(url).await
            };
            match result {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self.retry_delay * attempt;
                    debug!(url, attempt, ?backoff, error = %e, "retrying request");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(ScraperError::RetriesExhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        last: Box::new(e),
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Fetch for FetchClient {
    async fn fetch(&self, url: &str) -> Result<String, ScraperError> {
        self.get_with_retry(url).await
    }
}

fn random_user_agent() -> &'static str {
    USER_AGENTS[rand::random_range(0..USER_AGENTS.len())]
}

/// Builder for [FetchClient].
#[derive(Debug)]
pub struct FetchClientBuilder {
    user_agent: Option<String>,
    timeout_secs: u64,
    retry_count: u32,
    retry_delay: Duration,
    rate_limits: HashMap<String, RateLimit>,
}

impl Default for FetchClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            rate_limits: HashMap::new(),
        }
    }
}

impl FetchClientBuilder {
    /// Pin the User-Agent instead of rotating through browser identities.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Request timeout in seconds. Default 30.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Retries after the first failed attempt. Default 5.
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n;
        self
    }

    /// Base delay between retries. Default 100ms.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Rate limit requests to `host`.
    pub fn rate_limit(mut self, host: impl Into<String>, limit: RateLimit) -> Self {
        self.rate_limits.insert(host.into(), limit);
        self
    }

    pub fn rate_limits(mut self, limits: impl IntoIterator<Item = (String, RateLimit)>) -> Self {
        self.rate_limits.extend(limits);
        self
    }

    pub fn build(self) -> Result<FetchClient, ScraperError> {
        let inner = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| ScraperError::Client { source: e })?;
        let limiters = self
            .rate_limits
            .into_iter()
            .map(|(host, limit)| (host, RateLimiter::new(limit)))
            .collect();
        Ok(FetchClient {
            inner,
            user_agent: self.user_agent,
            retry_count: self.retry_count,
            retry_delay: self.retry_delay,
            limiters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_user_agent_comes_from_pool() {
        for _ in 0..20 {
            assert!(USER_AGENTS.contains(&random_user_agent()));
        }
    }

    #[test]
    fn fixed_user_agent_overrides_rotation() -> Result<(), ScraperError> {
        let client = FetchClient::builder().user_agent("Custom/1.0").build()?;
        assert_eq!(client.identity(), "Custom/1.0");
        Ok(())
    }

    #[test]
    fn limiter_lookup_is_by_exact_host() -> Result<(), ScraperError> {
        let limit = RateLimit {
            min_interval_ms: 333,
            max_concurrent: Some(8),
        };
        let client = FetchClient::builder()
            .rate_limit("readlightnovel.org", limit)
            .build()?;
        assert!(client
            .limiter_for("https://readlightnovel.org/some-novel")
            .is_some());
        assert!(client
            .limiter_for("https://www.readlightnovel.org/some-novel")
            .is_none());
        assert!(client.limiter_for("not a url").is_none());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_spaces_request_starts() {
        let limiter = RateLimiter::new(RateLimit {
            min_interval_ms: 100,
            max_concurrent: None,
        });
        let begin = Instant::now();
        for _ in 0..3 {
            let _slot = limiter.acquire().await;
        }
        assert!(begin.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_caps_in_flight_requests() {
        let limiter = RateLimiter::new(RateLimit {
            min_interval_ms: 0,
            max_concurrent: Some(2),
        });
        let first = limiter.acquire().await;
        let second = limiter.acquire().await;
        assert!(first.is_some() && second.is_some());
        let third = tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(third.is_err(), "third request must wait for a free slot");
        drop(first);
        let third = tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(third.is_ok());
    }
}

//! HTTP transport with rate limiting and retry.
//!
//! One fetch entry point per agency. The per-source token gate is the only
//! shared mutable state in the pipeline; it is constructed by the entry
//! point and injected behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::errors::{ConfigError, FetchError};
use crate::sources::{self, SourceTag};

/// User agent string for API requests.
const USER_AGENT: &str = concat!("seismofuse/", env!("CARGO_PKG_VERSION"));

/// First backoff delay when not configured.
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Backoff ceiling when not configured.
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Jitter applied to every backoff delay, as a fraction of the delay.
const JITTER_FRACTION: f64 = 0.2;

/// Per-source token gate sized to each source's minimum poll interval.
///
/// `acquire` returns once the caller may fetch; concurrent callers for the
/// same source are serialized onto interval boundaries.
#[derive(Debug, Default)]
pub struct RateGate {
    next_slot: Mutex<HashMap<SourceTag, Instant>>,
}

impl RateGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the next token for `tag` is available.
    pub async fn acquire(&self, tag: SourceTag, interval: Duration) {
        let wait = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            match slots.get_mut(&tag) {
                None => {
                    slots.insert(tag, now + interval);
                    Duration::ZERO
                }
                Some(next) if *next <= now => {
                    *next = now + interval;
                    Duration::ZERO
                }
                Some(next) => {
                    let wait = *next - now;
                    *next += interval;
                    wait
                }
            }
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Exponential backoff schedule with jitter.
#[derive(Debug, Clone, Copy)]
struct BackoffPolicy {
    base: Duration,
    cap: Duration,
}

impl BackoffPolicy {
    fn from_config(config: &Config) -> Self {
        Self {
            base: config
                .retry
                .base_ms
                .map_or(DEFAULT_BACKOFF_BASE, Duration::from_millis),
            cap: config
                .retry
                .cap_ms
                .map_or(DEFAULT_BACKOFF_CAP, Duration::from_millis),
        }
    }

    /// Delay before retry number `retry` (1-based), with ±20% jitter.
    fn delay(&self, retry: u32) -> Duration {
        let doubled = self
            .base
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)));
        let capped = doubled.min(self.cap);
        let jitter = rand::thread_rng().gen_range(1.0 - JITTER_FRACTION..=1.0 + JITTER_FRACTION);
        capped.mul_f64(jitter)
    }
}

/// Map a response status onto the fetch error taxonomy.
fn classify_status(tag: SourceTag, status: u16) -> Option<FetchError> {
    match status {
        200..=299 => None,
        429 => Some(FetchError::RateLimited { agency: tag }),
        500..=599 => Some(FetchError::Http5xx {
            agency: tag,
            status,
        }),
        _ => Some(FetchError::Http4xx {
            agency: tag,
            status,
        }),
    }
}

/// Anything able to produce a payload for a source.
///
/// [`Transport`] is the production implementation; tests substitute canned
/// feeds.
pub trait FeedFetcher: Send + Sync {
    fn fetch(
        &self,
        tag: SourceTag,
        query: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// HTTP client for agency feeds.
pub struct Transport {
    http: reqwest::Client,
    gate: Arc<RateGate>,
    config: Config,
    backoff: BackoffPolicy,
}

impl Transport {
    /// Create a transport sharing the injected token gate.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized; this is
    /// fatal at startup.
    pub fn new(config: Config, gate: Arc<RateGate>) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;
        let backoff = BackoffPolicy::from_config(&config);
        Ok(Self {
            http,
            gate,
            config,
            backoff,
        })
    }

    /// Fetch one payload from an agency.
    ///
    /// Waits on the source's token gate, then runs the retry loop under the
    /// source's total deadline. Retries network errors, HTTP 5xx, and 429
    /// with exponential backoff; other 4xx and deadline expiry surface
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns the terminal [`FetchError`] once the retry budget or the
    /// deadline is exhausted.
    pub async fn fetch(&self, tag: SourceTag, query: Option<&str>) -> Result<Vec<u8>, FetchError> {
        let spec = sources::spec_for(tag);
        let url = match query {
            Some(q) => format!("{}?{}", spec.base_url, q),
            None => spec.feed_url(),
        };

        self.gate
            .acquire(tag, self.config.poll_interval_for(tag))
            .await;

        let deadline = self.config.deadline_for(tag);
        match tokio::time::timeout(deadline, self.fetch_with_retry(tag, &url, deadline)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                agency: tag,
                deadline_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    async fn fetch_with_retry(
        &self,
        tag: SourceTag,
        url: &str,
        attempt_timeout: Duration,
    ) -> Result<Vec<u8>, FetchError> {
        let max_retries = self.config.max_attempts_for(tag);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let result = self.attempt(tag, url, attempt_timeout).await;
            let latency_ms = started.elapsed().as_millis();

            match result {
                Ok(bytes) => {
                    debug!(
                        agency = %tag,
                        attempt,
                        latency_ms,
                        bytes = bytes.len(),
                        outcome = "ok",
                        "fetch attempt"
                    );
                    return Ok(bytes);
                }
                Err(error) => {
                    warn!(
                        agency = %tag,
                        attempt,
                        latency_ms,
                        outcome = error.kind(),
                        "fetch attempt"
                    );
                    if !error.is_retryable() || attempt > max_retries {
                        return Err(error);
                    }
                    tokio::time::sleep(self.backoff.delay(attempt)).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        tag: SourceTag,
        url: &str,
        attempt_timeout: Duration,
    ) -> Result<Vec<u8>, FetchError> {
        let response = self
            .http
            .get(url)
            .timeout(attempt_timeout)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                agency: tag,
                message: e.to_string(),
            })?;

        if let Some(error) = classify_status(tag, response.status().as_u16()) {
            return Err(error);
        }

        let bytes = response.bytes().await.map_err(|e| FetchError::Network {
            agency: tag,
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}

impl FeedFetcher for Transport {
    fn fetch(
        &self,
        tag: SourceTag,
        query: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, FetchError>> + Send {
        Transport::fetch(self, tag, query)
    }
}

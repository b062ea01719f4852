//! Per-host pacing of requests toward the remote catalog.
//!
//! The catalog mandates a minimum gap between consecutive requests. Requests
//! to different hosts proceed independently; requests to the same host are
//! serialized through that host's slot and spaced by the configured delay.
//! A server-imposed `Retry-After` pushes the host's next slot further out.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use papercache_core::download::RateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new(Duration::from_secs(3)));
//!
//! // First request proceeds immediately
//! limiter.acquire("https://export.arxiv.org/oai2?verb=ListRecords").await;
//!
//! // Second request to the same host waits out the delay
//! limiter.acquire("https://export.arxiv.org/api/query").await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{CUMULATIVE_DELAY_WARNING_THRESHOLD, MAX_RETRY_AFTER};

/// Per-host request pacing, shared across tasks behind an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    default_delay: Duration,
    disabled: bool,
    /// `Arc` lets callers drop the shard lock before awaiting the slot mutex.
    hosts: DashMap<String, Arc<HostSlot>>,
}

#[derive(Debug)]
struct HostSlot {
    /// Earliest instant the next request may start. `None` until first use.
    next_allowed: Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

impl HostSlot {
    fn new() -> Self {
        Self {
            next_allowed: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

impl RateLimiter {
    /// Creates a limiter spacing same-host requests by `default_delay`.
    #[must_use]
    #[instrument(skip_all, fields(delay_ms = default_delay.as_millis()))]
    pub fn new(default_delay: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            default_delay,
            disabled: default_delay.is_zero(),
            hosts: DashMap::new(),
        }
    }

    /// Creates a limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    #[must_use]
    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    fn slot(&self, host: &str) -> Arc<HostSlot> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostSlot::new()))
            .clone()
    }

    /// Waits until a request to `url`'s host may start, then claims the slot.
    ///
    /// The first request to a host proceeds immediately.
    #[instrument(skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        if self.disabled {
            return;
        }

        let host = extract_host(url);
        tracing::Span::current().record("host", host.as_str());
        let slot = self.slot(&host);

        // Held across the sleep so same-host callers queue behind each other.
        let mut next_allowed = slot.next_allowed.lock().await;
        if let Some(at) = *next_allowed {
            let now = Instant::now();
            if at > now {
                let delay = at - now;
                let cumulative = slot.add_cumulative_delay(delay);
                debug!(
                    host = %host,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying rate limit delay"
                );
                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        host = %host,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive rate limiting toward host"
                    );
                }
                tokio::time::sleep_until(at).await;
            }
        }
        *next_allowed = Some(Instant::now() + self.default_delay);
    }

    /// Records a server-mandated pause so the host's next slot starts no
    /// earlier than `delay` from now.
    #[instrument(skip(self), fields(host))]
    pub fn record_rate_limit(&self, url: &str, delay: Duration) {
        let host = extract_host(url);
        tracing::Span::current().record("host", host.as_str());
        let slot = self.slot(&host);
        let cumulative = slot.add_cumulative_delay(delay);

        // A slot currently held by a sleeping caller already enforces a pause.
        if let Ok(mut next_allowed) = slot.next_allowed.try_lock() {
            let until = Instant::now() + delay;
            if next_allowed.is_none_or(|at| at < until) {
                *next_allowed = Some(until);
            }
        }

        debug!(
            host = %host,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );
        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                host = %host,
                cumulative_delay_secs = cumulative.as_secs(),
                "server keeps throttling requests"
            );
        }
    }
}

/// Extracts the lowercase host from a URL, or `"unknown"` when unparseable.
///
/// ```
/// use papercache_core::download::extract_host;
///
/// assert_eq!(extract_host("https://Export.arXiv.org/oai2"), "export.arxiv.org");
/// assert_eq!(extract_host("http://127.0.0.1:8080/x"), "127.0.0.1");
/// assert_eq!(extract_host("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After header value (RFC 7231 seconds or HTTP-date).
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at one
/// hour; dates in the past yield zero.
///
/// ```
/// use std::time::Duration;
/// use papercache_core::download::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let Ok(seconds) = u64::try_from(seconds) else {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        };
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    let datetime = match httpdate::parse_http_date(header_value) {
        Ok(datetime) => datetime,
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            return None;
        }
    };
    let duration = datetime
        .duration_since(std::time::SystemTime::now())
        .unwrap_or(Duration::ZERO);
    Some(duration.min(MAX_RETRY_AFTER))
}

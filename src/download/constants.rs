//! Constants for the download module (timeouts, pacing).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large source archives).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Minimum gap between requests to the catalog host.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_secs(3);

/// Warning threshold for cumulative rate limit delay per host (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Project URL advertised in the User-Agent header.
const PROJECT_UA_URL: &str = "https://github.com/fierce/papercache";

/// User-Agent identifying the tool to the catalog.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("papercache/{version} (paper-cache; +{PROJECT_UA_URL})")
}

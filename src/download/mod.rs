//! HTTP plumbing toward the remote catalog.
//!
//! # Features
//!
//! - Streaming downloads revealed atomically at their final path
//! - Configurable timeouts (30s connect, 5min read by default)
//! - Per-host pacing that enforces the catalog's mandatory request gap
//! - Retry with exponential backoff and `Retry-After` support
//! - Structured error types with full context
//!
//! # Example
//!
//! ```no_run
//! use papercache_core::download::HttpClient;
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new();
//! let bytes = client
//!     .download_to_path(
//!         "https://arxiv.org/pdf/2301.00001.pdf",
//!         Path::new("./cache/pdf/2301/2301.00001.pdf"),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! println!("Downloaded {bytes} bytes");
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
pub mod rate_limiter;
mod retry;

pub use client::HttpClient;
pub use error::DownloadError;
pub use rate_limiter::{RateLimiter, extract_host, parse_retry_after};
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
    classify_http_status, with_retry,
};

// Note: no module-local Result alias here.
// Use `Result<T, DownloadError>` explicitly in function signatures.

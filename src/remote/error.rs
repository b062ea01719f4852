//! Error types for catalog requests.

use std::time::Duration;

use thiserror::Error;

use crate::download::{DownloadError, FailureType, classify_error, parse_retry_after};

/// Errors returned by [`MetadataSource`](super::MetadataSource) implementations
/// and the point-lookup client.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport or HTTP failure.
    #[error(transparent)]
    Http(DownloadError),

    /// The catalog answered 503; the caller should back off and resume later.
    #[error("catalog is throttling requests to {url}")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },

    /// The response body was not the expected XML document.
    #[error("failed to parse response from {url}: {message}")]
    Parse { url: String, message: String },

    /// The OAI-PMH endpoint reported an error other than `noRecordsMatch`.
    #[error("OAI-PMH error {code}: {message}")]
    Protocol { code: String, message: String },

    /// The catalog has no record for the identifier.
    #[error("paper not found in catalog: {0}")]
    NotFound(String),
}

impl RemoteError {
    /// Maps a transport error, turning 503 responses into [`RemoteError::RateLimited`].
    pub(crate) fn from_http(error: DownloadError) -> Self {
        if error.status() == Some(503) {
            let url = match &error {
                DownloadError::HttpStatus { url, .. } => url.clone(),
                _ => String::new(),
            };
            let retry_after = error.retry_after().and_then(parse_retry_after);
            return Self::RateLimited { url, retry_after };
        }
        Self::Http(error)
    }

    pub(crate) fn parse(url: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Parse {
            url: url.into(),
            message: error.to_string(),
        }
    }

    /// How a caller should treat this failure.
    #[must_use]
    pub fn failure_type(&self) -> FailureType {
        match self {
            Self::Http(e) => classify_error(e),
            Self::RateLimited { .. } => FailureType::RateLimited,
            Self::Parse { .. } | Self::Protocol { .. } | Self::NotFound(_) => FailureType::Permanent,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_cancelled())
    }
}

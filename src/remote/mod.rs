//! Clients for the remote paper catalog.
//!
//! # Overview
//!
//! - [`MetadataSource`] - paginated bulk listing consumed by the harvester
//! - [`OaiClient`] - OAI-PMH `ListRecords` implementation of it
//! - [`ApiClient`] - point and batch lookups over the Atom query API
//! - [`Endpoints`] - base URLs for every remote resource

mod api;
mod error;
mod oai;

pub use api::{ApiClient, MAX_BATCH_IDS};
pub use error::RemoteError;
pub use oai::OaiClient;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use crate::paper::Paper;

/// Base URLs of the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub oai_url: String,
    pub api_url: String,
    pub pdf_base_url: String,
    pub source_base_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            oai_url: "https://export.arxiv.org/oai2".to_string(),
            api_url: "https://export.arxiv.org/api/query".to_string(),
            pdf_base_url: "https://arxiv.org/pdf".to_string(),
            source_base_url: "https://arxiv.org/e-print".to_string(),
        }
    }
}

impl Endpoints {
    /// Every endpoint under one server root, e.g. a local mock.
    #[must_use]
    pub fn under(root: &str) -> Self {
        let root = root.trim_end_matches('/');
        Self {
            oai_url: format!("{root}/oai2"),
            api_url: format!("{root}/api/query"),
            pdf_base_url: format!("{root}/pdf"),
            source_base_url: format!("{root}/e-print"),
        }
    }

    #[must_use]
    pub fn pdf_url(&self, id: &str) -> String {
        format!("{}/{id}.pdf", self.pdf_base_url.trim_end_matches('/'))
    }

    #[must_use]
    pub fn source_url(&self, id: &str) -> String {
        format!("{}/{id}", self.source_base_url.trim_end_matches('/'))
    }
}

/// One page request: either the first page with filters or a continuation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub set: Option<String>,
    pub from: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    /// When present the filters are ignored; the token encodes position.
    pub token: Option<String>,
}

impl PageRequest {
    #[must_use]
    pub fn first(set: Option<String>, from: Option<NaiveDate>, until: Option<NaiveDate>) -> Self {
        Self {
            set,
            from,
            until,
            token: None,
        }
    }

    #[must_use]
    pub fn resume(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }
}

/// One page of catalog records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Paper>,
    /// `None` once the listing is complete.
    pub next_token: Option<String>,
    pub total_size: Option<u64>,
}

/// A paginated source of paper metadata.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Requests one page.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] on transport, throttling or protocol failures.
    async fn list_records(
        &self,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> Result<Page, RemoteError>;
}

/// Collapses runs of whitespace (including line breaks) into single spaces.
pub(crate) fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! Point lookups over the Atom query API.

use std::sync::Arc;

use chrono::DateTime;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use super::{RemoteError, squash_whitespace};
use crate::download::{DownloadError, HttpClient, RateLimiter, RetryPolicy, with_retry};
use crate::paper::{Paper, normalize_id};

/// Maximum identifiers sent in one query.
pub const MAX_BATCH_IDS: usize = 50;

/// Client for `id_list` queries against the Atom API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: HttpClient,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
    retry_policy: RetryPolicy,
}

impl ApiClient {
    #[must_use]
    pub fn new(
        http: HttpClient,
        base_url: impl Into<String>,
        rate_limiter: Arc<RateLimiter>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            rate_limiter,
            retry_policy,
        }
    }

    /// Fetches the metadata of one paper.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotFound`] if the catalog has no such paper, or
    /// any transport/parse error.
    #[instrument(skip(self, cancel), fields(paper_id = %id))]
    pub async fn fetch(&self, id: &str, cancel: &CancellationToken) -> Result<Paper, RemoteError> {
        let wanted = normalize_id(id);
        self.query(&[wanted.to_string()], cancel)
            .await?
            .into_iter()
            .find(|p| p.id == wanted)
            .ok_or_else(|| RemoteError::NotFound(wanted.to_string()))
    }

    /// Fetches metadata for many papers, [`MAX_BATCH_IDS`] per request.
    ///
    /// Identifiers the catalog does not know are silently absent from the
    /// result.
    ///
    /// # Errors
    ///
    /// Returns the first transport/parse error; papers from earlier chunks are
    /// discarded in that case.
    #[instrument(skip(self, ids, cancel), fields(count = ids.len()))]
    pub async fn fetch_batch(
        &self,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Paper>, RemoteError> {
        let mut papers = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_BATCH_IDS) {
            papers.extend(self.query(chunk, cancel).await?);
        }
        Ok(papers)
    }

    fn query_url(&self, ids: &[String]) -> Result<String, RemoteError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|_| RemoteError::Http(DownloadError::invalid_url(&self.base_url)))?;
        url.query_pairs_mut()
            .append_pair("id_list", &ids.join(","))
            .append_pair("max_results", &ids.len().to_string());
        Ok(url.into())
    }

    async fn query(
        &self,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Paper>, RemoteError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.query_url(ids)?;
        let body = with_retry(&self.retry_policy, &self.rate_limiter, &url, cancel, || {
            self.http.get_text(&url)
        })
        .await
        .map_err(RemoteError::from_http)?;

        let papers = parse_feed(&url, &body)?;
        debug!(requested = ids.len(), received = papers.len(), "query API response");
        Ok(papers)
    }
}

/// Parses an Atom feed, skipping entries that are not paper records.
pub(crate) fn parse_feed(url: &str, body: &str) -> Result<Vec<Paper>, RemoteError> {
    let feed: AtomFeed = quick_xml::de::from_str(body).map_err(|e| RemoteError::parse(url, e))?;
    Ok(feed
        .entries
        .into_iter()
        .filter_map(AtomEntry::into_paper)
        .collect())
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AtomEntry {
    id: String,
    title: String,
    summary: String,
    #[serde(rename = "author")]
    authors: Vec<AtomAuthor>,
    #[serde(rename = "category")]
    categories: Vec<AtomCategory>,
    published: String,
    updated: String,
    comment: String,
    journal_ref: String,
    doi: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AtomAuthor {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AtomCategory {
    #[serde(rename = "@term")]
    term: String,
}

impl AtomEntry {
    /// `None` for entries without an `/abs/` identifier (API error entries).
    fn into_paper(self) -> Option<Paper> {
        let (_, raw_id) = self.id.rsplit_once("/abs/")?;
        let id = normalize_id(raw_id.trim());
        if id.is_empty() {
            return None;
        }

        let authors = self
            .authors
            .iter()
            .map(|a| squash_whitespace(&a.name))
            .collect::<Vec<_>>()
            .join(", ");
        let categories = self
            .categories
            .iter()
            .map(|c| c.term.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Some(Paper {
            created: parse_timestamp(&self.published),
            updated: parse_timestamp(&self.updated),
            title: squash_whitespace(&self.title),
            abstract_text: self.summary.trim().to_string(),
            authors,
            categories,
            comments: self.comment.trim().to_string(),
            journal_ref: self.journal_ref.trim().to_string(),
            doi: self.doi.trim().to_string(),
            ..Paper::new(id)
        })
    }
}

fn parse_timestamp(value: &str) -> Option<chrono::NaiveDate> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.date_naive())
}

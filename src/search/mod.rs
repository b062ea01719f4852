//! Exact and approximate paper search.
//!
//! # Overview
//!
//! - [`Searcher::search`] - ranked full-text lookup over titles and abstracts
//! - [`Searcher::search_pdfs`] - exact or typo-tolerant scan of extracted PDF text
//! - [`ensure_pdf_text`] - lazily extracts and stores the text of a downloaded PDF

mod fts;
pub mod fuzzy;

pub use fuzzy::{DEFAULT_THRESHOLD, SNIPPET_CHARS, TextMatch};

use std::cmp::Ordering;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::paper::{ArtifactKind, Paper};
use crate::pdf::{PdfTextError, extract_text};
use crate::store::{PaperStore, StoreError};

/// Results returned by [`Searcher::search`] when no limit is given.
pub const DEFAULT_SEARCH_LIMIT: i64 = 20;

/// Results returned by [`Searcher::search_pdfs`] when no limit is given.
pub const DEFAULT_PDF_SEARCH_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("PDF not downloaded for paper {0}")]
    PdfMissing(String),

    #[error(transparent)]
    Extract(#[from] PdfTextError),

    /// A blocking worker panicked or was aborted.
    #[error("search task failed: {0}")]
    Task(String),
}

/// One document matching an approximate search.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfMatch {
    pub paper_id: String,
    pub context: String,
    pub score: f64,
}

/// Search entry point bound to one store.
#[derive(Debug, Clone)]
pub struct Searcher {
    store: PaperStore,
    threshold: f64,
}

impl Searcher {
    #[must_use]
    pub fn new(store: PaperStore) -> Self {
        Self::with_threshold(store, DEFAULT_THRESHOLD)
    }

    /// Uses `threshold` as the minimum approximate-match score.
    #[must_use]
    pub fn with_threshold(store: PaperStore, threshold: f64) -> Self {
        Self { store, threshold }
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Full-text search over titles and abstracts, best match first.
    ///
    /// `category` filters by substring of the category list. A non-positive
    /// `limit` means [`DEFAULT_SEARCH_LIMIT`].
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Store`] if the query fails.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        query: &str,
        category: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Paper>, SearchError> {
        let limit = if limit > 0 { limit } else { DEFAULT_SEARCH_LIMIT };
        let papers = fts::search(self.store.pool(), query, category, limit).await?;
        debug!(results = papers.len(), "full-text search");
        Ok(papers)
    }

    /// Scans the extracted text of every downloaded PDF.
    ///
    /// With `fuzzy` set, near matches above the threshold are accepted;
    /// otherwise only case-insensitive substrings. Results are ordered by
    /// descending score.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Store`] if loading texts fails.
    #[instrument(skip(self))]
    pub async fn search_pdfs(
        &self,
        query: &str,
        limit: usize,
        fuzzy: bool,
    ) -> Result<Vec<PdfMatch>, SearchError> {
        let limit = if limit > 0 { limit } else { DEFAULT_PDF_SEARCH_LIMIT };
        let documents: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, pdf_text FROM papers
             WHERE pdf_downloaded = 1 AND pdf_text IS NOT NULL AND pdf_text <> ''",
        )
        .fetch_all(self.store.pool())
        .await
        .map_err(StoreError::from)?;

        let query = query.to_string();
        let threshold = self.threshold;
        let mut matches = tokio::task::spawn_blocking(move || {
            documents
                .into_iter()
                .filter_map(|(paper_id, text)| {
                    let found = if fuzzy {
                        fuzzy::fuzzy_match(&text, &query, threshold)
                    } else {
                        fuzzy::exact_match(&text, &query)
                    }?;
                    Some(PdfMatch {
                        context: fuzzy::snippet(&text, Some(found), SNIPPET_CHARS),
                        score: found.score,
                        paper_id,
                    })
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| SearchError::Task(e.to_string()))?;

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        matches.truncate(limit);
        debug!(results = matches.len(), "pdf text search");
        Ok(matches)
    }

    /// Extracts and stores text for every downloaded PDF that has none.
    ///
    /// Unreadable PDFs are logged and counted, not fatal. Returns
    /// `(extracted, failed)`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Store`] if the candidate query fails.
    #[instrument(skip(self, cancel))]
    pub async fn extract_missing_texts(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(usize, usize), SearchError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM papers
             WHERE pdf_downloaded = 1 AND (pdf_text IS NULL OR pdf_text = '')
             ORDER BY id",
        )
        .fetch_all(self.store.pool())
        .await
        .map_err(StoreError::from)?;

        let (mut extracted, mut failed) = (0, 0);
        for id in ids {
            if cancel.is_cancelled() {
                break;
            }
            match ensure_pdf_text(&self.store, &id).await {
                Ok(_) => extracted += 1,
                Err(e) => {
                    warn!(paper_id = %id, error = %e, "pdf text extraction failed");
                    failed += 1;
                }
            }
        }
        info!(extracted, failed, "pdf text backfill finished");
        Ok((extracted, failed))
    }
}

/// Returns the stored text of a paper's PDF, extracting it on first use.
///
/// # Errors
///
/// - [`SearchError::Store`] with [`StoreError::PaperNotFound`] for unknown papers
/// - [`SearchError::PdfMissing`] if the PDF has not been downloaded
/// - [`SearchError::Extract`] if the PDF cannot be read
#[instrument(skip(store), fields(paper_id = %paper_id))]
pub async fn ensure_pdf_text(store: &PaperStore, paper_id: &str) -> Result<String, SearchError> {
    let paper = store.require_paper(paper_id).await?;
    let Some(path) = paper
        .has_artifact(ArtifactKind::Pdf)
        .then(|| paper.artifact_path(ArtifactKind::Pdf))
        .flatten()
        .map(PathBuf::from)
    else {
        return Err(SearchError::PdfMissing(paper.id));
    };

    if let Some(text) = store.pdf_text(&paper.id).await?.filter(|t| !t.is_empty()) {
        return Ok(text);
    }

    let text = tokio::task::spawn_blocking(move || extract_text(&path))
        .await
        .map_err(|e| SearchError::Task(e.to_string()))??;
    store.set_pdf_text(&paper.id, &text).await?;
    info!(chars = text.len(), "pdf text stored");
    Ok(text)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::tests::{sample_paper, setup_store};

    async fn store_with_texts() -> PaperStore {
        let store = setup_store().await;
        let mut attention = sample_paper("1706.03762", "Attention Is All You Need", "cs.CL cs.LG");
        attention.abstract_text = "The dominant sequence transduction models.".to_string();
        let mut graphs = sample_paper("2301.00001", "Graph Networks", "cs.LG");
        graphs.abstract_text = "Message passing with attention heads.".to_string();
        let physics = sample_paper("hep-th/9901001", "Strings", "hep-th");
        store
            .upsert_papers(&[attention, graphs, physics])
            .await
            .unwrap();

        for (id, text) in [
            ("1706.03762", "We propose the Transformer, based solely on attention."),
            ("2301.00001", "A transfromer variant for graphs."),
        ] {
            store
                .mark_artifact(id, ArtifactKind::Pdf, &format!("/tmp/{id}.pdf"))
                .await
                .unwrap();
            store.set_pdf_text(id, text).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_search_ranks_and_filters() {
        let searcher = Searcher::new(store_with_texts().await);

        let hits = searcher.search("attention", None, 0).await.unwrap();
        let mut ids: Vec<_> = hits.iter().map(|p| p.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, ["1706.03762", "2301.00001"]);

        let hits = searcher.search("attention", Some("cs.CL"), 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        assert!(searcher.search("\"", None, 10).await.unwrap().is_empty());
        assert!(searcher.search("NOT OR AND", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_sees_updates() {
        let store = store_with_texts().await;
        let searcher = Searcher::new(store.clone());
        let mut renamed = sample_paper("hep-th/9901001", "Superstring Dualities", "hep-th");
        renamed.abstract_text = "M-theory.".to_string();
        store.upsert_paper(&renamed).await.unwrap();

        assert_eq!(searcher.search("dualities", None, 10).await.unwrap().len(), 1);
        assert!(searcher.search("strings", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_pdfs_exact_and_fuzzy() {
        let searcher = Searcher::new(store_with_texts().await);

        let exact = searcher.search_pdfs("transformer", 10, false).await.unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].paper_id, "1706.03762");
        assert!(exact[0].context.contains("Transformer"));

        let fuzzy = searcher.search_pdfs("transformer", 10, true).await.unwrap();
        assert_eq!(fuzzy.len(), 2);
        assert_eq!(fuzzy[0].paper_id, "1706.03762");
        assert!(fuzzy[0].score > fuzzy[1].score);

        let strict = Searcher::with_threshold(searcher.store.clone(), 0.95);
        assert_eq!(strict.search_pdfs("transformer", 10, true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_pdf_text_uses_stored_text() {
        let store = store_with_texts().await;
        let text = ensure_pdf_text(&store, "1706.03762").await.unwrap();
        assert!(text.starts_with("We propose"));
    }

    #[tokio::test]
    async fn test_extract_missing_texts_counts_failures() {
        let store = store_with_texts().await;
        let mut broken = sample_paper("2302.00002", "Broken", "cs.LG");
        broken.abstract_text = "x".to_string();
        store.upsert_paper(&broken).await.unwrap();
        store
            .mark_artifact("2302.00002", ArtifactKind::Pdf, "/nonexistent/2302.00002.pdf")
            .await
            .unwrap();
        let searcher = Searcher::new(store);

        let (extracted, failed) = searcher
            .extract_missing_texts(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!((extracted, failed), (0, 1));
    }

    #[tokio::test]
    async fn test_ensure_pdf_text_requires_download() {
        let store = store_with_texts().await;
        let err = ensure_pdf_text(&store, "hep-th/9901001").await.unwrap_err();
        assert!(matches!(err, SearchError::PdfMissing(_)));

        let err = ensure_pdf_text(&store, "2301.99999").await.unwrap_err();
        assert!(matches!(err, SearchError::Store(ref e) if e.is_not_found()));
    }
}

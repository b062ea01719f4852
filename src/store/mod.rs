//! Persistent paper store fronted by the in-memory LRU.
//!
//! The store is the single source of truth. Reads consult the cache first and
//! populate it on a miss; every write that touches a paper row invalidates the
//! cached snapshot so the next read observes committed state.
//!
//! # Overview
//!
//! - [`PaperStore`] - metadata ingestion, lookups and artifact bookkeeping
//! - [`StoreStats`] - aggregate counts for presentation layers
//! - [`QueuedDownload`] - one entry in the persistent download queue
//! - [`StoreError`] - operation error types

mod error;
mod queue;
mod sync;

pub use error::{StoreError, StoreErrorKind};
pub use queue::QueuedDownload;
pub use sync::{LAST_SYNC_KEY, RESUMPTION_TOKEN_KEY};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, instrument};

use crate::cache::LruCache;
use crate::db::Database;
use crate::paper::{ArtifactKind, PAPER_COLUMNS, Paper};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Returns `Ok(())` if at least one row was affected; otherwise [`StoreError::PaperNotFound`].
fn check_affected(id: &str, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::PaperNotFound(id.to_string()))
    } else {
        Ok(())
    }
}

/// Aggregate counts derived from the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_papers: i64,
    pub pdf_downloaded: i64,
    pub src_downloaded: i64,
    pub queued: i64,
}

/// Store for papers, artifact state, harvest state and the download queue.
#[derive(Debug, Clone)]
pub struct PaperStore {
    db: Database,
    cache: Arc<LruCache<String, Paper>>,
}

impl PaperStore {
    /// Creates a store with its own cache of `cache_capacity` entries.
    #[must_use]
    pub fn new(db: Database, cache_capacity: usize) -> Self {
        Self::with_cache(db, Arc::new(LruCache::new(cache_capacity)))
    }

    /// Creates a store sharing an existing cache.
    #[must_use]
    pub fn with_cache(db: Database, cache: Arc<LruCache<String, Paper>>) -> Self {
        Self { db, cache }
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    #[must_use]
    pub fn pool(&self) -> &sqlx::SqlitePool {
        self.db.pool()
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<LruCache<String, Paper>> {
        &self.cache
    }

    /// Looks up a paper, reading through the cache.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(paper_id = %id))]
    pub async fn get_paper(&self, id: &str) -> Result<Option<Paper>> {
        if let Some(paper) = self.cache.get(&id.to_string()) {
            return Ok(Some(paper));
        }

        // Writers commit before invalidating, so a row read after this point
        // is only cached if no write finished in between.
        let generation = self.cache.generation();
        let sql = format!("SELECT {PAPER_COLUMNS} FROM papers WHERE id = ?");
        let paper = sqlx::query_as::<_, Paper>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        if let Some(paper) = &paper
            && !self
                .cache
                .put_if_unchanged(paper.id.clone(), paper.clone(), generation)
        {
            debug!("cache fill skipped after concurrent write");
        }
        Ok(paper)
    }

    /// Like [`get_paper`](Self::get_paper) but reports absence as an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PaperNotFound`] when no row exists.
    pub async fn require_paper(&self, id: &str) -> Result<Paper> {
        self.get_paper(id)
            .await?
            .ok_or_else(|| StoreError::PaperNotFound(id.to_string()))
    }

    /// Returns true if a row exists for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn paper_exists(&self, id: &str) -> Result<bool> {
        if self.cache.get(&id.to_string()).is_some() {
            return Ok(true);
        }
        let found: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM papers WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(found.is_some())
    }

    /// Returns the subset of `ids` that have no stored row, in input order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a lookup fails.
    pub async fn missing_ids(&self, ids: &[String]) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for id in ids {
            if !self.paper_exists(id).await? {
                missing.push(id.clone());
            }
        }
        Ok(missing)
    }

    /// Inserts or refreshes one paper's metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails.
    pub async fn upsert_paper(&self, paper: &Paper) -> Result<()> {
        self.upsert_papers(std::slice::from_ref(paper)).await
    }

    /// Inserts or refreshes a batch of papers in one transaction.
    ///
    /// Only metadata columns are written; artifact paths, flags and extracted
    /// text survive re-ingestion.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if any write fails; nothing is committed.
    #[instrument(skip(self, papers), fields(count = papers.len()))]
    pub async fn upsert_papers(&self, papers: &[Paper]) -> Result<()> {
        if papers.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool().begin().await?;
        for paper in papers {
            upsert_paper_row(&mut *tx, paper).await?;
        }
        tx.commit().await?;
        self.invalidate(papers);
        debug!(count = papers.len(), "papers upserted");
        Ok(())
    }

    pub(crate) fn invalidate(&self, papers: &[Paper]) {
        for paper in papers {
            self.cache.delete(&paper.id);
        }
    }

    /// Lists papers newest first, optionally restricted to a category token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_papers(
        &self,
        category: Option<&str>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Paper>> {
        let papers = match category {
            Some(category) => {
                let sql = format!(
                    "SELECT {PAPER_COLUMNS} FROM papers
                     WHERE (' ' || categories || ' ') LIKE ?
                     ORDER BY created DESC, id DESC LIMIT ? OFFSET ?"
                );
                sqlx::query_as::<_, Paper>(&sql)
                    .bind(category_pattern(category))
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(self.pool())
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {PAPER_COLUMNS} FROM papers
                     ORDER BY created DESC, id DESC LIMIT ? OFFSET ?"
                );
                sqlx::query_as::<_, Paper>(&sql)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(self.pool())
                    .await?
            }
        };
        Ok(papers)
    }

    /// Finds papers whose author string contains `name` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn search_by_author(&self, name: &str, limit: i64) -> Result<Vec<Paper>> {
        let sql = format!(
            "SELECT {PAPER_COLUMNS} FROM papers
             WHERE authors LIKE ? ESCAPE '\\'
             ORDER BY created DESC, id DESC LIMIT ?"
        );
        let papers = sqlx::query_as::<_, Paper>(&sql)
            .bind(format!("%{}%", escape_like(name.trim())))
            .bind(limit)
            .fetch_all(self.pool())
            .await?;
        Ok(papers)
    }

    /// Counts papers per category token, most populated first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_categories(&self) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT categories FROM papers WHERE categories != ''")
                .fetch_all(self.pool())
                .await?;

        let mut counts: HashMap<String, i64> = HashMap::new();
        for (categories,) in rows {
            for token in categories.split_whitespace() {
                *counts.entry(token.to_string()).or_insert(0) += 1;
            }
        }
        let mut sorted: Vec<(String, i64)> = counts.into_iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(sorted)
    }

    /// IDs and source directories of every paper with a downloaded source.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn papers_with_source(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query_as(
            "SELECT id, src_path FROM papers
             WHERE src_downloaded = 1 AND src_path IS NOT NULL
             ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Papers in `category` lacking at least one of the requested artifacts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn papers_missing_artifacts(
        &self,
        category: &str,
        want_pdf: bool,
        want_source: bool,
        limit: i64,
    ) -> Result<Vec<Paper>> {
        let missing = match (want_pdf, want_source) {
            (true, true) => "(pdf_downloaded = 0 OR src_downloaded = 0)",
            (true, false) => "pdf_downloaded = 0",
            (false, true) => "src_downloaded = 0",
            (false, false) => return Ok(Vec::new()),
        };
        let sql = format!(
            "SELECT {PAPER_COLUMNS} FROM papers
             WHERE (' ' || categories || ' ') LIKE ? AND {missing}
             ORDER BY created DESC, id DESC LIMIT ?"
        );
        let papers = sqlx::query_as::<_, Paper>(&sql)
            .bind(category_pattern(category))
            .bind(limit)
            .fetch_all(self.pool())
            .await?;
        Ok(papers)
    }

    /// Records a downloaded artifact: path and flag change in one statement.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PaperNotFound`] if no row exists,
    /// or [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), fields(paper_id = %id, kind = %kind))]
    pub async fn mark_artifact(&self, id: &str, kind: ArtifactKind, path: &str) -> Result<()> {
        let sql = match kind {
            ArtifactKind::Pdf => "UPDATE papers SET pdf_path = ?, pdf_downloaded = 1 WHERE id = ?",
            ArtifactKind::Source => {
                "UPDATE papers SET src_path = ?, src_downloaded = 1 WHERE id = ?"
            }
        };
        let result = sqlx::query(sql)
            .bind(path)
            .bind(id)
            .execute(self.pool())
            .await?;
        self.cache.delete(&id.to_string());
        check_affected(id, result.rows_affected())
    }

    /// Stores text extracted from the paper's PDF.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PaperNotFound`] if no row exists,
    /// or [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, text), fields(paper_id = %id, len = text.len()))]
    pub async fn set_pdf_text(&self, id: &str, text: &str) -> Result<()> {
        let result = sqlx::query("UPDATE papers SET pdf_text = ? WHERE id = ?")
            .bind(text)
            .bind(id)
            .execute(self.pool())
            .await?;
        check_affected(id, result.rows_affected())
    }

    /// Loads previously extracted PDF text.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn pdf_text(&self, id: &str) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT pdf_text FROM papers WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.and_then(|(text,)| text))
    }

    /// Aggregate counts: papers, downloaded artifacts and queue depth.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a query fails.
    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<StoreStats> {
        let (total_papers, pdf_downloaded, src_downloaded): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*),
                    COALESCE(SUM(pdf_downloaded), 0),
                    COALESCE(SUM(src_downloaded), 0)
             FROM papers",
        )
        .fetch_one(self.pool())
        .await?;
        let queued = self.queue_depth().await?;

        Ok(StoreStats {
            total_papers,
            pdf_downloaded,
            src_downloaded,
            queued,
        })
    }

    /// Rebuilds the full-text index from the papers table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the rebuild fails.
    #[instrument(skip(self))]
    pub async fn rebuild_fts_index(&self) -> Result<()> {
        sqlx::query("INSERT INTO papers_fts(papers_fts) VALUES ('rebuild')")
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

pub(crate) async fn upsert_paper_row(conn: &mut SqliteConnection, paper: &Paper) -> Result<()> {
    sqlx::query(
        r"INSERT INTO papers (
            id, created, updated, title, abstract, authors, categories,
            comments, journal_ref, doi, license, metadata_updated
          )
          VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
          ON CONFLICT(id) DO UPDATE SET
            created = excluded.created,
            updated = excluded.updated,
            title = excluded.title,
            abstract = excluded.abstract,
            authors = excluded.authors,
            categories = excluded.categories,
            comments = excluded.comments,
            journal_ref = excluded.journal_ref,
            doi = excluded.doi,
            license = excluded.license,
            metadata_updated = excluded.metadata_updated",
    )
    .bind(&paper.id)
    .bind(paper.created)
    .bind(paper.updated)
    .bind(&paper.title)
    .bind(&paper.abstract_text)
    .bind(&paper.authors)
    .bind(&paper.categories)
    .bind(&paper.comments)
    .bind(&paper.journal_ref)
    .bind(&paper.doi)
    .bind(&paper.license)
    .bind(paper.metadata_updated.unwrap_or_else(Utc::now))
    .execute(conn)
    .await?;
    Ok(())
}

/// LIKE pattern matching `category` as a whole space-delimited token.
fn category_pattern(category: &str) -> String {
    format!("% {} %", category.trim())
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use chrono::NaiveDate;

    use super::*;

    pub(crate) async fn setup_store() -> PaperStore {
        let db = Database::new_in_memory().await.unwrap();
        PaperStore::new(db, 16)
    }

    pub(crate) fn sample_paper(id: &str, title: &str, categories: &str) -> Paper {
        Paper {
            title: title.to_string(),
            abstract_text: format!("Abstract of {title}"),
            authors: "Ada Lovelace, Alan Turing".to_string(),
            categories: categories.to_string(),
            created: NaiveDate::from_ymd_opt(2023, 1, 2),
            ..Paper::new(id)
        }
    }

    #[tokio::test]
    async fn test_get_paper_reads_through_cache() {
        let store = setup_store().await;
        store
            .upsert_paper(&sample_paper("2301.00001", "Graphs", "cs.DM"))
            .await
            .unwrap();
        assert_eq!(store.cache().len(), 0, "writes must not populate the cache");

        let paper = store.get_paper("2301.00001").await.unwrap().unwrap();
        assert_eq!(paper.title, "Graphs");
        assert_eq!(paper.created, NaiveDate::from_ymd_opt(2023, 1, 2));
        assert_eq!(store.cache().len(), 1);

        assert!(store.get_paper("2301.99999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_is_keyed_by_id_and_invalidates_cache() {
        let store = setup_store().await;
        store
            .upsert_paper(&sample_paper("2301.00001", "Old", "cs.DM"))
            .await
            .unwrap();
        store.get_paper("2301.00001").await.unwrap();
        store
            .upsert_paper(&sample_paper("2301.00001", "New", "cs.DM"))
            .await
            .unwrap();

        let paper = store.get_paper("2301.00001").await.unwrap().unwrap();
        assert_eq!(paper.title, "New");
        assert_eq!(store.stats().await.unwrap().total_papers, 1);
    }

    #[tokio::test]
    async fn test_upsert_preserves_artifact_state() {
        let store = setup_store().await;
        store
            .upsert_paper(&sample_paper("2301.00001", "T", "cs.DM"))
            .await
            .unwrap();
        store
            .mark_artifact("2301.00001", ArtifactKind::Pdf, "/data/pdf/2301/2301.00001.pdf")
            .await
            .unwrap();
        store
            .upsert_paper(&sample_paper("2301.00001", "T2", "cs.DM"))
            .await
            .unwrap();

        let paper = store.get_paper("2301.00001").await.unwrap().unwrap();
        assert!(paper.pdf_downloaded);
        assert_eq!(paper.pdf_path.as_deref(), Some("/data/pdf/2301/2301.00001.pdf"));
        assert!(!paper.src_downloaded);
    }

    #[tokio::test]
    async fn test_mark_artifact_unknown_paper_is_not_found() {
        let store = setup_store().await;
        let err = store
            .mark_artifact("2301.00001", ArtifactKind::Source, "/x")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_mark_artifact_invalidates_cached_snapshot() {
        let store = setup_store().await;
        store
            .upsert_paper(&sample_paper("2301.00001", "T", "cs.DM"))
            .await
            .unwrap();
        let before = store.get_paper("2301.00001").await.unwrap().unwrap();
        assert!(!before.src_downloaded);

        store
            .mark_artifact("2301.00001", ArtifactKind::Source, "/data/src/2301/2301.00001")
            .await
            .unwrap();
        let after = store.get_paper("2301.00001").await.unwrap().unwrap();
        assert!(after.has_artifact(ArtifactKind::Source));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_read_never_caches_stale_artifact_state() {
        let store = setup_store().await;
        let ids: Vec<String> = (0..200).map(|i| format!("2301.{i:05}")).collect();
        let papers: Vec<_> = ids.iter().map(|id| sample_paper(id, "T", "cs.DM")).collect();
        store.upsert_papers(&papers).await.unwrap();

        for id in &ids {
            let reader = store.clone();
            let read_id = id.clone();
            let read = tokio::spawn(async move { reader.get_paper(&read_id).await });
            let writer = store.clone();
            let write_id = id.clone();
            let write = tokio::spawn(async move {
                writer
                    .mark_artifact(&write_id, ArtifactKind::Pdf, "/data/pdf/x.pdf")
                    .await
            });
            read.await.unwrap().unwrap();
            write.await.unwrap().unwrap();

            let cached = store.get_paper(id).await.unwrap().unwrap();
            assert!(cached.pdf_downloaded, "{id} cached before its artifact update");
        }
    }

    #[tokio::test]
    async fn test_list_papers_filters_by_whole_category_token() {
        let store = setup_store().await;
        store
            .upsert_papers(&[
                sample_paper("2301.00001", "A", "cs.LG stat.ML"),
                sample_paper("2301.00002", "B", "cs.LGX"),
                sample_paper("2301.00003", "C", "math.CO"),
            ])
            .await
            .unwrap();

        let papers = store.list_papers(Some("cs.LG"), 0, 10).await.unwrap();
        let ids: Vec<_> = papers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["2301.00001"]);
        assert_eq!(store.list_papers(None, 0, 10).await.unwrap().len(), 3);
        assert_eq!(store.list_papers(None, 2, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_categories_counts_tokens() {
        let store = setup_store().await;
        store
            .upsert_papers(&[
                sample_paper("2301.00001", "A", "cs.LG stat.ML"),
                sample_paper("2301.00002", "B", "cs.LG"),
            ])
            .await
            .unwrap();

        let categories = store.list_categories().await.unwrap();
        assert_eq!(categories[0], ("cs.LG".to_string(), 2));
        assert_eq!(categories[1], ("stat.ML".to_string(), 1));
    }

    #[tokio::test]
    async fn test_search_by_author_escapes_wildcards() {
        let store = setup_store().await;
        store
            .upsert_paper(&sample_paper("2301.00001", "A", "cs.LG"))
            .await
            .unwrap();

        assert_eq!(store.search_by_author("turing", 10).await.unwrap().len(), 1);
        assert!(store.search_by_author("%", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_papers_missing_artifacts() {
        let store = setup_store().await;
        store
            .upsert_papers(&[
                sample_paper("2301.00001", "A", "cs.LG"),
                sample_paper("2301.00002", "B", "cs.LG"),
            ])
            .await
            .unwrap();
        store
            .mark_artifact("2301.00001", ArtifactKind::Pdf, "/p")
            .await
            .unwrap();

        let missing_pdf = store
            .papers_missing_artifacts("cs.LG", true, false, 10)
            .await
            .unwrap();
        assert_eq!(missing_pdf.len(), 1);
        assert_eq!(missing_pdf[0].id, "2301.00002");

        let missing_any = store
            .papers_missing_artifacts("cs.LG", true, true, 10)
            .await
            .unwrap();
        assert_eq!(missing_any.len(), 2);
    }

    #[tokio::test]
    async fn test_pdf_text_round_trip() {
        let store = setup_store().await;
        store
            .upsert_paper(&sample_paper("2301.00001", "A", "cs.LG"))
            .await
            .unwrap();
        assert_eq!(store.pdf_text("2301.00001").await.unwrap(), None);
        store.set_pdf_text("2301.00001", "body text").await.unwrap();
        assert_eq!(
            store.pdf_text("2301.00001").await.unwrap().as_deref(),
            Some("body text")
        );
    }

    #[tokio::test]
    async fn test_stats_counts_flags() {
        let store = setup_store().await;
        store
            .upsert_papers(&[
                sample_paper("2301.00001", "A", "cs.LG"),
                sample_paper("2301.00002", "B", "cs.LG"),
            ])
            .await
            .unwrap();
        store
            .mark_artifact("2301.00001", ArtifactKind::Source, "/s")
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_papers, 2);
        assert_eq!(stats.pdf_downloaded, 0);
        assert_eq!(stats.src_downloaded, 1);
        assert_eq!(stats.queued, 0);
    }

    #[tokio::test]
    async fn test_missing_ids_preserves_order() {
        let store = setup_store().await;
        store
            .upsert_paper(&sample_paper("2301.00002", "B", "cs.LG"))
            .await
            .unwrap();
        let ids = vec![
            "2301.00003".to_string(),
            "2301.00002".to_string(),
            "2301.00001".to_string(),
        ];
        assert_eq!(
            store.missing_ids(&ids).await.unwrap(),
            vec!["2301.00003".to_string(), "2301.00001".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rebuild_fts_index_succeeds() {
        let store = setup_store().await;
        store
            .upsert_paper(&sample_paper("2301.00001", "Spectral", "cs.LG"))
            .await
            .unwrap();
        store.rebuild_fts_index().await.unwrap();
    }
}

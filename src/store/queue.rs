//! Persistent download queue.

use sqlx::FromRow;
use tracing::instrument;

use super::{PaperStore, Result};
use crate::paper::ArtifactKind;

/// One queued artifact download.
#[derive(Debug, Clone, FromRow)]
pub struct QueuedDownload {
    pub paper_id: String,
    /// Artifact kind as stored (parsed via `kind()`).
    #[sqlx(rename = "kind")]
    pub kind_str: String,
    /// Higher priority items are processed first.
    pub priority: i64,
    /// Failed attempts so far.
    pub attempts: i64,
    pub last_error: Option<String>,
    pub added: String,
}

impl QueuedDownload {
    /// Returns the parsed artifact kind.
    ///
    /// Falls back to `Pdf` if the stored value is invalid; the table CHECK
    /// makes that unreachable in practice.
    #[must_use]
    pub fn kind(&self) -> ArtifactKind {
        self.kind_str.parse().unwrap_or(ArtifactKind::Pdf)
    }
}

impl PaperStore {
    /// Queues an artifact download. Re-queuing keeps the higher priority.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`](super::StoreError::Database) if the insert fails.
    #[instrument(skip(self), fields(paper_id = %paper_id, kind = %kind))]
    pub async fn enqueue_download(
        &self,
        paper_id: &str,
        kind: ArtifactKind,
        priority: i64,
    ) -> Result<()> {
        sqlx::query(
            r"INSERT INTO download_queue (paper_id, kind, priority)
              VALUES (?, ?, ?)
              ON CONFLICT(paper_id, kind) DO UPDATE SET
                priority = MAX(priority, excluded.priority)",
        )
        .bind(paper_id)
        .bind(kind.as_str())
        .bind(priority)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Returns up to `limit` queued downloads that have failed fewer than
    /// `max_attempts` times, highest priority then oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`](super::StoreError::Database) if the query fails.
    #[instrument(skip(self))]
    pub async fn next_queued(&self, limit: i64, max_attempts: i64) -> Result<Vec<QueuedDownload>> {
        let items = sqlx::query_as::<_, QueuedDownload>(
            r"SELECT paper_id, kind, priority, attempts, last_error, added
              FROM download_queue
              WHERE attempts < ?
              ORDER BY priority DESC, added ASC, paper_id ASC
              LIMIT ?",
        )
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(items)
    }

    /// Records a failed attempt and returns the new attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`](super::StoreError::Database) if the update fails.
    #[instrument(skip(self, error), fields(paper_id = %paper_id, kind = %kind))]
    pub async fn record_queue_failure(
        &self,
        paper_id: &str,
        kind: ArtifactKind,
        error: &str,
    ) -> Result<i64> {
        let attempts: Option<(i64,)> = sqlx::query_as(
            r"UPDATE download_queue
              SET attempts = attempts + 1, last_error = ?
              WHERE paper_id = ? AND kind = ?
              RETURNING attempts",
        )
        .bind(error)
        .bind(paper_id)
        .bind(kind.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(attempts.map_or(0, |(n,)| n))
    }

    /// Removes a queue entry. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`](super::StoreError::Database) if the delete fails.
    pub async fn remove_queued(&self, paper_id: &str, kind: ArtifactKind) -> Result<bool> {
        let result = sqlx::query("DELETE FROM download_queue WHERE paper_id = ? AND kind = ?")
            .bind(paper_id)
            .bind(kind.as_str())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of queued downloads, including exhausted ones.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`](super::StoreError::Database) if the query fails.
    pub async fn queue_depth(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM download_queue")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }
}

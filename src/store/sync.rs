//! Harvest cursor persistence.
//!
//! Records and the cursor that follows them are always written in one
//! transaction, so the persisted token never points past uncommitted rows.

use chrono::NaiveDate;
use sqlx::SqliteConnection;
use tracing::{info, instrument};

use super::{PaperStore, Result, upsert_paper_row};
use crate::paper::Paper;

/// Opaque cursor of an unfinished harvest.
pub const RESUMPTION_TOKEN_KEY: &str = "resumption_token";

/// Date (`YYYY-MM-DD`) of the last fully completed harvest.
pub const LAST_SYNC_KEY: &str = "last_sync";

impl PaperStore {
    /// Reads a harvest state value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`](super::StoreError::Database) if the query fails.
    pub async fn sync_value(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM sync_state WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|(value,)| value))
    }

    /// Writes a harvest state value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`](super::StoreError::Database) if the write fails.
    pub async fn set_sync_value(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.pool().acquire().await?;
        set_value(&mut *conn, key, value).await
    }

    /// Commits a batch of harvested records together with the cursor that
    /// follows them. A `None` token leaves the persisted cursor untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`](super::StoreError::Database) if any write
    /// fails; neither records nor cursor are committed in that case.
    #[instrument(skip(self, papers), fields(count = papers.len(), has_token = token.is_some()))]
    pub async fn commit_harvest_batch(&self, papers: &[Paper], token: Option<&str>) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for paper in papers {
            upsert_paper_row(&mut *tx, paper).await?;
        }
        if let Some(token) = token {
            set_value(&mut *tx, RESUMPTION_TOKEN_KEY, token).await?;
        }
        tx.commit().await?;
        self.invalidate(papers);
        Ok(())
    }

    /// Commits the final records, clears the cursor and stamps `last_sync`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`](super::StoreError::Database) if any write fails.
    #[instrument(skip(self, papers), fields(count = papers.len(), %today))]
    pub async fn complete_harvest(&self, papers: &[Paper], today: NaiveDate) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for paper in papers {
            upsert_paper_row(&mut *tx, paper).await?;
        }
        sqlx::query("DELETE FROM sync_state WHERE key = ?")
            .bind(RESUMPTION_TOKEN_KEY)
            .execute(&mut *tx)
            .await?;
        set_value(&mut *tx, LAST_SYNC_KEY, &today.format("%Y-%m-%d").to_string()).await?;
        tx.commit().await?;
        self.invalidate(papers);
        info!("harvest state marked complete");
        Ok(())
    }
}

async fn set_value(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r"INSERT INTO sync_state (key, value) VALUES (?, ?)
          ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(conn)
    .await?;
    Ok(())
}

//! Resumable bulk metadata harvesting.
//!
//! The harvester walks a paginated [`MetadataSource`] one page at a time.
//! Records are buffered and committed together with the continuation token
//! that follows them, so a persisted token never points past records that were
//! not stored. An interrupted run (throttling, network failure, cancellation)
//! flushes its buffer with the last good token and returns; the next run
//! resumes from that token.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::paper::Paper;
use crate::remote::{MetadataSource, PageRequest, RemoteError};
use crate::store::{LAST_SYNC_KEY, PaperStore, RESUMPTION_TOKEN_KEY, StoreError};

/// Records buffered before a commit.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Pause between page requests required by the catalog.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum HarvestError {
    /// The page request failed. Progress up to the previous page is saved.
    #[error("harvest interrupted: {0}")]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("harvest cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestOptions {
    /// Catalog set, e.g. `cs` or `physics:hep-th`.
    pub set: Option<String>,
    /// Start date; defaults to the last completed harvest.
    pub from: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub batch_size: usize,
    pub page_delay: Duration,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            set: None,
            from: None,
            until: None,
            batch_size: DEFAULT_BATCH_SIZE,
            page_delay: DEFAULT_PAGE_DELAY,
        }
    }
}

/// Summary of one completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestReport {
    pub pages: usize,
    pub records: usize,
    /// Whether the run continued a previously interrupted harvest.
    pub resumed: bool,
}

/// Drives a [`MetadataSource`] into the store.
#[derive(Clone)]
pub struct Harvester {
    source: Arc<dyn MetadataSource>,
    store: PaperStore,
}

impl std::fmt::Debug for Harvester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harvester").finish_non_exhaustive()
    }
}

/// Buffered records plus the token that follows them.
struct Pending {
    records: Vec<Paper>,
    token: Option<String>,
}

impl Harvester {
    #[must_use]
    pub fn new(source: Arc<dyn MetadataSource>, store: PaperStore) -> Self {
        Self { source, store }
    }

    /// First request of a run: a persisted token wins over any date filter.
    async fn start_request(
        &self,
        options: &HarvestOptions,
    ) -> Result<(PageRequest, bool), HarvestError> {
        if let Some(token) = self.store.sync_value(RESUMPTION_TOKEN_KEY).await? {
            info!("resuming interrupted harvest");
            return Ok((PageRequest::resume(token), true));
        }

        let from = match options.from {
            Some(from) => Some(from),
            None => self
                .store
                .sync_value(LAST_SYNC_KEY)
                .await?
                .and_then(|value| NaiveDate::parse_from_str(&value, "%Y-%m-%d").ok()),
        };
        debug!(?from, until = ?options.until, set = ?options.set, "starting fresh harvest");
        Ok((
            PageRequest::first(options.set.clone(), from, options.until),
            false,
        ))
    }

    /// Runs until the listing completes, a page fails, or `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`HarvestError::Remote`] when a page request fails; buffered records
    ///   and the last good token are committed first
    /// - [`HarvestError::Cancelled`] on cancellation, with the same flush
    /// - [`HarvestError::Store`] if committing fails
    #[instrument(skip(self, options, cancel), fields(set = ?options.set))]
    pub async fn run(
        &self,
        options: &HarvestOptions,
        cancel: &CancellationToken,
    ) -> Result<HarvestReport, HarvestError> {
        let batch_size = options.batch_size.max(1);
        let (mut request, resumed) = self.start_request(options).await?;
        let mut report = HarvestReport {
            resumed,
            ..HarvestReport::default()
        };
        let mut pending = Pending {
            records: Vec::with_capacity(batch_size),
            token: None,
        };

        loop {
            if cancel.is_cancelled() {
                self.flush(&mut pending).await?;
                return Err(HarvestError::Cancelled);
            }

            let page = match self.source.list_records(&request, cancel).await {
                Ok(page) => page,
                Err(e) => {
                    self.flush(&mut pending).await?;
                    if e.is_cancelled() {
                        return Err(HarvestError::Cancelled);
                    }
                    warn!(pages = report.pages, error = %e, "page request failed, progress saved");
                    return Err(e.into());
                }
            };

            report.pages += 1;
            report.records += page.records.len();
            pending.records.extend(page.records);

            let Some(token) = page.next_token else {
                self.store
                    .complete_harvest(&pending.records, Utc::now().date_naive())
                    .await?;
                info!(pages = report.pages, records = report.records, "harvest complete");
                return Ok(report);
            };

            pending.token = Some(token.clone());
            if pending.records.len() >= batch_size {
                self.flush(&mut pending).await?;
            }
            info!(
                page = report.pages,
                records = report.records,
                total = ?page.total_size,
                "harvested page"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.flush(&mut pending).await?;
                    return Err(HarvestError::Cancelled);
                }
                () = tokio::time::sleep(options.page_delay) => {}
            }
            request = PageRequest::resume(token);
        }
    }

    /// Commits buffered records with the token following them.
    async fn flush(&self, pending: &mut Pending) -> Result<(), StoreError> {
        if pending.records.is_empty() && pending.token.is_none() {
            return Ok(());
        }
        self.store
            .commit_harvest_batch(&pending.records, pending.token.as_deref())
            .await?;
        debug!(records = pending.records.len(), "harvest batch committed");
        pending.records.clear();
        pending.token = None;
        Ok(())
    }
}

//! Idempotent artifact download and extraction.
//!
//! # Overview
//!
//! - [`Pipeline::ensure_artifacts`] - materialize a paper's PDF and/or source
//! - [`Pipeline::download_category`] - sequential bulk fill for one category
//! - [`Pipeline::process_queue`] - concurrent drain of the persistent queue
//! - [`Pipeline::prefetch_reference_titles`] - metadata for uncached references
//!
//! Every artifact is written to a temporary file or directory beside its final
//! location and revealed by rename, then recorded with
//! [`PaperStore::mark_artifact`]. A path on disk is therefore always complete,
//! and a store flag always points at such a path.

pub mod archive;
mod layout;
mod tasks;

pub use archive::{ArchiveError, MAX_ENTRY_BYTES, RAW_SOURCE_NAME, SourceForm, extract_source};
pub use layout::ArtifactLayout;
pub use tasks::{DEFAULT_BACKGROUND_TASKS, TaskPool};

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::citations::CitationGraph;
use crate::download::{DownloadError, HttpClient, RateLimiter, RetryPolicy, with_retry};
use crate::paper::{ArtifactKind, Paper, PaperId, PaperIdError};
use crate::remote::{ApiClient, Endpoints, MAX_BATCH_IDS};
use crate::search;
use crate::store::{PaperStore, StoreError};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Failure of a single artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ArtifactError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Download(e) => e.is_cancelled(),
            Self::Archive(e) => matches!(e, ArchiveError::Cancelled(_)),
            Self::Store(_) => false,
        }
    }
}

#[derive(Debug)]
pub struct ArtifactFailure {
    pub kind: ArtifactKind,
    pub error: ArtifactError,
}

/// Errors from pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidId(#[from] PaperIdError),

    /// No metadata for the paper is stored locally.
    #[error("paper not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// At least one requested artifact failed. Artifacts not listed succeeded.
    #[error("{} artifact(s) of {paper_id} failed: {}", .failures.len(), describe(.failures))]
    Artifacts {
        paper_id: String,
        failures: Vec<ArtifactFailure>,
    },

    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency { value: usize },

    #[error("operation cancelled")]
    Cancelled,
}

impl PipelineError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

fn describe(failures: &[ArtifactFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.kind, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// How one artifact ended up on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOutcome {
    /// Recorded and present; no I/O performed.
    AlreadyPresent,
    /// Found on disk but unrecorded (e.g. after a crash) and now recorded.
    Adopted,
    Downloaded { bytes: u64 },
}

impl ArtifactOutcome {
    #[must_use]
    pub fn is_download(self) -> bool {
        matches!(self, Self::Downloaded { .. })
    }
}

/// Outcome per requested artifact; `None` where not requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnsureReport {
    pub pdf: Option<ArtifactOutcome>,
    pub source: Option<ArtifactOutcome>,
}

impl EnsureReport {
    /// Whether any network download happened.
    #[must_use]
    pub fn downloaded_any(&self) -> bool {
        [self.pdf, self.source]
            .into_iter()
            .flatten()
            .any(ArtifactOutcome::is_download)
    }
}

/// Counters from a bulk run.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl DownloadStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Papers for which at least one artifact was downloaded.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Papers whose artifacts were already in place.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.failed() + self.skipped()
    }

    fn record(&self, report: &EnsureReport) {
        if report.downloaded_any() {
            self.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> Self {
        Self {
            completed: AtomicUsize::new(self.completed()),
            failed: AtomicUsize::new(self.failed()),
            skipped: AtomicUsize::new(self.skipped()),
        }
    }
}

/// Downloads, extracts and records paper artifacts.
#[derive(Debug, Clone)]
pub struct Pipeline {
    store: PaperStore,
    citations: CitationGraph,
    http: HttpClient,
    api: ApiClient,
    rate_limiter: Arc<RateLimiter>,
    retry_policy: RetryPolicy,
    endpoints: Endpoints,
    layout: ArtifactLayout,
    tasks: TaskPool,
}

impl Pipeline {
    /// Creates a pipeline. Background work (text extraction, reference
    /// prefetch) is submitted to `tasks`.
    #[must_use]
    pub fn new(
        store: PaperStore,
        http: HttpClient,
        endpoints: Endpoints,
        layout: ArtifactLayout,
        rate_limiter: Arc<RateLimiter>,
        retry_policy: RetryPolicy,
        tasks: TaskPool,
    ) -> Self {
        let api = ApiClient::new(
            http.clone(),
            endpoints.api_url.clone(),
            Arc::clone(&rate_limiter),
            retry_policy.clone(),
        );
        Self {
            citations: CitationGraph::new(store.clone()),
            store,
            http,
            api,
            rate_limiter,
            retry_policy,
            endpoints,
            layout,
            tasks,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    #[must_use]
    pub fn citations(&self) -> &CitationGraph {
        &self.citations
    }

    #[must_use]
    pub fn tasks(&self) -> &TaskPool {
        &self.tasks
    }

    /// Makes sure the requested artifacts of a stored paper exist locally.
    ///
    /// Artifacts already recorded and present on disk cost no network I/O,
    /// so the call is safe to repeat. Each artifact succeeds or fails on its
    /// own; a failed source leaves a downloaded PDF recorded.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidId`] / [`PipelineError::NotFound`] before any I/O
    /// - [`PipelineError::Cancelled`] if any artifact was interrupted by `cancel`
    /// - [`PipelineError::Artifacts`] listing every failed artifact
    #[instrument(skip(self, cancel), fields(paper_id = %paper_id))]
    pub async fn ensure_artifacts(
        &self,
        paper_id: &str,
        want_pdf: bool,
        want_source: bool,
        cancel: &CancellationToken,
    ) -> Result<EnsureReport, PipelineError> {
        let id = PaperId::parse(paper_id)?;
        let paper = self
            .store
            .get_paper(id.as_str())
            .await?
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))?;

        let mut report = EnsureReport::default();
        let mut failures = Vec::new();

        if want_pdf {
            match self.ensure_pdf(&paper, &id, cancel).await {
                Ok(outcome) => report.pdf = Some(outcome),
                Err(error) => failures.push(ArtifactFailure {
                    kind: ArtifactKind::Pdf,
                    error,
                }),
            }
        }
        if want_source {
            match self.ensure_source(&paper, &id, cancel).await {
                Ok(outcome) => report.source = Some(outcome),
                Err(error) => failures.push(ArtifactFailure {
                    kind: ArtifactKind::Source,
                    error,
                }),
            }
        }

        if failures.is_empty() {
            return Ok(report);
        }
        if failures.iter().any(|f| f.error.is_cancelled()) {
            return Err(PipelineError::Cancelled);
        }
        Err(PipelineError::Artifacts {
            paper_id: id.to_string(),
            failures,
        })
    }

    async fn ensure_pdf(
        &self,
        paper: &Paper,
        id: &PaperId,
        cancel: &CancellationToken,
    ) -> Result<ArtifactOutcome, ArtifactError> {
        let dest = self.layout.pdf_path(id);
        if let Some(outcome) = self.existing(paper, ArtifactKind::Pdf, &dest).await? {
            return Ok(outcome);
        }

        let url = self.endpoints.pdf_url(id.as_str());
        let bytes = with_retry(&self.retry_policy, &self.rate_limiter, &url, cancel, || {
            self.http.download_to_path(&url, &dest, cancel)
        })
        .await?;
        self.store
            .mark_artifact(id.as_str(), ArtifactKind::Pdf, &path_string(&dest))
            .await?;
        info!(paper_id = %id, bytes, "pdf downloaded");

        self.submit_text_extraction(id.as_str());
        Ok(ArtifactOutcome::Downloaded { bytes })
    }

    async fn ensure_source(
        &self,
        paper: &Paper,
        id: &PaperId,
        cancel: &CancellationToken,
    ) -> Result<ArtifactOutcome, ArtifactError> {
        let dest = self.layout.source_dir(id);
        if let Some(outcome) = self.existing(paper, ArtifactKind::Source, &dest).await? {
            if outcome == ArtifactOutcome::Adopted {
                self.after_source(id.as_str(), &dest).await;
            }
            return Ok(outcome);
        }

        let shard_dir = dest
            .parent()
            .map_or_else(|| self.layout.root().to_path_buf(), Path::to_path_buf);
        tokio::fs::create_dir_all(&shard_dir)
            .await
            .map_err(|e| DownloadError::io(&shard_dir, e))?;

        let url = self.endpoints.source_url(id.as_str());
        let (payload, bytes) =
            with_retry(&self.retry_policy, &self.rate_limiter, &url, cancel, || {
                self.http.download_to_temp(&url, &shard_dir, cancel)
            })
            .await?;

        let form =
            extract_source(payload.path().to_path_buf(), dest.clone(), cancel.clone()).await?;
        drop(payload);
        self.store
            .mark_artifact(id.as_str(), ArtifactKind::Source, &path_string(&dest))
            .await?;
        info!(paper_id = %id, bytes, ?form, "source materialized");

        self.after_source(id.as_str(), &dest).await;
        Ok(ArtifactOutcome::Downloaded { bytes })
    }

    /// Returns an outcome if the artifact needs no download.
    async fn existing(
        &self,
        paper: &Paper,
        kind: ArtifactKind,
        dest: &Path,
    ) -> Result<Option<ArtifactOutcome>, StoreError> {
        let on_disk = match kind {
            ArtifactKind::Pdf => tokio::fs::metadata(dest).await.is_ok_and(|m| m.is_file()),
            ArtifactKind::Source => tokio::fs::metadata(dest).await.is_ok_and(|m| m.is_dir()),
        };
        if !on_disk {
            if paper.has_artifact(kind) {
                warn!(paper_id = %paper.id, %kind, path = %dest.display(), "recorded artifact missing, downloading again");
            }
            return Ok(None);
        }

        let recorded = paper.has_artifact(kind)
            && paper.artifact_path(kind) == Some(path_string(dest).as_str());
        if recorded {
            debug!(paper_id = %paper.id, %kind, "artifact already present");
            return Ok(Some(ArtifactOutcome::AlreadyPresent));
        }

        self.store
            .mark_artifact(&paper.id, kind, &path_string(dest))
            .await?;
        info!(paper_id = %paper.id, %kind, path = %dest.display(), "adopted artifact found on disk");
        Ok(Some(ArtifactOutcome::Adopted))
    }

    /// Indexes citations of a freshly materialized source. Never fails the caller.
    async fn after_source(&self, paper_id: &str, source_dir: &Path) {
        match self
            .citations
            .index_source(paper_id, source_dir.to_path_buf())
            .await
        {
            Ok(refs) => {
                debug!(paper_id, references = refs.len(), "citations updated");
                if !refs.is_empty() {
                    self.submit_reference_prefetch(paper_id);
                }
            }
            Err(e) => warn!(paper_id, error = %e, "citation update failed"),
        }
    }

    fn submit_text_extraction(&self, paper_id: &str) {
        let store = self.store.clone();
        let id = paper_id.to_string();
        self.tasks.submit("pdf-text", move |_| async move {
            if let Err(e) = search::ensure_pdf_text(&store, &id).await {
                warn!(paper_id = %id, error = %e, "pdf text extraction failed");
            }
        });
    }

    fn submit_reference_prefetch(&self, paper_id: &str) {
        let pipeline = self.clone();
        let id = paper_id.to_string();
        self.tasks.submit("reference-prefetch", move |cancel| async move {
            if let Err(e) = pipeline.prefetch_reference_titles(&id, &cancel).await {
                warn!(paper_id = %id, error = %e, "reference prefetch failed");
            }
        });
    }

    /// Fetches metadata for references of `paper_id` that have none cached.
    ///
    /// Identifiers go out in chunks of [`MAX_BATCH_IDS`], each paced by the
    /// rate limiter. A failing chunk is logged and skipped. Returns the number
    /// of papers stored.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if reading references or storing
    /// results fails, or [`PipelineError::Cancelled`].
    #[instrument(skip(self, cancel), fields(paper_id = %paper_id))]
    pub async fn prefetch_reference_titles(
        &self,
        paper_id: &str,
        cancel: &CancellationToken,
    ) -> Result<usize, PipelineError> {
        let missing = self.citations.uncached_references(paper_id).await?;
        if missing.is_empty() {
            return Ok(0);
        }

        let mut stored = 0;
        for chunk in missing.chunks(MAX_BATCH_IDS) {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            match self.api.fetch_batch(chunk, cancel).await {
                Ok(papers) => {
                    self.store.upsert_papers(&papers).await?;
                    stored += papers.len();
                }
                Err(e) if e.is_cancelled() => return Err(PipelineError::Cancelled),
                Err(e) => warn!(requested = chunk.len(), error = %e, "reference metadata fetch failed"),
            }
        }

        info!(requested = missing.len(), stored, "reference metadata prefetched");
        Ok(stored)
    }

    /// Fills in missing artifacts for up to `limit` papers of `category`, one
    /// paper at a time.
    ///
    /// Per-paper failures are logged and counted, never fatal.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if the candidate query fails, or
    /// [`PipelineError::Cancelled`] once `cancel` fires.
    #[instrument(skip(self, cancel), fields(category = %category))]
    pub async fn download_category(
        &self,
        category: &str,
        limit: i64,
        want_pdf: bool,
        want_source: bool,
        cancel: &CancellationToken,
    ) -> Result<DownloadStats, PipelineError> {
        let papers = self
            .store
            .papers_missing_artifacts(category, want_pdf, want_source, limit)
            .await?;
        info!(candidates = papers.len(), "starting category download");

        let stats = DownloadStats::new();
        for paper in papers {
            if cancel.is_cancelled() {
                info!(completed = stats.completed(), "category download cancelled");
                return Err(PipelineError::Cancelled);
            }
            match self
                .ensure_artifacts(&paper.id, want_pdf, want_source, cancel)
                .await
            {
                Ok(report) => stats.record(&report),
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    warn!(paper_id = %paper.id, error = %e, "paper download failed");
                    stats.increment_failed();
                }
            }
        }

        info!(
            completed = stats.completed(),
            failed = stats.failed(),
            skipped = stats.skipped(),
            "category download complete"
        );
        Ok(stats)
    }

    /// Drains up to `limit` queued downloads with at most `concurrency` in
    /// flight.
    ///
    /// Successful items leave the queue; failures bump the item's attempt
    /// count, and items at `max_attempts` are no longer picked up.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidConcurrency`] outside 1..=100
    /// - [`PipelineError::Store`] if the queue cannot be read
    /// - [`PipelineError::Cancelled`] if `cancel` fired; in-flight items are
    ///   left queued
    #[instrument(skip(self, cancel))]
    pub async fn process_queue(
        &self,
        concurrency: usize,
        limit: i64,
        max_attempts: i64,
        cancel: &CancellationToken,
    ) -> Result<DownloadStats, PipelineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(PipelineError::InvalidConcurrency { value: concurrency });
        }

        let items = self.store.next_queued(limit, max_attempts).await?;
        info!(items = items.len(), concurrency, "starting queue processing");

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let stats = Arc::new(DownloadStats::new());
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => permit,
            };
            let Ok(permit) = permit else { break };

            let pipeline = self.clone();
            let stats = Arc::clone(&stats);
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let kind = item.kind();
                let result = pipeline
                    .ensure_artifacts(
                        &item.paper_id,
                        kind == ArtifactKind::Pdf,
                        kind == ArtifactKind::Source,
                        &cancel,
                    )
                    .await;

                match result {
                    Ok(report) => {
                        if let Err(e) = pipeline.store.remove_queued(&item.paper_id, kind).await {
                            warn!(paper_id = %item.paper_id, error = %e, "failed to dequeue item");
                        }
                        stats.record(&report);
                    }
                    Err(PipelineError::Cancelled) => {
                        debug!(paper_id = %item.paper_id, %kind, "queued download interrupted");
                    }
                    Err(e) => {
                        warn!(paper_id = %item.paper_id, %kind, error = %e, "queued download failed");
                        match pipeline
                            .store
                            .record_queue_failure(&item.paper_id, kind, &e.to_string())
                            .await
                        {
                            Ok(attempts) if attempts >= max_attempts => {
                                warn!(paper_id = %item.paper_id, %kind, attempts, "giving up on queued download");
                            }
                            Ok(_) => {}
                            Err(qe) => {
                                warn!(paper_id = %item.paper_id, error = %qe, "failed to record queue failure");
                            }
                        }
                        stats.increment_failed();
                    }
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "queue task panicked");
            }
        }

        let stats = Arc::try_unwrap(stats).unwrap_or_else(|shared| shared.snapshot());
        info!(
            completed = stats.completed(),
            failed = stats.failed(),
            skipped = stats.skipped(),
            "queue processing complete"
        );
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(stats)
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

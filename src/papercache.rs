//! Process-wide handle wiring the store, pipeline, harvester and search
//! together from one [`Config`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::citations::CitationGraph;
use crate::config::{Config, ConfigError};
use crate::db::{Database, DbError};
use crate::download::{HttpClient, RateLimiter, RetryPolicy};
use crate::harvest::{HarvestOptions, Harvester};
use crate::paper::{Paper, PaperId, PaperIdError};
use crate::pipeline::{ArtifactLayout, EnsureReport, Pipeline, PipelineError, TaskPool};
use crate::remote::{ApiClient, Endpoints, OaiClient, RemoteError};
use crate::search::Searcher;
use crate::store::{PaperStore, StoreError, StoreStats};

/// File name of the index database inside the data directory.
pub const INDEX_DB_NAME: &str = "index.db";

#[derive(Debug, Error)]
pub enum PaperCacheError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to create data directory '{path}': {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error(transparent)]
    InvalidId(#[from] PaperIdError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl PaperCacheError {
    /// Whether the operation stopped because its token was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Remote(e) => e.is_cancelled(),
            Self::Pipeline(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// Everything a front end needs, opened once per process.
#[derive(Debug, Clone)]
pub struct PaperCache {
    config: Config,
    root: PathBuf,
    store: PaperStore,
    api: ApiClient,
    pipeline: Pipeline,
    harvester: Harvester,
    searcher: Searcher,
}

impl PaperCache {
    /// Opens (creating if needed) the cache under the configured data
    /// directory. Background work stops when `process_token` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`PaperCacheError::Config`] for invalid settings, and
    /// directory, database or HTTP client setup failures otherwise.
    #[instrument(skip(config, process_token))]
    pub async fn open(
        config: Config,
        process_token: &CancellationToken,
    ) -> Result<Self, PaperCacheError> {
        config.validate()?;
        let root = config.resolved_data_dir();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| PaperCacheError::DataDir {
                path: root.clone(),
                source,
            })?;

        let db =
            Database::new_with_options(&root.join(INDEX_DB_NAME), config.database_options())
                .await?;
        let cache = Self::with_database(config, root, db, process_token)?;
        info!(root = %cache.root.display(), "paper cache opened");
        Ok(cache)
    }

    /// Builds the cache over an already opened database.
    ///
    /// # Errors
    ///
    /// Returns [`PaperCacheError::HttpClient`] if the HTTP client cannot be
    /// built.
    pub fn with_database(
        config: Config,
        root: PathBuf,
        db: Database,
        process_token: &CancellationToken,
    ) -> Result<Self, PaperCacheError> {
        let store = PaperStore::new(db, config.cache_capacity);
        let http =
            HttpClient::try_new_with_timeouts(config.connect_timeout_secs, config.read_timeout_secs)
                .map_err(PaperCacheError::HttpClient)?;
        let rate_limiter = Arc::new(if config.rate_limit_ms == 0 {
            RateLimiter::disabled()
        } else {
            RateLimiter::new(config.rate_limit())
        });
        let retry_policy = RetryPolicy::with_max_attempts(config.max_retries);
        let endpoints: Endpoints = config.endpoints();

        let api = ApiClient::new(
            http.clone(),
            endpoints.api_url.clone(),
            Arc::clone(&rate_limiter),
            retry_policy.clone(),
        );
        let oai = OaiClient::new(
            http.clone(),
            endpoints.oai_url.clone(),
            Arc::clone(&rate_limiter),
            retry_policy.clone(),
        );
        let pipeline = Pipeline::new(
            store.clone(),
            http,
            endpoints,
            ArtifactLayout::new(root.clone()),
            rate_limiter,
            retry_policy,
            TaskPool::new(config.concurrency, process_token),
        );

        Ok(Self {
            harvester: Harvester::new(Arc::new(oai), store.clone()),
            searcher: Searcher::with_threshold(store.clone(), config.fuzzy_threshold),
            api,
            pipeline,
            store,
            root,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn store(&self) -> &PaperStore {
        &self.store
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn citations(&self) -> &CitationGraph {
        self.pipeline.citations()
    }

    #[must_use]
    pub fn harvester(&self) -> &Harvester {
        &self.harvester
    }

    #[must_use]
    pub fn searcher(&self) -> &Searcher {
        &self.searcher
    }

    /// Harvest options seeded from the configuration.
    #[must_use]
    pub fn harvest_options(&self) -> HarvestOptions {
        HarvestOptions {
            batch_size: self.config.batch_size,
            page_delay: self.config.harvest_delay(),
            ..HarvestOptions::default()
        }
    }

    /// Returns the stored paper, fetching and storing its metadata on a miss.
    ///
    /// # Errors
    ///
    /// - [`PaperCacheError::InvalidId`] for malformed identifiers
    /// - [`PaperCacheError::Remote`] if the lookup fails or the catalog has
    ///   no such paper
    /// - [`PaperCacheError::Store`] if reading or writing the store fails
    #[instrument(skip(self, cancel))]
    pub async fn fetch(
        &self,
        paper_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Paper, PaperCacheError> {
        let id = PaperId::parse(paper_id)?;
        if let Some(paper) = self.store.get_paper(id.as_str()).await?
            && paper.has_metadata()
        {
            debug!("metadata cache hit");
            return Ok(paper);
        }

        let fetched = self.api.fetch(id.as_str(), cancel).await?;
        self.store.upsert_paper(&fetched).await?;
        info!(title = %fetched.title, "metadata fetched");
        Ok(self.store.require_paper(id.as_str()).await?)
    }

    /// Makes sure every identifier has metadata stored, requesting only the
    /// missing ones. Returns the papers that are stored afterwards, in input
    /// order; identifiers the catalog does not know are left out.
    ///
    /// # Errors
    ///
    /// Same as [`PaperCache::fetch`].
    #[instrument(skip(self, ids, cancel), fields(count = ids.len()))]
    pub async fn fetch_batch(
        &self,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Paper>, PaperCacheError> {
        let mut wanted = Vec::with_capacity(ids.len());
        for raw in ids {
            let id = PaperId::parse(raw)?.as_str().to_string();
            if !wanted.contains(&id) {
                wanted.push(id);
            }
        }

        let missing = self.store.missing_ids(&wanted).await?;
        if !missing.is_empty() {
            let fetched = self.api.fetch_batch(&missing, cancel).await?;
            self.store.upsert_papers(&fetched).await?;
            debug!(requested = missing.len(), received = fetched.len(), "batch fetched");
        }

        let mut papers = Vec::with_capacity(wanted.len());
        for id in &wanted {
            if let Some(paper) = self.store.get_paper(id).await? {
                papers.push(paper);
            }
        }
        Ok(papers)
    }

    /// Fetches metadata if needed, then ensures the requested artifacts.
    ///
    /// # Errors
    ///
    /// See [`PaperCache::fetch`] and [`Pipeline::ensure_artifacts`].
    pub async fn fetch_with_artifacts(
        &self,
        paper_id: &str,
        want_pdf: bool,
        want_source: bool,
        cancel: &CancellationToken,
    ) -> Result<(Paper, EnsureReport), PaperCacheError> {
        let paper = self.fetch(paper_id, cancel).await?;
        let report = self
            .pipeline
            .ensure_artifacts(&paper.id, want_pdf, want_source, cancel)
            .await?;
        let paper = self.store.require_paper(&paper.id).await?;
        Ok((paper, report))
    }

    /// Aggregate counts from the store.
    ///
    /// # Errors
    ///
    /// Returns [`PaperCacheError::Store`] if a count query fails.
    pub async fn stats(&self) -> Result<StoreStats, PaperCacheError> {
        Ok(self.store.stats().await?)
    }

    /// Waits for background work, then closes the database.
    pub async fn close(self) {
        self.pipeline.tasks().drain().await;
        self.store.database().clone().close().await;
        debug!("paper cache closed");
    }
}

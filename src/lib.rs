//! Papercache Core Library
//!
//! A durable local cache of arXiv paper metadata, PDFs and LaTeX sources,
//! plus the citation graph derived from those sources.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`cache`] - Bounded in-memory LRU fronting the store
//! - [`db`] - Database connection and schema management
//! - [`store`] - Papers, artifact state, harvest cursor and download queue
//! - [`download`] - HTTP client, per-host pacing and retry
//! - [`remote`] - OAI-PMH listing and Atom API lookups
//! - [`harvest`] - Resumable bulk metadata harvester
//! - [`pipeline`] - Idempotent artifact download and source extraction
//! - [`refs`] - Reference identifier extraction from source trees
//! - [`citations`] - Citation edges, queries and graphs
//! - [`search`] - Full-text and approximate PDF text search
//! - [`papercache`] - One handle wiring everything from a [`Config`]

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod citations;
pub mod config;
pub mod db;
pub mod download;
pub mod harvest;
pub mod paper;
pub mod papercache;
pub mod pdf;
pub mod pipeline;
pub mod refs;
pub mod remote;
pub mod search;
pub mod store;

// Re-export commonly used types
pub use cache::LruCache;
pub use citations::{CitationError, CitationGraph, DEFAULT_CITED_BY_LIMIT, Graph};
pub use config::{Config, ConfigError};
pub use db::Database;
pub use download::{FailureType, HttpClient, RateLimiter, RetryPolicy};
pub use harvest::{HarvestError, HarvestOptions, HarvestReport, Harvester};
pub use paper::{ArtifactKind, Paper, PaperId};
pub use papercache::{PaperCache, PaperCacheError};
pub use pipeline::{DownloadStats, EnsureReport, Pipeline, PipelineError};
pub use remote::{Endpoints, RemoteError};
pub use search::{DEFAULT_PDF_SEARCH_LIMIT, DEFAULT_SEARCH_LIMIT, SearchError, Searcher};
pub use store::{PaperStore, StoreError, StoreStats};

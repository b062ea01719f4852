//! Paper records and artifact kinds.

mod id;

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub(crate) use id::compile_static_regex;
pub use id::{PaperId, PaperIdError, normalize_id, shard_for, year_from_id};

/// Base URL of the human-readable abstract pages.
pub const ABS_BASE_URL: &str = "https://arxiv.org/abs";

/// Column list shared by every query that materializes a [`Paper`].
///
/// `pdf_text` is deliberately left out; it is loaded on demand.
pub(crate) const PAPER_COLUMNS: &str = "id, created, updated, title, abstract, authors, \
     categories, comments, journal_ref, doi, license, pdf_path, src_path, \
     pdf_downloaded, src_downloaded, metadata_updated";

/// One cached paper: catalog metadata plus local artifact state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Paper {
    /// Normalized identifier (no version suffix).
    pub id: String,
    /// First submission date.
    pub created: Option<NaiveDate>,
    /// Latest revision date.
    pub updated: Option<NaiveDate>,
    pub title: String,
    #[sqlx(rename = "abstract")]
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Comma-separated author names.
    pub authors: String,
    /// Space-separated category tokens, primary first.
    pub categories: String,
    pub comments: String,
    pub journal_ref: String,
    pub doi: String,
    pub license: String,
    /// Local PDF file, set together with `pdf_downloaded`.
    pub pdf_path: Option<String>,
    /// Local extracted source directory, set together with `src_downloaded`.
    pub src_path: Option<String>,
    /// Text extracted from the PDF, loaded only by search paths.
    #[sqlx(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_text: Option<String>,
    pub pdf_downloaded: bool,
    pub src_downloaded: bool,
    pub metadata_updated: Option<DateTime<Utc>>,
}

impl Paper {
    /// Creates an empty record for `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Display year: the creation date when known, else derived from the ID.
    #[must_use]
    pub fn year(&self) -> Option<i32> {
        self.created
            .map(|date| date.year())
            .or_else(|| year_from_id(&self.id))
    }

    /// The first category token, if any.
    #[must_use]
    pub fn primary_category(&self) -> Option<&str> {
        self.categories.split_whitespace().next()
    }

    /// Whether the paper lists `category` among its tokens.
    #[must_use]
    pub fn has_category(&self, category: &str) -> bool {
        self.categories.split_whitespace().any(|c| c == category)
    }

    /// True when catalog metadata has been ingested.
    #[must_use]
    pub fn has_metadata(&self) -> bool {
        !self.title.is_empty()
    }

    /// Whether the given artifact is recorded as present.
    #[must_use]
    pub fn has_artifact(&self, kind: ArtifactKind) -> bool {
        match kind {
            ArtifactKind::Pdf => self.pdf_downloaded && self.pdf_path.is_some(),
            ArtifactKind::Source => self.src_downloaded && self.src_path.is_some(),
        }
    }

    /// Recorded local path for the artifact, if any.
    #[must_use]
    pub fn artifact_path(&self, kind: ArtifactKind) -> Option<&str> {
        match kind {
            ArtifactKind::Pdf => self.pdf_path.as_deref(),
            ArtifactKind::Source => self.src_path.as_deref(),
        }
    }

    /// Abstract page URL.
    #[must_use]
    pub fn abs_url(&self) -> String {
        format!("{ABS_BASE_URL}/{}", self.id)
    }
}

/// The two downloadable artifacts of a paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Pdf,
    Source,
}

impl ArtifactKind {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Source => "source",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(Self::Pdf),
            "source" | "src" => Ok(Self::Source),
            _ => Err(format!("invalid artifact kind: {s}")),
        }
    }
}

//! Citation edges derived from downloaded sources.
//!
//! Edges are owned per citing paper: [`CitationGraph::update_citations`]
//! replaces the full outgoing set of one paper in a single transaction, so a
//! re-index never leaves a mix of old and new edges behind.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;
use sqlx::SqliteConnection;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::paper::{Paper, year_from_id};
use crate::refs::extract_references;
use crate::store::{PaperStore, StoreError};

/// Default number of citing papers returned by [`CitationGraph::cited_by`].
pub const DEFAULT_CITED_BY_LIMIT: i64 = 50;

/// Citing papers included when building a graph or paper list.
const GRAPH_CITED_BY_LIMIT: i64 = 100;

/// Errors raised while indexing a source tree.
#[derive(Debug, Error)]
pub enum CitationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The blocking extraction task did not complete.
    #[error("reference extraction for {paper_id} failed: {message}")]
    Extraction { paper_id: String, message: String },

    #[error("citation rebuild cancelled")]
    Cancelled,
}

/// A paper cited by another, whether or not it is cached locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Reference {
    pub id: String,
    /// Empty when no metadata is cached.
    pub title: String,
    pub has_title: bool,
    pub has_source: bool,
}

/// A cached paper citing another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CitingPaper {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub title: String,
    pub authors: String,
    pub year: Option<i32>,
    /// Number of cached papers citing this one.
    pub citations: i64,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
}

/// Neighbourhood of one paper: its references, citing papers and the links
/// among its references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl Graph {
    fn add_node(&mut self, seen: &mut HashSet<String>, node: GraphNode) {
        if seen.insert(node.id.clone()) {
            self.nodes.push(node);
        }
    }

    fn add_edge(&mut self, seen: &mut HashSet<(String, String)>, source: &str, target: &str) {
        if seen.insert((source.to_string(), target.to_string())) {
            self.edges.push(GraphEdge {
                source: source.to_string(),
                target: target.to_string(),
            });
        }
    }
}

/// Row of the combined references/citing-papers listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperListItem {
    pub id: String,
    pub title: String,
    pub authors: String,
    pub year: Option<i32>,
    pub citations: i64,
    pub cached: bool,
    pub is_ref: bool,
    pub is_citing: bool,
}

/// Outcome of [`CitationGraph::rebuild_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub papers: usize,
    pub edges: usize,
    pub failed: usize,
}

/// Citation queries and maintenance over the paper store.
#[derive(Debug, Clone)]
pub struct CitationGraph {
    store: PaperStore,
}

impl CitationGraph {
    #[must_use]
    pub fn new(store: PaperStore) -> Self {
        Self { store }
    }

    /// Replaces every outgoing edge of `paper_id` with edges to `refs`.
    ///
    /// Self-references and duplicates are dropped. An empty `refs` clears the
    /// paper's outgoing edges. Returns the number of edges written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the transaction fails; no edge
    /// changes are visible in that case.
    #[instrument(skip(self, refs), fields(paper_id = %paper_id, refs = refs.len()))]
    pub async fn update_citations(
        &self,
        paper_id: &str,
        refs: &[String],
    ) -> Result<usize, StoreError> {
        let mut tx = self.store.pool().begin().await?;
        let written = replace_edges(&mut *tx, paper_id, refs).await?;
        tx.commit().await?;
        debug!(written, "citations updated");
        Ok(written)
    }

    /// Extracts references from `source_dir` and stores them as edges.
    ///
    /// # Errors
    ///
    /// Returns [`CitationError::Extraction`] if the blocking task fails, or a
    /// store error if the edge update fails.
    #[instrument(skip(self), fields(paper_id = %paper_id, source_dir = %source_dir.display()))]
    pub async fn index_source(
        &self,
        paper_id: &str,
        source_dir: PathBuf,
    ) -> Result<Vec<String>, CitationError> {
        let id = paper_id.to_string();
        let refs = tokio::task::spawn_blocking(move || extract_references(&source_dir, &id))
            .await
            .map_err(|e| CitationError::Extraction {
                paper_id: paper_id.to_string(),
                message: e.to_string(),
            })?;
        self.update_citations(paper_id, &refs).await?;
        Ok(refs)
    }

    /// Number of recorded citation edges pointing at `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn cited_by_count(&self, id: &str) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM citations WHERE to_id = ?")
            .bind(id)
            .fetch_one(self.store.pool())
            .await?;
        Ok(count)
    }

    /// Papers cited by `id`, including ones with no local metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(paper_id = %id))]
    pub async fn references(&self, id: &str) -> Result<Vec<Reference>, StoreError> {
        let refs = sqlx::query_as::<_, Reference>(
            "SELECT c.to_id AS id,
                    COALESCE(p.title, '') AS title,
                    (p.id IS NOT NULL AND p.title != '') AS has_title,
                    COALESCE(p.src_downloaded, 0) AS has_source
             FROM citations c
             LEFT JOIN papers p ON c.to_id = p.id
             WHERE c.from_id = ?
             ORDER BY c.to_id DESC",
        )
        .bind(id)
        .fetch_all(self.store.pool())
        .await?;
        Ok(refs)
    }

    /// Cached papers citing `id`, newest first. A non-positive `limit` means
    /// [`DEFAULT_CITED_BY_LIMIT`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(paper_id = %id))]
    pub async fn cited_by(&self, id: &str, limit: i64) -> Result<Vec<CitingPaper>, StoreError> {
        let limit = if limit <= 0 { DEFAULT_CITED_BY_LIMIT } else { limit };
        let papers = sqlx::query_as::<_, CitingPaper>(
            "SELECT p.id, p.title
             FROM citations c
             JOIN papers p ON c.from_id = p.id
             WHERE c.to_id = ?
             ORDER BY p.created DESC, p.id DESC
             LIMIT ?",
        )
        .bind(id)
        .bind(limit)
        .fetch_all(self.store.pool())
        .await?;
        Ok(papers)
    }

    /// References of `id` with no cached metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn uncached_reference_count(&self, id: &str) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM citations c
             LEFT JOIN papers p ON c.to_id = p.id
             WHERE c.from_id = ? AND (p.id IS NULL OR p.title = '')",
        )
        .bind(id)
        .fetch_one(self.store.pool())
        .await?;
        Ok(count)
    }

    /// IDs of references of `id` that have no cached metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn uncached_references(&self, id: &str) -> Result<Vec<String>, StoreError> {
        let ids = sqlx::query_scalar(
            "SELECT c.to_id FROM citations c
             LEFT JOIN papers p ON c.to_id = p.id
             WHERE c.from_id = ? AND (p.id IS NULL OR p.title = '')
             ORDER BY c.to_id",
        )
        .bind(id)
        .fetch_all(self.store.pool())
        .await?;
        Ok(ids)
    }

    /// Builds the citation neighbourhood of `center`.
    ///
    /// A center with no local record still yields an uncached node.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if any query fails.
    #[instrument(skip(self), fields(paper_id = %center))]
    pub async fn build_graph(&self, center: &str) -> Result<Graph, StoreError> {
        let mut graph = Graph::default();
        let mut node_ids = HashSet::new();
        let mut edge_keys = HashSet::new();

        let center_paper = self.store.get_paper(center).await?;
        let center_node = self
            .node_for(center, center_paper.as_ref(), center_paper.is_some())
            .await?;
        graph.add_node(&mut node_ids, center_node);

        let refs = self.references(center).await?;
        for reference in &refs {
            let paper = if reference.has_title {
                self.store.get_paper(&reference.id).await?
            } else {
                None
            };
            let node = self
                .node_for(&reference.id, paper.as_ref(), reference.has_title)
                .await?;
            graph.add_node(&mut node_ids, node);
            graph.add_edge(&mut edge_keys, center, &reference.id);
        }

        for citing in self.cited_by(center, GRAPH_CITED_BY_LIMIT).await? {
            let paper = self.store.get_paper(&citing.id).await?;
            let node = self.node_for(&citing.id, paper.as_ref(), true).await?;
            graph.add_node(&mut node_ids, node);
            graph.add_edge(&mut edge_keys, &citing.id, center);
        }

        if !refs.is_empty() {
            let links: Vec<(String, String)> = sqlx::query_as(
                "SELECT from_id, to_id FROM citations
                 WHERE from_id IN (SELECT to_id FROM citations WHERE from_id = ?1)
                   AND to_id IN (SELECT to_id FROM citations WHERE from_id = ?1)
                 ORDER BY from_id, to_id",
            )
            .bind(center)
            .fetch_all(self.store.pool())
            .await?;
            for (from, to) in &links {
                graph.add_edge(&mut edge_keys, from, to);
            }
        }

        debug!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "built citation graph"
        );
        Ok(graph)
    }

    /// References followed by citing papers, flagged by relation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if any query fails.
    #[instrument(skip(self), fields(paper_id = %id))]
    pub async fn paper_list(&self, id: &str) -> Result<Vec<PaperListItem>, StoreError> {
        let mut items = Vec::new();

        for reference in self.references(id).await? {
            let paper = if reference.has_title {
                self.store.get_paper(&reference.id).await?
            } else {
                None
            };
            let node = self
                .node_for(&reference.id, paper.as_ref(), reference.has_title)
                .await?;
            items.push(list_item(node, true, false));
        }

        for citing in self.cited_by(id, GRAPH_CITED_BY_LIMIT).await? {
            let paper = self.store.get_paper(&citing.id).await?;
            let node = self.node_for(&citing.id, paper.as_ref(), true).await?;
            items.push(list_item(node, false, true));
        }

        Ok(items)
    }

    /// Clears every edge, then re-indexes each paper with a downloaded source.
    ///
    /// A paper whose re-index fails is logged and counted, never aborting the
    /// rebuild. Cancellation is checked between papers.
    ///
    /// # Errors
    ///
    /// Returns [`CitationError::Store`] if the edges cannot be cleared or the
    /// paper list cannot be read, and [`CitationError::Cancelled`] if `cancel`
    /// fires.
    #[instrument(skip(self, cancel))]
    pub async fn rebuild_all(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RebuildReport, CitationError> {
        sqlx::query("DELETE FROM citations")
            .execute(self.store.pool())
            .await
            .map_err(StoreError::from)?;

        let papers = self.store.papers_with_source().await?;
        info!(papers = papers.len(), "rebuilding citation graph");

        let mut report = RebuildReport::default();
        for (id, src_path) in papers {
            if cancel.is_cancelled() {
                return Err(CitationError::Cancelled);
            }
            match self.index_source(&id, PathBuf::from(src_path)).await {
                Ok(refs) => {
                    report.papers += 1;
                    report.edges += refs.len();
                }
                Err(e) => {
                    warn!(paper_id = %id, error = %e, "skipping paper during citation rebuild");
                    report.failed += 1;
                }
            }
        }

        info!(
            papers = report.papers,
            edges = report.edges,
            failed = report.failed,
            "citation rebuild complete"
        );
        Ok(report)
    }

    async fn node_for(
        &self,
        id: &str,
        paper: Option<&Paper>,
        cached: bool,
    ) -> Result<GraphNode, StoreError> {
        let citations = self.cited_by_count(id).await?;
        let node = match paper {
            Some(p) => GraphNode {
                id: id.to_string(),
                title: if p.title.is_empty() {
                    id.to_string()
                } else {
                    p.title.clone()
                },
                authors: p.authors.clone(),
                year: p.year(),
                citations,
                cached,
            },
            None => GraphNode {
                id: id.to_string(),
                title: id.to_string(),
                authors: String::new(),
                year: year_from_id(id),
                citations,
                cached: false,
            },
        };
        Ok(node)
    }
}

fn list_item(node: GraphNode, is_ref: bool, is_citing: bool) -> PaperListItem {
    PaperListItem {
        id: node.id,
        title: node.title,
        authors: node.authors,
        year: node.year,
        citations: node.citations,
        cached: node.cached,
        is_ref,
        is_citing,
    }
}

async fn replace_edges(
    conn: &mut SqliteConnection,
    paper_id: &str,
    refs: &[String],
) -> Result<usize, StoreError> {
    sqlx::query("DELETE FROM citations WHERE from_id = ?")
        .bind(paper_id)
        .execute(&mut *conn)
        .await?;

    let mut written = 0;
    for to_id in refs.iter().filter(|r| r.as_str() != paper_id) {
        let result = sqlx::query("INSERT OR IGNORE INTO citations (from_id, to_id) VALUES (?, ?)")
            .bind(paper_id)
            .bind(to_id)
            .execute(&mut *conn)
            .await?;
        written += usize::try_from(result.rows_affected()).unwrap_or(0);
    }
    Ok(written)
}

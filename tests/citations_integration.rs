//! Integration tests for reference extraction feeding the citation graph.

use std::fs;
use std::path::{Path, PathBuf};

use papercache_core::{ArtifactKind, CitationGraph, Database, Paper, PaperStore};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const CENTER: &str = "2401.00001";
const LEFT: &str = "2301.00001";
const RIGHT: &str = "2301.00002";

async fn setup() -> (PaperStore, CitationGraph) {
    let db = Database::new_in_memory().await.expect("in-memory db");
    let store = PaperStore::new(db, 100);
    for (id, title) in [(CENTER, "Center"), (LEFT, "Left"), (RIGHT, "Right")] {
        let paper = Paper {
            title: title.to_string(),
            authors: "Ada Lovelace".to_string(),
            categories: "cs.LG".to_string(),
            ..Paper::new(id)
        };
        store.upsert_paper(&paper).await.expect("seed paper");
    }
    let graph = CitationGraph::new(store.clone());
    (store, graph)
}

fn write_tree(root: &Path, id: &str, files: &[(&str, &str)]) -> PathBuf {
    let dir = root.join(id);
    for (name, body) in files {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }
    dir
}

#[tokio::test]
async fn test_graph_has_one_edge_per_relationship() {
    let (_store, graph) = setup().await;
    let tmp = TempDir::new().unwrap();

    let center = write_tree(
        tmp.path(),
        CENTER,
        &[("main.tex", "arXiv:2301.00001 and arXiv:2301.00002v2 and arXiv:2401.00001")],
    );
    let left = write_tree(
        tmp.path(),
        LEFT,
        &[
            ("main.tex", "Builds on arXiv:2301.00002."),
            ("refs.bib", "eprint = {2301.00002v3}"),
            ("sec/intro.tex", "As in arXiv:2301.00002v1 and arXiv:2301.00002."),
        ],
    );

    let refs = graph.index_source(CENTER, center).await.unwrap();
    assert_eq!(refs, [LEFT, RIGHT], "versions stripped, self dropped");
    graph.index_source(LEFT, left).await.unwrap();

    let built = graph.build_graph(CENTER).await.unwrap();

    assert_eq!(built.nodes.len(), 3);
    let mut edges: Vec<_> = built
        .edges
        .iter()
        .map(|e| (e.source.as_str(), e.target.as_str()))
        .collect();
    edges.sort_unstable();
    assert_eq!(edges, [(LEFT, RIGHT), (CENTER, LEFT), (CENTER, RIGHT)]);
    assert!(built.nodes.iter().all(|n| n.cached));
}

#[tokio::test]
async fn test_graph_for_unknown_center_is_uncached_node() {
    let (_store, graph) = setup().await;

    let built = graph.build_graph("hep-th/9901001").await.unwrap();

    assert_eq!(built.nodes.len(), 1);
    assert!(!built.nodes[0].cached);
    assert_eq!(built.nodes[0].year, Some(1999));
    assert!(built.edges.is_empty());
}

#[tokio::test]
async fn test_rebuild_all_reindexes_recorded_sources() {
    let (store, graph) = setup().await;
    let tmp = TempDir::new().unwrap();
    let center = write_tree(tmp.path(), CENTER, &[("main.tex", "arXiv:2301.00002")]);
    store
        .mark_artifact(CENTER, ArtifactKind::Source, center.to_str().unwrap())
        .await
        .unwrap();
    graph
        .update_citations(CENTER, &[LEFT.to_string()])
        .await
        .unwrap();

    let report = graph.rebuild_all(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.papers, 1);
    assert_eq!(report.edges, 1);
    let refs: Vec<_> = graph
        .references(CENTER)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(refs, [RIGHT]);
    assert_eq!(graph.cited_by_count(RIGHT).await.unwrap(), 1);
    assert_eq!(graph.cited_by_count(LEFT).await.unwrap(), 0);
}

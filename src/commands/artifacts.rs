//! Metadata fetch and artifact download handlers.

use anyhow::Result;
use papercache_core::{ArtifactKind, DownloadStats, Paper, PaperCache};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{ArtifactFlags, CategoryArgs, DownloadArgs, FetchArgs, QueueArgs};

/// Requested kinds, or both when the flags name none.
fn kinds_or_both(flags: ArtifactFlags) -> (bool, bool) {
    if flags.any() {
        (flags.want_pdf(), flags.want_source())
    } else {
        (true, true)
    }
}

fn print_paper(paper: &Paper) {
    println!("{}  {}", paper.id, paper.title);
    if !paper.authors.is_empty() {
        println!("    {}", paper.authors);
    }
    let year = paper.year().map(|y| y.to_string()).unwrap_or_default();
    println!("    {year}  {}  {}", paper.categories, paper.abs_url());
    for kind in [ArtifactKind::Pdf, ArtifactKind::Source] {
        if let Some(path) = paper.artifact_path(kind) {
            println!("    {kind}: {path}");
        }
    }
}

fn print_stats(label: &str, stats: &DownloadStats) {
    println!(
        "{label}: {} downloaded, {} already present, {} failed",
        stats.completed(),
        stats.skipped(),
        stats.failed()
    );
}

pub async fn run_fetch_command(
    cache: &PaperCache,
    args: &FetchArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut papers = Vec::with_capacity(args.ids.len());
    let mut failures = 0usize;
    for id in &args.ids {
        let outcome = if args.artifacts.any() {
            cache
                .fetch_with_artifacts(
                    id,
                    args.artifacts.want_pdf(),
                    args.artifacts.want_source(),
                    cancel,
                )
                .await
                .map(|(paper, _)| paper)
        } else {
            cache.fetch(id, cancel).await
        };
        match outcome {
            Ok(paper) => papers.push(paper),
            Err(e) if e.is_cancelled() => return Err(e.into()),
            Err(e) => {
                warn!(paper_id = %id, error = %e, "fetch failed");
                failures += 1;
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&papers)?);
    } else {
        for paper in &papers {
            print_paper(paper);
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} papers failed", args.ids.len());
    }
    Ok(())
}

pub async fn run_download_command(
    cache: &PaperCache,
    args: &DownloadArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let papers = cache.fetch_batch(&args.ids, cancel).await?;
    let (want_pdf, want_source) = kinds_or_both(args.artifacts);

    let mut queued = 0usize;
    for paper in &papers {
        for (wanted, kind) in [(want_pdf, ArtifactKind::Pdf), (want_source, ArtifactKind::Source)] {
            if wanted && !paper.has_artifact(kind) {
                cache
                    .store()
                    .enqueue_download(&paper.id, kind, args.priority)
                    .await?;
                queued += 1;
            }
        }
    }
    if papers.len() < args.ids.len() {
        warn!(
            unknown = args.ids.len() - papers.len(),
            "some identifiers are unknown to the catalog"
        );
    }
    info!(queued, "downloads queued");
    println!("Queued {queued} download(s); run `papercache queue` to process them");
    Ok(())
}

pub async fn run_category_command(
    cache: &PaperCache,
    args: &CategoryArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let (want_pdf, want_source) = kinds_or_both(args.artifacts);
    let stats = cache
        .pipeline()
        .download_category(&args.category, args.limit, want_pdf, want_source, cancel)
        .await?;
    print_stats(&args.category, &stats);
    Ok(())
}

pub async fn run_queue_command(
    cache: &PaperCache,
    args: &QueueArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let stats = cache
        .pipeline()
        .process_queue(cache.config().concurrency, args.limit, args.max_attempts, cancel)
        .await?;
    print_stats("queue", &stats);
    let remaining = cache.store().queue_depth().await?;
    if remaining > 0 {
        println!("{remaining} entr(ies) still queued");
    }
    Ok(())
}

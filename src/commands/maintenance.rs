//! Maintenance handlers: index rebuilds and statistics.

use anyhow::Result;
use papercache_core::PaperCache;
use tokio_util::sync::CancellationToken;

pub async fn run_rebuild_citations_command(
    cache: &PaperCache,
    cancel: &CancellationToken,
) -> Result<()> {
    let report = cache.citations().rebuild_all(cancel).await?;
    println!(
        "Rebuilt citations: {} paper(s), {} edge(s), {} failed",
        report.papers, report.edges, report.failed
    );
    Ok(())
}

pub async fn run_rebuild_index_command(cache: &PaperCache) -> Result<()> {
    cache.store().rebuild_fts_index().await?;
    println!("Full-text index rebuilt");
    Ok(())
}

pub async fn run_stats_command(cache: &PaperCache) -> Result<()> {
    let stats = cache.stats().await?;
    println!("Data directory:  {}", cache.root().display());
    println!("Papers:          {}", stats.total_papers);
    println!("PDFs:            {}", stats.pdf_downloaded);
    println!("Sources:         {}", stats.src_downloaded);
    println!("Queued:          {}", stats.queued);

    let categories = cache.store().list_categories().await?;
    if !categories.is_empty() {
        println!("Top categories:");
        for (category, count) in categories.iter().take(10) {
            println!("  {category:<16} {count}");
        }
    }
    Ok(())
}

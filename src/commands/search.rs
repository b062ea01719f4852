//! Search command handlers: full-text and PDF text search.

use anyhow::Result;
use papercache_core::PaperCache;
use tokio_util::sync::CancellationToken;

use crate::cli::{SearchArgs, SearchTextArgs};

pub async fn run_search_command(cache: &PaperCache, args: &SearchArgs) -> Result<()> {
    let query = args.query.join(" ");
    let papers = cache
        .searcher()
        .search(&query, args.category.as_deref(), args.limit)
        .await?;

    if papers.is_empty() {
        println!("No papers match \"{query}\".");
        return Ok(());
    }
    for paper in &papers {
        let category = paper.primary_category().unwrap_or("-");
        println!("{:<18} {:<10} {}", paper.id, category, paper.title);
    }
    Ok(())
}

pub async fn run_search_text_command(
    cache: &PaperCache,
    args: &SearchTextArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    if args.extract {
        let (extracted, failed) = cache.searcher().extract_missing_texts(cancel).await?;
        println!("Extracted text from {extracted} PDF(s), {failed} failed");
    }

    let query = args.query.join(" ");
    let matches = cache
        .searcher()
        .search_pdfs(&query, args.limit, args.fuzzy)
        .await?;

    if matches.is_empty() {
        println!("No PDF text matches \"{query}\".");
        return Ok(());
    }
    for found in &matches {
        println!("{}  (score {:.2})", found.paper_id, found.score);
        println!("    {}", found.context.replace('\n', " "));
    }
    Ok(())
}

//! Citation command handlers: references, citing papers and graphs.

use anyhow::Result;
use papercache_core::{PaperCache, PaperId};
use tokio_util::sync::CancellationToken;

use crate::cli::{CitedByArgs, GraphArgs, RefsArgs};

pub async fn run_refs_command(
    cache: &PaperCache,
    args: &RefsArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let id = PaperId::parse(&args.id)?;
    if args.prefetch {
        let fetched = cache
            .pipeline()
            .prefetch_reference_titles(id.as_str(), cancel)
            .await?;
        println!("Fetched metadata for {fetched} reference(s)");
    }

    let references = cache.citations().references(id.as_str()).await?;
    if references.is_empty() {
        println!("No references recorded for {id}.");
        return Ok(());
    }
    for reference in &references {
        let title = if reference.has_title {
            reference.title.as_str()
        } else {
            "(not cached)"
        };
        let source = if reference.has_source { " [src]" } else { "" };
        println!("{:<18} {title}{source}", reference.id);
    }

    let uncached = cache
        .citations()
        .uncached_reference_count(id.as_str())
        .await?;
    if uncached > 0 && !args.prefetch {
        println!("{uncached} reference(s) without metadata; use --prefetch to fetch them");
    }
    Ok(())
}

pub async fn run_cited_by_command(cache: &PaperCache, args: &CitedByArgs) -> Result<()> {
    let id = PaperId::parse(&args.id)?;
    let citing = cache.citations().cited_by(id.as_str(), args.limit).await?;
    let total = cache.citations().cited_by_count(id.as_str()).await?;

    println!("{id} is cited by {total} cached paper(s)");
    for paper in &citing {
        println!("{:<18} {}", paper.id, paper.title);
    }
    Ok(())
}

pub async fn run_graph_command(cache: &PaperCache, args: &GraphArgs) -> Result<()> {
    let id = PaperId::parse(&args.id)?;
    let json = if args.list {
        serde_json::to_string_pretty(&cache.citations().paper_list(id.as_str()).await?)?
    } else {
        serde_json::to_string_pretty(&cache.citations().build_graph(id.as_str()).await?)?
    };
    println!("{json}");
    Ok(())
}
